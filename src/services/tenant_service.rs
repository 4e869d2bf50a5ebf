use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::StoreError;

/// Longest business phone number accepted as a tenant key
const MAX_TENANT_KEY_LEN: usize = 64;

/// Registry entry for a tenant whose chat store has been ensured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantInfo {
    pub phone_number: String,
    pub database: String,
    pub created_at: DateTime<Utc>,
}

impl TenantInfo {
    pub fn new(phone_number: &str) -> Self {
        Self {
            phone_number: phone_number.to_string(),
            database: TenantService::database_name(phone_number),
            created_at: Utc::now(),
        }
    }
}

/// Tenant key rules shared by every store backend
pub struct TenantService;

impl TenantService {
    /// Validate a business phone number used as tenant key and return it trimmed
    pub fn validate_phone_number(phone_number: &str) -> Result<&str, StoreError> {
        let trimmed = phone_number.trim();
        if trimmed.is_empty() {
            return Err(StoreError::InvalidTenant("Business phone number is required.".to_string()));
        }
        if trimmed.len() > MAX_TENANT_KEY_LEN {
            return Err(StoreError::InvalidTenant(format!(
                "Business phone number must be at most {} characters",
                MAX_TENANT_KEY_LEN
            )));
        }
        if trimmed.chars().any(|c| c.is_control()) {
            return Err(StoreError::InvalidTenant(
                "Business phone number contains invalid characters".to_string(),
            ));
        }
        Ok(trimmed)
    }

    /// Hash tenant key to a consistent database name
    pub fn database_name(phone_number: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(phone_number.as_bytes());
        let hash = hasher.finalize();
        let hash_str = format!("{:x}", hash);

        // Use first 16 characters of hash for reasonable DB name length
        format!("tenant_{}", &hash_str[..16])
    }
}
