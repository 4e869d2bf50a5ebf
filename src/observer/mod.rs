// Change notification observer: one upstream change subscription per tenant,
// fanned out to every connected push-feed client.

pub mod feed;

// Re-export core types
pub use feed::{ChangeEvent, ChangeFeed, ChangeSubscription};
