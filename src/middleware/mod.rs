pub mod request;
pub mod response;

pub use request::JsonBody;
pub use response::{ApiResponse, ApiResult};
