pub mod user;

pub use user::create as create_user;
pub use user::fetch as fetch_user;
