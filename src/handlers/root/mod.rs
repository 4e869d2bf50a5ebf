pub mod tenant;

pub use tenant::list as tenant_list;
