pub mod context;
pub mod http;
