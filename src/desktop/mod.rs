pub mod backend;
pub mod http;
