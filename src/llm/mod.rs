pub mod provider;
pub mod providers;
pub mod sse_parser;
pub mod tools;
pub mod types;
