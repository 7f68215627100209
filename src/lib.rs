pub mod agent;
pub mod client;
pub mod config;
pub mod desktop;
pub mod errors;
pub mod llm;

/// Initializes tracing from RUST_LOG, defaulting to info.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
