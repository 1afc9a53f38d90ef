use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "CADENZA_LOG";

/// Installs the global fmt subscriber. `CADENZA_LOG` takes precedence over
/// the level given on the command line.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .ok();
}
