use tracing_subscriber::EnvFilter;

use crate::ConvergeConfig;

/// Install a global fmt subscriber. `RUST_LOG` wins over the configured
/// filter. Safe to call more than once; later calls are no-ops.
pub fn init(config: &ConvergeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Subscriber for test binaries: output goes through the test writer so
/// it is captured per test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
