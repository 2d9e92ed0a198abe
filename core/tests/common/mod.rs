use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes a tracing subscriber once per test binary.
pub fn init_test_logger() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

pub use serial_test::serial;
pub use tempfile;
pub use wiremock;
