// Logging bootstrap for binaries
//
// Library code only uses the `log` macros; the host application decides
// where records go. RUST_LOG overrides the default level.

use std::sync::Once;

const DEFAULT_FILTER: &str = "info";

static INIT: Once = Once::new();

/// Install env_logger once per process; later calls are no-ops
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Install env_logger with `filter` unless RUST_LOG is set
pub fn init_with_filter(filter: &str) {
    INIT.call_once(|| {
        let env = env_logger::Env::default().default_filter_or(filter);
        if let Err(err) = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .try_init()
        {
            eprintln!("Logger already installed: {}", err);
        }
    });
}
