//! Logger setup for the tools and benches

/// Install env_logger, reading `RUST_LOG` and falling back to `info`.
///
/// Safe to call more than once; later calls are ignored.
///
/// ```
/// terrace::core::logging::init();
/// log::info!("loaded heightmap");
/// ```
pub fn init() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}
