// dsr-common/src/logging.rs
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "DSR_LOG";

/// Maps a `-v` style verbosity count onto a level filter.
pub fn level_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs a stderr fmt subscriber filtered by `DSR_LOG`, defaulting to the
/// level implied by `verbose`. Returns `false` if a global subscriber was
/// already installed (host applications usually own logging).
pub fn init_tracing(verbose: u8) -> bool {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_for_verbosity(verbose).into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .without_time()
        .try_init()
        .is_ok()
}

/// Subscriber for tests: writes through the libtest capture and never fails
/// when several tests race to install it.
pub fn init_test_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .without_time()
        .try_init();
}
