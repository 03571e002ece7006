use testbench_core::TESTBENCH_LOG_VAR;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing::{debug, error, info, instrument, span, trace, warn, Level, Span};

/// Initialize the tracing system
///
/// The filter comes from `TESTBENCH_LOG`, then `RUST_LOG`, then the default
/// level (`debug` when `verbose` is set, `info` otherwise). Events go to stderr
/// so stdout stays free for reports.
pub fn init(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(TESTBENCH_LOG_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(default_level))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(is_tty())
        .compact()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

fn is_tty() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}

/// Create a span covering one environment's pipeline
pub fn pipeline_span(environment: &str) -> Span {
    span!(Level::INFO, "pipeline", environment = %environment)
}

/// Create a span for the entire run
pub fn run_span(environments: usize, jobs: usize) -> Span {
    span!(Level::INFO, "run", environments = %environments, jobs = %jobs)
}

/// Emit a structured event for a completed pipeline step
pub fn step_completed(environment: &str, step: &str, duration_ms: u128) {
    info!(
        environment = %environment,
        step = %step,
        duration_ms = %duration_ms,
        "step_completed"
    );
}

/// Emit a structured event for an image cache lookup
pub fn cache_event(environment: &str, hit: bool) {
    if hit {
        info!(environment = %environment, cache_hit = true, "image up to date");
    } else {
        info!(environment = %environment, cache_hit = false, "image stale, rebuilding");
    }
}
