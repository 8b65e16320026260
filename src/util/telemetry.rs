//! Telemetry helpers for structured logging and tracing.

/// Initialize tracing/telemetry. Users can install their own subscriber;
/// this helper installs a default env-based subscriber if none is set.
/// Worker thread names are included in events, since per-worker
/// attribution is the interesting part of a pool trace.
pub fn init_tracing() {
    // Pick up RUST_LOG from a local .env in dev runs.
    let _ = dotenvy::dotenv();
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}
