use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Installs the global tracing subscriber for the daemon.
///
/// Filter defaults to `info` and can be overridden through `RUST_LOG`
/// (e.g. `RUST_LOG=zaqar::storage=debug`).
pub fn init_logging() {
    let filter: EnvFilter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let formatting_layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_thread_ids(true)
        .with_target(true)
        .compact();

    let subscriber = Registry::default().with(filter).with(formatting_layer);

    // Tests may install their own subscriber first; losing that race is fine.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
