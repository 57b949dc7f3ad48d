use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

mod throttle;

pub use throttle::{LogThrottle, ThrottleDecision};

fn build_subscriber() -> impl tracing::Subscriber + Send + Sync {
    let filter: EnvFilter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let formatting_layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .compact();

    Registry::default().with(filter).with(formatting_layer)
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info`
/// filter; stats lines use the `amq_monitor::stats_log` target.
pub fn init_logging() {
    tracing::subscriber::set_global_default(build_subscriber())
        .expect("Failed to set global subscriber");
}

/// Like [`init_logging`], but reports an already-installed subscriber
/// instead of panicking.
pub fn try_init_logging() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    tracing::subscriber::set_global_default(build_subscriber())
}
