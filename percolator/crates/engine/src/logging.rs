use core_types::config::LoggingSection;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for the process using the provided config.
///
/// - Honors `logging.level` from config, falling back to `RUST_LOG` then `info`.
/// - Writes to stdout, json or text per `logging.format`.
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init_tracing_with_config(cfg: &LoggingSection) {
    let filter = EnvFilter::new(filter_directive(cfg));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if cfg.format.as_str() == "json" {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init()
    };

    if let Err(e) = result {
        static WARNED_ONCE: OnceLock<()> = OnceLock::new();
        // Common in tests when several engines initialize tracing.
        let msg = e.to_string();
        if !msg.contains("already set") && WARNED_ONCE.set(()).is_ok() {
            eprintln!("Tracing init failed (global subscriber already set?): {msg}");
        }
    }
}

fn filter_directive(cfg: &LoggingSection) -> String {
    if cfg.level.is_empty() {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())
    } else {
        cfg.level.clone()
    }
}
