// Logging setup
//
// RUST_LOG takes precedence; otherwise LOG_LEVEL sets the level for the
// crawlfleet crates. Logs go to stderr so stdout stays parseable with
// --output json/yaml.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if quiet {
            "warn".to_string()
        } else {
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
        };
        EnvFilter::new(format!("crawlfleet_pool={level},crawlfleet={level}"))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init();
}
