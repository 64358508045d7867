// Tracing subscriber setup
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `filter` when set.
pub fn setup_logging(filter: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    // try_init: tests and --once runs may install twice
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("Logging already initialised: {}", e);
    }
}
