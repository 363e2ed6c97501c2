use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_FILTER: &str = "jverify=info,warn";
const QUIET_FILTER: &str = "warn";

/// Initialize logging facade with stderr output.
///
/// `RUST_LOG` wins over both defaults.
pub(crate) fn init_logging(quiet: bool) {
    let init_result = tracing_subscriber::registry()
        .with(filter_from_env(quiet))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    // a subscriber installed earlier keeps receiving events
    if let Err(error) = init_result {
        debug!(%error, "logging already initialized");
    }
}

fn filter_from_env(quiet: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(quiet)))
}

fn default_directives(quiet: bool) -> &'static str {
    if quiet { QUIET_FILTER } else { DEFAULT_FILTER }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_raises_default_level() {
        assert_eq!(default_directives(false), "jverify=info,warn");
        assert_eq!(default_directives(true), "warn");
    }

    #[test]
    fn default_directives_parse() {
        for quiet in [false, true] {
            let filter = EnvFilter::try_new(default_directives(quiet)).expect("filter");
            assert!(!filter.to_string().is_empty());
        }
    }

    #[test]
    fn init_logging_twice_is_harmless() {
        init_logging(true);
        init_logging(false);
    }
}
