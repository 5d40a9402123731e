//! Logging setup shared by both binaries.
//!
//! Output always goes to stderr: a carrier's stdout may be the relayed data
//! path, and nothing but payload may appear there.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Filter directive enabling `level` for a binary target and the core crate.
pub fn default_filter(binary_target: &str, level: &str) -> String {
    format!("{binary_target}={level},pipebridge_core={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_binary_and_core() {
        assert_eq!(
            default_filter("pipebridge_listen", "debug"),
            "pipebridge_listen=debug,pipebridge_core=debug"
        );
    }
}
