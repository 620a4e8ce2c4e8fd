//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Directive used when the caller passes none.
pub const DEFAULT_DIRECTIVE: &str = "trading_coordination=info";

/// Install a stderr `fmt` subscriber filtered by `RUST_LOG` plus
/// `default_directive`.
///
/// Returns `false` when a global subscriber was already installed. An
/// unparseable directive is ignored and only `RUST_LOG` applies.
pub fn init_tracing(default_directive: &str) -> bool {
    let mut filter = EnvFilter::from_default_env();
    match default_directive.parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("ignoring tracing directive '{}': {}", default_directive, e),
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
