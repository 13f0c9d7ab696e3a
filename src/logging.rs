use std::io;

use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt};

const VERBOSE_DIRECTIVES: [&str; 2] = ["tg_cli=debug", "tg=debug"];

/// Diagnostics go to stderr so stdout stays clean for command output.
pub fn init(filter: Option<&str>, verbose: bool) {
    let _ = fmt()
        .with_env_filter(build_filter(filter, verbose))
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

/// `filter` replaces the default of warnings only. `--verbose` turns on debug
/// output for this crate on top of either.
fn build_filter(filter: Option<&str>, verbose: bool) -> EnvFilter {
    let mut filter = filter
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    if verbose {
        for directive in VERBOSE_DIRECTIVES.iter().filter_map(|d| d.parse::<Directive>().ok()) {
            filter = filter.add_directive(directive);
        }
    }
    filter
}
