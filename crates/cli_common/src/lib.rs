//! Logging setup shared by the cohort executables.
//!
//! Diagnostics go to stderr only: stdout belongs to the wire — the broker
//! prints worker statistics there and the client prints query replies.

/// Logging arguments common to every cohort binary.
#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// Tracing filter directives, e.g. `info`, `off`, or `warn,broker=debug`.
    #[arg(
        long = "log-filter",
        default_value = "warn",
        env = "COHORT_LOG",
        global = true
    )]
    pub filter: String,
}

/// Initializes logging, using the given args. Panics if called twice.
///
/// An interactive stderr gets compact text. A captured one — a worker's
/// stderr under the master, or any of the binaries under a supervisor —
/// gets one JSON event per line so the fields survive shipping.
pub fn init_logging(args: &LogArgs) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(&args.filter)
        .with_target(false);

    if atty::is(atty::Stream::Stderr) {
        builder.compact().init();
    } else {
        builder.json().flatten_event(true).init();
    }
}
