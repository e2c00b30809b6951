use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Logs go to stderr so they never interleave with REPL output parsing.
pub fn init_logging(verbosity: u8) {
	// 0 = errors only, protocol chatter from the library suppressed
	// 1 (-v) = info for the CLI and session lifecycle
	// 2+ (-vv) = debug for everything, including each request
	let filter = match verbosity {
		0 => "error,bugs_runtime=off",
		1 => "info,bugs_runtime=warn",
		_ => "debug",
	};

	let env_filter = EnvFilter::try_from_env("BUGS_LOG").unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(verbosity > 1)
		.with_level(true)
		.compact()
		.init();
}
