
use std::path::PathBuf;

use anyhow::Context;
use bugs::{ExceptionBreak, InitialBreak, SessionConfig};
use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::error::{BugsError, Result};
use crate::output::OutputFormat;
use crate::repl::parse_breakpoint;

fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Yellow.on_default().bold())
		.usage(AnsiColor::Yellow.on_default().bold())
		.literal(AnsiColor::Green.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.valid(AnsiColor::Green.on_default())
}

#[derive(Parser, Debug)]
#[command(name = "bugs")]
#[command(about = "Interactive debugger for Node.js scripts and Chrome pages")]
#[command(version)]
#[command(styles = styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: text (default) or json (one event per line)
	#[arg(short = 'f', long, global = true, value_enum, default_value = "text")]
	pub format: OutputFormat,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Debug a Node.js script
	Node(NodeArgs),

	/// Debug a page in Chrome
	Chrome(ChromeArgs),

	/// Start a session described by a JSON config file
	Config(ConfigArgs),
}

/// Options shared by every session kind.
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
	/// Debugger port (default 5858 for node, 9222 for chrome)
	#[arg(short, long)]
	pub port: Option<u16>,

	/// Debugger host
	#[arg(long, value_name = "HOST")]
	pub host: Option<String>,

	/// Runtime executable to launch
	#[arg(long, value_name = "PATH")]
	pub binary: Option<PathBuf>,

	/// Working directory of the debuggee
	#[arg(long, value_name = "DIR")]
	pub cwd: Option<PathBuf>,

	/// Environment variable for the debuggee (repeatable)
	#[arg(short, long = "env", value_name = "KEY=VALUE")]
	pub env: Vec<String>,

	/// Breakpoint as FILE:LINE, optionally followed by `if CONDITION` (repeatable)
	#[arg(short, long = "break", value_name = "FILE:LINE")]
	pub breakpoints: Vec<String>,

	/// Which exceptions pause execution
	#[arg(long, value_enum)]
	pub exceptions: Option<ExceptionArg>,

	/// Stay paused at the first statement
	#[arg(long)]
	pub stop_on_entry: bool,

	/// Attach to a debuggee that is already listening
	#[arg(long)]
	pub attach: bool,

	/// Connection attempts before giving up
	#[arg(long, value_name = "N")]
	pub connect_attempts: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
	/// Script to run
	pub file: PathBuf,

	/// Arguments passed to the script
	#[arg(last = true)]
	pub args: Vec<String>,

	/// Flag that enables the debug agent
	#[arg(long, value_name = "FLAG")]
	pub debug_flag: Option<String>,

	#[command(flatten)]
	pub session: SessionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ChromeArgs {
	/// Page to open; its origin is mapped onto local sources
	#[arg(long)]
	pub url: Option<String>,

	/// Served directory, relative to --cwd
	#[arg(long, value_name = "DIR")]
	pub sources: Option<PathBuf>,

	/// Local directory the page URL maps to (overrides --sources)
	#[arg(long, value_name = "DIR")]
	pub source_maps: Option<PathBuf>,

	/// Extra browser arguments
	#[arg(last = true)]
	pub args: Vec<String>,

	#[command(flatten)]
	pub session: SessionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
	/// JSON file with camelCase session settings
	pub file: PathBuf,

	/// Breakpoint as FILE:LINE (repeatable)
	#[arg(short, long = "break", value_name = "FILE:LINE")]
	pub breakpoints: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ExceptionArg {
	None,
	Uncaught,
	All,
}

impl From<ExceptionArg> for ExceptionBreak {
	fn from(arg: ExceptionArg) -> Self {
		match arg {
			ExceptionArg::None => ExceptionBreak::None,
			ExceptionArg::Uncaught => ExceptionBreak::Uncaught,
			ExceptionArg::All => ExceptionBreak::All,
		}
	}
}

impl SessionArgs {
	fn apply(&self, config: &mut SessionConfig) -> Result<()> {
		if self.port.is_some() {
			config.port = self.port;
		}
		if self.host.is_some() {
			config.hostname = self.host.clone();
		}
		if self.binary.is_some() {
			config.binary = self.binary.clone();
		}
		if self.cwd.is_some() {
			config.cwd = self.cwd.clone();
		}
		for pair in &self.env {
			let (key, value) = pair
				.split_once('=')
				.filter(|(key, _)| !key.is_empty())
				.ok_or_else(|| BugsError::Usage(format!("expected KEY=VALUE, got `{pair}`")))?;
			config.env.insert(key.to_string(), value.to_string());
		}
		if let Some(exceptions) = self.exceptions {
			config.exception_break = exceptions.into();
		}
		if self.stop_on_entry {
			config.initial_break = Some(InitialBreak::Stop);
		}
		config.attach |= self.attach;
		if self.connect_attempts.is_some() {
			config.connect_attempts = self.connect_attempts;
		}
		Ok(())
	}
}

/// What to debug and where to stop first.
#[derive(Debug)]
pub struct Plan {
	pub config: SessionConfig,
	pub breakpoints: Vec<bugs::BreakpointSpec>,
}

impl Commands {
	/// Resolves arguments (and the config file, if any) into a session plan.
	pub fn plan(&self) -> Result<Plan> {
		let (config, breakpoints) = match self {
			Commands::Node(args) => {
				let mut config = SessionConfig::node(&args.file);
				config.args = args.args.clone();
				if let Some(flag) = &args.debug_flag {
					config.debug_flag = flag.clone();
				}
				args.session.apply(&mut config)?;
				(config, &args.session.breakpoints)
			}
			Commands::Chrome(args) => {
				let mut config = SessionConfig::browser(args.url.clone());
				config.args = args.args.clone();
				config.sources = args.sources.clone();
				config.source_maps = args.source_maps.clone();
				args.session.apply(&mut config)?;
				(config, &args.session.breakpoints)
			}
			Commands::Config(args) => {
				let text = std::fs::read_to_string(&args.file)
					.with_context(|| format!("reading config {}", args.file.display()))?;
				let config: SessionConfig = serde_json::from_str(&text).map_err(|source| BugsError::Config {
					path: args.file.clone(),
					source,
				})?;
				(config, &args.breakpoints)
			}
		};

		let breakpoints = breakpoints
			.iter()
			.map(|b| parse_breakpoint(b))
			.collect::<Result<Vec<_>>>()?;
		Ok(Plan { config, breakpoints })
	}
}
