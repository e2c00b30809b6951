//! Command-line front end for the `bugs` debugger.
//!
//! Parses arguments into a session plan, starts the session and hands it to
//! the interactive loop in [`repl`].

pub mod cli;
pub mod error;
pub mod logging;
pub mod output;
pub mod repl;

use bugs::Session;
use tokio::io::BufReader;
use tracing::info;

use crate::cli::Cli;
use crate::error::{BugsError, Result};
use crate::output::Printer;

pub async fn run(cli: Cli) -> Result<()> {
	let plan = cli.command.plan()?;
	let mut printer = Printer::stdout(cli.format);

	let session = Session::new(plan.config);
	let mut events = session.events();
	for spec in plan.breakpoints {
		let pending = session.add_breakpoint(spec)?;
		info!(key = %pending.key, "Queued breakpoint");
	}

	if let Err(err) = session.start().await {
		// The session already reported the failure as an error event.
		repl::drain(&mut printer, &mut events);
		return Err(match printer.format() {
			output::OutputFormat::Text => BugsError::OutputAlreadyPrinted,
			output::OutputFormat::Json => err.into(),
		});
	}

	let stdin = BufReader::new(tokio::io::stdin());
	tokio::select! {
		result = repl::run(&session, &mut printer, events, stdin) => result,
		_ = tokio::signal::ctrl_c() => {
			info!("Interrupted");
			session.destroy().await;
			Ok(())
		}
	}
}
