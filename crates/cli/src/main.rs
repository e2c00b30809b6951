use bugs_cli::{cli::Cli, error::BugsError, logging, output::OutputFormat, output::Printer};
use clap::Parser;
use colored::Colorize;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let format = cli.format;

	if let Err(err) = bugs_cli::run(cli).await {
		if !err.is_output_already_printed() {
			handle_error(err, format);
		}
		std::process::exit(1);
	}
}

fn handle_error(err: BugsError, format: OutputFormat) {
	match format {
		OutputFormat::Text => eprintln!("{} {err}", "error:".red().bold()),
		OutputFormat::Json => Printer::stdout(format).error("bugs", &err),
	}
}
