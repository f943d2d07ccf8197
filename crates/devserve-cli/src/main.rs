mod config;

use std::error::Error;

use clap::Parser;
use devserve::{CommandProbe, OutputCapture, ReloadOrchestrator, ServerLauncher, Supervisor};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use crate::config::Args;

fn main() {
	let args = Args::parse();
	init_tracing(args.verbose);

	let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
		Ok(rt) => rt,
		Err(e) => fail(&e),
	};

	if let Err(e) = runtime.block_on(run(args)) {
		fail(&*e);
	}
}

fn init_tracing(verbose: bool) {
	let default = if verbose { "devserve=debug" } else { "devserve=info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();
}

fn fail(e: &dyn Error) -> ! {
	eprintln!("{} {}", "error:".red().bold(), e);
	std::process::exit(1);
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
	let project = config::load_project_config(&std::env::current_dir()?)?;
	let resolved = config::resolve(&args, &project, &CommandProbe::platform())?;
	let server = resolved.server;
	let command = server.command();

	eprintln!(
		"{} starting PHP built-in webserver on {}",
		"devserve".bold(),
		server.url().cyan().underline()
	);
	tracing::info!(command = %command.join(" "), "document root {}", server.document_root.display());
	if server.auto_reload {
		for path in &resolved.watched {
			tracing::debug!("watching {}", path.display());
		}
	}

	let launcher = ServerLauncher {
		supervisor: Supervisor::new(
			OutputCapture::tracing(server.verbose),
			server.timing.stop_timeout,
			server.verbose,
		),
		command,
		cwd: server.document_root.clone(),
	};

	ReloadOrchestrator::new(launcher, resolved.env, resolved.watched, server.auto_reload, server.timing)
		.run()
		.await?;
	Ok(())
}
