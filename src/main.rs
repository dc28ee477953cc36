use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use highlander_herd::{config, observability, run, store::PgStore, sync::TokenAuthority};
use log::info;

#[derive(Parser)]
#[command(name = "herd", about = "Highland herd records API with offline sync")]
struct Cli {
	/// Extra JSON config file layered above the standard locations
	#[arg(long, global = true, env = "HRD_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Run the API server (default)
	Run,
	/// Apply the database schema and exit
	Migrate,
	/// Print a signed access token for local development
	IssueToken {
		#[arg(long)]
		user_id: i64,
		#[arg(long)]
		username: String,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let settings = config::load_with(cli.config.as_deref()).context("failed to load config")?;
	observability::init_logging(settings.log_level)?;

	match cli.command.unwrap_or(Commands::Run) {
		Commands::Run => {
			info!(
				"loaded settings: host={} port={}",
				settings.host, settings.port
			);
			run(settings).await
		}
		Commands::Migrate => {
			if settings.uses_memory_store() {
				anyhow::bail!("migrate needs a postgres database_url, not memory://");
			}
			let store = PgStore::connect(settings.database_url.as_str(), 1)
				.await
				.context("failed to connect to the database")?;
			store.migrate().await.context("failed to apply the herd schema")?;
			info!("herd schema is up to date");
			Ok(())
		}
		Commands::IssueToken { user_id, username } => {
			let token = TokenAuthority::from_settings(&settings).issue(user_id, &username)?;
			println!("{}", token);
			Ok(())
		}
	}
}
