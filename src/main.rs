use std::{path::PathBuf, process::ExitCode};

use clap::Parser;

use foodgram_sdk::{actions::import_ingredients, config::Config, routes::routes, state::AppState};

#[derive(clap::Parser, Debug)]
#[command(name = "foodgram", about = "Recipe sharing API server")]
struct Cli {
    /// Defaults to `serve`.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run the HTTP API.
    Serve,
    /// Load `name,measurement_unit` rows from a CSV file.
    ImportIngredients {
        /// Headerless CSV file.
        path: PathBuf,
    },
}

async fn run(command: Command) -> Result<(), String> {
    let config = Config::load().map_err(|e| e.to_string())?;
    let state = AppState::from_config(&config)
        .await
        .map_err(|e| e.to_string())?;

    match command {
        Command::ImportIngredients { path } => {
            let data = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| format!("Could not read {}: {e}", path.display()))?;

            let added = import_ingredients(&data, &state.pool)
                .await
                .map_err(|e| e.to_string())?;
            log::info!("Imported {added} ingredients from {}", path.display());
            Ok(())
        }
        Command::Serve => {
            log::info!("Listening on {}", config.bind_addr);
            warp::serve(routes(state)).run(config.bind_addr).await;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    env_logger::init();

    match run(cli.command.unwrap_or(Command::Serve)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
