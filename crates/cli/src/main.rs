use crate::{
    commands::{CheckpointCommand, Commands, QuarantineCommand, SchemaCommand},
    env::EnvManager,
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use engine_config::settings::AdSyncConfig;
use engine_core::state::{StateStore, sled_store::SledStateStore};
use engine_runtime::execution::{SyncRequest, executor, factory};
use model::core::{identifiers::EntityId, watermark::Watermark};
use std::{path::Path, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod env;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(name = "adsync", version = "0.1.0", about = "Resilient ad platform sync")]
struct Cli {
    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match run(cli.command).await {
        Ok(code) => code.into(),
        Err(err) => {
            error!(error = %err, "Command failed");
            eprintln!("error: {err}");
            ExitCode::GeneralError.into()
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(command: Commands) -> Result<ExitCode, CliError> {
    match command {
        Commands::Sync {
            config,
            entities,
            since,
            env_file,
            output,
        } => {
            let config = engine_config::load(&config)?;
            let since = since
                .map(|raw| {
                    raw.parse::<Watermark>()
                        .map_err(|_| CliError::InvalidWatermark(raw))
                })
                .transpose()?;

            let mut env = EnvManager::from_process_env();
            if let Some(path) = env_file {
                let loaded = env.load_from_file(&path)?;
                info!(path = %path.display(), vars = loaded, "Loaded env file");
            }

            let shutdown = ShutdownCoordinator::new();
            shutdown.listen();

            let request = SyncRequest {
                entities: entities.into_iter().map(EntityId::new).collect(),
                since,
            };
            let reports = executor::run(
                &config,
                Arc::new(env.into_secret_store()),
                request,
                shutdown.cancel_token(),
            )
            .await?;

            match output {
                Some(path) => output::write_json(&reports, &path).await?,
                None => output::print_json(&reports)?,
            }

            Ok(shutdown.exit_code(&reports))
        }
        Commands::Checkpoint {
            command: CheckpointCommand::Show { config, entity },
        } => {
            let state = open_state(&config)?;
            let checkpoints = match entity {
                Some(id) => state
                    .load_checkpoint(&EntityId::new(id))
                    .await?
                    .into_iter()
                    .collect::<Vec<_>>(),
                None => state.list_checkpoints().await?,
            };
            output::print_json(&checkpoints)?;
            Ok(ExitCode::Success)
        }
        Commands::Schema {
            command:
                SchemaCommand::Show {
                    config,
                    entity,
                    version,
                },
        } => {
            let state = open_state(&config)?;
            let entity = EntityId::new(entity);
            match version {
                Some(version) => {
                    let schema = state.schema_version(&entity, version).await?.ok_or_else(|| {
                        CliError::NotFound(format!("schema version {version} of '{entity}'"))
                    })?;
                    output::print_json(&schema)?;
                }
                None => output::print_json(&state.list_schemas(&entity).await?)?,
            }
            Ok(ExitCode::Success)
        }
        Commands::Quarantine { command } => {
            match command {
                QuarantineCommand::List { config, entity } => {
                    let state = open_state(&config)?;
                    let entity = entity.map(EntityId::new);
                    let records = state.list_quarantine(entity.as_ref()).await?;
                    output::print_json(&records)?;
                }
                QuarantineCommand::Resolve { config, batch_id } => {
                    let state = open_state(&config)?;
                    let record = state.resolve_quarantine(&batch_id).await?;
                    info!(entity = %record.entity, batch_id = %record.batch_id, "Quarantine resolved");
                    output::print_json(&record)?;
                }
            }
            Ok(ExitCode::Success)
        }
        Commands::History {
            config,
            entity,
            limit,
        } => {
            let state = open_state(&config)?;
            let events = state.events(&EntityId::new(entity), limit).await?;
            output::print_json(&events)?;
            Ok(ExitCode::Success)
        }
        Commands::Validate { config } => {
            let config = engine_config::load(&config)?;
            print_summary(&config);
            Ok(ExitCode::Success)
        }
    }
}

fn open_state(config_path: &Path) -> Result<Arc<SledStateStore>, CliError> {
    let config = engine_config::load(config_path)?;
    Ok(factory::open_state(&config)?)
}

fn print_summary(config: &AdSyncConfig) {
    println!("Configuration is valid.");
    println!("{:<16} {}", "State", config.state.path.display());
    println!("{:<16} {:?}", "Staging", config.staging.kind);
    println!("{:<16} {:?}", "Warehouse", config.warehouse.kind);
    println!("Entities:");
    for id in config.entity_ids() {
        println!("  - {id}");
    }
}
