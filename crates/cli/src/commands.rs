use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run sync jobs for the configured entities
    Sync {
        #[arg(long, help = "Config file path")]
        config: PathBuf,

        #[arg(
            long = "entity",
            help = "Entity id to sync, e.g. facebook_ads.campaigns; repeatable, defaults to all"
        )]
        entities: Vec<String>,

        #[arg(long, help = "Start from this watermark instead of the stored checkpoint")]
        since: Option<String>,

        #[arg(long, help = "Load credentials from this .env file")]
        env_file: Option<PathBuf>,

        #[arg(
            long,
            help = "If specified, writes the JSON reports to this file instead of stdout"
        )]
        output: Option<PathBuf>,
    },
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
    Schema {
        #[command(subcommand)]
        command: SchemaCommand,
    },
    Quarantine {
        #[command(subcommand)]
        command: QuarantineCommand,
    },
    /// Show journal events for an entity
    History {
        #[arg(long, help = "Config file path")]
        config: PathBuf,

        #[arg(long)]
        entity: String,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Load and validate a config file
    Validate {
        #[arg(long, help = "Config file path")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum CheckpointCommand {
    Show {
        #[arg(long, help = "Config file path")]
        config: PathBuf,

        #[arg(long)]
        entity: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum SchemaCommand {
    Show {
        #[arg(long, help = "Config file path")]
        config: PathBuf,

        #[arg(long)]
        entity: String,

        #[arg(long, help = "Show only this version")]
        version: Option<u32>,
    },
}

#[derive(Subcommand)]
pub enum QuarantineCommand {
    List {
        #[arg(long, help = "Config file path")]
        config: PathBuf,

        #[arg(long)]
        entity: Option<String>,
    },
    /// Mark a quarantined batch as resolved; the record is kept
    Resolve {
        #[arg(long, help = "Config file path")]
        config: PathBuf,

        #[arg(long = "batch")]
        batch_id: String,
    },
}
