use anyhow::Result;
use clap::{CommandFactory, Parser, ValueEnum};
use color_eyre::config::HookBuilder;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod handlers;

/// cosup - upload files to Tencent Cloud COS
#[derive(Parser, Debug)]
#[command(name = "cosup")]
#[command(version)]
#[command(about = "Upload files to Tencent Cloud COS under unique object keys", long_about = None)]
#[command(after_help = "Credentials are read from COS_SECRET_ID, COS_SECRET_KEY, COS_BUCKET and COS_REGION.")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Upload one or more files
    Upload(UploadArgs),

    /// Inspect the storage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Shell completion
    Completion {
        /// Shell type
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args, Debug)]
pub struct UploadArgs {
    /// Local files to upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Key prefix, e.g. "images/"
    #[arg(short, long, env = "COS_UPLOAD_FOLDER")]
    pub folder: Option<String>,

    /// Name placed before the unique part of each key
    #[arg(short, long)]
    pub name: Option<String>,

    /// Largest accepted file in bytes (default: 100 MiB)
    #[arg(long)]
    pub max_size: Option<u64>,

    /// Accepted MIME type, repeatable
    #[arg(long = "allow-type", value_name = "MIME")]
    pub allow_types: Vec<String>,

    /// Show a progress bar per file
    #[arg(short, long)]
    pub progress: bool,

    /// Number of files uploaded at the same time
    #[arg(short = 'j', long, default_value = "4", value_parser = clap::value_parser!(u16).range(1..=64))]
    pub jobs: u16,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show the current configuration, secret masked
    Show,
    /// Report missing configuration variables
    Check,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("Warning: Failed to install logger: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup error handling
    if let Err(e) = HookBuilder::default().install() {
        eprintln!("Warning: Failed to install error handler: {}", e);
    }

    // Parse CLI arguments
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Execute command
    match cli.command {
        Commands::Upload(args) => handlers::handle_upload(args).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => handlers::handle_config_show(),
            ConfigAction::Check => handlers::handle_config_check(),
        },
        Commands::Completion { shell } => handlers::handle_completion(shell, &mut Cli::command()),
    }
}
