mod cmd;

use bgawb::logging::Logger;
use bgawb::WorkbenchConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "bgawb",
    version,
    about = "Disposable test databases for board game projects"
)]
#[command(
    long_about = "bgawb creates, truncates and drops the throwaway databases used by\na game project's integration tests. Connection settings come from the\ntestDb section of bgaproject.yml, with TEST_DB_* environment variables\nas fallback."
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "BGAWB_JSON",
        help = "Enable JSON log output"
    )]
    json: bool,

    #[arg(
        long,
        global = true,
        default_value = ".",
        env = "BGAWB_PROJECT_DIR",
        help = "Project directory containing bgaproject.yml"
    )]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved test database settings as JSON (password masked)
    Config,

    /// Create a test database and load the base and project schemas
    Create {
        #[arg(
            long,
            help = "Database name (default: configured name or prefix plus random suffix)"
        )]
        name: Option<String>,
    },

    /// Empty every table of an existing test database
    Truncate {
        #[arg(long, required = true, help = "Database name")]
        name: String,
    },

    /// Drop an existing test database (only its tables when externally managed)
    Drop {
        #[arg(long, required = true, help = "Database name")]
        name: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let log = Arc::new(Logger::default_logger());
    if cli.json {
        log.set_json(true);
    }

    let result = WorkbenchConfig::read_from_directory(&cli.project_dir).and_then(|config| {
        match cli.command {
            Commands::Config => cmd::config::run(&log, &config),
            Commands::Create { name } => cmd::create::run(&log, &config, name),
            Commands::Truncate { name } => cmd::truncate::run(&log, &config, name),
            Commands::Drop { name } => cmd::drop::run(&log, &config, name),
        }
    });

    if let Err(e) = result {
        log.error(&e.to_string(), &[]);
        std::process::exit(1);
    }
}
