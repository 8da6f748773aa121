use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "diskscope")]
#[command(about = "Analyze macOS disk usage and recommend what is safe to clean", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Scan the configured roots and rank cleanup candidates")]
    Analyze {
        #[arg(short, long = "root", help = "Scan this root instead of the configured list (repeatable)")]
        roots: Vec<String>,
        #[arg(short = 'n', long, help = "Number of largest directories to classify")]
        top: Option<usize>,
        #[arg(short = 'F', long, default_value = "human")]
        format: OutputFormat,
        #[arg(short, long)]
        out: Option<String>,
    },
    #[command(about = "Classify a single path")]
    Classify {
        path: String,
        #[arg(short = 'F', long, default_value = "human")]
        format: OutputFormat,
    },
    #[command(about = "Break down a system folder (Library, Caches, Logs, ...)")]
    Inspect {
        path: String,
        #[arg(short = 'F', long, default_value = "human")]
        format: OutputFormat,
        #[arg(long, help = "Rescan installed applications before looking for orphans")]
        refresh_apps: bool,
    },
    #[command(about = "Delete a path (dry run unless --execute)")]
    Delete {
        path: String,
        #[arg(long)]
        execute: bool,
        #[arg(long, help = "Remove directly instead of moving to the trash")]
        no_trash: bool,
    },
    #[command(about = "View deletion history")]
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
pub enum ConfigActions {
    #[command(about = "Show current configuration")]
    Show,
    #[command(about = "Set a configuration value")]
    Set {
        #[arg(short, long)]
        key: String,
        #[arg(short, long)]
        value: String,
    },
    #[command(about = "Add excluded path pattern")]
    AddExclude {
        #[arg(short, long)]
        path: String,
    },
    #[command(about = "Add a scan root")]
    AddRoot {
        #[arg(short, long)]
        path: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}
