use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Sets the level of tracing.
    #[arg(short, long, global = true)]
    pub trace: Option<TraceLevel>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the warehouse tables that do not exist yet.
    Init,

    /// Transform extracted data and load it to the warehouse.
    Run {
        /// Specify the pipelines to run, in order.
        ///
        /// If no pipelines are provided, daily runs first, then quarterly.
        #[arg(short, long, value_delimiter = ',')]
        pipelines: Option<Vec<Pipeline>>,

        /// Directory of extracted JSON frames; overrides `DATA_DIR`.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Keep surrogate keys stable across runs, reusing the keys already in the warehouse.
        #[arg(long)]
        stable_keys: bool,
    },
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
#[clap(rename_all = "UPPERCASE")]
pub enum TraceLevel {
    DEBUG,
    ERROR,
    INFO,
    TRACE,
    WARN,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pipeline {
    /// Company & ratio dimensions, financial-ratio facts.
    Quarterly,

    /// Time dimension, stock-price facts.
    Daily,
}

impl Pipeline {
    pub fn name(&self) -> &'static str {
        match self {
            Pipeline::Quarterly => "quarterly",
            Pipeline::Daily => "daily",
        }
    }
}

#[test]
fn pipelines_parse_comma_separated() {
    let cli = Cli::parse_from(["stockwh", "run", "--pipelines", "quarterly,daily", "--stable-keys"]);
    match cli.command {
        Commands::Run {
            pipelines,
            stable_keys,
            data_dir,
        } => {
            assert_eq!(pipelines, Some(vec![Pipeline::Quarterly, Pipeline::Daily]));
            assert!(stable_keys);
            assert!(data_dir.is_none());
        }
        _ => panic!("expected run"),
    }
}

#[test]
fn trace_level_is_global() {
    let cli = Cli::parse_from(["stockwh", "init", "--trace", "DEBUG"]);
    assert_eq!(cli.trace, Some(TraceLevel::DEBUG));
    assert!(matches!(cli.command, Commands::Init));
}
