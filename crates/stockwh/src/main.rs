mod cli;
mod runner;
mod tui;

// remote imports
use clap::Parser;
use cli::{Cli, Pipeline, TraceLevel};
use stockwh_etl::fs::JsonDir;
use stockwh_etl::pipeline::KeyAssignment;
use stockwh_etl::{Config, Warehouse};
use tracing::{debug, subscriber, trace, Level};
use tracing_subscriber::FmtSubscriber;

////////////////////////////////////////////////////////////////////////////

// preproccess the trace level
fn preprocess(trace_level: Level) -> anyhow::Result<()> {
    let my_subscriber = FmtSubscriber::builder()
        .with_max_level(trace_level)
        .finish();
    subscriber::set_global_default(my_subscriber)?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // set the trace level
    if let Some(trace_level) = cli.trace {
        preprocess(match trace_level {
            TraceLevel::DEBUG => Level::DEBUG,
            TraceLevel::ERROR => Level::ERROR,
            TraceLevel::INFO => Level::INFO,
            TraceLevel::TRACE => Level::TRACE,
            TraceLevel::WARN => Level::WARN,
        })?;
    }
    trace!("command line input recorded: {cli:?}");

    // if no trace level provided, use tui
    let tui = cli.trace.is_none();

    let config = Config::from_env()?;
    let warehouse = Warehouse::connect(&config)?;

    // read cli inputs
    use cli::Commands::*;
    let result = match cli.command {
        // `stockwh init`: create the warehouse tables
        Init => {
            let pb = tui::spinner(tui, "creating warehouse tables ...".to_string())?;
            let result = warehouse.bootstrap().await;
            pb.finish_and_clear();
            if tui && result.is_ok() {
                println!("creating warehouse tables ... done");
            }
            result.map_err(anyhow::Error::from)
        }

        // `stockwh run <Option<Vec<Pipeline>>>`: run pipelines
        Run {
            pipelines,
            data_dir,
            stable_keys,
        } => {
            let data_dir = data_dir.unwrap_or(config.data_dir.clone());
            debug!("reading extracted data from {}", data_dir.display());
            let extractor = JsonDir::new(data_dir);

            let assignment = match stable_keys {
                true => KeyAssignment::Registry,
                false => KeyAssignment::Positional,
            };

            // if no pipelines provided, run all
            let pipelines = pipelines.unwrap_or(vec![Pipeline::Daily, Pipeline::Quarterly]);
            runner::run(&warehouse, &extractor, pipelines, assignment, tui).await
        }
    };

    warehouse.close();
    result
}
