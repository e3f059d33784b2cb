use crate::cli::Pipeline;
use crate::tui;
use stockwh_etl::extract::Extractor;
use stockwh_etl::pipeline::{self, KeyAssignment};
use stockwh_etl::{PipelineOutcome, Warehouse};
use tracing::{error, info, warn};

/// Run the selected pipelines in order.
///
/// A pipeline that fails does not stop the ones after it; the run as a whole fails if any
/// of them did. A skipped pipeline is not a failure.
pub(crate) async fn run(
    warehouse: &Warehouse,
    extractor: &dyn Extractor,
    pipelines: Vec<Pipeline>,
    assignment: KeyAssignment,
    tui: bool,
) -> anyhow::Result<()> {
    let time = std::time::Instant::now();
    let mut failures = vec![];

    for selected in pipelines {
        let name = selected.name();
        let time = std::time::Instant::now();
        let pb = tui::spinner(tui, format!("running {name} pipeline ..."))?;

        let outcome = match selected {
            Pipeline::Quarterly => pipeline::run_quarterly(warehouse, extractor, assignment).await,
            Pipeline::Daily => pipeline::run_daily(warehouse, extractor).await,
        };
        pb.finish_and_clear();

        match outcome {
            Ok(PipelineOutcome::Completed(report)) => {
                info!("{name} pipeline completed, time elapsed: {:?}", time.elapsed());
                if tui {
                    println!("{report}");
                }
            }
            Ok(PipelineOutcome::Skipped(reason)) => {
                warn!("{name} pipeline skipped: {reason}");
                if tui {
                    println!("{name} pipeline skipped: {reason}");
                }
            }
            Err(err) => {
                error!("{name} pipeline failed, error({err})");
                if tui {
                    println!("{name} pipeline failed: {err}");
                }
                failures.push(format!("{name}: {err}"));
            }
        }
    }

    info!("pipelines finished, time elapsed: {:?}", time.elapsed());

    if !failures.is_empty() {
        anyhow::bail!("{} pipeline(s) failed; {}", failures.len(), failures.join("; "));
    }
    Ok(())
}
