use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// A steady spinner with `msg`, or a hidden bar when not in tui mode.
pub(crate) fn spinner(tui: bool, msg: String) -> anyhow::Result<ProgressBar> {
    if !tui {
        return Ok(ProgressBar::hidden());
    }

    let pb = ProgressBar::new_spinner().with_message(msg).with_style(
        ProgressStyle::default_spinner().template("{spinner:.magenta} {msg} [{elapsed:.blue}]")?,
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}
