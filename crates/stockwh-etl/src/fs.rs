use crate::error::{EtlError, Result};
use crate::extract::{Extract, Extractor, QuarterlyExtract};
use crate::frame::Frame;
use crate::time::parse_date;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use tracing::{debug, error, trace};

/// Reads a `.json` file from `path`.
pub async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    trace!("reading file path: {}", path.display());
    let file = tokio::fs::read(path).await.map_err(|err| {
        error!("failed to read {}, error({err})", path.display());
        err
    })?;
    trace!("file read; deserializing bytes ...");
    let data: T = serde_json::from_slice(&file)?;
    Ok(data)
}

/// Every `.json` file directly under `dir`, sorted by name; an absent directory has none.
async fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !tokio::fs::try_exists(dir).await? {
        trace!("{} does not exist", dir.display());
        return Ok(vec![]);
    }

    let mut files = vec![];
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// An [`Extractor`] over frames previously dumped to disk as JSON:
///
/// ```text
/// <root>/quarterly/ratios/<SYMBOL>.json
/// <root>/quarterly/overview.json
/// <root>/quarterly/profile.json
/// <root>/quarterly/definitions.json
/// <root>/daily/<anything>.json
/// ```
///
/// An empty (or absent) `ratios` directory means the quarter is not published yet; daily
/// quote files with no row on or after the requested date mean no new session.
#[derive(Clone, Debug)]
pub struct JsonDir {
    root: PathBuf,
}

impl JsonDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_quarterly(&self) -> Result<Option<QuarterlyExtract>> {
        let dir = self.root.join("quarterly");

        let paths = json_files(&dir.join("ratios")).await?;
        let ratios: Vec<Frame> = try_join_all(paths.iter().map(|path| read_json::<Frame>(path)))
            .await?
            .into_iter()
            .filter(|frame| !frame.is_empty())
            .collect();
        if ratios.is_empty() {
            return Ok(None);
        }

        let extract = QuarterlyExtract {
            ratios,
            overview: read_json(&dir.join("overview.json")).await?,
            profile: read_json(&dir.join("profile.json")).await?,
            definitions: read_json(&dir.join("definitions.json")).await?,
        };
        debug!(
            "quarterly extract read: {} ratio tables, {} companies, {} ratio definitions",
            extract.ratios.len(),
            extract.profile.len(),
            extract.definitions.len()
        );
        Ok(Some(extract))
    }

    async fn read_daily(&self, since: Option<NaiveDate>) -> Result<Frame> {
        let mut quotes: Option<Frame> = None;

        for path in json_files(&self.root.join("daily")).await? {
            let frame: Frame = read_json(&path).await?;
            match quotes.as_mut() {
                None => quotes = Some(frame),
                Some(acc) if acc.columns == frame.columns => acc.rows.extend(frame.rows),
                Some(_) => {
                    return Err(EtlError::UnexpectedField {
                        table: "quote",
                        field: format!("header of {}", path.display()),
                    })
                }
            }
        }

        let mut quotes = quotes.unwrap_or_default();
        if let Some(since) = since {
            quotes = keep_since(quotes, since)?;
        }
        debug!("{} quotes read", quotes.len());
        Ok(quotes)
    }
}

/// Drop quote rows dated before `since`.
fn keep_since(frame: Frame, since: NaiveDate) -> Result<Frame> {
    let time = frame.require("quote", "time")?;

    let mut kept = Frame::new(frame.columns.clone());
    for (row, cells) in frame.rows.iter().enumerate() {
        let date = match frame.text("quote", row, time)? {
            Some(raw) => parse_date(&raw)?,
            None => continue,
        };
        if date >= since {
            kept.push_row(cells.clone());
        }
    }
    Ok(kept)
}

#[async_trait]
impl Extractor for JsonDir {
    fn source_name(&self) -> &'static str {
        "json files"
    }

    async fn quarterly(&self) -> Extract<QuarterlyExtract> {
        match self.read_quarterly().await {
            Ok(Some(extract)) => Extract::Ready(extract),
            Ok(None) => Extract::NotYetAvailable("no quarterly ratio data yet".to_string()),
            Err(err) => Extract::Failed(err),
        }
    }

    async fn daily(&self, since: Option<NaiveDate>) -> Extract<Frame> {
        match self.read_daily(since).await {
            Ok(quotes) if quotes.is_empty() => Extract::NotYetAvailable(match since {
                Some(since) => format!("no quotes on or after {since}"),
                None => "no quotes".to_string(),
            }),
            Ok(quotes) => Extract::Ready(quotes),
            Err(err) => Extract::Failed(err),
        }
    }
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////
