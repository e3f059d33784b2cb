//! Boundary with the extraction collaborator, which fetches provider data and hands it over
//! as [`Frame`]s.

use crate::error::EtlError;
use crate::frame::Frame;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Outcome of one extraction.
///
/// `NotYetAvailable` is a benign, retry-later condition (the quarter is not published yet,
/// no session has traded since the last load); it is kept apart from a genuine failure.
#[derive(Debug)]
pub enum Extract<T> {
    Ready(T),
    NotYetAvailable(String),
    Failed(EtlError),
}

impl<T> Extract<T> {
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Extract<U> {
        match self {
            Extract::Ready(data) => Extract::Ready(f(data)),
            Extract::NotYetAvailable(reason) => Extract::NotYetAvailable(reason),
            Extract::Failed(err) => Extract::Failed(err),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Extract::Ready(_))
    }
}

impl<T> From<crate::error::Result<T>> for Extract<T> {
    fn from(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(data) => Extract::Ready(data),
            Err(err) => Extract::Failed(err),
        }
    }
}

/// Everything the quarterly pipeline needs from the provider.
#[derive(Clone, Debug, Default)]
pub struct QuarterlyExtract {
    /// One raw ratio table per symbol, two-level labels.
    pub ratios: Vec<Frame>,
    pub overview: Frame,
    pub profile: Frame,
    /// The ratio-definition catalog.
    pub definitions: Frame,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn quarterly(&self) -> Extract<QuarterlyExtract>;

    /// Daily quotes dated `since` or later; every quote available when `since` is `None`.
    async fn daily(&self, since: Option<NaiveDate>) -> Extract<Frame>;
}

#[test]
fn map_keeps_the_tag() {
    let ready: Extract<usize> = Extract::Ready(2);
    assert!(matches!(ready.map(|n| n * 2), Extract::Ready(4)));

    let later: Extract<usize> = Extract::NotYetAvailable("q3 not published".to_string());
    assert!(matches!(later.map(|n| n * 2), Extract::NotYetAvailable(_)));

    let failed: Extract<usize> = Err(EtlError::EmptyInput("quotes")).into();
    assert!(!failed.is_ready());
}
