use crate::error::SourceError;
use async_trait::async_trait;
use chrono::NaiveDate;
use model::{core::watermark::Watermark, records::record::Record};

/// Parameters of one page request.
///
/// Retries of a failed request re-send the same `PageRequest`, so the page
/// token is never advanced by a retry.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Inclusive lower bound; `None` asks for the source's full history.
    pub watermark: Option<Watermark>,
    /// Upper bound of the reporting window, fixed for the whole job.
    pub until: NaiveDate,
    pub cursor: Option<String>,
}

/// One page as returned by the source, already flattened into records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// A paginated ad platform endpoint for a single entity.
#[async_trait]
pub trait AdSource: Send + Sync {
    /// Human readable endpoint description for logs.
    fn describe(&self) -> String;

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SourceError>;
}
