//! Forward-only pagination over the records of a partition
//!
//! Records are fetched in ascending id order with the predicate `id > cursor`.
//! After filtering, records without a public URL are dropped from the page
//! but their ids still advance the cursor.

use std::collections::BTreeMap;
use url::Url;

use crate::database::RecordStore;
use crate::error::{AppError, SyncError};
use crate::models::{MetricSnapshot, Partition};
use crate::providers::PageItem;

/// Last id seen in a partition; `None` is the minimum sentinel
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor(Option<String>);

impl Cursor {
    /// Cursor positioned before the first record
    pub fn start() -> Self {
        Self(None)
    }

    /// Cursor positioned after `id`
    pub fn after(id: impl Into<String>) -> Self {
        Self(Some(id.into()))
    }

    /// Last id seen, if any
    pub fn last_id(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Lower bound for the next query; the empty string sorts before every id
    fn lower_bound(&self) -> &str {
        self.0.as_deref().unwrap_or("")
    }

    /// Owned form, as persisted in the resume state
    pub fn into_inner(self) -> Option<String> {
        self.0
    }
}

/// A record of the page that carries an absolute public URL
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleRecord {
    /// Record id
    pub id: String,
    /// Absolute public URL
    pub url: String,
    /// Snapshots stored before this run touched the record
    pub metrics: BTreeMap<String, MetricSnapshot>,
}

impl EligibleRecord {
    /// The part of the record a provider needs
    pub fn to_item(&self) -> PageItem {
        PageItem::new(self.id.clone(), self.url.clone())
    }
}

/// One fetched page
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Eligible records of the page, in id order
    pub items: Vec<EligibleRecord>,
    /// Cursor after this page
    pub next: Cursor,
    /// False once the store returned no record at all
    pub has_more: bool,
}

/// Fetch the page following `cursor`
///
/// Relative URLs are resolved against `base_url`. A relative URL with no
/// base URL configured is a configuration error.
pub async fn next_page<S: RecordStore + ?Sized>(
    store: &S,
    partition: &Partition,
    cursor: &Cursor,
    page_size: usize,
    base_url: Option<&Url>,
) -> Result<Page, AppError> {
    let records = store
        .fetch_after(partition, cursor.lower_bound(), page_size)
        .await?;

    let Some(last) = records.last() else {
        return Ok(Page {
            items: Vec::new(),
            next: cursor.clone(),
            has_more: false,
        });
    };
    let next = Cursor::after(last.id.clone());

    let mut items = Vec::with_capacity(records.len());
    for record in records {
        let Some(public_url) = record.public_url.filter(|url| !url.is_empty()) else {
            continue;
        };

        items.push(EligibleRecord {
            url: absolute_url(&public_url, base_url)?,
            id: record.id,
            metrics: record.popularity_metrics,
        });
    }

    Ok(Page {
        items,
        next,
        has_more: true,
    })
}

fn absolute_url(public_url: &str, base_url: Option<&Url>) -> Result<String, SyncError> {
    if let Ok(url) = Url::parse(public_url) {
        if url.scheme() == "http" || url.scheme() == "https" {
            return Ok(public_url.to_string());
        }
    }

    let base = base_url.ok_or_else(|| {
        SyncError::Configuration(format!(
            "site.base_url must be set to sync relative URL {}",
            public_url
        ))
    })?;

    base.join(public_url)
        .map(String::from)
        .map_err(|e| SyncError::Configuration(format!("invalid URL {}: {}", public_url, e)))
}
