//! Startup seeding of the discovery queue.
//!
//! A seed is a listing URL template plus a page count. `{}` in the template
//! is replaced with each page number from 1 to `pages`. Seeds come from the
//! command line (`TEMPLATE=PAGES`) or a seed file with one
//! `<template> <pages>` pair per line.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::queue::{QueueError, QueueStore};
use crate::task::{StartPageTask, Task, TaskError};

/// Placeholder replaced with the page number.
pub const PAGE_PLACEHOLDER: &str = "{}";

/// Errors reading seeds or writing them to the queue store.
#[derive(Debug, Error)]
pub enum SeedError {
    /// A seed definition is malformed.
    #[error("invalid seed '{input}': {reason}")]
    Invalid {
        /// The offending input.
        input: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A seed file line is malformed.
    #[error("invalid seed on line {line}: {reason}")]
    InvalidLine {
        /// 1-based line number.
        line: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// The seed file could not be read.
    #[error("failed to read seed file {path}: {source}")]
    Read {
        /// The seed file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A start page task could not be encoded.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// The queue store rejected a write.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// One listing URL template with its page count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSource {
    /// URL template containing `{}`.
    pub template: String,
    /// Number of pages, starting at 1.
    pub pages: u32,
}

impl SeedSource {
    /// Creates a seed source.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError::Invalid`] if the template lacks `{}` or `pages` is zero.
    pub fn new(template: impl Into<String>, pages: u32) -> Result<Self, SeedError> {
        let template = template.into();
        if !template.contains(PAGE_PLACEHOLDER) {
            return Err(SeedError::Invalid {
                input: template,
                reason: format!("template must contain '{PAGE_PLACEHOLDER}'"),
            });
        }
        if pages == 0 {
            return Err(SeedError::Invalid {
                input: template,
                reason: "page count must be at least 1".to_string(),
            });
        }
        Ok(Self { template, pages })
    }

    /// Yields the listing page URLs for pages `1..=pages`.
    pub fn urls(&self) -> impl Iterator<Item = String> + '_ {
        (1..=self.pages).map(|page| self.template.replace(PAGE_PLACEHOLDER, &page.to_string()))
    }
}

impl FromStr for SeedSource {
    type Err = SeedError;

    /// Parses `TEMPLATE=PAGES`. The last `=` separates the count, so
    /// templates may carry query strings.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (template, pages) = input.rsplit_once('=').ok_or_else(|| SeedError::Invalid {
            input: input.to_string(),
            reason: "expected TEMPLATE=PAGES".to_string(),
        })?;
        let pages = pages.trim().parse::<u32>().map_err(|e| SeedError::Invalid {
            input: input.to_string(),
            reason: format!("invalid page count: {e}"),
        })?;
        Self::new(template.trim(), pages)
    }
}

/// Cuts a `#` comment that starts the line or follows whitespace, so URL
/// fragments such as `/#/page/{}/` survive.
fn strip_comment(line: &str) -> &str {
    let mut previous = None;
    for (index, c) in line.char_indices() {
        if c == '#' && previous.is_none_or(char::is_whitespace) {
            return &line[..index];
        }
        previous = Some(c);
    }
    line
}

/// Parses seed file contents.
///
/// # Errors
///
/// Returns [`SeedError::InvalidLine`] for the first malformed line.
pub fn parse_seed_file(contents: &str) -> Result<Vec<SeedSource>, SeedError> {
    let mut seeds = Vec::new();
    for (index, raw_line) in contents.lines().enumerate() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let invalid = |reason: String| SeedError::InvalidLine {
            line: index + 1,
            reason,
        };
        let mut fields = line.split_whitespace();
        let (Some(template), Some(pages), None) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(invalid("expected '<template> <pages>'".to_string()));
        };
        let pages = pages
            .parse::<u32>()
            .map_err(|e| invalid(format!("invalid page count '{pages}': {e}")))?;
        let seed = SeedSource::new(template, pages).map_err(|e| invalid(e.to_string()))?;
        seeds.push(seed);
    }
    Ok(seeds)
}

/// Reads and parses a seed file.
///
/// # Errors
///
/// Returns [`SeedError::Read`] if the file cannot be read, or a parse error.
pub async fn load_seed_file(path: &Path) -> Result<Vec<SeedSource>, SeedError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SeedError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse_seed_file(&contents)
}

/// Outcome of seeding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Start pages offered to the queue.
    pub pages: u64,
    /// Start pages that were not already queued.
    pub added: u64,
}

/// Enqueues a start page task for every page of every seed.
///
/// Pages already queued are left as they are.
///
/// # Errors
///
/// Returns `SeedError` on the first store failure.
#[instrument(skip(store, seeds), fields(seeds = seeds.len()))]
pub async fn seed_start_pages(
    store: &dyn QueueStore,
    queue: &str,
    seeds: &[SeedSource],
) -> Result<SeedReport, SeedError> {
    let mut report = SeedReport::default();
    for seed in seeds {
        for url in seed.urls() {
            let payload = Task::from(StartPageTask { url }).encode()?;
            if store.enqueue(queue, &payload).await? {
                report.added += 1;
            }
            report.pages += 1;
        }
        debug!(template = %seed.template, pages = seed.pages, "seed queued");
    }
    info!(
        queue,
        pages = report.pages,
        added = report.added,
        "start pages seeded"
    );
    Ok(report)
}
