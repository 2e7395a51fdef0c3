//! Page-to-task transforms for the parsing stages.
//!
//! Extraction rules are plain data ([`DiscoveryRules`], [`DetailRules`])
//! compiled once into a [`Transform`]. A transform never touches the queue
//! store or the network: it turns a page body plus the task that fetched
//! it into the next stage's tasks.

mod detail;
mod discovery;
mod error;

use regex::Regex;
use scraper::Selector;

pub use detail::{
    DEFAULT_ASSET_URL_TEMPLATE, DEFAULT_LINK_SELECTOR, DEFAULT_RESOLUTION_PATTERN, DetailRules,
    DetailTransform,
};
pub use discovery::{
    DEFAULT_CATEGORY_PATTERN, DEFAULT_ITEM_SELECTOR, DEFAULT_THUMBNAIL_PATTERN,
    DEFAULT_THUMBNAIL_SELECTOR, DiscoveryRules, DiscoveryTransform,
};
pub use error::ExtractError;

use crate::task::{Stage, Task};

/// Parsing step of a page stage.
#[derive(Debug, Clone)]
pub enum Transform {
    /// Listing page to detail page tasks.
    Discovery(DiscoveryTransform),
    /// Detail page to download tasks.
    Detail(DetailTransform),
}

impl Transform {
    /// Returns the stage this transform serves.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Discovery(_) => Stage::Discovery,
            Self::Detail(_) => Stage::Detail,
        }
    }

    /// Extracts the next stage's tasks from `body`, the page fetched for `task`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::WrongStage`] if `task` belongs to another
    /// stage, or the transform's own extraction error.
    pub fn extract(&self, body: &str, task: &Task) -> Result<Vec<Task>, ExtractError> {
        match (self, task) {
            (Self::Discovery(transform), Task::StartPage(page)) => Ok(transform
                .extract(body, page)?
                .into_iter()
                .map(Task::from)
                .collect()),
            (Self::Detail(transform), Task::DetailPage(page)) => Ok(transform
                .extract(body, page)?
                .into_iter()
                .map(Task::from)
                .collect()),
            _ => Err(ExtractError::WrongStage {
                transform: self.stage(),
                stage: task.stage(),
            }),
        }
    }
}

fn compile_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::invalid_selector(selector, e))
}

fn compile_pattern(pattern: &str, groups: usize) -> Result<Regex, ExtractError> {
    let regex = Regex::new(pattern).map_err(|e| ExtractError::invalid_pattern(pattern, e))?;
    // captures_len counts the implicit whole-match group
    if regex.captures_len() < groups + 1 {
        return Err(ExtractError::MissingCaptureGroup {
            pattern: pattern.to_string(),
            expected: groups,
        });
    }
    Ok(regex)
}
