//! Detail page transform: resolution links to download tasks.

use std::collections::HashSet;
use std::path::PathBuf;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use super::error::ExtractError;
use super::{compile_pattern, compile_selector};
use crate::assets::asset_path;
use crate::task::{DetailPageTask, DownloadTask};

/// Default selector for resolution links on a detail page.
pub const DEFAULT_LINK_SELECTOR: &str = ".llink.list-inline li a";

/// Default pattern taking the resolution from a link.
pub const DEFAULT_RESOLUTION_PATTERN: &str = r"download/\d+/(\d+x\d+)/";

/// Default asset URL template.
///
/// Placeholders: `{group}`, `{number}`, `{resolution}`, `{category}`.
pub const DEFAULT_ASSET_URL_TEMPLATE: &str =
    "https://look.com.ua/pic/{group}/{resolution}/look.com.ua-{number}.jpg";

/// Rule set for the detail stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailRules {
    /// Selects each resolution link; its `href` is matched against `resolution_pattern`.
    pub link_selector: String,
    /// First capture group is the resolution, e.g. `1920x1080`.
    pub resolution_pattern: String,
    /// Asset URL template.
    pub asset_url_template: String,
}

impl Default for DetailRules {
    fn default() -> Self {
        Self {
            link_selector: DEFAULT_LINK_SELECTOR.to_string(),
            resolution_pattern: DEFAULT_RESOLUTION_PATTERN.to_string(),
            asset_url_template: DEFAULT_ASSET_URL_TEMPLATE.to_string(),
        }
    }
}

/// Compiled detail rules bound to an output directory.
#[derive(Debug, Clone)]
pub struct DetailTransform {
    link: Selector,
    resolution: Regex,
    asset_url_template: String,
    output_dir: PathBuf,
}

impl DetailTransform {
    /// Compiles `rules`; destination paths are built under `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns `ExtractError` if the selector or pattern is invalid.
    pub fn new(rules: &DetailRules, output_dir: impl Into<PathBuf>) -> Result<Self, ExtractError> {
        Ok(Self {
            link: compile_selector(&rules.link_selector)?,
            resolution: compile_pattern(&rules.resolution_pattern, 1)?,
            asset_url_template: rules.asset_url_template.clone(),
            output_dir: output_dir.into(),
        })
    }

    /// Extracts one download task per distinct resolution on the page.
    ///
    /// The transform does not look at the disk; the detail stage drops
    /// tasks whose destination already exists before handing them off.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible to share the [`Transform`](super::Transform) contract.
    pub fn extract(
        &self,
        body: &str,
        page: &DetailPageTask,
    ) -> Result<Vec<DownloadTask>, ExtractError> {
        let document = Html::parse_document(body);
        let mut seen = HashSet::new();
        let mut tasks = Vec::new();

        for link in document.select(&self.link) {
            let Some(resolution) = link
                .value()
                .attr("href")
                .and_then(|href| self.resolution.captures(href))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
            else {
                continue;
            };
            if !seen.insert(resolution.to_string()) {
                continue;
            }

            let path = asset_path(
                &self.output_dir,
                &page.category,
                &page.image_number,
                resolution,
            );
            tasks.push(DownloadTask {
                url: self.asset_url(page, resolution),
                path,
            });
        }

        debug!(page = %page.url, found = tasks.len(), "detail page parsed");
        Ok(tasks)
    }

    fn asset_url(&self, page: &DetailPageTask, resolution: &str) -> String {
        self.asset_url_template
            .replace("{group}", &page.image_group)
            .replace("{number}", &page.image_number)
            .replace("{resolution}", resolution)
            .replace("{category}", &page.category)
    }
}
