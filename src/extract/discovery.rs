//! Listing page transform: gallery entries to detail page tasks.

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::error::ExtractError;
use super::{compile_pattern, compile_selector};
use crate::task::{DetailPageTask, StartPageTask};

/// Default selector for one gallery entry.
pub const DEFAULT_ITEM_SELECTOR: &str = ".gallery_image";

/// Default selector for the thumbnail inside an entry.
pub const DEFAULT_THUMBNAIL_SELECTOR: &str = "img.img-responsive.img-rounded";

/// Default pattern taking the category from a listing page URL.
pub const DEFAULT_CATEGORY_PATTERN: &str = r"/([^/]+)/page/";

/// Default pattern taking `(group, number)` from a thumbnail reference.
pub const DEFAULT_THUMBNAIL_PATTERN: &str = r"/mini/(\d+)/(\d+)\.jpg";

/// Rule set for the discovery stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRules {
    /// Selects each gallery entry; the entry's `href` is the detail link.
    pub item_selector: String,
    /// Selects the thumbnail image within an entry.
    pub thumbnail_selector: String,
    /// First capture group is the category.
    pub category_pattern: String,
    /// Capture groups are image group then image number.
    pub thumbnail_pattern: String,
}

impl Default for DiscoveryRules {
    fn default() -> Self {
        Self {
            item_selector: DEFAULT_ITEM_SELECTOR.to_string(),
            thumbnail_selector: DEFAULT_THUMBNAIL_SELECTOR.to_string(),
            category_pattern: DEFAULT_CATEGORY_PATTERN.to_string(),
            thumbnail_pattern: DEFAULT_THUMBNAIL_PATTERN.to_string(),
        }
    }
}

/// Compiled discovery rules.
#[derive(Debug, Clone)]
pub struct DiscoveryTransform {
    item: Selector,
    thumbnail: Selector,
    category: Regex,
    thumbnail_ref: Regex,
}

impl DiscoveryTransform {
    /// Compiles `rules`.
    ///
    /// # Errors
    ///
    /// Returns `ExtractError` if a selector or pattern is invalid.
    pub fn new(rules: &DiscoveryRules) -> Result<Self, ExtractError> {
        Ok(Self {
            item: compile_selector(&rules.item_selector)?,
            thumbnail: compile_selector(&rules.thumbnail_selector)?,
            category: compile_pattern(&rules.category_pattern, 1)?,
            thumbnail_ref: compile_pattern(&rules.thumbnail_pattern, 2)?,
        })
    }

    /// Extracts one detail page task per usable gallery entry.
    ///
    /// Entries without a link or a recognisable thumbnail are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ExtractError` if the page URL is invalid or has no category.
    pub fn extract(
        &self,
        body: &str,
        page: &StartPageTask,
    ) -> Result<Vec<DetailPageTask>, ExtractError> {
        let base = Url::parse(&page.url).map_err(|source| ExtractError::InvalidPageUrl {
            url: page.url.clone(),
            source,
        })?;
        let category = self
            .category
            .captures(&page.url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ExtractError::MissingCategory {
                url: page.url.clone(),
            })?;

        let document = Html::parse_document(body);
        let mut tasks = Vec::new();
        for entry in document.select(&self.item) {
            let Some(link) = entry
                .value()
                .attr("href")
                .and_then(|href| base.join(href).ok())
            else {
                debug!(page = %page.url, "gallery entry without usable link, skipping");
                continue;
            };

            let reference = entry
                .select(&self.thumbnail)
                .find_map(|img| img.value().attr("src"))
                .and_then(|src| self.thumbnail_ref.captures(src));
            let Some((group, number)) = reference
                .as_ref()
                .and_then(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
            else {
                debug!(page = %page.url, link = %link, "gallery entry without thumbnail reference, skipping");
                continue;
            };

            tasks.push(DetailPageTask {
                url: link.to_string(),
                category: category.clone(),
                image_group: group.to_string(),
                image_number: number.to_string(),
            });
        }

        debug!(page = %page.url, found = tasks.len(), "listing page parsed");
        Ok(tasks)
    }
}
