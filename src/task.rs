//! Task envelopes moving between stage queues.
//!
//! A task lives inside exactly one stage's queue at a time, serialized as
//! compact JSON. The serialized payload is the task's identity: two tasks
//! with equal content serialize to the same bytes, which is what makes the
//! set-backed queues collapse duplicates.

use std::fmt;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One phase of the pipeline, each with its own input queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Listing pages in, detail page tasks out.
    Discovery,
    /// Detail pages in, download tasks out.
    Detail,
    /// Asset URLs in, files on disk out.
    Download,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Discovery, Stage::Detail, Stage::Download];

    /// Returns the stable label used in logs and stats.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Detail => "detail",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors encoding or decoding a task payload.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Payload is not a valid envelope for the expected stage.
    #[error("malformed {stage} task payload: {source}")]
    Malformed {
        /// Stage whose queue the payload came from.
        stage: Stage,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Task could not be serialized.
    #[error("failed to encode task: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Listing page to be scanned by the discovery stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartPageTask {
    /// Listing page URL.
    pub url: String,
}

/// Detail page discovered on a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetailPageTask {
    /// Detail page URL.
    pub url: String,
    /// Category tag derived from the listing page URL.
    pub category: String,
    /// Image group id taken from the thumbnail reference.
    pub image_group: String,
    /// Image number taken from the thumbnail reference.
    pub image_number: String,
}

/// Final asset to fetch and persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloadTask {
    /// Asset URL.
    pub url: String,
    /// Destination path on disk.
    pub path: PathBuf,
}

/// Any task envelope, tagged by the stage that consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Consumed by [`Stage::Discovery`].
    StartPage(StartPageTask),
    /// Consumed by [`Stage::Detail`].
    DetailPage(DetailPageTask),
    /// Consumed by [`Stage::Download`].
    Download(DownloadTask),
}

impl Task {
    /// Returns the stage whose queue this task belongs in.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::StartPage(_) => Stage::Discovery,
            Self::DetailPage(_) => Stage::Detail,
            Self::Download(_) => Stage::Download,
        }
    }

    /// Returns the URL the consuming stage will fetch.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::StartPage(t) => &t.url,
            Self::DetailPage(t) => &t.url,
            Self::Download(t) => &t.url,
        }
    }

    /// Serializes the task into its queue payload.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, TaskError> {
        let payload = match self {
            Self::StartPage(t) => serde_json::to_string(t)?,
            Self::DetailPage(t) => serde_json::to_string(t)?,
            Self::Download(t) => serde_json::to_string(t)?,
        };
        Ok(payload)
    }

    /// Decodes a payload dequeued from `stage`'s queue.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Malformed`] if the payload does not match the
    /// stage's task shape.
    pub fn decode(stage: Stage, payload: &str) -> Result<Self, TaskError> {
        let task = match stage {
            Stage::Discovery => Self::StartPage(decode_as(stage, payload)?),
            Stage::Detail => Self::DetailPage(decode_as(stage, payload)?),
            Stage::Download => Self::Download(decode_as(stage, payload)?),
        };
        Ok(task)
    }
}

fn decode_as<T: DeserializeOwned>(stage: Stage, payload: &str) -> Result<T, TaskError> {
    serde_json::from_str(payload).map_err(|source| TaskError::Malformed { stage, source })
}

impl From<StartPageTask> for Task {
    fn from(task: StartPageTask) -> Self {
        Self::StartPage(task)
    }
}

impl From<DetailPageTask> for Task {
    fn from(task: DetailPageTask) -> Self {
        Self::DetailPage(task)
    }
}

impl From<DownloadTask> for Task {
    fn from(task: DownloadTask) -> Self {
        Self::Download(task)
    }
}
