//! Crawler Core Library
//!
//! A staged crawl pipeline for image galleries. Listing pages are scanned
//! for detail pages, detail pages are resolved into asset URLs, and assets
//! are downloaded to disk. Stages communicate only through a set-backed
//! queue store, so any number of processes can share one crawl.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`queue`] - Set-semantics queue store (Redis, `SQLite`, in-memory)
//! - [`task`] - Task envelopes passed between stages
//! - [`fetch`] - Non-blocking HTTP fetcher and proxy pool
//! - [`extract`] - Page-to-task transforms
//! - [`assets`] - Destination paths and file persistence
//! - [`offload`] - Worker pool for store and filesystem operations
//! - [`pipeline`] - Stage workers, coordinator and stats
//! - [`seed`] - Startup seeding of listing pages
//! - [`config`] - Pipeline configuration and config file parsing
//! - [`db`] - `SQLite` connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assets;
pub mod config;
pub mod db;
pub mod extract;
pub mod fetch;
pub mod offload;
pub mod pipeline;
pub mod queue;
pub mod seed;
pub mod task;

// Re-export commonly used types
pub use config::{ConfigError, PipelineConfig, StageSettings};
pub use db::Database;
pub use extract::{ExtractError, Transform};
pub use fetch::{FetchError, FetchSettings, HttpFetcher, ProxyPool};
pub use offload::{OffloadError, Offloader};
pub use pipeline::{Pipeline, PipelineError, PipelineStats, RunningPipeline, StatsSnapshot};
pub use queue::{MemoryQueueStore, QueueError, QueueNames, QueueStore, open_store};
pub use seed::{SeedError, SeedSource};
pub use task::{DetailPageTask, DownloadTask, Stage, StartPageTask, Task};
