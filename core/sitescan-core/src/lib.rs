//! # sitescan-core
//!
//! Scan-session manager for Wi-Fi site surveys. One independent, cancellable,
//! time-boxed sampling loop runs per location; observers read live,
//! round-aligned per-AP series while it runs, and finished series are handed
//! to a store when it completes.
//!
//! ## Design Principles
//!
//! - **Thread per session**: no async runtime. Sessions never block each other.
//! - **Single writer, many readers**: each session is the only writer of its
//!   published state; reads return whole snapshots.
//! - **Collaborators behind traits**: radio access ([`SampleSource`]) and
//!   persistence ([`SeriesStore`]) are injected.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sitescan_core::{ScanConfig, SessionRegistry};
//!
//! let registry = SessionRegistry::new(ScanConfig::default(), source, store);
//! registry.start_scanning(1)?;
//! let rounds = registry.live_round_count(1);
//! ```

pub mod accumulator;
pub mod cancel;
pub mod compare;
pub mod config;
pub mod error;
pub mod registry;
mod runner;
pub mod types;

pub use accumulator::SeriesAccumulator;
pub use cancel::CancelToken;
pub use compare::{compare_locations, ApComparison, LocationStat, SeriesStats, StoredSeries};
pub use config::ScanConfig;
pub use error::{Result, SurveyError};
pub use registry::{ActiveSession, LiveAccessPoint, LiveView, SessionRegistry, SessionReport};
pub use runner::{SampleSource, SeriesStore, SessionOutcome};
pub use types::*;
