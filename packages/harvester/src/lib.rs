//! Leginfo Harvester - Download California bill texts from leginfo.legislature.ca.gov.
//!
//! The harvester walks every two-year legislative session in a year range,
//! scrapes each session's bill listing, and stores the text of every bill
//! it has not stored before as `<data dir>/<session>/<bill id>.txt`.
//!
//! # Example
//!
//! ```
//! use leginfo_harvester::session::sessions;
//!
//! let ids: Vec<String> = sessions(2017, 2022).iter().map(|s| s.id()).collect();
//! assert_eq!(ids, ["20172018", "20182019", "20192020", "20202021"]);
//! ```
//!
//! # Architecture
//!
//! - [`config`]: Constants, URL builders and [`HarvestConfig`]
//! - [`types`]: Sessions, bill ids, task outcomes and the run summary
//! - [`error`]: Error types and Result alias
//! - [`session`]: Session enumeration
//! - [`http`]: Page fetching with retry and politeness delays
//! - [`listing`]: Listing page links and bill candidate selection
//! - [`content`]: Bill text extraction
//! - [`store`]: Write-once document storage
//! - [`harvester`]: Harvest coordinator
//! - [`cli`]: Command-line interface

pub mod cli;
pub mod config;
pub mod content;
pub mod error;
pub mod harvester;
pub mod http;
pub mod listing;
pub mod session;
pub mod store;
pub mod types;

pub use config::HarvestConfig;
pub use content::extract_bill_text;
pub use error::{FailureKind, HarvesterError, Result};
pub use harvester::Harvester;
pub use http::{HttpFetcher, PageSource};
pub use store::DocumentStore;
pub use types::{BillId, BillReference, HarvestSummary, Session, TaskOutcome, TaskState};
