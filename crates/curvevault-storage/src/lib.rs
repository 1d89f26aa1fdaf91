//! Relational store, HTTP fetch, and raw snapshot archive for Curvevault.

pub mod archive;
pub mod fetch;
pub mod store;

pub const CRATE_NAME: &str = "curvevault-storage";

pub use archive::{ArchivedSnapshot, SnapshotArchive};
pub use fetch::{classify_reqwest_error, classify_status, BackoffPolicy, FetchError, HttpClientConfig, RetryDisposition, SheetFetcher};
pub use store::{CurveStore, MetalCoverage, StoreError, MIGRATOR};
