//! Client side of Prospector.
//!
//! - [`TaskController`]: the single background discovery task shared by
//!   every view in the process
//! - [`HttpTransport`]: talks to a Prospector server over HTTP/NDJSON
//! - [`import`]: bulk lookups from a delimited text file

pub mod controller;
pub mod import;
mod result_cache;
pub mod transport;

pub use controller::{
    CompletionNotice, LogNotifier, Notifier, TaskController, TaskSnapshot, TaskState,
};
pub use import::{ImportOptions, ImportReport, extract_candidates, import_file, import_identifiers};
pub use result_cache::ResultCache;
pub use transport::{DiscoveryTransport, HttpTransport, LookupTransport};
