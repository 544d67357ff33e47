//! Clients for the two civic data sources.
//!
//! - [`OpenDataClient`]: CKAN catalog lookup and trusted-origin CSV downloads
//! - [`CouncilClient`]: CSRF-bootstrapped, paged agenda-item search
//!
//! Every request goes through a shared timeout and retry-with-backoff policy
//! taken from [`civicetl_shared::HttpConfig`].

mod catalog;
mod council;
mod http;

pub use catalog::{ByteStream, OpenDataClient, ResourceDescriptor};
pub use council::{CouncilClient, CouncilSession};
