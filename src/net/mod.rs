//! HTTP plumbing shared by the cache layer, the sync executor and live calls.

mod client;
mod error;
mod types;

pub use client::{call, ApiClient, Transport};
pub use error::FetchError;
pub use types::{ApiEnvelope, Destination, HttpRequest, HttpResponse};

#[cfg(test)]
pub mod testing;
