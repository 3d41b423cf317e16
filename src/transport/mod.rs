//! HTTP plumbing shared by the REST-based provider adapters.

pub(crate) mod classify;
pub mod credentials;
pub mod http;

pub use http::{RestClient, TransportError};
