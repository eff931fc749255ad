//! Remote resource client for the administration REST API.

pub mod api_types;
mod client;
mod error;
mod transport;
pub mod types;

pub use client::ApiClient;
pub use error::ApiError;
pub use transport::{error_for_status, ApiRequest, HttpTransport, Method, Transport};
