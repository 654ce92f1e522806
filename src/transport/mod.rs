pub mod batch;
pub mod http;
#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{PreparedRequest, Response};

pub use batch::{Batch, DEFAULT_WORKERS};
pub use http::HttpTransport;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// Performs one request and reports whatever the server answered.
///
/// Non-success statuses are returned as `Ok`; only failures to obtain a
/// response at all are errors.
#[async_trait]
pub trait Transport {
    async fn perform(&self, request: &PreparedRequest) -> Result<Response, TransportError>;
}
