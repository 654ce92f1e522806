use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::domain::{PreparedRequest, Response};
use crate::transport::{Transport, TransportError};

enum Reply {
    Status(StatusCode, Vec<u8>),
    Error(String),
}

/// In-memory transport answering from a fixed script. Unknown URLs get 404.
pub(crate) struct ScriptedTransport {
    replies: HashMap<String, Reply>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<PreparedRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            replies: HashMap::new(),
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn respond(mut self, url: &str, status: StatusCode, body: &str) -> Self {
        self.replies
            .insert(url.to_string(), Reply::Status(status, body.as_bytes().to_vec()));
        self
    }

    pub(crate) fn fail(mut self, url: &str, reason: &str) -> Self {
        self.replies
            .insert(url.to_string(), Reply::Error(reason.to_string()));
        self
    }

    pub(crate) fn delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<PreparedRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn perform(&self, request: &PreparedRequest) -> Result<Response, TransportError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }

        if let Some(delay) = self.delays.get(&request.url) {
            tokio::time::sleep(*delay).await;
        }

        match self.replies.get(&request.url) {
            Some(Reply::Status(status, body)) => {
                Ok(Response::new(request.url.clone(), *status, body.clone()))
            }
            Some(Reply::Error(reason)) => Err(TransportError::Other(reason.clone())),
            None => Ok(Response::new(request.url.clone(), StatusCode::NOT_FOUND, "")),
        }
    }
}
