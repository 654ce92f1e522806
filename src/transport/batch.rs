use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::domain::{PreparedRequest, Response};
use crate::transport::{Transport, TransportError};

pub const DEFAULT_WORKERS: usize = 10;

/// A set of requests performed concurrently, with completions reported back
/// one at a time to the task that runs the batch.
pub struct Batch<K> {
    transport: Arc<dyn Transport + Send + Sync>,
    workers: usize,
    queue: Vec<(K, PreparedRequest)>,
}

impl<K> Batch<K> {
    pub fn new(transport: Arc<dyn Transport + Send + Sync>) -> Self {
        Self::with_workers(transport, DEFAULT_WORKERS)
    }

    pub fn with_workers(transport: Arc<dyn Transport + Send + Sync>, workers: usize) -> Self {
        Self {
            transport,
            workers: workers.max(1),
            queue: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, key: K, request: PreparedRequest) {
        self.queue.push((key, request));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Perform every queued request, at most `workers` at a time.
    ///
    /// `on_complete` runs in completion order, never concurrently with
    /// itself. Returning an error stops the batch: transfers still in
    /// flight are dropped and the error is returned.
    pub async fn run<F, E>(self, mut on_complete: F) -> Result<(), E>
    where
        F: FnMut(K, Result<Response, TransportError>) -> Result<(), E>,
    {
        let Self {
            transport,
            workers,
            queue,
        } = self;

        tracing::debug!(requests = queue.len(), workers, "Running batch");

        let mut completions = stream::iter(queue)
            .map(|(key, request)| {
                let transport = Arc::clone(&transport);
                async move {
                    let outcome = transport.perform(&request).await;
                    (key, outcome)
                }
            })
            .buffer_unordered(workers);

        while let Some((key, outcome)) = completions.next().await {
            on_complete(key, outcome)?;
        }

        Ok(())
    }
}
