//! Trace ingestion
//!
//! Edges arrive either by pulling a `TraceSource` or by a push channel.
//! Both paths carry a deadline (pull) and a cancellation token.

use async_trait::async_trait;
use jitscope_graph::{DependencyGraph, Edge, IngestReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};

/// Port: code-tracing facility
#[async_trait]
pub trait TraceSource: Send + Sync {
    async fn get_trace(&self) -> anyhow::Result<Vec<Edge>>;
}

/// Feeds trace batches into a shared graph
#[derive(Clone)]
pub struct TraceIngestor {
    graph: Arc<DependencyGraph>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl TraceIngestor {
    pub fn new(graph: Arc<DependencyGraph>, timeout: Duration) -> Self {
        Self {
            graph,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Pull deadline taken from `trace_timeout_ms`
    pub fn from_config(graph: Arc<DependencyGraph>, config: &CoordinatorConfig) -> Self {
        Self::new(graph, config.trace_timeout())
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Pull one batch and ingest it
    pub async fn pull(&self, source: &dyn TraceSource) -> Result<IngestReport> {
        let edges = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(CoordinatorError::Cancelled("trace pull".to_string()));
            }
            outcome = tokio::time::timeout(self.timeout, source.get_trace()) => match outcome {
                Ok(Ok(edges)) => edges,
                Ok(Err(e)) => return Err(CoordinatorError::TraceSource(e)),
                Err(_) => {
                    return Err(CoordinatorError::Timeout(format!(
                        "trace pull exceeded {}ms",
                        self.timeout.as_millis()
                    )));
                }
            },
        };

        Ok(self.ingest(edges))
    }

    /// Ingest every batch pushed until the channel closes or the token fires
    ///
    /// The task returns the number of batches ingested.
    pub fn subscribe(&self, mut updates: mpsc::Receiver<Vec<Edge>>) -> JoinHandle<usize> {
        let ingestor = self.clone();
        tokio::spawn(async move {
            let mut batches = 0usize;
            loop {
                tokio::select! {
                    biased;
                    _ = ingestor.cancel.cancelled() => {
                        debug!("Trace subscription cancelled");
                        break;
                    }
                    batch = updates.recv() => match batch {
                        Some(edges) => {
                            ingestor.ingest(edges);
                            batches += 1;
                        }
                        None => break,
                    },
                }
            }
            info!("Trace subscription closed after {} batches", batches);
            batches
        })
    }

    fn ingest(&self, edges: Vec<Edge>) -> IngestReport {
        let received = edges.len();
        let report = self.graph.ingest(edges);
        if !report.is_clean() {
            warn!(
                "{} of {} traced edges rejected",
                report.errors.len(),
                received
            );
        }
        report
    }
}
