//! Coordination API
//!
//! Request/response surface for the surrounding orchestrator, served by a
//! mailbox task. Callers hold a cloneable `CoordinatorHandle`; there is no
//! global registry.
//!
//! Dispatch:
//! - mutations (`plan_and_apply`, `set_mode`, `reinterpret`,
//!   `clear_breakpoints`, strategy submissions) run one at a time, in
//!   submission order
//! - everything else runs on its own task and never waits behind a mutation
//!
//! `serve_json_lines` exposes the same surface as newline-delimited JSON:
//!
//! ```text
//! → {"id": 1, "method": "plan_and_apply", "params": {"breakpoints": [...]}}
//! ← {"id": 1, "result": {...}}
//! ← {"id": 2, "error": {"kind": "session_ended", "message": "..."}}
//! ```

use jitscope_graph::{Edge, IngestReport, ScopePolicy, ScopeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::coordinator::{ApplyOptions, InterpretationCoordinator, Submission};
use crate::error::{CoordinatorError, Result};
use crate::result::{BreakpointRequest, CoordinationResult};
use crate::state::StatusSnapshot;

const MAILBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum CoordinationRequest {
    PlanAndApply {
        breakpoints: Vec<BreakpointRequest>,
        #[serde(default)]
        policy: Option<ScopePolicy>,
        #[serde(default)]
        force: bool,
    },
    GetStatus,
    SetMode {
        enabled: bool,
    },
    AnalyzeDependencies {
        target: String,
        #[serde(default)]
        policy: Option<ScopePolicy>,
    },
    Reinterpret {
        units: Vec<String>,
        #[serde(default)]
        force: bool,
    },
    IngestTrace {
        edges: Vec<Edge>,
    },
    ClearBreakpoints {
        unit: String,
    },
}

impl CoordinationRequest {
    pub fn method(&self) -> &'static str {
        match self {
            CoordinationRequest::PlanAndApply { .. } => "plan_and_apply",
            CoordinationRequest::GetStatus => "get_status",
            CoordinationRequest::SetMode { .. } => "set_mode",
            CoordinationRequest::AnalyzeDependencies { .. } => "analyze_dependencies",
            CoordinationRequest::Reinterpret { .. } => "reinterpret",
            CoordinationRequest::IngestTrace { .. } => "ingest_trace",
            CoordinationRequest::ClearBreakpoints { .. } => "clear_breakpoints",
        }
    }

    /// Requests serialized behind the mutation worker
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            CoordinationRequest::PlanAndApply { .. }
                | CoordinationRequest::SetMode { .. }
                | CoordinationRequest::Reinterpret { .. }
                | CoordinationRequest::ClearBreakpoints { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

/// Reply payload; serialized as the bare payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CoordinationResponse {
    Applied(CoordinationResult),
    Status(StatusSnapshot),
    Ack(Ack),
    Scope(ScopeResult),
    Ingested(IngestReport),
}

enum Command {
    Request {
        request: CoordinationRequest,
        reply: oneshot::Sender<Result<CoordinationResponse>>,
    },
    Submit {
        breakpoints: Vec<BreakpointRequest>,
        reply: oneshot::Sender<Result<Submission>>,
    },
    EndSession {
        reply: oneshot::Sender<Vec<String>>,
    },
}

impl Command {
    fn is_mutation(&self) -> bool {
        match self {
            Command::Request { request, .. } => request.is_mutation(),
            Command::Submit { .. } => true,
            Command::EndSession { .. } => false,
        }
    }

    async fn run(self, coordinator: &Arc<InterpretationCoordinator>) {
        // A dropped receiver means the caller gave up; nothing to report.
        match self {
            Command::Request { request, reply } => {
                let _ = reply.send(execute(coordinator, request).await);
            }
            Command::Submit { breakpoints, reply } => {
                let _ = reply.send(coordinator.submit(breakpoints).await);
            }
            Command::EndSession { reply } => {
                let _ = reply.send(coordinator.end_session().await);
            }
        }
    }
}

async fn execute(
    coordinator: &InterpretationCoordinator,
    request: CoordinationRequest,
) -> Result<CoordinationResponse> {
    debug!("Executing {}", request.method());
    match request {
        CoordinationRequest::PlanAndApply {
            breakpoints,
            policy,
            force,
        } => {
            let options = ApplyOptions {
                policy,
                force,
                cancel: None,
            };
            Ok(CoordinationResponse::Applied(
                coordinator.plan_and_apply_with(breakpoints, options).await?,
            ))
        }
        CoordinationRequest::GetStatus => Ok(CoordinationResponse::Status(coordinator.get_status())),
        CoordinationRequest::SetMode { enabled } => {
            coordinator.set_mode(enabled).await;
            Ok(CoordinationResponse::Ack(Ack { ok: true }))
        }
        CoordinationRequest::AnalyzeDependencies { target, policy } => Ok(
            CoordinationResponse::Scope(coordinator.analyze_dependencies(&target, policy)?),
        ),
        CoordinationRequest::Reinterpret { units, force } => {
            let options = ApplyOptions {
                force,
                ..Default::default()
            };
            Ok(CoordinationResponse::Applied(
                coordinator.reinterpret_with(units, options).await?,
            ))
        }
        CoordinationRequest::IngestTrace { edges } => {
            Ok(CoordinationResponse::Ingested(coordinator.ingest(edges)))
        }
        CoordinationRequest::ClearBreakpoints { unit } => Ok(CoordinationResponse::Applied(
            coordinator.clear_breakpoints(&unit).await?,
        )),
    }
}

/// Mailbox owner
pub struct CoordinatorService;

impl CoordinatorService {
    /// Start the mailbox; the task ends once every handle is dropped
    pub fn spawn(coordinator: Arc<InterpretationCoordinator>) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Command>(MAILBOX_CAPACITY);
        let status = coordinator.subscribe_status();

        let task = tokio::spawn(async move {
            let (mutation_tx, mut mutation_rx) = mpsc::unbounded_channel::<Command>();
            let worker_coordinator = coordinator.clone();
            let worker = tokio::spawn(async move {
                while let Some(command) = mutation_rx.recv().await {
                    command.run(&worker_coordinator).await;
                }
            });

            while let Some(command) = rx.recv().await {
                if command.is_mutation() {
                    if mutation_tx.send(command).is_err() {
                        warn!("Mutation worker stopped, closing mailbox");
                        break;
                    }
                } else {
                    let coordinator = coordinator.clone();
                    tokio::spawn(async move { command.run(&coordinator).await });
                }
            }

            drop(mutation_tx);
            if let Err(e) = worker.await {
                warn!("Mutation worker failed: {}", e);
            }
            debug!("Coordinator mailbox closed");
        });

        (CoordinatorHandle { tx, status }, task)
    }
}

/// Cloneable reference to a running coordinator service
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
    status: watch::Receiver<StatusSnapshot>,
}

impl CoordinatorHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CoordinatorError::ServiceClosed)
    }

    /// Enqueue a request; the receiver resolves with its reply
    ///
    /// Mutations are ordered by enqueue time, not by when the reply is
    /// awaited.
    pub async fn dispatch(
        &self,
        request: CoordinationRequest,
    ) -> Result<oneshot::Receiver<Result<CoordinationResponse>>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Request { request, reply }).await?;
        Ok(rx)
    }

    pub async fn call(&self, request: CoordinationRequest) -> Result<CoordinationResponse> {
        let rx = self.dispatch(request).await?;
        rx.await.map_err(|_| CoordinatorError::ServiceClosed)?
    }

    pub async fn plan_and_apply(
        &self,
        breakpoints: Vec<BreakpointRequest>,
    ) -> Result<CoordinationResult> {
        let request = CoordinationRequest::PlanAndApply {
            breakpoints,
            policy: None,
            force: false,
        };
        match self.call(request).await? {
            CoordinationResponse::Applied(result) => Ok(result),
            other => Err(unexpected("plan_and_apply", &other)),
        }
    }

    /// Latest published snapshot; never goes through the mailbox
    pub fn get_status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub async fn set_mode(&self, enabled: bool) -> Result<()> {
        self.call(CoordinationRequest::SetMode { enabled }).await?;
        Ok(())
    }

    /// Strategy-driven apply (see `InterpretationCoordinator::submit`)
    pub async fn submit(&self, breakpoints: Vec<BreakpointRequest>) -> Result<Submission> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit { breakpoints, reply }).await?;
        rx.await.map_err(|_| CoordinatorError::ServiceClosed)?
    }

    pub async fn end_session(&self) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::EndSession { reply }).await?;
        rx.await.map_err(|_| CoordinatorError::ServiceClosed)
    }
}

fn unexpected(method: &str, response: &CoordinationResponse) -> CoordinatorError {
    CoordinatorError::Protocol(format!("unexpected reply to {}: {:?}", method, response))
}

// ═══════════════════════════════════════════════════════════════════════════
// JSON-lines transport
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct WireRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub message: String,
}

impl From<&CoordinatorError> for WireError {
    fn from(err: &CoordinatorError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireReply {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<CoordinationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<WireError>,
}

impl WireReply {
    fn from_result(id: Value, outcome: Result<CoordinationResponse>) -> Self {
        match outcome {
            Ok(response) => Self {
                id,
                result: Some(response),
                error: None,
            },
            Err(e) => Self {
                id,
                result: None,
                error: Some(WireError::from(&e)),
            },
        }
    }
}

fn parse_line(line: &str) -> std::result::Result<(Value, CoordinationRequest), (Value, CoordinatorError)> {
    let wire: WireRequest =
        serde_json::from_str(line).map_err(|e| (Value::Null, CoordinatorError::from(e)))?;

    let mut envelope = serde_json::Map::new();
    envelope.insert("method".to_string(), Value::String(wire.method));
    if !wire.params.is_null() {
        envelope.insert("params".to_string(), wire.params);
    }

    match serde_json::from_value(Value::Object(envelope)) {
        Ok(request) => Ok((wire.id, request)),
        Err(e) => Err((wire.id, CoordinatorError::from(e))),
    }
}

/// Serve newline-delimited JSON requests until the reader reaches EOF and
/// every outstanding reply has been written
pub async fn serve_json_lines<R, W>(handle: CoordinatorHandle, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireReply>();
    let mut out_tx = Some(out_tx);

    loop {
        tokio::select! {
            line = lines.next_line(), if out_tx.is_some() => {
                let Some(line) = line? else {
                    out_tx = None;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                if let Some(sender) = &out_tx {
                    accept(&handle, &line, sender).await;
                }
            }
            reply = out_rx.recv() => {
                let Some(reply) = reply else { break };
                let mut text = serde_json::to_string(&reply)?;
                text.push('\n');
                writer.write_all(text.as_bytes()).await?;
                writer.flush().await?;
            }
        }
    }

    debug!("JSON-lines transport closed");
    Ok(())
}

async fn accept(handle: &CoordinatorHandle, line: &str, out: &mpsc::UnboundedSender<WireReply>) {
    let (id, request) = match parse_line(line) {
        Ok(parsed) => parsed,
        Err((id, e)) => {
            warn!("Rejected request: {}", e);
            let _ = out.send(WireReply::from_result(id, Err(e)));
            return;
        }
    };

    // Enqueue before spawning so mutations keep their arrival order
    match handle.dispatch(request).await {
        Ok(rx) => {
            let out = out.clone();
            tokio::spawn(async move {
                let outcome = rx.await.unwrap_or(Err(CoordinatorError::ServiceClosed));
                let _ = out.send(WireReply::from_result(id, outcome));
            });
        }
        Err(e) => {
            let _ = out.send(WireReply::from_result(id, Err(e)));
        }
    }
}
