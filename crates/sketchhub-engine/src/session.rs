use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use sketchhub_core::{Canvas, ConnectionId, DrawOp, DrawingId, EngineError, Identity, ServerMessage};

use crate::traits::SnapshotStore;

/// Flush tuning for a collaborative session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Flush the working canvas after this long without commands, if dirty.
    pub idle_flush: Duration,
    /// Retries after a failed flush before declaring the data at risk.
    pub flush_retries: u32,
    /// Initial backoff between flush retries; doubles per attempt.
    pub flush_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_flush: Duration::from_secs(30),
            flush_retries: 3,
            flush_backoff: Duration::from_millis(200),
        }
    }
}

pub(crate) enum SessionCommand {
    Attach {
        connection: ConnectionId,
        identity: Identity,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        ack: oneshot::Sender<Result<(), EngineError>>,
    },
    Detach {
        connection: ConnectionId,
    },
    Op {
        connection: ConnectionId,
        op: DrawOp,
    },
    Checkpoint,
}

/// Cheap cloneable handle to one drawing's session actor.
///
/// Commands travel over an unbounded channel, so submission never blocks and
/// ordering at the channel boundary is the ordering the actor applies.
#[derive(Clone)]
pub struct SessionHandle {
    pub drawing_id: DrawingId,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Submit an accepted operation for ordered application and broadcast.
    /// Authorization is the caller's job; the session trusts it.
    pub fn submit_op(&self, connection: ConnectionId, op: DrawOp) -> Result<(), EngineError> {
        self.tx
            .send(SessionCommand::Op { connection, op })
            .map_err(|_| EngineError::NotFound(self.drawing_id))
    }

    /// Request an explicit snapshot flush.
    pub fn checkpoint(&self) -> Result<(), EngineError> {
        self.tx
            .send(SessionCommand::Checkpoint)
            .map_err(|_| EngineError::NotFound(self.drawing_id))
    }

    pub(crate) fn attach(
        &self,
        connection: ConnectionId,
        identity: Identity,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        ack: oneshot::Sender<Result<(), EngineError>>,
    ) -> Result<(), ()> {
        self.tx
            .send(SessionCommand::Attach {
                connection,
                identity,
                outbound,
                ack,
            })
            .map_err(|_| ())
    }

    pub(crate) fn detach(&self, connection: ConnectionId) {
        let _ = self.tx.send(SessionCommand::Detach { connection });
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn same_session(&self, other: &SessionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Evict,
}

/// Per-drawing actor: the sole mutator of the drawing's working canvas.
///
/// Lifecycle is Loading -> Active -> Draining -> Evicted. Commands arriving
/// while the initial snapshot loads simply queue in the channel; the actor
/// applies operations one at a time and broadcasts each accepted operation
/// before any persistence happens, so visibility never waits on durability.
struct SessionActor {
    drawing_id: DrawingId,
    store: Arc<dyn SnapshotStore>,
    config: SessionConfig,
    canvas: Canvas,
    /// Attached connections, in attach order.
    attached: Vec<(ConnectionId, mpsc::UnboundedSender<ServerMessage>)>,
    dirty: bool,
    rx: mpsc::UnboundedReceiver<SessionCommand>,
    evictions: mpsc::UnboundedSender<DrawingId>,
}

pub(crate) fn spawn_session(
    drawing_id: DrawingId,
    store: Arc<dyn SnapshotStore>,
    config: SessionConfig,
    evictions: mpsc::UnboundedSender<DrawingId>,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let actor = SessionActor {
        drawing_id,
        store,
        config,
        canvas: Canvas::new(),
        attached: Vec::new(),
        dirty: false,
        rx,
        evictions,
    };
    tokio::spawn(actor.run());
    SessionHandle { drawing_id, tx }
}

impl SessionActor {
    async fn run(mut self) {
        // Loading: fetch the checkpoint this session resumes from.
        match self.load().await {
            Ok(canvas) => self.canvas = canvas,
            Err(err) => {
                tracing::error!(drawing = %self.drawing_id, %err, "session load failed");
                self.refuse_queued(err);
                let _ = self.evictions.send(self.drawing_id);
                return;
            }
        }
        tracing::debug!(drawing = %self.drawing_id, "session active");

        // Active: serialized command loop.
        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if self.handle(cmd).await == Flow::Evict {
                        break;
                    }
                }
                // Idle flush: no commands for a while with unpersisted edits.
                _ = tokio::time::sleep(self.config.idle_flush), if self.dirty => {
                    // An empty session only lingers here because an earlier
                    // drain flush failed; once it lands, evict.
                    if self.flush().await && self.attached.is_empty() {
                        break;
                    }
                }
            }
        }

        // Evicted: the registry drops the entry once our channel closes.
        tracing::debug!(drawing = %self.drawing_id, "session evicted");
        let _ = self.evictions.send(self.drawing_id);
    }

    async fn handle(&mut self, cmd: SessionCommand) -> Flow {
        match cmd {
            SessionCommand::Attach {
                connection,
                identity,
                outbound,
                ack,
            } => {
                // Welcome goes through the outbound queue so no broadcast can
                // overtake it.
                let welcome = ServerMessage::Welcome {
                    drawing_id: self.drawing_id,
                    canvas: self.canvas.to_vec(),
                };
                let _ = outbound.send(welcome);
                self.attached.push((connection, outbound));
                let _ = ack.send(Ok(()));
                tracing::info!(
                    drawing = %self.drawing_id,
                    %connection,
                    %identity,
                    peers = self.attached.len(),
                    "connection attached"
                );
                Flow::Continue
            }
            SessionCommand::Detach { connection } => {
                let before = self.attached.len();
                self.attached.retain(|(c, _)| *c != connection);
                if self.attached.len() == before {
                    tracing::warn!(drawing = %self.drawing_id, %connection, "detach for unknown connection");
                    return Flow::Continue;
                }
                tracing::info!(
                    drawing = %self.drawing_id,
                    %connection,
                    peers = self.attached.len(),
                    "connection detached"
                );
                if !self.attached.is_empty() {
                    return Flow::Continue;
                }
                // Draining: last connection gone; persist before eviction.
                if self.dirty && !self.flush().await {
                    // Unflushed edits must not be dropped; stay alive so the
                    // idle timer keeps retrying.
                    return Flow::Continue;
                }
                Flow::Evict
            }
            SessionCommand::Op { connection, op } => {
                match self.canvas.apply(&op) {
                    Ok(()) => {
                        self.dirty = true;
                        let msg = ServerMessage::Op { op };
                        for (peer, outbound) in &self.attached {
                            if *peer != connection {
                                let _ = outbound.send(msg.clone());
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(drawing = %self.drawing_id, %connection, %err, "operation rejected");
                        if let Some((_, outbound)) =
                            self.attached.iter().find(|(c, _)| *c == connection)
                        {
                            let _ = outbound.send(ServerMessage::Error {
                                message: err.to_string(),
                            });
                        }
                    }
                }
                Flow::Continue
            }
            SessionCommand::Checkpoint => {
                if self.dirty {
                    self.flush().await;
                }
                Flow::Continue
            }
        }
    }

    async fn load(&self) -> Result<Canvas, EngineError> {
        match self.store.latest(self.drawing_id).await? {
            Some(snapshot) => Canvas::from_bytes(snapshot.bytes),
            None => Ok(Canvas::new()),
        }
    }

    /// Persist the working canvas, retrying with backoff. Returns whether the
    /// flush landed; on exhaustion the dirty flag stays set and the failure is
    /// surfaced to operators.
    async fn flush(&mut self) -> bool {
        let bytes = self.canvas.to_vec();
        let mut backoff = self.config.flush_backoff;
        for attempt in 0..=self.config.flush_retries {
            match self.store.append(self.drawing_id, bytes.clone()).await {
                Ok(snapshot_id) => {
                    self.dirty = false;
                    tracing::debug!(drawing = %self.drawing_id, %snapshot_id, "canvas flushed");
                    return true;
                }
                Err(err) => {
                    tracing::warn!(drawing = %self.drawing_id, attempt, %err, "snapshot flush failed");
                    if attempt < self.config.flush_retries {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        tracing::error!(
            drawing = %self.drawing_id,
            "flush retries exhausted; unpersisted canvas edits at risk"
        );
        false
    }

    /// Load failed: answer queued attaches with the error before exiting.
    fn refuse_queued(&mut self, err: EngineError) {
        while let Ok(cmd) = self.rx.try_recv() {
            if let SessionCommand::Attach { ack, .. } = cmd {
                let _ = ack.send(Err(err.clone()));
            }
        }
    }
}
