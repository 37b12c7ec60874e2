use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

use sketchhub_core::{ConnectionId, DrawingId, EngineError, Identity, ServerMessage};

use crate::session::{spawn_session, SessionConfig, SessionHandle};
use crate::traits::{AccessGuard, DrawingCatalog, SnapshotStore};

/// Tracks which connections are attached to which drawing and guarantees at
/// most one live session per drawing id.
///
/// The sessions map is the single piece of global shared mutable state in the
/// engine; creation is double-checked under the write lock so an attach storm
/// builds exactly one session (and performs one snapshot load).
pub struct SessionRegistry {
    store: Arc<dyn SnapshotStore>,
    guard: Arc<dyn AccessGuard>,
    catalog: Arc<dyn DrawingCatalog>,
    config: SessionConfig,
    sessions: RwLock<HashMap<DrawingId, SessionHandle>>,
    connections: RwLock<HashMap<ConnectionId, DrawingId>>,
    evictions: mpsc::UnboundedSender<DrawingId>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        guard: Arc<dyn AccessGuard>,
        catalog: Arc<dyn DrawingCatalog>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (evictions, mut rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            store,
            guard,
            catalog,
            config,
            sessions: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            evictions,
        });

        // Eviction sweeper: drop a map entry once its actor has exited. A
        // fresh session may already have replaced the entry, so only remove
        // handles whose channel is actually closed.
        let weak = Arc::downgrade(&registry);
        tokio::spawn(async move {
            while let Some(drawing_id) = rx.recv().await {
                let Some(registry) = weak.upgrade() else { break };
                let mut sessions = registry.sessions.write().await;
                if sessions
                    .get(&drawing_id)
                    .map_or(false, |handle| handle.is_closed())
                {
                    sessions.remove(&drawing_id);
                    tracing::debug!(drawing = %drawing_id, "session entry removed");
                }
            }
        });

        registry
    }

    /// Attach a connection to a drawing's session, creating the session on
    /// first attach. The `Welcome` frame with the working canvas arrives on
    /// `outbound` before any broadcast.
    pub async fn attach(
        &self,
        connection: ConnectionId,
        identity: &Identity,
        drawing_id: DrawingId,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<SessionHandle, EngineError> {
        if self.catalog.get(drawing_id).await?.is_none() {
            return Err(EngineError::NotFound(drawing_id));
        }
        if !self.guard.can_view(identity, drawing_id).await? {
            return Err(EngineError::Unauthorized(drawing_id));
        }

        // An actor that was draining when we grabbed its handle may exit
        // before it sees our attach; each retry observes the closed channel,
        // discards the stale entry and builds a fresh session, so the attach
        // is never lost.
        loop {
            let handle = self.session_for(drawing_id).await;
            let (ack_tx, ack_rx) = oneshot::channel();
            if handle
                .attach(connection, identity.clone(), outbound.clone(), ack_tx)
                .is_err()
            {
                self.discard_stale(drawing_id, &handle).await;
                continue;
            }
            match ack_rx.await {
                Ok(Ok(())) => {
                    self.connections.write().await.insert(connection, drawing_id);
                    return Ok(handle);
                }
                Ok(Err(err)) => return Err(err),
                // Actor exited between send and processing.
                Err(_) => {
                    self.discard_stale(drawing_id, &handle).await;
                }
            }
        }
    }

    /// Detach a connection; when this empties the session's attached set the
    /// session drains (flushing dirty state) and is evicted.
    pub async fn detach(&self, connection: ConnectionId) {
        let Some(drawing_id) = self.connections.write().await.remove(&connection) else {
            return;
        };
        if let Some(handle) = self.sessions.read().await.get(&drawing_id) {
            handle.detach(connection);
        }
    }

    /// Number of live in-memory sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn session_for(&self, drawing_id: DrawingId) -> SessionHandle {
        {
            let sessions = self.sessions.read().await;
            if let Some(handle) = sessions.get(&drawing_id) {
                if !handle.is_closed() {
                    return handle.clone();
                }
            }
        }

        let mut sessions = self.sessions.write().await;
        // Double-check after acquiring the write lock.
        if let Some(handle) = sessions.get(&drawing_id) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        let handle = spawn_session(
            drawing_id,
            Arc::clone(&self.store),
            self.config.clone(),
            self.evictions.clone(),
        );
        sessions.insert(drawing_id, handle.clone());
        handle
    }

    async fn discard_stale(&self, drawing_id: DrawingId, stale: &SessionHandle) {
        let mut sessions = self.sessions.write().await;
        if let Some(current) = sessions.get(&drawing_id) {
            if current.same_session(stale) && current.is_closed() {
                sessions.remove(&drawing_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use sketchhub_core::{Canvas, DrawOp, Point};
    use std::time::Duration;
    use uuid::Uuid;

    fn test_config() -> SessionConfig {
        SessionConfig {
            idle_flush: Duration::from_millis(50),
            flush_retries: 2,
            flush_backoff: Duration::from_millis(5),
        }
    }

    fn registry_over(backend: &Arc<InMemoryBackend>) -> Arc<SessionRegistry> {
        SessionRegistry::new(
            Arc::clone(backend) as Arc<dyn SnapshotStore>,
            Arc::clone(backend) as Arc<dyn AccessGuard>,
            Arc::clone(backend) as Arc<dyn DrawingCatalog>,
            test_config(),
        )
    }

    fn stroke(x: u32, y: u32, color: [u8; 3]) -> DrawOp {
        DrawOp::Stroke {
            points: vec![Point { x, y }],
            color,
            size: 1,
        }
    }

    async fn recv_welcome(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<u8> {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("welcome timed out")
            .expect("channel closed")
        {
            ServerMessage::Welcome { canvas, .. } => canvas,
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    async fn recv_op(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> DrawOp {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("op timed out")
            .expect("channel closed")
        {
            ServerMessage::Op { op } => op,
            other => panic!("expected op, got {other:?}"),
        }
    }

    /// Poll until the store holds `n` snapshots for the drawing.
    async fn wait_for_snapshots(backend: &InMemoryBackend, drawing: DrawingId, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if backend.snapshot_count(drawing).await >= n {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("snapshot never appeared");
    }

    #[tokio::test]
    async fn attach_requires_existing_drawing_and_view_grant() {
        let backend = Arc::new(InMemoryBackend::new());
        let registry = registry_over(&backend);
        let owner = "ada".to_string();
        let stranger = "mallory".to_string();
        let drawing = backend.create_drawing("d", "", false, &owner).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let missing = Uuid::new_v4();
        assert_eq!(
            registry
                .attach(Uuid::new_v4(), &owner, missing, tx.clone())
                .await
                .err(),
            Some(EngineError::NotFound(missing))
        );
        assert_eq!(
            registry
                .attach(Uuid::new_v4(), &stranger, drawing.id, tx.clone())
                .await
                .err(),
            Some(EngineError::Unauthorized(drawing.id))
        );
        assert!(registry
            .attach(Uuid::new_v4(), &owner, drawing.id, tx)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn attach_storm_builds_one_session_and_loads_once() {
        let backend = Arc::new(InMemoryBackend::new());
        let registry = registry_over(&backend);
        let owner = "ada".to_string();
        let drawing = backend.create_drawing("d", "", false, &owner).await;

        let drawing_id = drawing.id;
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            let owner = owner.clone();
            tasks.push(tokio::spawn(async move {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let handle = registry
                    .attach(Uuid::new_v4(), &owner, drawing_id, tx)
                    .await?;
                recv_welcome(&mut rx).await;
                Ok::<_, EngineError>(handle)
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.session_count().await, 1);
        assert_eq!(backend.latest_calls(), 1);
    }

    #[tokio::test]
    async fn broadcast_order_matches_acceptance_order_across_peers() {
        let backend = Arc::new(InMemoryBackend::new());
        let registry = registry_over(&backend);
        let owner = "ada".to_string();
        let drawing = backend.create_drawing("d", "", false, &owner).await;

        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();
        let (tx_d, mut rx_d) = mpsc::unbounded_channel();

        let handle_a = registry.attach(conn_a, &owner, drawing.id, tx_a).await.unwrap();
        let handle_b = registry.attach(conn_b, &owner, drawing.id, tx_b).await.unwrap();
        registry
            .attach(Uuid::new_v4(), &owner, drawing.id, tx_c)
            .await
            .unwrap();
        registry
            .attach(Uuid::new_v4(), &owner, drawing.id, tx_d)
            .await
            .unwrap();
        recv_welcome(&mut rx_a).await;
        recv_welcome(&mut rx_b).await;
        recv_welcome(&mut rx_c).await;
        recv_welcome(&mut rx_d).await;

        // Interleaved submissions from two writers.
        for i in 0..5u32 {
            handle_a.submit_op(conn_a, stroke(i, 0, [1, 0, 0])).unwrap();
            handle_b.submit_op(conn_b, stroke(i, 1, [0, 1, 0])).unwrap();
        }

        let mut seen_c = Vec::new();
        let mut seen_d = Vec::new();
        for _ in 0..10 {
            seen_c.push(recv_op(&mut rx_c).await);
            seen_d.push(recv_op(&mut rx_d).await);
        }

        // Every observer sees the same total order.
        assert_eq!(seen_c, seen_d);

        // Per-connection order is preserved within it.
        let from_a: Vec<_> = seen_c
            .iter()
            .filter(|op| matches!(op, DrawOp::Stroke { color, .. } if *color == [1, 0, 0]))
            .cloned()
            .collect();
        let expected_a: Vec<_> = (0..5).map(|i| stroke(i, 0, [1, 0, 0])).collect();
        assert_eq!(from_a, expected_a);
    }

    #[tokio::test]
    async fn detach_flushes_and_reattach_restores_canvas() {
        let backend = Arc::new(InMemoryBackend::new());
        let registry = registry_over(&backend);
        let owner = "ada".to_string();
        let drawing = backend.create_drawing("d", "", false, &owner).await;

        let conn = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = registry.attach(conn, &owner, drawing.id, tx).await.unwrap();
        recv_welcome(&mut rx).await;

        let op = stroke(100, 100, [9, 9, 9]);
        handle.submit_op(conn, op.clone()).unwrap();
        registry.detach(conn).await;

        wait_for_snapshots(&backend, drawing.id, 1).await;

        let mut expected = Canvas::new();
        expected.apply(&op).unwrap();
        let stored = backend.latest(drawing.id).await.unwrap().unwrap();
        assert_eq!(stored.bytes, expected.to_vec());

        // Re-attach builds a fresh session from the flushed checkpoint.
        let conn2 = Uuid::new_v4();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.attach(conn2, &owner, drawing.id, tx2).await.unwrap();
        assert_eq!(recv_welcome(&mut rx2).await, expected.to_vec());
    }

    #[tokio::test]
    async fn rejected_op_does_not_dirty_the_session() {
        let backend = Arc::new(InMemoryBackend::new());
        let registry = registry_over(&backend);
        let owner = "ada".to_string();
        let drawing = backend.create_drawing("d", "", false, &owner).await;

        let conn = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = registry.attach(conn, &owner, drawing.id, tx).await.unwrap();
        recv_welcome(&mut rx).await;

        handle
            .submit_op(conn, stroke(5000, 0, [0, 0, 0]))
            .unwrap();
        match tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
        {
            ServerMessage::Error { .. } => {}
            other => panic!("expected error frame, got {other:?}"),
        }

        registry.detach(conn).await;

        // Nothing was applied, so draining has nothing to flush.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.snapshot_count(drawing.id).await, 0);
    }

    #[tokio::test]
    async fn checkpoint_flushes_without_detaching() {
        let backend = Arc::new(InMemoryBackend::new());
        let registry = registry_over(&backend);
        let owner = "ada".to_string();
        let drawing = backend.create_drawing("d", "", false, &owner).await;

        let conn = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = registry.attach(conn, &owner, drawing.id, tx).await.unwrap();
        recv_welcome(&mut rx).await;

        handle.submit_op(conn, stroke(1, 1, [1, 1, 1])).unwrap();
        handle.checkpoint().unwrap();

        wait_for_snapshots(&backend, drawing.id, 1).await;
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn failed_drain_flush_keeps_edits_until_store_recovers() {
        let backend = Arc::new(InMemoryBackend::new());
        let registry = registry_over(&backend);
        let owner = "ada".to_string();
        let drawing = backend.create_drawing("d", "", false, &owner).await;

        let conn = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = registry.attach(conn, &owner, drawing.id, tx).await.unwrap();
        recv_welcome(&mut rx).await;

        let op = stroke(7, 7, [3, 3, 3]);
        handle.submit_op(conn, op.clone()).unwrap();

        // Drain flush fails every retry; the session must survive
        // with the edit in memory and flush once the store recovers.
        backend.fail_next_appends(3).await;
        registry.detach(conn).await;

        wait_for_snapshots(&backend, drawing.id, 1).await;
        let mut expected = Canvas::new();
        expected.apply(&op).unwrap();
        let stored = backend.latest(drawing.id).await.unwrap().unwrap();
        assert_eq!(stored.bytes, expected.to_vec());
    }

    #[tokio::test]
    async fn disconnecting_writers_accepted_op_still_broadcasts() {
        let backend = Arc::new(InMemoryBackend::new());
        let registry = registry_over(&backend);
        let owner = "ada".to_string();
        let drawing = backend.create_drawing("d", "", false, &owner).await;

        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let handle = registry.attach(conn_a, &owner, drawing.id, tx_a).await.unwrap();
        registry.attach(conn_b, &owner, drawing.id, tx_b).await.unwrap();
        recv_welcome(&mut rx_a).await;
        recv_welcome(&mut rx_b).await;

        // Op accepted before the detach is queued behind it.
        let op = stroke(2, 2, [5, 5, 5]);
        handle.submit_op(conn_a, op.clone()).unwrap();
        registry.detach(conn_a).await;

        assert_eq!(recv_op(&mut rx_b).await, op);
    }
}
