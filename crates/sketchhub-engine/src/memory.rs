use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use sketchhub_core::{
    Drawing, DrawingId, EngineError, Identity, Snapshot, SnapshotId,
};

use crate::traits::{AccessGuard, DrawingCatalog, SnapshotStore};

#[derive(Default)]
struct State {
    drawings: HashMap<DrawingId, Drawing>,
    snapshots: Vec<Snapshot>,
    next_seq: i64,
    grants: HashSet<(DrawingId, Identity)>,
    invitations: HashSet<(DrawingId, Identity)>,
    fail_appends: usize,
}

/// In-memory implementation of the persistence and authorization traits.
///
/// Mirrors the relational schema closely enough that engine tests exercise
/// the same contracts the Postgres-backed server does.
#[derive(Default)]
pub struct InMemoryBackend {
    state: RwLock<State>,
    latest_calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_drawing(
        &self,
        title: &str,
        description: &str,
        public: bool,
        owner: &Identity,
    ) -> Drawing {
        let drawing = Drawing {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: description.to_string(),
            public,
            owner: owner.clone(),
        };
        self.state
            .write()
            .await
            .drawings
            .insert(drawing.id, drawing.clone());
        drawing
    }

    pub async fn update_drawing(
        &self,
        drawing_id: DrawingId,
        title: &str,
        description: &str,
        public: bool,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        let drawing = state
            .drawings
            .get_mut(&drawing_id)
            .ok_or(EngineError::NotFound(drawing_id))?;
        drawing.title = title.to_string();
        drawing.description = description.to_string();
        drawing.public = public;
        Ok(())
    }

    /// Owner invites a guest; grants nothing until accepted.
    pub async fn invite(&self, drawing_id: DrawingId, guest: &Identity) {
        self.state
            .write()
            .await
            .invitations
            .insert((drawing_id, guest.clone()));
    }

    /// Convert a pending invitation into a standing collaboration grant.
    pub async fn accept_invitation(&self, drawing_id: DrawingId, guest: &Identity) -> bool {
        let mut state = self.state.write().await;
        if state.invitations.remove(&(drawing_id, guest.clone())) {
            state.grants.insert((drawing_id, guest.clone()));
            true
        } else {
            false
        }
    }

    /// Number of `latest` lookups served; lets tests assert that an attach
    /// storm triggers exactly one snapshot load.
    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` appends fail, to exercise flush retry.
    pub async fn fail_next_appends(&self, n: usize) {
        self.state.write().await.fail_appends = n;
    }

    pub async fn snapshot_count(&self, drawing_id: DrawingId) -> usize {
        self.state
            .read()
            .await
            .snapshots
            .iter()
            .filter(|s| s.drawing_id == drawing_id)
            .count()
    }
}

#[async_trait]
impl SnapshotStore for InMemoryBackend {
    async fn append(
        &self,
        drawing_id: DrawingId,
        bytes: Vec<u8>,
    ) -> Result<SnapshotId, EngineError> {
        let mut state = self.state.write().await;
        if state.fail_appends > 0 {
            state.fail_appends -= 1;
            return Err(EngineError::StoreUnavailable("injected append failure".into()));
        }
        if !state.drawings.contains_key(&drawing_id) {
            return Err(EngineError::NotFound(drawing_id));
        }
        state.next_seq += 1;
        let id = SnapshotId(state.next_seq);
        state.snapshots.push(Snapshot {
            id,
            drawing_id,
            created_at: Utc::now(),
            bytes,
        });
        Ok(id)
    }

    async fn latest(&self, drawing_id: DrawingId) -> Result<Option<Snapshot>, EngineError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        if !state.drawings.contains_key(&drawing_id) {
            return Err(EngineError::NotFound(drawing_id));
        }
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.drawing_id == drawing_id)
            .max_by_key(|s| s.id)
            .cloned())
    }

    async fn latest_for_many(
        &self,
        drawing_ids: &[DrawingId],
    ) -> Result<HashMap<DrawingId, Snapshot>, EngineError> {
        let wanted: HashSet<DrawingId> = drawing_ids.iter().copied().collect();
        let state = self.state.read().await;
        // Two-pass aggregation: winning sequence per drawing, then the rows.
        let mut winners: HashMap<DrawingId, SnapshotId> = HashMap::new();
        for s in &state.snapshots {
            if !wanted.contains(&s.drawing_id) {
                continue;
            }
            let entry = winners.entry(s.drawing_id).or_insert(s.id);
            if s.id > *entry {
                *entry = s.id;
            }
        }
        Ok(state
            .snapshots
            .iter()
            .filter(|s| winners.get(&s.drawing_id) == Some(&s.id))
            .map(|s| (s.drawing_id, s.clone()))
            .collect())
    }
}

#[async_trait]
impl AccessGuard for InMemoryBackend {
    async fn can_view(
        &self,
        identity: &Identity,
        drawing_id: DrawingId,
    ) -> Result<bool, EngineError> {
        let state = self.state.read().await;
        Ok(state.drawings.get(&drawing_id).map_or(false, |d| {
            d.public
                || d.owner == *identity
                || state.grants.contains(&(drawing_id, identity.clone()))
        }))
    }

    async fn can_edit(
        &self,
        identity: &Identity,
        drawing_id: DrawingId,
    ) -> Result<bool, EngineError> {
        let state = self.state.read().await;
        Ok(state.drawings.get(&drawing_id).map_or(false, |d| {
            d.owner == *identity || state.grants.contains(&(drawing_id, identity.clone()))
        }))
    }
}

#[async_trait]
impl DrawingCatalog for InMemoryBackend {
    async fn get(&self, drawing_id: DrawingId) -> Result<Option<Drawing>, EngineError> {
        Ok(self.state.read().await.drawings.get(&drawing_id).cloned())
    }

    async fn visible_to(&self, identity: &Identity) -> Result<Vec<Drawing>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .drawings
            .values()
            .filter(|d| {
                d.public
                    || d.owner == *identity
                    || state.grants.contains(&(d.id, identity.clone()))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_tracks_append_order() {
        let backend = InMemoryBackend::new();
        let owner = "ada".to_string();
        let drawing = backend.create_drawing("d", "", false, &owner).await;

        assert_eq!(backend.latest(drawing.id).await.unwrap(), None);

        backend.append(drawing.id, vec![1]).await.unwrap();
        let second = backend.append(drawing.id, vec![2]).await.unwrap();

        let latest = backend.latest(drawing.id).await.unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.bytes, vec![2]);
    }

    #[tokio::test]
    async fn append_to_unknown_drawing_is_not_found() {
        let backend = InMemoryBackend::new();
        let missing = Uuid::new_v4();
        assert_eq!(
            backend.append(missing, vec![0]).await,
            Err(EngineError::NotFound(missing))
        );
        assert_eq!(
            backend.latest(missing).await,
            Err(EngineError::NotFound(missing))
        );
    }

    #[tokio::test]
    async fn latest_for_many_returns_winners_only() {
        let backend = InMemoryBackend::new();
        let owner = "ada".to_string();
        let a = backend.create_drawing("a", "", false, &owner).await;
        let b = backend.create_drawing("b", "", false, &owner).await;
        let empty = backend.create_drawing("empty", "", false, &owner).await;

        backend.append(a.id, vec![1]).await.unwrap();
        let a2 = backend.append(a.id, vec![2]).await.unwrap();
        let b1 = backend.append(b.id, vec![3]).await.unwrap();

        let latest = backend
            .latest_for_many(&[a.id, b.id, empty.id])
            .await
            .unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[&a.id].id, a2);
        assert_eq!(latest[&b.id].id, b1);
        assert!(!latest.contains_key(&empty.id));
    }

    #[tokio::test]
    async fn guard_policy() {
        let backend = InMemoryBackend::new();
        let owner = "ada".to_string();
        let guest = "grace".to_string();
        let passerby = "mallory".to_string();

        let private = backend.create_drawing("private", "", false, &owner).await;
        let public = backend.create_drawing("public", "", true, &owner).await;

        // Owner views and edits.
        assert!(backend.can_view(&owner, private.id).await.unwrap());
        assert!(backend.can_edit(&owner, private.id).await.unwrap());

        // Strangers get nothing on private drawings.
        assert!(!backend.can_view(&passerby, private.id).await.unwrap());
        assert!(!backend.can_edit(&passerby, private.id).await.unwrap());

        // Public drawings are view-only for strangers.
        assert!(backend.can_view(&passerby, public.id).await.unwrap());
        assert!(!backend.can_edit(&passerby, public.id).await.unwrap());

        // A pending invitation grants nothing.
        backend.invite(private.id, &guest).await;
        assert!(!backend.can_view(&guest, private.id).await.unwrap());
        assert!(!backend.can_edit(&guest, private.id).await.unwrap());

        // Acceptance converts it into a standing grant.
        assert!(backend.accept_invitation(private.id, &guest).await);
        assert!(backend.can_view(&guest, private.id).await.unwrap());
        assert!(backend.can_edit(&guest, private.id).await.unwrap());

        // Accepting twice is a no-op.
        assert!(!backend.accept_invitation(private.id, &guest).await);
    }
}
