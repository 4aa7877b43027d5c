//! Shared registry of NPCs.

use super::{Npc, NpcError, NpcId, NpcRelationship, RelationshipDelta};
use crate::world::CharacterId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// NPCs shared across sessions.
///
/// The map is behind a read-write lock and each NPC behind its own mutex, so
/// updates to one NPC are serialized while different NPCs update in
/// parallel. Reads hand out cloned snapshots.
#[derive(Debug, Default)]
pub struct NpcDirectory {
    npcs: RwLock<HashMap<NpcId, Arc<Mutex<Npc>>>>,
}

impl NpcDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an NPC, replacing any with the same id.
    pub async fn insert(&self, npc: Npc) -> NpcId {
        let id = npc.id;
        info!(npc = %npc.name, %id, "NPC registered");
        self.npcs.write().await.insert(id, Arc::new(Mutex::new(npc)));
        id
    }

    /// Id of the NPC called `name`, creating it with `make` if none exists.
    pub async fn get_or_insert_with<F>(&self, name: &str, make: F) -> Result<NpcId, NpcError>
    where
        F: FnOnce() -> Result<Npc, NpcError>,
    {
        let mut npcs = self.npcs.write().await;
        for (id, entry) in npcs.iter() {
            if entry.lock().await.name.eq_ignore_ascii_case(name) {
                return Ok(*id);
            }
        }
        let npc = make()?;
        let id = npc.id;
        info!(npc = %npc.name, %id, "NPC created on demand");
        npcs.insert(id, Arc::new(Mutex::new(npc)));
        Ok(id)
    }

    async fn entry(&self, id: NpcId) -> Result<Arc<Mutex<Npc>>, NpcError> {
        self.npcs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(NpcError::UnknownNpc(id))
    }

    /// Snapshot of an NPC.
    pub async fn get(&self, id: NpcId) -> Option<Npc> {
        let entry = self.entry(id).await.ok()?;
        let npc = entry.lock().await;
        Some(npc.clone())
    }

    /// Snapshot of the NPC with this name, ignoring case.
    pub async fn find_by_name(&self, name: &str) -> Option<Npc> {
        let npcs = self.npcs.read().await;
        for entry in npcs.values() {
            let npc = entry.lock().await;
            if npc.name.eq_ignore_ascii_case(name.trim()) {
                return Some(npc.clone());
            }
        }
        None
    }

    pub async fn names(&self) -> Vec<String> {
        let npcs = self.npcs.read().await;
        let mut names = Vec::with_capacity(npcs.len());
        for entry in npcs.values() {
            names.push(entry.lock().await.name.clone());
        }
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.npcs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.npcs.read().await.is_empty()
    }

    /// Run `f` against the NPC while holding its lock.
    pub async fn update<F, R>(&self, id: NpcId, f: F) -> Result<R, NpcError>
    where
        F: FnOnce(&mut Npc) -> R,
    {
        let entry = self.entry(id).await?;
        let mut npc = entry.lock().await;
        Ok(f(&mut npc))
    }

    /// Record an interaction and return the updated relationship.
    pub async fn record_interaction(
        &self,
        id: NpcId,
        character: CharacterId,
        event: impl Into<String>,
        delta: RelationshipDelta,
    ) -> Result<NpcRelationship, NpcError> {
        let event = event.into();
        self.update(id, |npc| npc.record_interaction(character, event, delta).clone())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npc::{NpcAttributes, NpcRole, Personality};

    fn innkeeper(name: &str) -> Npc {
        Npc::new(name, Personality::Friendly, NpcRole::Innkeeper, NpcAttributes::average())
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let directory = NpcDirectory::new();
        let id = directory.insert(innkeeper("Greta")).await;

        assert_eq!(directory.get(id).await.unwrap().name, "Greta");
        assert_eq!(directory.find_by_name("greta").await.unwrap().id, id);
        assert!(directory.find_by_name("Hilda").await.is_none());
        assert!(directory.get(NpcId::new()).await.is_none());
        assert_eq!(directory.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_or_insert_with() {
        let directory = NpcDirectory::new();
        let first = directory
            .get_or_insert_with("Greta", || Ok(innkeeper("Greta")))
            .await
            .unwrap();
        let second = directory
            .get_or_insert_with("GRETA", || panic!("should not create twice"))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(directory.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_npc() {
        let directory = NpcDirectory::new();
        let missing = NpcId::new();
        let result = directory
            .record_interaction(missing, CharacterId::new(), "Waved", RelationshipDelta::default())
            .await;
        assert_eq!(result, Err(NpcError::UnknownNpc(missing)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_interactions_are_not_lost() {
        let directory = Arc::new(NpcDirectory::new());
        let greta = directory.insert(innkeeper("Greta")).await;
        let hilda = directory.insert(innkeeper("Hilda")).await;
        let hero = CharacterId::new();

        let mut handles = Vec::new();
        for i in 0..40 {
            let directory = Arc::clone(&directory);
            let npc = if i % 2 == 0 { greta } else { hilda };
            handles.push(tokio::spawn(async move {
                directory
                    .record_interaction(npc, hero, format!("visit {i}"), RelationshipDelta::affection(1))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for id in [greta, hilda] {
            let npc = directory.get(id).await.unwrap();
            let relationship = npc.relationship(hero).unwrap();
            assert_eq!(relationship.history.len(), 20);
            assert_eq!(relationship.affection, 10);
            assert_eq!(npc.memory().len(), 20);
        }
    }
}
