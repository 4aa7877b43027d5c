//! What an NPC knows. Append-only.

use crate::world::CharacterId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    /// Something the NPC knows to be true.
    Fact,
    /// Something the NPC saw or took part in.
    WitnessedEvent,
    /// Hearsay, possibly false.
    Rumor,
    /// Known to the NPC and not freely shared.
    Secret,
}

impl MemoryKind {
    pub fn name(&self) -> &'static str {
        match self {
            MemoryKind::Fact => "fact",
            MemoryKind::WitnessedEvent => "witnessed",
            MemoryKind::Rumor => "rumor",
            MemoryKind::Secret => "secret",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub kind: MemoryKind,
    pub text: String,
    /// Character the memory concerns, if any.
    pub about: Option<CharacterId>,
    pub recorded_at: DateTime<Utc>,
}

/// Everything an NPC remembers, oldest first.
///
/// Entries are never removed or rewritten, so the list grows for as long as
/// the NPC lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpcMemory {
    entries: Vec<MemoryEntry>,
}

impl NpcMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: MemoryKind, text: impl Into<String>, about: Option<CharacterId>) {
        self.entries.push(MemoryEntry {
            kind,
            text: text.into(),
            about,
            recorded_at: Utc::now(),
        });
    }

    pub fn remember_fact(&mut self, text: impl Into<String>) {
        self.record(MemoryKind::Fact, text, None);
    }

    pub fn witness(&mut self, text: impl Into<String>, about: Option<CharacterId>) {
        self.record(MemoryKind::WitnessedEvent, text, about);
    }

    pub fn hear_rumor(&mut self, text: impl Into<String>) {
        self.record(MemoryKind::Rumor, text, None);
    }

    pub fn learn_secret(&mut self, text: impl Into<String>) {
        self.record(MemoryKind::Secret, text, None);
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn of_kind(&self, kind: MemoryKind) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    pub fn about(&self, character: CharacterId) -> impl Iterator<Item = &MemoryEntry> {
        self.entries
            .iter()
            .filter(move |e| e.about == Some(character))
    }

    /// The last `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> &[MemoryEntry] {
        let start = self.entries.len().saturating_sub(count);
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
