//! Non-player characters: personality, relationships and memory.
//!
//! An [`Npc`] is long-lived and shared between sessions through the
//! [`NpcDirectory`]. Relationship scores are clamped to `-10..=10` and memory
//! is append-only.

mod behavior;
mod directory;
mod memory;
mod relationship;

pub use behavior::{
    behavior_modifier, behavior_roll, BehaviorConfig, BehaviorRoll, SocialSituation,
};
pub use directory::NpcDirectory;
pub use memory::{MemoryEntry, MemoryKind, NpcMemory};
pub use relationship::{NpcRelationship, RelationshipDelta, SCORE_MAX, SCORE_MIN};

use crate::world::CharacterId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NpcError {
    #[error("{attribute} must be between 0 and 10, got {value}")]
    AttributeOutOfRange { attribute: NpcAttribute, value: u8 },

    #[error("Unknown NPC: {0}")]
    UnknownNpc(NpcId),
}

/// Unique identifier for an NPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NpcId(pub Uuid);

impl NpcId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NpcId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Personality and Role
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Personality {
    Friendly,
    Neutral,
    Hostile,
    Suspicious,
    Helpful,
    Greedy,
    Proud,
    Humble,
    Curious,
    Fearful,
}

impl Personality {
    pub fn name(&self) -> &'static str {
        match self {
            Personality::Friendly => "friendly",
            Personality::Neutral => "neutral",
            Personality::Hostile => "hostile",
            Personality::Suspicious => "suspicious",
            Personality::Helpful => "helpful",
            Personality::Greedy => "greedy",
            Personality::Proud => "proud",
            Personality::Humble => "humble",
            Personality::Curious => "curious",
            Personality::Fearful => "fearful",
        }
    }

    /// Starting lean before any relationship exists.
    fn baseline(&self) -> i32 {
        match self {
            Personality::Hostile => -4,
            Personality::Suspicious => -2,
            Personality::Proud | Personality::Fearful => -1,
            Personality::Neutral | Personality::Greedy | Personality::Curious => 0,
            Personality::Humble => 1,
            Personality::Friendly => 3,
            Personality::Helpful => 4,
        }
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NpcRole {
    Merchant,
    Guard,
    QuestGiver,
    Innkeeper,
    Noble,
    Priest,
    Criminal,
    Commoner,
    Other(String),
}

impl NpcRole {
    pub fn name(&self) -> &str {
        match self {
            NpcRole::Merchant => "merchant",
            NpcRole::Guard => "guard",
            NpcRole::QuestGiver => "quest-giver",
            NpcRole::Innkeeper => "innkeeper",
            NpcRole::Noble => "noble",
            NpcRole::Priest => "priest",
            NpcRole::Criminal => "criminal",
            NpcRole::Commoner => "commoner",
            NpcRole::Other(name) => name,
        }
    }
}

// ============================================================================
// Attributes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NpcAttribute {
    Trust,
    Bravery,
    Intelligence,
    Helpfulness,
}

impl NpcAttribute {
    pub fn name(&self) -> &'static str {
        match self {
            NpcAttribute::Trust => "trust",
            NpcAttribute::Bravery => "bravery",
            NpcAttribute::Intelligence => "intelligence",
            NpcAttribute::Helpfulness => "helpfulness",
        }
    }
}

impl fmt::Display for NpcAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Behavior attributes, each 0-10 with 5 as average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpcAttributes {
    trust: u8,
    bravery: u8,
    intelligence: u8,
    helpfulness: u8,
}

impl NpcAttributes {
    pub const MAX: u8 = 10;

    pub fn new(trust: u8, bravery: u8, intelligence: u8, helpfulness: u8) -> Result<Self, NpcError> {
        let attributes = Self {
            trust,
            bravery,
            intelligence,
            helpfulness,
        };
        for attribute in [
            NpcAttribute::Trust,
            NpcAttribute::Bravery,
            NpcAttribute::Intelligence,
            NpcAttribute::Helpfulness,
        ] {
            let value = attributes.get(attribute);
            if value > Self::MAX {
                return Err(NpcError::AttributeOutOfRange { attribute, value });
            }
        }
        Ok(attributes)
    }

    /// All attributes at 5.
    pub fn average() -> Self {
        Self {
            trust: 5,
            bravery: 5,
            intelligence: 5,
            helpfulness: 5,
        }
    }

    pub fn get(&self, attribute: NpcAttribute) -> u8 {
        match attribute {
            NpcAttribute::Trust => self.trust,
            NpcAttribute::Bravery => self.bravery,
            NpcAttribute::Intelligence => self.intelligence,
            NpcAttribute::Helpfulness => self.helpfulness,
        }
    }
}

impl Default for NpcAttributes {
    fn default() -> Self {
        Self::average()
    }
}

// ============================================================================
// Disposition
// ============================================================================

/// How an NPC currently leans toward a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Disposition {
    Hostile,
    Unfriendly,
    Neutral,
    Friendly,
    Helpful,
}

impl Disposition {
    fn from_score(score: i32) -> Self {
        match score {
            i32::MIN..=-5 => Disposition::Hostile,
            -4..=-2 => Disposition::Unfriendly,
            -1..=1 => Disposition::Neutral,
            2..=4 => Disposition::Friendly,
            _ => Disposition::Helpful,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Disposition::Hostile => "hostile",
            Disposition::Unfriendly => "unfriendly",
            Disposition::Neutral => "neutral",
            Disposition::Friendly => "friendly",
            Disposition::Helpful => "helpful",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// NPC
// ============================================================================

/// A non-player character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Npc {
    pub id: NpcId,
    pub name: String,
    pub description: String,
    pub personality: Personality,
    pub role: NpcRole,
    pub attributes: NpcAttributes,
    relationships: HashMap<CharacterId, NpcRelationship>,
    memory: NpcMemory,
}

impl Npc {
    pub fn new(
        name: impl Into<String>,
        personality: Personality,
        role: NpcRole,
        attributes: NpcAttributes,
    ) -> Self {
        Self {
            id: NpcId::new(),
            name: name.into(),
            description: String::new(),
            personality,
            role,
            attributes,
            relationships: HashMap::new(),
            memory: NpcMemory::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Seed a relationship, e.g. when hydrating from storage.
    pub fn with_relationship(mut self, character: CharacterId, relationship: NpcRelationship) -> Self {
        self.relationships.insert(character, relationship);
        self
    }

    pub fn relationship(&self, character: CharacterId) -> Option<&NpcRelationship> {
        self.relationships.get(&character)
    }

    pub fn relationships(&self) -> impl Iterator<Item = (&CharacterId, &NpcRelationship)> {
        self.relationships.iter()
    }

    pub fn memory(&self) -> &NpcMemory {
        &self.memory
    }

    /// Record an interaction with `character`: the event goes into the
    /// relationship history and the NPC's memory, and the delta is applied
    /// with clamping.
    pub fn record_interaction(
        &mut self,
        character: CharacterId,
        event: impl Into<String>,
        delta: RelationshipDelta,
    ) -> &NpcRelationship {
        self.record_interaction_at(character, event, delta, Utc::now())
    }

    pub fn record_interaction_at(
        &mut self,
        character: CharacterId,
        event: impl Into<String>,
        delta: RelationshipDelta,
        at: DateTime<Utc>,
    ) -> &NpcRelationship {
        let event = event.into();
        self.memory.witness(event.clone(), Some(character));
        let relationship = self.relationships.entry(character).or_default();
        relationship.record(event, delta, at);
        relationship
    }

    pub fn remember_fact(&mut self, text: impl Into<String>) {
        self.memory.remember_fact(text);
    }

    pub fn witness(&mut self, text: impl Into<String>) {
        self.memory.witness(text, None);
    }

    pub fn hear_rumor(&mut self, text: impl Into<String>) {
        self.memory.hear_rumor(text);
    }

    pub fn learn_secret(&mut self, text: impl Into<String>) {
        self.memory.learn_secret(text);
    }

    /// Lean toward `character`, or toward strangers when `None`.
    pub fn disposition_toward(&self, character: Option<CharacterId>) -> Disposition {
        let relationship = character
            .and_then(|id| self.relationship(id))
            .map(|r| r.total() / 3)
            .unwrap_or(0);
        Disposition::from_score(self.personality.baseline() + relationship)
    }

    /// A short description of the NPC for a narrator prompt. Secrets are
    /// left out.
    pub fn persona_summary(&self, character: Option<CharacterId>) -> String {
        let mut summary = format!(
            "{} is a {} {}, {} toward this character.",
            self.name,
            self.personality,
            self.role.name(),
            self.disposition_toward(character)
        );
        if !self.description.is_empty() {
            summary.push(' ');
            summary.push_str(&self.description);
        }
        if let Some(relationship) = character.and_then(|id| self.relationship(id)) {
            summary.push_str(&format!(
                " Affection {}, trust {}, respect {}.",
                relationship.affection, relationship.trust, relationship.respect
            ));
        }
        let recent: Vec<&str> = self
            .memory
            .entries()
            .iter()
            .rev()
            .filter(|e| e.kind != MemoryKind::Secret)
            .take(3)
            .map(|e| e.text.as_str())
            .collect();
        if !recent.is_empty() {
            summary.push_str(" Remembers: ");
            summary.push_str(&recent.into_iter().rev().collect::<Vec<_>>().join("; "));
            summary.push('.');
        }
        summary
    }
}

/// Build an NPC, validating its attributes.
pub fn create_npc(
    name: impl Into<String>,
    personality: Personality,
    role: NpcRole,
    trust: u8,
    bravery: u8,
    intelligence: u8,
    helpfulness: u8,
) -> Result<Npc, NpcError> {
    let attributes = NpcAttributes::new(trust, bravery, intelligence, helpfulness)?;
    Ok(Npc::new(name, personality, role, attributes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_validation() {
        assert!(NpcAttributes::new(0, 10, 5, 5).is_ok());
        assert_eq!(
            NpcAttributes::new(5, 11, 5, 5),
            Err(NpcError::AttributeOutOfRange {
                attribute: NpcAttribute::Bravery,
                value: 11
            })
        );
        assert!(create_npc("Mara", Personality::Proud, NpcRole::Noble, 5, 5, 5, 12).is_err());
    }

    #[test]
    fn test_record_interaction() {
        let hero = CharacterId::new();
        let mut npc = create_npc("Mara", Personality::Neutral, NpcRole::Guard, 5, 7, 5, 4).unwrap();
        npc.record_interaction(hero, "Helped fight off wolves", RelationshipDelta::trust(8));
        let relationship = npc.record_interaction(hero, "Vouched for at the gate", RelationshipDelta::trust(15));

        assert_eq!(relationship.trust, 10);
        assert_eq!(relationship.history.len(), 2);
        assert!(relationship.last_interaction.is_some());
        assert_eq!(npc.memory().about(hero).count(), 2);
    }

    #[test]
    fn test_disposition() {
        let hero = CharacterId::new();
        let mut npc = Npc::new("Vex", Personality::Hostile, NpcRole::Criminal, NpcAttributes::average());
        assert_eq!(npc.disposition_toward(None), Disposition::Hostile);
        assert_eq!(npc.disposition_toward(Some(hero)), Disposition::Hostile);

        npc.record_interaction(hero, "Shared a bottle", RelationshipDelta::new(8, 8, 8));
        assert_eq!(npc.disposition_toward(Some(hero)), Disposition::Friendly);
        assert_eq!(npc.disposition_toward(None), Disposition::Hostile);
    }

    #[test]
    fn test_persona_summary_hides_secrets() {
        let hero = CharacterId::new();
        let mut npc = Npc::new("Tobin", Personality::Greedy, NpcRole::Merchant, NpcAttributes::average())
            .with_description("Runs the dockside stall.");
        npc.hear_rumor("Bandits on the north road");
        npc.learn_secret("Fences stolen silver");
        npc.record_interaction(hero, "Haggled hard", RelationshipDelta::respect(2));

        let summary = npc.persona_summary(Some(hero));
        assert!(summary.starts_with("Tobin is a greedy merchant, neutral toward this character."));
        assert!(summary.contains("Runs the dockside stall."));
        assert!(summary.contains("respect 2"));
        assert!(summary.contains("Bandits on the north road; Haggled hard"));
        assert!(!summary.contains("silver"));
    }

    #[test]
    fn test_npc_serde() {
        let hero = CharacterId::new();
        let mut npc = Npc::new("Tobin", Personality::Greedy, NpcRole::Merchant, NpcAttributes::average());
        npc.record_interaction(hero, "Bought rope", RelationshipDelta::affection(1));
        let json = serde_json::to_string(&npc).unwrap();
        let back: Npc = serde_json::from_str(&json).unwrap();
        assert_eq!(back, npc);
    }
}
