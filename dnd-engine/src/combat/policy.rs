//! Pluggable encounter policies: initiative tiebreaks and termination.

use super::combatant::{Combatant, Side};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Orders combatants whose initiative totals are equal.
///
/// `Ordering::Less` puts `a` ahead of `b`. Anything still equal falls back to
/// insertion order.
pub trait TiebreakRule: fmt::Debug + Send + Sync {
    fn compare(&self, a: &Combatant, b: &Combatant) -> Ordering;
}

/// Decides when an encounter is over.
pub trait TerminationRule: fmt::Debug + Send + Sync {
    fn is_resolved(&self, combatants: &[Combatant]) -> bool;
}

/// Higher Dexterity modifier first, then insertion order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DexterityThenOrder;

impl TiebreakRule for DexterityThenOrder {
    fn compare(&self, a: &Combatant, b: &Combatant) -> Ordering {
        b.dex_modifier().cmp(&a.dex_modifier())
    }
}

/// Ties keep insertion order.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertionOrder;

impl TiebreakRule for InsertionOrder {
    fn compare(&self, _a: &Combatant, _b: &Combatant) -> Ordering {
        Ordering::Equal
    }
}

/// Party members win ties, then Dexterity.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartyFirst;

impl TiebreakRule for PartyFirst {
    fn compare(&self, a: &Combatant, b: &Combatant) -> Ordering {
        let rank = |c: &Combatant| match c.side {
            Side::Party => 0,
            Side::Foes => 1,
        };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| DexterityThenOrder.compare(a, b))
    }
}

fn side_standing(combatants: &[Combatant], side: Side) -> bool {
    combatants.iter().any(|c| c.side == side && c.is_up())
}

/// Over once at most one side has anyone above 0 HP.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastSideStanding;

impl TerminationRule for LastSideStanding {
    fn is_resolved(&self, combatants: &[Combatant]) -> bool {
        !(side_standing(combatants, Side::Party) && side_standing(combatants, Side::Foes))
    }
}

/// Over only when the whole party is down.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartyDefeated;

impl TerminationRule for PartyDefeated {
    fn is_resolved(&self, combatants: &[Combatant]) -> bool {
        !side_standing(combatants, Side::Party)
    }
}

/// Encounter configuration.
#[derive(Debug, Clone)]
pub struct EncounterConfig {
    pub tiebreak: Arc<dyn TiebreakRule>,
    pub termination: Arc<dyn TerminationRule>,
}

impl Default for EncounterConfig {
    fn default() -> Self {
        Self {
            tiebreak: Arc::new(DexterityThenOrder),
            termination: Arc::new(LastSideStanding),
        }
    }
}

impl EncounterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tiebreak(mut self, rule: impl TiebreakRule + 'static) -> Self {
        self.tiebreak = Arc::new(rule);
        self
    }

    pub fn with_termination(mut self, rule: impl TerminationRule + 'static) -> Self {
        self.termination = Arc::new(rule);
        self
    }
}
