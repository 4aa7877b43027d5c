//! Behavior rolls: how an NPC reacts when a character pushes on it.
//!
//! A behavior roll is an ordinary d20 check made on the NPC's behalf. The
//! relevant attribute (0-10, centered on 5), the NPC's personality and its
//! relationship with the acting character all feed the modifier.

use super::{Npc, NpcAttribute, Personality};
use crate::dice::{Advantage, DieSource};
use crate::rules::{self, CheckResult};
use crate::world::CharacterId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a character is trying to get out of an NPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocialSituation {
    Persuasion,
    RequestHelp,
    Intimidation,
    Bribe,
    Deception,
    Threatened,
}

impl SocialSituation {
    pub fn all() -> [SocialSituation; 6] {
        use SocialSituation::*;
        [Persuasion, RequestHelp, Intimidation, Bribe, Deception, Threatened]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SocialSituation::Persuasion => "persuasion",
            SocialSituation::RequestHelp => "request for help",
            SocialSituation::Intimidation => "intimidation",
            SocialSituation::Bribe => "bribe",
            SocialSituation::Deception => "deception",
            SocialSituation::Threatened => "threat",
        }
    }

    /// The attribute the NPC rolls with.
    pub fn attribute(&self) -> NpcAttribute {
        match self {
            SocialSituation::Persuasion => NpcAttribute::Trust,
            SocialSituation::RequestHelp => NpcAttribute::Helpfulness,
            SocialSituation::Intimidation => NpcAttribute::Bravery,
            SocialSituation::Bribe => NpcAttribute::Helpfulness,
            SocialSituation::Deception => NpcAttribute::Intelligence,
            SocialSituation::Threatened => NpcAttribute::Bravery,
        }
    }

    /// Whether a successful roll means the NPC holds out against the
    /// character rather than going along.
    pub fn is_resisted(&self) -> bool {
        matches!(
            self,
            SocialSituation::Intimidation | SocialSituation::Deception | SocialSituation::Threatened
        )
    }

    /// Personality adjustment to the roll.
    pub fn personality_adjustment(&self, personality: Personality) -> i8 {
        use Personality::*;
        match (self, personality) {
            (SocialSituation::Persuasion, Friendly | Helpful) => 2,
            (SocialSituation::Persuasion, Humble | Curious) => 1,
            (SocialSituation::Persuasion, Proud) => -1,
            (SocialSituation::Persuasion, Suspicious) => -2,
            (SocialSituation::Persuasion, Hostile) => -3,

            (SocialSituation::RequestHelp, Helpful) => 3,
            (SocialSituation::RequestHelp, Friendly | Humble) => 1,
            (SocialSituation::RequestHelp, Greedy | Fearful) => -1,
            (SocialSituation::RequestHelp, Suspicious) => -2,
            (SocialSituation::RequestHelp, Hostile) => -3,

            (SocialSituation::Bribe, Greedy) => 4,
            (SocialSituation::Bribe, Humble) => -1,
            (SocialSituation::Bribe, Proud) => -2,

            (SocialSituation::Intimidation, Proud | Hostile) => 2,
            (SocialSituation::Intimidation, Fearful) => -3,

            (SocialSituation::Deception, Suspicious) => 3,
            (SocialSituation::Deception, Curious) => 1,
            (SocialSituation::Deception, Friendly) => -1,

            (SocialSituation::Threatened, Hostile) => 2,
            (SocialSituation::Threatened, Proud) => 1,
            (SocialSituation::Threatened, Fearful) => -3,

            _ => 0,
        }
    }
}

impl fmt::Display for SocialSituation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tunables for behavior rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorConfig {
    pub dc: i32,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self { dc: 10 }
    }
}

impl BehaviorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dc(mut self, dc: i32) -> Self {
        self.dc = dc;
        self
    }
}

/// Outcome of a behavior roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorRoll {
    pub situation: SocialSituation,
    pub modifier: i8,
    pub check: CheckResult,
    /// The NPC's own roll succeeded.
    pub success: bool,
    /// The character got what they wanted.
    pub player_prevails: bool,
}

impl BehaviorRoll {
    pub fn summary(&self, npc_name: &str) -> String {
        let verb = match (self.situation, self.player_prevails) {
            (SocialSituation::Persuasion, true) => "is persuaded",
            (SocialSituation::Persuasion, false) => "is not convinced",
            (SocialSituation::RequestHelp, true) => "agrees to help",
            (SocialSituation::RequestHelp, false) => "refuses to help",
            (SocialSituation::Bribe, true) => "takes the bribe",
            (SocialSituation::Bribe, false) => "refuses the bribe",
            (SocialSituation::Intimidation, true) => "is cowed",
            (SocialSituation::Intimidation, false) => "stands firm",
            (SocialSituation::Deception, true) => "believes the lie",
            (SocialSituation::Deception, false) => "sees through the lie",
            (SocialSituation::Threatened, true) => "flees",
            (SocialSituation::Threatened, false) => "holds their ground",
        };
        format!(
            "{npc_name} {verb} ({} {:+} = {} vs DC {}).",
            self.check.roll.dice_total(),
            self.modifier,
            self.check.total,
            self.check.dc
        )
    }
}

/// Modifier for `npc` in `situation`, biased by its relationship with
/// `character` when one exists.
pub fn behavior_modifier(npc: &Npc, character: Option<CharacterId>, situation: SocialSituation) -> i8 {
    let attribute = npc.attributes.get(situation.attribute()) as i8 - 5;
    let bias = character
        .and_then(|id| npc.relationship(id))
        .map(|r| r.bias())
        .unwrap_or(0);
    attribute + situation.personality_adjustment(npc.personality) + bias
}

/// Roll how `npc` responds to `situation`.
pub fn behavior_roll<D: DieSource + ?Sized>(
    npc: &Npc,
    character: Option<CharacterId>,
    situation: SocialSituation,
    config: &BehaviorConfig,
    dice: &mut D,
) -> BehaviorRoll {
    let modifier = behavior_modifier(npc, character, situation);
    let check = rules::skill_check(modifier, config.dc, Advantage::Normal, dice);
    let success = check.success;
    BehaviorRoll {
        situation,
        modifier,
        check,
        success,
        player_prevails: success != situation.is_resisted(),
    }
}
