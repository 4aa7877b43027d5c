//! D&D 5e rules: pure resolution functions and the Effect vocabulary.
//!
//! Every function here computes an outcome from its inputs and an injected
//! [`DieSource`]. Nothing is mutated except the hit point pool handed to
//! [`apply_damage`] and [`heal`]. State changes produced by higher layers are
//! reported as ordered [`Effect`]s.

use crate::dice::{Advantage, DiceExpression, DieSource, RollResult};
use crate::world::{ArmorClass, ArmorType, CharacterId, Condition, DamageResult, HitPoints};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Core Numbers
// ============================================================================

/// `floor((score - 10) / 2)`.
pub fn ability_modifier(score: u8) -> i8 {
    (score as i16 - 10).div_euclid(2) as i8
}

/// Proficiency bonus by character level.
pub fn proficiency_bonus(level: u8) -> i8 {
    match level {
        0..=4 => 2,
        5..=8 => 3,
        9..=12 => 4,
        13..=16 => 5,
        _ => 6,
    }
}

/// Effective armor class for a given Dexterity modifier.
pub fn armor_class(ac: &ArmorClass, dex_mod: i8) -> u8 {
    let dex_bonus = match ac.armor_type {
        None | Some(ArmorType::Light) => dex_mod,
        Some(ArmorType::Medium) => dex_mod.min(2),
        Some(ArmorType::Heavy) => 0,
    };
    let total = ac.base as i16 + dex_bonus as i16 + ac.shield_bonus as i16;
    total.clamp(0, u8::MAX as i16) as u8
}

// ============================================================================
// Checks and Saves
// ============================================================================

/// Outcome of an ability check or saving throw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub roll: RollResult,
    pub total: i32,
    pub dc: i32,
    pub success: bool,
}

impl CheckResult {
    fn from_roll(roll: RollResult, dc: i32) -> Self {
        let total = roll.total;
        Self {
            success: total >= dc,
            roll,
            total,
            dc,
        }
    }

    /// How far above (positive) or below (negative) the DC the check landed.
    pub fn margin(&self) -> i32 {
        self.total - self.dc
    }
}

/// d20 + modifier against a DC.
pub fn skill_check<D: DieSource + ?Sized>(
    modifier: i8,
    dc: i32,
    advantage: Advantage,
    dice: &mut D,
) -> CheckResult {
    let roll = DiceExpression::d20(modifier as i32).evaluate_with_advantage(advantage, dice);
    CheckResult::from_roll(roll, dc)
}

/// Saving throw at a flat d20.
pub fn saving_throw<D: DieSource + ?Sized>(modifier: i8, dc: i32, dice: &mut D) -> CheckResult {
    saving_throw_with_advantage(modifier, dc, Advantage::Normal, dice)
}

pub fn saving_throw_with_advantage<D: DieSource + ?Sized>(
    modifier: i8,
    dc: i32,
    advantage: Advantage,
    dice: &mut D,
) -> CheckResult {
    let roll = DiceExpression::d20(modifier as i32).evaluate_with_advantage(advantage, dice);
    CheckResult::from_roll(roll, dc)
}

/// Net advantage from any number of sources. One or more advantages and one
/// or more disadvantages cancel to a straight roll.
pub fn net_advantage(sources: impl IntoIterator<Item = Advantage>) -> Advantage {
    let (mut advantage, mut disadvantage) = (false, false);
    for source in sources {
        match source {
            Advantage::Advantage => advantage = true,
            Advantage::Disadvantage => disadvantage = true,
            Advantage::Normal => {}
        }
    }
    match (advantage, disadvantage) {
        (true, false) => Advantage::Advantage,
        (false, true) => Advantage::Disadvantage,
        _ => Advantage::Normal,
    }
}

// ============================================================================
// Attacks and Damage
// ============================================================================

/// Outcome of an attack roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackResult {
    pub roll: RollResult,
    pub total: i32,
    pub target_ac: u8,
    pub hit: bool,
    pub critical: bool,
}

/// d20 + attack modifier against armor class. A natural 20 always hits and
/// crits; a natural 1 always misses.
pub fn attack_roll<D: DieSource + ?Sized>(
    attack_modifier: i8,
    target_ac: u8,
    dice: &mut D,
) -> AttackResult {
    attack_roll_with_advantage(attack_modifier, target_ac, Advantage::Normal, dice)
}

pub fn attack_roll_with_advantage<D: DieSource + ?Sized>(
    attack_modifier: i8,
    target_ac: u8,
    advantage: Advantage,
    dice: &mut D,
) -> AttackResult {
    let roll =
        DiceExpression::d20(attack_modifier as i32).evaluate_with_advantage(advantage, dice);
    let critical = roll.natural_20;
    let hit = if roll.natural_20 {
        true
    } else if roll.natural_1 {
        false
    } else {
        roll.total >= target_ac as i32
    };

    AttackResult {
        total: roll.total,
        roll,
        target_ac,
        hit,
        critical,
    }
}

/// Roll damage. A critical doubles the dice, never the modifier. The total
/// never drops below zero.
pub fn damage_roll<D: DieSource + ?Sized>(
    expr: &DiceExpression,
    critical: bool,
    dice: &mut D,
) -> RollResult {
    let mut roll = if critical {
        expr.doubled().evaluate(dice)
    } else {
        expr.evaluate(dice)
    };
    roll.total = roll.total.max(0);
    roll
}

/// Apply damage: temporary hit points absorb first, current never goes below 0.
pub fn apply_damage(hp: &mut HitPoints, amount: i32) -> DamageResult {
    let amount = amount.max(0);
    let absorbed = hp.temporary.min(amount);
    hp.temporary -= absorbed;

    let remaining = amount - absorbed;
    let was_up = hp.current > 0;
    let hp_lost = remaining.min(hp.current);
    hp.current -= hp_lost;

    assert!(
        (0..=hp.maximum).contains(&hp.current),
        "hit points {} escaped 0..={}",
        hp.current,
        hp.maximum
    );

    DamageResult {
        damage_taken: amount,
        hp_lost,
        dropped_to_zero: was_up && hp.current == 0,
    }
}

/// Heal up to the maximum. Returns hit points actually restored.
pub fn heal(hp: &mut HitPoints, amount: i32) -> i32 {
    let before = hp.current;
    hp.current = (hp.current + amount.max(0)).min(hp.maximum);

    assert!(
        (0..=hp.maximum).contains(&hp.current),
        "hit points {} escaped 0..={}",
        hp.current,
        hp.maximum
    );
    hp.current - before
}

/// Common D&D damage types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DamageType {
    Slashing,
    Piercing,
    Bludgeoning,
    Fire,
    Cold,
    Lightning,
    Thunder,
    Acid,
    Poison,
    Necrotic,
    Radiant,
    Force,
    Psychic,
}

impl DamageType {
    pub fn name(&self) -> &'static str {
        match self {
            DamageType::Slashing => "slashing",
            DamageType::Piercing => "piercing",
            DamageType::Bludgeoning => "bludgeoning",
            DamageType::Fire => "fire",
            DamageType::Cold => "cold",
            DamageType::Lightning => "lightning",
            DamageType::Thunder => "thunder",
            DamageType::Acid => "acid",
            DamageType::Poison => "poison",
            DamageType::Necrotic => "necrotic",
            DamageType::Radiant => "radiant",
            DamageType::Force => "force",
            DamageType::Psychic => "psychic",
        }
    }
}

impl fmt::Display for DamageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Encumbrance
// ============================================================================

/// Variant encumbrance tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Encumbrance {
    Unencumbered,
    /// Over 5 x STR: speed -10.
    Encumbered,
    /// Over 10 x STR: speed -20, disadvantage on physical rolls.
    HeavilyEncumbered,
    /// Over 15 x STR: cannot move.
    OverCapacity,
}

pub fn encumbrance(strength: u8, carried_weight: f32) -> Encumbrance {
    let strength = strength as f32;
    if carried_weight > strength * 15.0 {
        Encumbrance::OverCapacity
    } else if carried_weight > strength * 10.0 {
        Encumbrance::HeavilyEncumbered
    } else if carried_weight > strength * 5.0 {
        Encumbrance::Encumbered
    } else {
        Encumbrance::Unencumbered
    }
}

// ============================================================================
// Effects
// ============================================================================

/// One concrete, ordered state change or roll produced by resolution.
/// Narrators and templates consume these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// A dice roll occurred
    DiceRolled { roll: RollResult, purpose: String },

    AttackHit {
        attacker_id: CharacterId,
        target_id: CharacterId,
        total: i32,
        critical: bool,
    },

    AttackMissed {
        attacker_id: CharacterId,
        target_id: CharacterId,
        total: i32,
    },

    /// HP changed (negative for damage, positive for healing)
    HpChanged {
        target_id: CharacterId,
        amount: i32,
        new_current: i32,
        new_max: i32,
        dropped_to_zero: bool,
    },

    ConditionApplied {
        target_id: CharacterId,
        condition: Condition,
        source: String,
        duration_rounds: Option<u32>,
    },

    ConditionRemoved {
        target_id: CharacterId,
        condition: Condition,
    },

    /// Spell slot consumed
    SpellSlotUsed {
        caster_id: CharacterId,
        level: u8,
        remaining: u8,
    },

    ConcentrationStarted {
        caster_id: CharacterId,
        spell: String,
    },

    ConcentrationMaintained {
        caster_id: CharacterId,
        spell: String,
        dc: i32,
    },

    ConcentrationBroken {
        caster_id: CharacterId,
        spell: String,
    },

    /// A concentration spell's benefit now rests on a combatant
    BoonGranted {
        target_id: CharacterId,
        spell: String,
    },

    BoonEnded {
        target_id: CharacterId,
        spell: String,
    },

    /// An ability check or saving throw was resolved
    CheckResolved {
        purpose: String,
        total: i32,
        dc: i32,
        success: bool,
    },

    Dodging { combatant_id: CharacterId },

    CombatStarted,

    InitiativeRolled {
        character_id: CharacterId,
        name: String,
        roll: i32,
        total: i32,
    },

    /// Turn advanced in combat
    TurnAdvanced {
        round: u32,
        current_combatant: String,
    },

    RoundStarted { round: u32 },

    CombatEnded { rounds: u32 },
}

/// The result of resolving something: ordered effects plus a short
/// mechanical summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub effects: Vec<Effect>,
    pub summary: String,
}

impl Resolution {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            effects: Vec::new(),
            summary: summary.into(),
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    pub fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Append a sentence to the summary.
    pub fn note(&mut self, line: impl AsRef<str>) {
        if !self.summary.is_empty() {
            self.summary.push(' ');
        }
        self.summary.push_str(line.as_ref());
    }

    /// Fold another resolution into this one, keeping order.
    pub fn absorb(&mut self, other: Resolution) {
        self.effects.extend(other.effects);
        if !other.summary.is_empty() {
            self.note(other.summary);
        }
    }

    /// Net hit point change for one target across all effects.
    pub fn hp_delta(&self, target: CharacterId) -> i32 {
        self.effects
            .iter()
            .filter_map(|e| match e {
                Effect::HpChanged {
                    target_id, amount, ..
                } if *target_id == target => Some(*amount),
                _ => None,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::DieType;
    use crate::testing::ScriptedDice;

    #[test]
    fn test_ability_modifier_table() {
        assert_eq!(ability_modifier(1), -5);
        assert_eq!(ability_modifier(3), -4);
        assert_eq!(ability_modifier(9), -1);
        assert_eq!(ability_modifier(10), 0);
        assert_eq!(ability_modifier(11), 0);
        assert_eq!(ability_modifier(20), 5);
        assert_eq!(ability_modifier(30), 10);
    }

    #[test]
    fn test_ability_modifier_is_monotonic() {
        for score in 3..20u8 {
            assert!(ability_modifier(score) <= ability_modifier(score + 1));
        }
    }

    #[test]
    fn test_proficiency_bonus_by_level() {
        let expected = [(1, 2), (4, 2), (5, 3), (8, 3), (9, 4), (13, 5), (16, 5), (17, 6), (20, 6)];
        for (level, bonus) in expected {
            assert_eq!(proficiency_bonus(level), bonus, "level {level}");
        }
    }

    #[test]
    fn test_armor_class_by_armor_type() {
        let mut ac = ArmorClass::unarmored();
        assert_eq!(armor_class(&ac, 3), 13);

        ac.base = 14;
        ac.armor_type = Some(ArmorType::Medium);
        assert_eq!(armor_class(&ac, 4), 16);

        ac.base = 18;
        ac.armor_type = Some(ArmorType::Heavy);
        ac.shield_bonus = 2;
        assert_eq!(armor_class(&ac, 3), 20);
    }

    #[test]
    fn test_skill_check() {
        let mut dice = ScriptedDice::new([12]);
        let result = skill_check(3, 15, Advantage::Normal, &mut dice);
        assert_eq!(result.total, 15);
        assert!(result.success);
        assert_eq!(result.margin(), 0);

        let mut dice = ScriptedDice::new([5, 18]);
        let result = skill_check(0, 15, Advantage::Disadvantage, &mut dice);
        assert_eq!(result.total, 5);
        assert!(!result.success);
        assert_eq!(result.roll.rolls, vec![5, 18]);
    }

    #[test]
    fn test_saving_throw() {
        let mut dice = ScriptedDice::new([9]);
        let result = saving_throw(-1, 10, &mut dice);
        assert_eq!(result.total, 8);
        assert!(!result.success);

        let mut dice = ScriptedDice::new([9, 14]);
        let result = saving_throw_with_advantage(-1, 10, Advantage::Advantage, &mut dice);
        assert_eq!(result.total, 13);
        assert!(result.success);
    }

    #[test]
    fn test_net_advantage() {
        let (adv, dis, normal) = (
            Advantage::Advantage,
            Advantage::Disadvantage,
            Advantage::Normal,
        );
        assert_eq!(net_advantage([normal, adv]), adv);
        assert_eq!(net_advantage([adv, adv, dis]), normal);
        assert_eq!(net_advantage([dis, normal]), dis);
        assert_eq!(net_advantage([]), normal);
    }

    #[test]
    fn test_natural_20_always_hits_and_crits() {
        let mut dice = ScriptedDice::new([20]);
        let result = attack_roll(-5, 30, &mut dice);
        assert!(result.hit);
        assert!(result.critical);

        let mut dice = ScriptedDice::new([20]);
        let result = attack_roll(0, 15, &mut dice);
        assert!(result.hit && result.critical);
    }

    #[test]
    fn test_natural_1_always_misses() {
        let mut dice = ScriptedDice::new([1]);
        let result = attack_roll(20, 5, &mut dice);
        assert!(!result.hit);
        assert!(!result.critical);
    }

    #[test]
    fn test_attack_meets_ac() {
        let mut dice = ScriptedDice::new([10, 9]);
        assert!(attack_roll(5, 15, &mut dice).hit);
        assert!(!attack_roll(5, 15, &mut dice).hit);
    }

    #[test]
    fn test_critical_damage_doubles_dice_not_modifier() {
        let expr = DiceExpression::new(1, DieType::D8, 3).unwrap();
        let mut dice = ScriptedDice::new([6, 7]);
        let roll = damage_roll(&expr, true, &mut dice);
        assert_eq!(roll.rolls, vec![6, 7]);
        assert_eq!(roll.total, 16);
        assert!(dice.is_exhausted());
    }

    #[test]
    fn test_damage_never_negative() {
        let expr = DiceExpression::new(1, DieType::D4, -3).unwrap();
        let mut dice = ScriptedDice::new([1]);
        assert_eq!(damage_roll(&expr, false, &mut dice).total, 0);
    }

    #[test]
    fn test_apply_damage_clamps_at_zero() {
        let mut hp = HitPoints::new(12);
        let result = apply_damage(&mut hp, 30);
        assert_eq!(hp.current, 0);
        assert_eq!(result.hp_lost, 12);
        assert!(result.dropped_to_zero);

        let again = apply_damage(&mut hp, 5);
        assert_eq!(hp.current, 0);
        assert!(!again.dropped_to_zero);
    }

    #[test]
    fn test_heal_caps_at_maximum() {
        let mut hp = HitPoints::with_current(3, 12);
        assert_eq!(heal(&mut hp, 20), 9);
        assert_eq!(hp.current, 12);
    }

    #[test]
    fn test_encumbrance_tiers() {
        assert_eq!(encumbrance(10, 50.0), Encumbrance::Unencumbered);
        assert_eq!(encumbrance(10, 51.0), Encumbrance::Encumbered);
        assert_eq!(encumbrance(10, 101.0), Encumbrance::HeavilyEncumbered);
        assert_eq!(encumbrance(10, 151.0), Encumbrance::OverCapacity);
    }

    #[test]
    fn test_resolution_hp_delta() {
        let target = CharacterId::new();
        let mut resolution = Resolution::new("Goblin hits.");
        resolution.push(Effect::HpChanged {
            target_id: target,
            amount: -5,
            new_current: 5,
            new_max: 10,
            dropped_to_zero: false,
        });
        resolution.absorb(Resolution::new("Cleric heals.").with_effect(Effect::HpChanged {
            target_id: target,
            amount: 2,
            new_current: 7,
            new_max: 10,
            dropped_to_zero: false,
        }));
        assert_eq!(resolution.hp_delta(target), -3);
        assert_eq!(resolution.summary, "Goblin hits. Cleric heals.");
    }
}
