//! Spell slots, concentration and the spell catalog.
//!
//! Slot pools never substitute one level for another: a level-N cast needs a
//! free level-N slot, and upcasting only happens when the caller asks for a
//! higher slot. Running out of slots is a normal, reported outcome.

use crate::dice::{DiceExpression, DieSource, DieType};
use crate::rules::{self, CheckResult, DamageType};
use crate::world::{Ability, Condition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

/// Highest spell slot level.
pub const MAX_SLOT_LEVEL: u8 = 9;

/// Errors from spending spell resources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpellError {
    #[error("No level {level} spell slots available")]
    NoSlotsAvailable { level: u8 },

    #[error("{spell} is a level {minimum} spell and cannot be cast with a level {requested} slot")]
    BelowMinimumLevel {
        spell: String,
        minimum: u8,
        requested: u8,
    },

    #[error("Spell slot level {0} does not exist")]
    InvalidSlotLevel(u8),

    #[error("Unknown spell: {0}")]
    UnknownSpell(String),
}

// ============================================================================
// Spell Slots
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "SlotCounts")]
pub struct SlotInfo {
    pub total: u8,
    pub expended: u8,
}

#[derive(Deserialize)]
struct SlotCounts {
    total: u8,
    expended: u8,
}

impl TryFrom<SlotCounts> for SlotInfo {
    type Error = String;

    fn try_from(counts: SlotCounts) -> Result<Self, Self::Error> {
        if counts.expended > counts.total {
            return Err(format!(
                "{} slots expended out of {}",
                counts.expended, counts.total
            ));
        }
        Ok(Self {
            total: counts.total,
            expended: counts.expended,
        })
    }
}

impl SlotInfo {
    pub fn available(&self) -> u8 {
        assert!(
            self.expended <= self.total,
            "expended {} exceeds total {}",
            self.expended,
            self.total
        );
        self.total - self.expended
    }
}

/// Spell slots for levels 1-9. `expended <= total` at every level.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpellSlotPool {
    slots: [SlotInfo; MAX_SLOT_LEVEL as usize],
}

impl SpellSlotPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool from slot totals, starting at level 1.
    pub fn with_totals(totals: &[u8]) -> Self {
        assert!(
            totals.len() <= MAX_SLOT_LEVEL as usize,
            "at most {MAX_SLOT_LEVEL} slot levels"
        );
        let mut pool = Self::new();
        for (slot, &total) in pool.slots.iter_mut().zip(totals) {
            slot.total = total;
        }
        pool
    }

    /// Hydrate one level with some slots already spent.
    pub fn set_level(&mut self, level: u8, total: u8, expended: u8) -> Result<(), SpellError> {
        assert!(expended <= total, "expended {expended} exceeds total {total}");
        let slot = self.slot_mut(level)?;
        slot.total = total;
        slot.expended = expended;
        Ok(())
    }

    pub fn slot(&self, level: u8) -> Result<SlotInfo, SpellError> {
        check_level(level)?;
        Ok(self.slots[level as usize - 1])
    }

    fn slot_mut(&mut self, level: u8) -> Result<&mut SlotInfo, SpellError> {
        check_level(level)?;
        Ok(&mut self.slots[level as usize - 1])
    }

    pub fn available(&self, level: u8) -> u8 {
        self.slot(level).map(|s| s.available()).unwrap_or(0)
    }

    pub fn can_cast(&self, level: u8) -> bool {
        self.available(level) > 0
    }

    /// Spend one slot of exactly `level`.
    pub fn expend(&mut self, level: u8) -> Result<u8, SpellError> {
        let slot = self.slot_mut(level)?;
        if slot.available() == 0 {
            return Err(SpellError::NoSlotsAvailable { level });
        }
        slot.expended += 1;
        assert!(slot.expended <= slot.total);
        Ok(slot.available())
    }

    /// Spend the slot a spell needs. Cantrips cost nothing and return
    /// `Ok(None)`; otherwise returns the slot level used and slots left.
    pub fn expend_for_spell(
        &mut self,
        spell: &SpellData,
        requested_level: Option<u8>,
    ) -> Result<Option<(u8, u8)>, SpellError> {
        if spell.is_cantrip() {
            return Ok(None);
        }
        let level = requested_level.unwrap_or(spell.level);
        check_level(level)?;
        if level < spell.level {
            return Err(SpellError::BelowMinimumLevel {
                spell: spell.name.clone(),
                minimum: spell.level,
                requested: level,
            });
        }
        let remaining = self.expend(level)?;
        Ok(Some((level, remaining)))
    }

    pub fn recover_all(&mut self) {
        for slot in &mut self.slots {
            slot.expended = 0;
        }
    }

    /// Restore up to `count` slots of one level.
    pub fn recover(&mut self, level: u8, count: u8) -> Result<u8, SpellError> {
        let slot = self.slot_mut(level)?;
        let restored = count.min(slot.expended);
        slot.expended -= restored;
        Ok(restored)
    }

    /// Levels that have at least one slot, with (available, total).
    pub fn summary(&self) -> Vec<(u8, u8, u8)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.total > 0)
            .map(|(i, s)| (i as u8 + 1, s.available(), s.total))
            .collect()
    }
}

fn check_level(level: u8) -> Result<(), SpellError> {
    if (1..=MAX_SLOT_LEVEL).contains(&level) {
        Ok(())
    } else {
        Err(SpellError::InvalidSlotLevel(level))
    }
}

pub fn can_cast(pool: &SpellSlotPool, level: u8) -> bool {
    pool.can_cast(level)
}

pub fn expend(pool: &mut SpellSlotPool, level: u8) -> Result<u8, SpellError> {
    pool.expend(level)
}

/// `8 + proficiency + ability modifier`.
pub fn spell_save_dc(ability_mod: i8, proficiency: i8) -> i32 {
    8 + proficiency as i32 + ability_mod as i32
}

pub fn spell_attack_bonus(ability_mod: i8, proficiency: i8) -> i8 {
    proficiency + ability_mod
}

/// A creature's spellcasting ability and resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spellcasting {
    pub ability: Ability,
    /// Caster level, for cantrip scaling.
    pub caster_level: u8,
    pub slots: SpellSlotPool,
}

impl Spellcasting {
    pub fn new(ability: Ability, caster_level: u8, slots: SpellSlotPool) -> Self {
        Self {
            ability,
            caster_level,
            slots,
        }
    }
}

// ============================================================================
// Concentration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concentration {
    pub spell: String,
    pub started_round: u32,
}

/// At most one concentration spell per caster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationState {
    active: Option<Concentration>,
}

impl ConcentrationState {
    pub fn active(&self) -> Option<&Concentration> {
        self.active.as_ref()
    }

    pub fn is_concentrating(&self) -> bool {
        self.active.is_some()
    }

    pub fn spell(&self) -> Option<&str> {
        self.active.as_ref().map(|c| c.spell.as_str())
    }

    /// Begin concentrating, returning whatever was replaced.
    pub fn start(&mut self, spell: impl Into<String>, round: u32) -> Option<Concentration> {
        self.active.replace(Concentration {
            spell: spell.into(),
            started_round: round,
        })
    }

    pub fn end(&mut self) -> Option<Concentration> {
        self.active.take()
    }
}

pub fn start_concentration(
    state: &mut ConcentrationState,
    spell: impl Into<String>,
    round: u32,
) -> Option<Concentration> {
    state.start(spell, round)
}

/// Outcome of a Constitution save to keep concentrating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationCheck {
    pub check: CheckResult,
    pub success: bool,
    /// The spell lost on a failed save.
    pub broken: Option<Concentration>,
}

/// DC for keeping concentration after taking damage.
pub fn concentration_dc(damage: i32) -> i32 {
    (damage / 2).max(10)
}

/// Roll a concentration save after damage. Failure clears the state.
///
/// Panics if nothing is being concentrated on.
pub fn concentration_check<D: DieSource + ?Sized>(
    state: &mut ConcentrationState,
    damage: i32,
    con_save_modifier: i8,
    dice: &mut D,
) -> ConcentrationCheck {
    assert!(
        state.is_concentrating(),
        "concentration check without an active spell"
    );
    let check = rules::saving_throw(con_save_modifier, concentration_dc(damage), dice);
    let success = check.success;
    let broken = if success { None } else { state.end() };
    ConcentrationCheck {
        check,
        success,
        broken,
    }
}

// ============================================================================
// Spell Data
// ============================================================================

/// Schools of magic in D&D.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellSchool {
    Abjuration,
    Conjuration,
    Divination,
    Enchantment,
    Evocation,
    Illusion,
    Necromancy,
    Transmutation,
}

impl SpellSchool {
    pub fn name(&self) -> &'static str {
        match self {
            SpellSchool::Abjuration => "Abjuration",
            SpellSchool::Conjuration => "Conjuration",
            SpellSchool::Divination => "Divination",
            SpellSchool::Enchantment => "Enchantment",
            SpellSchool::Evocation => "Evocation",
            SpellSchool::Illusion => "Illusion",
            SpellSchool::Necromancy => "Necromancy",
            SpellSchool::Transmutation => "Transmutation",
        }
    }
}

/// Type of spell attack (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellAttackType {
    Melee,
    Ranged,
}

/// What a successful saving throw does to the spell's damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveEffect {
    HalfDamage,
    NoEffect,
}

/// A lasting benefit that holds while the caster concentrates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellBoon {
    /// Dice added to the target's attack rolls and saving throws.
    RollBonus(DiceExpression),
    /// Extra damage when the caster hits the marked creature with a weapon.
    Quarry(DiceExpression),
    /// Flat bonus to the target's armor class.
    ArmorBonus(u8),
}

/// How a spell grows when cast from a higher slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotScaling {
    /// Extra dice of the base die type per level above the spell's level.
    ExtraDice(u32),
    /// Extra darts/rays/targets per level above the spell's level.
    ExtraTargets(u8),
    /// Cantrips: more dice at caster levels 5, 11 and 17.
    Cantrip,
    None,
}

/// Complete spell definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpellData {
    pub name: String,
    /// 0 for cantrips
    pub level: u8,
    pub school: SpellSchool,
    pub concentration: bool,
    pub description: String,

    pub damage: Option<DiceExpression>,
    pub damage_type: Option<DamageType>,
    /// Adds the caster's spellcasting modifier to healing.
    pub healing: Option<DiceExpression>,
    pub scaling: SlotScaling,
    pub attack_type: Option<SpellAttackType>,
    /// Always hits (Magic Missile).
    pub auto_hit: bool,
    pub save_type: Option<Ability>,
    pub save_effect: SaveEffect,
    /// Condition imposed on a failed save, with its duration in rounds.
    pub condition: Option<(Condition, u32)>,
    /// Targets, darts or rays at the base level.
    pub targets: u8,
    pub boon: Option<SpellBoon>,
}

impl SpellData {
    /// Check if this is a cantrip.
    pub fn is_cantrip(&self) -> bool {
        self.level == 0
    }

    pub fn is_healing(&self) -> bool {
        self.healing.is_some()
    }

    /// Deals damage or imposes a condition.
    pub fn is_harmful(&self) -> bool {
        self.damage.is_some() || self.condition.is_some()
    }

    /// Needs a target other than the caster.
    pub fn needs_other_target(&self) -> bool {
        self.is_harmful() || matches!(self.boon, Some(SpellBoon::Quarry(_)))
    }

    /// Several darts or rays that can be split between targets.
    pub fn is_projectile(&self) -> bool {
        self.targets > 1 && (self.auto_hit || self.attack_type.is_some())
    }

    /// Levels above the base the spell is cast at.
    fn upcast_levels(&self, slot_level: u8) -> u32 {
        slot_level.saturating_sub(self.level) as u32
    }

    fn scale(&self, base: &DiceExpression, caster_level: u8, slot_level: u8) -> DiceExpression {
        let count = match self.scaling {
            SlotScaling::Cantrip => {
                base.count()
                    * match caster_level {
                        0..=4 => 1,
                        5..=10 => 2,
                        11..=16 => 3,
                        _ => 4,
                    }
            }
            SlotScaling::ExtraDice(extra) => base
                .count()
                .saturating_add(extra.saturating_mul(self.upcast_levels(slot_level))),
            SlotScaling::ExtraTargets(_) | SlotScaling::None => base.count(),
        };
        DiceExpression::of(count, base.die_type()).with_modifier(base.modifier())
    }

    /// Damage dice per target (or per dart/ray) for a caster and slot level.
    pub fn effective_damage(&self, caster_level: u8, slot_level: u8) -> Option<DiceExpression> {
        self.damage
            .as_ref()
            .map(|d| self.scale(d, caster_level, slot_level))
    }

    pub fn effective_healing(&self, slot_level: u8) -> Option<DiceExpression> {
        self.healing.as_ref().map(|h| self.scale(h, 0, slot_level))
    }

    /// Number of targets, darts or rays at a slot level. Saturates at
    /// `u8::MAX`; callers validate the slot level first.
    pub fn target_count(&self, slot_level: u8) -> u8 {
        match self.scaling {
            SlotScaling::ExtraTargets(extra) => {
                let count = (extra as u32)
                    .saturating_mul(self.upcast_levels(slot_level))
                    .saturating_add(self.targets as u32);
                u8::try_from(count).unwrap_or(u8::MAX)
            }
            _ => self.targets,
        }
    }
}

// ============================================================================
// Spell Catalog
// ============================================================================

static SPELL_DATABASE: LazyLock<HashMap<String, SpellData>> = LazyLock::new(build_spell_database);

/// Look up a spell by name (case-insensitive).
pub fn get_spell(name: &str) -> Option<&'static SpellData> {
    SPELL_DATABASE.get(&name.trim().to_lowercase())
}

/// Look up a spell or report it unknown.
pub fn require_spell(name: &str) -> Result<&'static SpellData, SpellError> {
    get_spell(name).ok_or_else(|| SpellError::UnknownSpell(name.to_string()))
}

/// Get all spells in the catalog.
pub fn all_spells() -> impl Iterator<Item = &'static SpellData> {
    SPELL_DATABASE.values()
}

/// Get all spells of a specific level.
pub fn spells_by_level(level: u8) -> impl Iterator<Item = &'static SpellData> {
    SPELL_DATABASE.values().filter(move |s| s.level == level)
}

fn dice(count: u32, die_type: DieType) -> DiceExpression {
    DiceExpression::of(count, die_type)
}

fn spell(name: &str, level: u8, school: SpellSchool, description: &str) -> SpellData {
    SpellData {
        name: name.to_string(),
        level,
        school,
        concentration: false,
        description: description.to_string(),
        damage: None,
        damage_type: None,
        healing: None,
        scaling: SlotScaling::None,
        attack_type: None,
        auto_hit: false,
        save_type: None,
        save_effect: SaveEffect::NoEffect,
        condition: None,
        targets: 1,
        boon: None,
    }
}

fn build_spell_database() -> HashMap<String, SpellData> {
    let spells = vec![
        // ====================================================================
        // CANTRIPS (Level 0)
        // ====================================================================
        SpellData {
            damage: Some(dice(1, DieType::D10)),
            damage_type: Some(DamageType::Fire),
            scaling: SlotScaling::Cantrip,
            attack_type: Some(SpellAttackType::Ranged),
            ..spell(
                "Fire Bolt",
                0,
                SpellSchool::Evocation,
                "You hurl a mote of fire at a creature within range. On a hit, the target takes 1d10 fire damage.",
            )
        },
        SpellData {
            damage: Some(dice(1, DieType::D10)),
            damage_type: Some(DamageType::Force),
            scaling: SlotScaling::Cantrip,
            attack_type: Some(SpellAttackType::Ranged),
            ..spell(
                "Eldritch Blast",
                0,
                SpellSchool::Evocation,
                "A beam of crackling energy streaks toward a creature within range, dealing 1d10 force damage on a hit.",
            )
        },
        SpellData {
            damage: Some(dice(1, DieType::D8)),
            damage_type: Some(DamageType::Radiant),
            scaling: SlotScaling::Cantrip,
            save_type: Some(Ability::Dexterity),
            save_effect: SaveEffect::NoEffect,
            ..spell(
                "Sacred Flame",
                0,
                SpellSchool::Evocation,
                "Flame-like radiance descends on a creature. It must succeed on a Dexterity saving throw or take 1d8 radiant damage.",
            )
        },
        SpellData {
            damage: Some(dice(1, DieType::D8)),
            damage_type: Some(DamageType::Cold),
            scaling: SlotScaling::Cantrip,
            attack_type: Some(SpellAttackType::Ranged),
            ..spell(
                "Ray of Frost",
                0,
                SpellSchool::Evocation,
                "A frigid beam of blue-white light streaks toward a creature, dealing 1d8 cold damage on a hit.",
            )
        },
        // ====================================================================
        // LEVEL 1
        // ====================================================================
        SpellData {
            damage: Some(dice(1, DieType::D4).with_modifier(1)),
            damage_type: Some(DamageType::Force),
            scaling: SlotScaling::ExtraTargets(1),
            auto_hit: true,
            targets: 3,
            ..spell(
                "Magic Missile",
                1,
                SpellSchool::Evocation,
                "Three glowing darts of magical force each strike a creature for 1d4 + 1 force damage.",
            )
        },
        SpellData {
            healing: Some(dice(1, DieType::D8)),
            scaling: SlotScaling::ExtraDice(1),
            ..spell(
                "Cure Wounds",
                1,
                SpellSchool::Evocation,
                "A creature you touch regains hit points equal to 1d8 + your spellcasting ability modifier.",
            )
        },
        SpellData {
            healing: Some(dice(1, DieType::D4)),
            scaling: SlotScaling::ExtraDice(1),
            ..spell(
                "Healing Word",
                1,
                SpellSchool::Evocation,
                "A creature you can see regains hit points equal to 1d4 + your spellcasting ability modifier.",
            )
        },
        SpellData {
            damage: Some(dice(3, DieType::D6)),
            damage_type: Some(DamageType::Fire),
            scaling: SlotScaling::ExtraDice(1),
            save_type: Some(Ability::Dexterity),
            save_effect: SaveEffect::HalfDamage,
            targets: 3,
            ..spell(
                "Burning Hands",
                1,
                SpellSchool::Evocation,
                "A thin sheet of flames shoots forth. Each creature in a 15-foot cone makes a Dexterity saving throw, taking 3d6 fire damage on a failure or half as much on a success.",
            )
        },
        SpellData {
            damage: Some(dice(2, DieType::D8)),
            damage_type: Some(DamageType::Thunder),
            scaling: SlotScaling::ExtraDice(1),
            save_type: Some(Ability::Constitution),
            save_effect: SaveEffect::HalfDamage,
            targets: 3,
            ..spell(
                "Thunderwave",
                1,
                SpellSchool::Evocation,
                "A wave of thunderous force sweeps out. Each creature in a 15-foot cube makes a Constitution saving throw, taking 2d8 thunder damage on a failure or half as much on a success.",
            )
        },
        SpellData {
            concentration: true,
            targets: 3,
            scaling: SlotScaling::ExtraTargets(1),
            boon: Some(SpellBoon::RollBonus(dice(1, DieType::D4))),
            ..spell(
                "Bless",
                1,
                SpellSchool::Enchantment,
                "You bless up to three creatures. Whenever a target makes an attack roll or saving throw, it adds 1d4 to the roll.",
            )
        },
        SpellData {
            concentration: true,
            boon: Some(SpellBoon::Quarry(dice(1, DieType::D6))),
            ..spell(
                "Hunter's Mark",
                1,
                SpellSchool::Divination,
                "You mark a creature as your quarry and deal an extra 1d6 damage to it whenever you hit it with a weapon attack.",
            )
        },
        SpellData {
            concentration: true,
            boon: Some(SpellBoon::ArmorBonus(2)),
            ..spell(
                "Shield of Faith",
                1,
                SpellSchool::Abjuration,
                "A shimmering field surrounds a creature of your choice, granting it +2 to AC for the duration.",
            )
        },
        // ====================================================================
        // LEVEL 2
        // ====================================================================
        SpellData {
            concentration: true,
            save_type: Some(Ability::Wisdom),
            save_effect: SaveEffect::NoEffect,
            condition: Some((Condition::Paralyzed, 10)),
            scaling: SlotScaling::ExtraTargets(1),
            ..spell(
                "Hold Person",
                2,
                SpellSchool::Enchantment,
                "Choose a humanoid that you can see. It must succeed on a Wisdom saving throw or be paralyzed for the duration.",
            )
        },
        SpellData {
            damage: Some(dice(2, DieType::D6)),
            damage_type: Some(DamageType::Fire),
            scaling: SlotScaling::ExtraTargets(1),
            attack_type: Some(SpellAttackType::Ranged),
            targets: 3,
            ..spell(
                "Scorching Ray",
                2,
                SpellSchool::Evocation,
                "You create three rays of fire and hurl them at targets within range. Each ray deals 2d6 fire damage on a hit.",
            )
        },
    ];

    spells
        .into_iter()
        .map(|s| (s.name.to_lowercase(), s))
        .collect()
}
