//! The character sheet and the building blocks it is made of.
//!
//! Everything here is plain data with a few derived numbers (modifiers,
//! armor class, encumbrance). Resolution lives in [`crate::rules`].

use crate::dice::{DiceExpression, DieType};
use crate::rules::{self, DamageType, Encumbrance};
use crate::spells::{ConcentrationState, Spellcasting};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identity shared by player characters, monsters and NPC combatants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CharacterError {
    #[error("{ability} score {score} is outside 3-20 for a player character")]
    AbilityOutOfRange { ability: Ability, score: u8 },

    #[error("Character level {0} is outside 1-20")]
    InvalidLevel(u8),
}

// ============================================================================
// Abilities
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

/// Short and long names, in declaration order.
const ABILITY_NAMES: [(&str, &str); 6] = [
    ("STR", "Strength"),
    ("DEX", "Dexterity"),
    ("CON", "Constitution"),
    ("INT", "Intelligence"),
    ("WIS", "Wisdom"),
    ("CHA", "Charisma"),
];

impl Ability {
    pub const ALL: [Ability; 6] = [
        Ability::Strength,
        Ability::Dexterity,
        Ability::Constitution,
        Ability::Intelligence,
        Ability::Wisdom,
        Ability::Charisma,
    ];

    pub fn all() -> [Ability; 6] {
        Self::ALL
    }

    pub fn abbreviation(self) -> &'static str {
        ABILITY_NAMES[self as usize].0
    }

    pub fn name(self) -> &'static str {
        ABILITY_NAMES[self as usize].1
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

/// The six scores. Monsters may go beyond the player range; player
/// characters are built with [`AbilityScores::for_player`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: u8,
    pub dexterity: u8,
    pub constitution: u8,
    pub intelligence: u8,
    pub wisdom: u8,
    pub charisma: u8,
}

impl AbilityScores {
    pub fn new(str: u8, dex: u8, con: u8, int: u8, wis: u8, cha: u8) -> Self {
        Self {
            strength: str,
            dexterity: dex,
            constitution: con,
            intelligence: int,
            wisdom: wis,
            charisma: cha,
        }
    }

    /// Scores for a new player character; each must be within 3-20.
    pub fn for_player(
        str: u8,
        dex: u8,
        con: u8,
        int: u8,
        wis: u8,
        cha: u8,
    ) -> Result<Self, CharacterError> {
        let scores = Self::new(str, dex, con, int, wis, cha);
        match Ability::ALL
            .into_iter()
            .map(|ability| (ability, scores.get(ability)))
            .find(|(_, score)| !(3..=20).contains(score))
        {
            Some((ability, score)) => Err(CharacterError::AbilityOutOfRange { ability, score }),
            None => Ok(scores),
        }
    }

    pub fn get(&self, ability: Ability) -> u8 {
        [
            self.strength,
            self.dexterity,
            self.constitution,
            self.intelligence,
            self.wisdom,
            self.charisma,
        ][ability as usize]
    }

    pub fn modifier(&self, ability: Ability) -> i8 {
        rules::ability_modifier(self.get(ability))
    }
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self::new(10, 10, 10, 10, 10, 10)
    }
}

// ============================================================================
// Skills
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Skill {
    Athletics,
    Acrobatics,
    SleightOfHand,
    Stealth,
    Arcana,
    History,
    Investigation,
    Nature,
    Religion,
    AnimalHandling,
    Insight,
    Medicine,
    Perception,
    Survival,
    Deception,
    Intimidation,
    Performance,
    Persuasion,
}

/// Every skill with its display name and governing ability, in
/// declaration order.
const SKILLS: [(Skill, &str, Ability); 18] = {
    use Ability::*;
    [
        (Skill::Athletics, "Athletics", Strength),
        (Skill::Acrobatics, "Acrobatics", Dexterity),
        (Skill::SleightOfHand, "Sleight of Hand", Dexterity),
        (Skill::Stealth, "Stealth", Dexterity),
        (Skill::Arcana, "Arcana", Intelligence),
        (Skill::History, "History", Intelligence),
        (Skill::Investigation, "Investigation", Intelligence),
        (Skill::Nature, "Nature", Intelligence),
        (Skill::Religion, "Religion", Intelligence),
        (Skill::AnimalHandling, "Animal Handling", Wisdom),
        (Skill::Insight, "Insight", Wisdom),
        (Skill::Medicine, "Medicine", Wisdom),
        (Skill::Perception, "Perception", Wisdom),
        (Skill::Survival, "Survival", Wisdom),
        (Skill::Deception, "Deception", Charisma),
        (Skill::Intimidation, "Intimidation", Charisma),
        (Skill::Performance, "Performance", Charisma),
        (Skill::Persuasion, "Persuasion", Charisma),
    ]
};

impl Skill {
    pub fn all() -> [Skill; 18] {
        SKILLS.map(|(skill, _, _)| skill)
    }

    pub fn ability(self) -> Ability {
        SKILLS[self as usize].2
    }

    pub fn name(self) -> &'static str {
        SKILLS[self as usize].1
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProficiencyLevel {
    #[default]
    None,
    Proficient,
    Expertise,
}

impl ProficiencyLevel {
    pub fn bonus(self, proficiency_bonus: i8) -> i8 {
        proficiency_bonus * self as i8
    }
}

// ============================================================================
// Conditions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Blinded,
    Charmed,
    Deafened,
    Frightened,
    Grappled,
    Incapacitated,
    Invisible,
    Paralyzed,
    Petrified,
    Poisoned,
    Prone,
    Restrained,
    Stunned,
    Unconscious,
}

impl Condition {
    /// No actions while this applies.
    pub fn is_incapacitating(self) -> bool {
        use Condition::*;
        matches!(self, Incapacitated | Paralyzed | Petrified | Stunned | Unconscious)
    }

    /// The creature's own attacks have disadvantage.
    pub fn hampers_attacks(self) -> bool {
        use Condition::*;
        matches!(self, Blinded | Poisoned | Prone | Restrained)
    }

    /// Attacks against the creature have advantage.
    pub fn exposes_target(self) -> bool {
        use Condition::*;
        matches!(self, Blinded | Paralyzed | Petrified | Restrained | Stunned | Unconscious)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A condition on a creature, where it came from and how long it lasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCondition {
    pub condition: Condition,
    pub source: String,
    /// Rounds left; `None` lasts until removed.
    pub duration_rounds: Option<u32>,
}

impl ActiveCondition {
    pub fn new(condition: Condition, source: impl Into<String>) -> Self {
        Self {
            condition,
            source: source.into(),
            duration_rounds: None,
        }
    }

    pub fn with_duration(mut self, rounds: u32) -> Self {
        self.duration_rounds = Some(rounds);
        self
    }
}

// ============================================================================
// Hit Points
// ============================================================================

/// `current` stays within `0..=maximum`; temporary hit points sit on top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitPoints {
    pub current: i32,
    pub maximum: i32,
    pub temporary: i32,
}

impl HitPoints {
    pub fn new(maximum: i32) -> Self {
        Self::with_current(maximum, maximum)
    }

    /// Hydrate a damaged pool. Panics on values no game state can reach.
    pub fn with_current(current: i32, maximum: i32) -> Self {
        assert!(maximum > 0, "maximum hit points must be positive, got {maximum}");
        assert!(
            (0..=maximum).contains(&current),
            "current hit points {current} outside 0..={maximum}"
        );
        Self {
            current,
            maximum,
            temporary: 0,
        }
    }

    pub fn take_damage(&mut self, amount: i32) -> DamageResult {
        rules::apply_damage(self, amount)
    }

    pub fn heal(&mut self, amount: i32) -> i32 {
        rules::heal(self, amount)
    }

    /// Temporary hit points don't stack; the larger grant wins.
    pub fn grant_temporary(&mut self, amount: i32) {
        self.temporary = self.temporary.max(amount);
    }

    pub fn is_down(&self) -> bool {
        self.current == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageResult {
    /// Incoming damage, before temporary hit points absorb any.
    pub damage_taken: i32,
    pub hp_lost: i32,
    pub dropped_to_zero: bool,
}

// ============================================================================
// Equipment
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmorType {
    Light,
    Medium,
    Heavy,
}

/// Worn armor and shield. The Dexterity part is added by
/// [`rules::armor_class`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmorClass {
    pub base: u8,
    pub armor_type: Option<ArmorType>,
    pub shield_bonus: u8,
}

impl ArmorClass {
    pub fn unarmored() -> Self {
        Self {
            base: 10,
            armor_type: None,
            shield_bonus: 0,
        }
    }

    pub fn worn(base: u8, armor_type: ArmorType) -> Self {
        Self {
            base,
            armor_type: Some(armor_type),
            shield_bonus: 0,
        }
    }

    pub fn with_shield(mut self, bonus: u8) -> Self {
        self.shield_bonus = bonus;
        self
    }
}

impl Default for ArmorClass {
    fn default() -> Self {
        Self::unarmored()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weapon {
    pub name: String,
    pub damage: DiceExpression,
    pub damage_type: DamageType,
    pub finesse: bool,
    pub ranged: bool,
}

impl Weapon {
    pub fn new(name: impl Into<String>, damage: DiceExpression, damage_type: DamageType) -> Self {
        Self {
            name: name.into(),
            damage,
            damage_type,
            finesse: false,
            ranged: false,
        }
    }

    /// One die of damage, e.g. a d8 longsword.
    fn one_die(name: &str, die: DieType, damage_type: DamageType) -> Self {
        Self::new(name, DiceExpression::of(1, die), damage_type)
    }

    pub fn finesse(mut self) -> Self {
        self.finesse = true;
        self
    }

    pub fn ranged(mut self) -> Self {
        self.ranged = true;
        self
    }

    pub fn unarmed() -> Self {
        Self::one_die("Unarmed Strike", DieType::D4, DamageType::Bludgeoning)
    }

    pub fn longsword() -> Self {
        Self::one_die("Longsword", DieType::D8, DamageType::Slashing)
    }

    pub fn scimitar() -> Self {
        Self::one_die("Scimitar", DieType::D6, DamageType::Slashing).finesse()
    }

    pub fn shortbow() -> Self {
        Self::one_die("Shortbow", DieType::D6, DamageType::Piercing).ranged()
    }

    pub fn mace() -> Self {
        Self::one_die("Mace", DieType::D6, DamageType::Bludgeoning)
    }

    pub fn quarterstaff() -> Self {
        Self::one_die("Quarterstaff", DieType::D6, DamageType::Bludgeoning)
    }

    /// Ranged weapons use Dexterity, finesse weapons the better of
    /// Strength and Dexterity, everything else Strength.
    pub fn attack_ability(&self, scores: &AbilityScores) -> Ability {
        let nimble = scores.modifier(Ability::Dexterity) > scores.modifier(Ability::Strength);
        if self.ranged || (self.finesse && nimble) {
            Ability::Dexterity
        } else {
            Ability::Strength
        }
    }
}

impl Default for Weapon {
    fn default() -> Self {
        Self::unarmed()
    }
}

// ============================================================================
// Character Sheet
// ============================================================================

/// A player character between encounters. Combat works on a
/// [`crate::combat::Combatant`] copy and writes the result back here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub level: u8,
    pub ability_scores: AbilityScores,
    pub hit_points: HitPoints,
    pub armor_class: ArmorClass,
    pub weapon: Weapon,
    pub conditions: Vec<ActiveCondition>,
    pub skill_proficiencies: HashMap<Skill, ProficiencyLevel>,
    pub saving_throw_proficiencies: HashSet<Ability>,
    pub spellcasting: Option<Spellcasting>,
    #[serde(default)]
    pub concentration: ConcentrationState,
    /// Pounds.
    pub carried_weight: f32,
}

impl Character {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CharacterId::new(),
            name: name.into(),
            level: 1,
            ability_scores: AbilityScores::default(),
            hit_points: HitPoints::new(10),
            armor_class: ArmorClass::default(),
            weapon: Weapon::default(),
            conditions: Vec::new(),
            skill_proficiencies: HashMap::new(),
            saving_throw_proficiencies: HashSet::new(),
            spellcasting: None,
            concentration: ConcentrationState::default(),
            carried_weight: 0.0,
        }
    }

    pub fn with_level(mut self, level: u8) -> Result<Self, CharacterError> {
        if !(1..=20).contains(&level) {
            return Err(CharacterError::InvalidLevel(level));
        }
        self.level = level;
        Ok(self)
    }

    pub fn proficiency_bonus(&self) -> i8 {
        rules::proficiency_bonus(self.level)
    }

    pub fn skill_modifier(&self, skill: Skill) -> i8 {
        let trained = self.skill_proficiencies.get(&skill).copied().unwrap_or_default();
        self.ability_scores.modifier(skill.ability()) + trained.bonus(self.proficiency_bonus())
    }

    pub fn saving_throw_modifier(&self, ability: Ability) -> i8 {
        let trained = self.saving_throw_proficiencies.contains(&ability);
        self.ability_scores.modifier(ability) + if trained { self.proficiency_bonus() } else { 0 }
    }

    pub fn current_ac(&self) -> u8 {
        rules::armor_class(&self.armor_class, self.ability_scores.modifier(Ability::Dexterity))
    }

    pub fn encumbrance(&self) -> Encumbrance {
        rules::encumbrance(self.ability_scores.strength, self.carried_weight)
    }
}
