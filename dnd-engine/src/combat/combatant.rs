//! Combatants: the per-encounter view of a character or monster.

use crate::dice::{DiceExpression, DieType};
use crate::rules::DamageType;
use crate::spells::{self, ConcentrationState, SpellBoon, Spellcasting};
use crate::world::{
    Ability, AbilityScores, ActiveCondition, Character, CharacterId, Condition, HitPoints, Weapon,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Which side of the fight a combatant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Party,
    Foes,
}

impl Side {
    pub fn opposing(&self) -> Side {
        match self {
            Side::Party => Side::Foes,
            Side::Foes => Side::Party,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Party => write!(f, "party"),
            Side::Foes => write!(f, "foes"),
        }
    }
}

/// Damage that ticks at the start of each round (burning, bleeding, poison).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OngoingDamage {
    pub source: String,
    pub dice: DiceExpression,
    pub damage_type: DamageType,
    pub rounds_remaining: u32,
}

impl OngoingDamage {
    pub fn new(
        source: impl Into<String>,
        dice: DiceExpression,
        damage_type: DamageType,
        rounds: u32,
    ) -> Self {
        Self {
            source: source.into(),
            dice,
            damage_type,
            rounds_remaining: rounds,
        }
    }
}

/// A spell benefit on a combatant, lifted when `source` stops concentrating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveBoon {
    pub boon: SpellBoon,
    pub source: String,
    /// The marked creature, for [`SpellBoon::Quarry`].
    pub against: Option<CharacterId>,
}

/// A participant in an encounter. Owned by the encounter while it runs and
/// handed back through [`super::CombatEncounter::into_combatants`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combatant {
    pub id: CharacterId,
    pub name: String,
    pub side: Side,
    pub hit_points: HitPoints,
    pub armor_class: u8,
    pub ability_scores: AbilityScores,
    pub proficiency_bonus: i8,
    pub saving_throw_proficiencies: HashSet<Ability>,
    pub weapon: Weapon,
    pub spellcasting: Option<Spellcasting>,
    pub concentration: ConcentrationState,
    pub conditions: Vec<ActiveCondition>,
    pub ongoing_damage: Vec<OngoingDamage>,
    #[serde(default)]
    pub boons: Vec<ActiveBoon>,
    /// Set once when the encounter starts.
    pub initiative: Option<i32>,
    /// Attacks against this combatant have disadvantage until its next turn.
    pub dodging: bool,
}

impl Combatant {
    pub fn new(
        name: impl Into<String>,
        side: Side,
        max_hp: i32,
        armor_class: u8,
        ability_scores: AbilityScores,
    ) -> Self {
        Self {
            id: CharacterId::new(),
            name: name.into(),
            side,
            hit_points: HitPoints::new(max_hp),
            armor_class,
            ability_scores,
            proficiency_bonus: 2,
            saving_throw_proficiencies: HashSet::new(),
            weapon: Weapon::default(),
            spellcasting: None,
            concentration: ConcentrationState::default(),
            conditions: Vec::new(),
            ongoing_damage: Vec::new(),
            boons: Vec::new(),
            initiative: None,
            dodging: false,
        }
    }

    /// Hydrate a party member from a character sheet.
    pub fn from_character(character: &Character) -> Self {
        let mut conditions = character.conditions.clone();
        if character.hit_points.is_down()
            && !conditions
                .iter()
                .any(|c| c.condition == Condition::Unconscious)
        {
            conditions.push(ActiveCondition::new(Condition::Unconscious, "0 hit points"));
        }

        Self {
            id: character.id,
            name: character.name.clone(),
            side: Side::Party,
            hit_points: character.hit_points.clone(),
            armor_class: character.current_ac(),
            ability_scores: character.ability_scores.clone(),
            proficiency_bonus: character.proficiency_bonus(),
            saving_throw_proficiencies: character.saving_throw_proficiencies.clone(),
            weapon: character.weapon.clone(),
            spellcasting: character.spellcasting.clone(),
            concentration: character.concentration.clone(),
            conditions,
            ongoing_damage: Vec::new(),
            boons: Vec::new(),
            initiative: None,
            dodging: false,
        }
    }

    /// Copy the state an encounter changes back onto the character sheet.
    pub fn write_back(&self, character: &mut Character) {
        assert_eq!(self.id, character.id, "write_back onto a different character");
        character.hit_points = self.hit_points.clone();
        character.spellcasting = self.spellcasting.clone();
        character.concentration = self.concentration.clone();
        character.conditions = self.conditions.clone();
    }

    pub fn with_id(mut self, id: CharacterId) -> Self {
        self.id = id;
        self
    }

    pub fn with_weapon(mut self, weapon: Weapon) -> Self {
        self.weapon = weapon;
        self
    }

    pub fn with_proficiency_bonus(mut self, bonus: i8) -> Self {
        self.proficiency_bonus = bonus;
        self
    }

    pub fn with_save_proficiency(mut self, ability: Ability) -> Self {
        self.saving_throw_proficiencies.insert(ability);
        self
    }

    pub fn with_spellcasting(mut self, spellcasting: Spellcasting) -> Self {
        self.spellcasting = Some(spellcasting);
        self
    }

    pub fn with_condition(mut self, condition: ActiveCondition) -> Self {
        self.add_condition(condition);
        self
    }

    pub fn with_ongoing_damage(mut self, ongoing: OngoingDamage) -> Self {
        self.ongoing_damage.push(ongoing);
        self
    }

    /// Start the fight already hurt.
    pub fn with_current_hp(mut self, current: i32) -> Self {
        self.hit_points = HitPoints::with_current(current, self.hit_points.maximum);
        self
    }

    pub fn is_up(&self) -> bool {
        self.hit_points.current > 0
    }

    pub fn can_act(&self) -> bool {
        self.is_up() && !self.conditions.iter().any(|c| c.condition.is_incapacitating())
    }

    pub fn has_condition(&self, condition: Condition) -> bool {
        self.conditions.iter().any(|c| c.condition == condition)
    }

    /// Add a condition, replacing an existing instance of the same one.
    pub fn add_condition(&mut self, condition: ActiveCondition) {
        self.conditions.retain(|c| c.condition != condition.condition);
        self.conditions.push(condition);
    }

    pub fn remove_condition(&mut self, condition: Condition) -> bool {
        let before = self.conditions.len();
        self.conditions.retain(|c| c.condition != condition);
        self.conditions.len() != before
    }

    /// Armor class including spell bonuses.
    pub fn effective_ac(&self) -> u8 {
        self.boons
            .iter()
            .filter_map(|b| match b.boon {
                SpellBoon::ArmorBonus(bonus) => Some(bonus),
                _ => None,
            })
            .fold(self.armor_class, u8::saturating_add)
    }

    /// Dice added to this combatant's attack rolls and saving throws.
    pub fn roll_bonus_dice(&self) -> Vec<DiceExpression> {
        self.boons
            .iter()
            .filter_map(|b| match &b.boon {
                SpellBoon::RollBonus(dice) => Some(dice.clone()),
                _ => None,
            })
            .collect()
    }

    /// Extra weapon damage this combatant deals to `target`, with its source.
    pub fn quarry_dice(&self, target: CharacterId) -> Vec<(String, DiceExpression)> {
        self.boons
            .iter()
            .filter_map(|b| match &b.boon {
                SpellBoon::Quarry(dice) if b.against == Some(target) => {
                    Some((b.source.clone(), dice.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn dex_modifier(&self) -> i8 {
        self.ability_scores.modifier(Ability::Dexterity)
    }

    pub fn save_modifier(&self, ability: Ability) -> i8 {
        let ability_mod = self.ability_scores.modifier(ability);
        if self.saving_throw_proficiencies.contains(&ability) {
            ability_mod + self.proficiency_bonus
        } else {
            ability_mod
        }
    }

    /// Ability modifier used by the equipped weapon.
    pub fn weapon_ability_modifier(&self) -> i8 {
        self.ability_scores
            .modifier(self.weapon.attack_ability(&self.ability_scores))
    }

    pub fn attack_modifier(&self) -> i8 {
        self.weapon_ability_modifier() + self.proficiency_bonus
    }

    /// Weapon damage including the ability modifier.
    pub fn weapon_damage(&self) -> DiceExpression {
        let damage = &self.weapon.damage;
        damage.with_modifier(damage.modifier() + self.weapon_ability_modifier() as i32)
    }

    pub fn spellcasting_modifier(&self) -> Option<i8> {
        self.spellcasting
            .as_ref()
            .map(|s| self.ability_scores.modifier(s.ability))
    }

    pub fn spell_save_dc(&self) -> Option<i32> {
        self.spellcasting_modifier()
            .map(|m| spells::spell_save_dc(m, self.proficiency_bonus))
    }

    pub fn spell_attack_bonus(&self) -> Option<i8> {
        self.spellcasting_modifier()
            .map(|m| spells::spell_attack_bonus(m, self.proficiency_bonus))
    }
}

/// A basic monster stat line.
pub fn monster(
    name: impl Into<String>,
    max_hp: i32,
    armor_class: u8,
    ability_scores: AbilityScores,
    weapon: Weapon,
) -> Combatant {
    Combatant::new(name, Side::Foes, max_hp, armor_class, ability_scores).with_weapon(weapon)
}

/// Goblin: AC 15, 7 HP, scimitar.
pub fn goblin(name: impl Into<String>) -> Combatant {
    monster(
        name,
        7,
        15,
        AbilityScores::new(8, 14, 10, 10, 8, 8),
        Weapon::scimitar(),
    )
}

/// Bandit: AC 12, 11 HP, scimitar.
pub fn bandit(name: impl Into<String>) -> Combatant {
    monster(
        name,
        11,
        12,
        AbilityScores::new(11, 12, 12, 10, 10, 10),
        Weapon::scimitar(),
    )
}

/// Wolf: AC 13, 11 HP, bite.
pub fn wolf(name: impl Into<String>) -> Combatant {
    monster(
        name,
        11,
        13,
        AbilityScores::new(12, 15, 12, 3, 12, 6),
        Weapon::new(
            "Bite",
            DiceExpression::of(2, DieType::D4),
            DamageType::Piercing,
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spells::SpellSlotPool;

    #[test]
    fn test_attack_and_damage_modifiers() {
        let fighter = Combatant::new(
            "Roland",
            Side::Party,
            28,
            18,
            AbilityScores::new(16, 14, 14, 10, 12, 8),
        )
        .with_weapon(Weapon::longsword());
        assert_eq!(fighter.attack_modifier(), 5);
        assert_eq!(fighter.weapon_damage().to_string(), "1d8+3");

        let goblin = goblin("Snag");
        assert_eq!(goblin.attack_modifier(), 4);
        assert_eq!(goblin.weapon_damage().to_string(), "1d6+2");
    }

    #[test]
    fn test_save_modifier_with_proficiency() {
        let cleric = Combatant::new(
            "Mira",
            Side::Party,
            20,
            16,
            AbilityScores::new(10, 10, 14, 10, 16, 12),
        )
        .with_proficiency_bonus(3)
        .with_save_proficiency(Ability::Wisdom)
        .with_spellcasting(Spellcasting::new(
            Ability::Wisdom,
            5,
            SpellSlotPool::with_totals(&[4, 3, 2]),
        ));
        assert_eq!(cleric.save_modifier(Ability::Wisdom), 6);
        assert_eq!(cleric.save_modifier(Ability::Constitution), 2);
        assert_eq!(cleric.spell_save_dc(), Some(14));
        assert_eq!(cleric.spell_attack_bonus(), Some(6));
    }

    #[test]
    fn test_incapacitated_cannot_act() {
        let mut goblin = goblin("Snag");
        assert!(goblin.can_act());
        goblin.add_condition(ActiveCondition::new(Condition::Stunned, "test"));
        assert!(goblin.is_up());
        assert!(!goblin.can_act());
        assert!(goblin.remove_condition(Condition::Stunned));
        assert!(!goblin.remove_condition(Condition::Stunned));
    }

    #[test]
    fn test_conditions_do_not_stack() {
        let goblin = goblin("Snag")
            .with_condition(ActiveCondition::new(Condition::Prone, "shove"))
            .with_condition(ActiveCondition::new(Condition::Prone, "trip").with_duration(1));
        assert_eq!(goblin.conditions.len(), 1);
        assert_eq!(goblin.conditions[0].source, "trip");
    }

    #[test]
    fn test_round_trip_through_character() {
        let mut character = Character::new("Ayla");
        character.hit_points = HitPoints::new(12);
        let mut combatant = Combatant::from_character(&character);
        assert_eq!(combatant.id, character.id);
        assert_eq!(combatant.side, Side::Party);

        combatant.hit_points.take_damage(5);
        combatant.write_back(&mut character);
        assert_eq!(character.hit_points.current, 7);
    }

    #[test]
    fn test_downed_character_enters_unconscious() {
        let mut character = Character::new("Ayla");
        character.hit_points = HitPoints::with_current(0, 12);
        let combatant = Combatant::from_character(&character);
        assert!(combatant.has_condition(Condition::Unconscious));
        assert!(!combatant.can_act());
    }
}
