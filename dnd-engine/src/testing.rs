//! Testing utilities.
//!
//! - `ScriptedDice` for exact die faces
//! - `ScriptedNarrator` for deterministic narration without API calls
//! - Sample characters

use crate::dice::DieSource;
use crate::dm::{NarrationError, Narrator, Situation};
use crate::spells::{SpellSlotPool, Spellcasting};
use crate::world::{
    Ability, AbilityScores, ArmorClass, ArmorType, Character, HitPoints, ProficiencyLevel, Skill,
    Weapon,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Dice
// ============================================================================

/// Dice that return queued faces in order.
///
/// Panics when asked for more faces than were queued, or for a face larger
/// than the die.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDice {
    faces: VecDeque<u32>,
}

impl ScriptedDice {
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: faces.into_iter().collect(),
        }
    }

    pub fn push(&mut self, face: u32) {
        self.faces.push_back(face);
    }

    pub fn remaining(&self) -> usize {
        self.faces.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.faces.is_empty()
    }
}

impl DieSource for ScriptedDice {
    fn roll_die(&mut self, sides: u32) -> u32 {
        let Some(face) = self.faces.pop_front() else {
            panic!("ScriptedDice ran out of faces rolling a d{sides}");
        };
        assert!(
            (1..=sides).contains(&face),
            "scripted face {face} is not valid on a d{sides}"
        );
        face
    }
}

// ============================================================================
// Narrator
// ============================================================================

/// A narrator that replays scripted results.
///
/// Once the script runs out every call succeeds with a fixed line.
#[derive(Debug, Default)]
pub struct ScriptedNarrator {
    script: Mutex<VecDeque<Result<String, NarrationError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Situation>>,
}

impl ScriptedNarrator {
    pub const DEFAULT_TEXT: &'static str = "The story continues.";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.queue(Ok(text.into()));
        self
    }

    pub fn with_failure(self, error: NarrationError) -> Self {
        self.queue(Err(error));
        self
    }

    /// Sleep this long before answering, e.g. to trip a timeout.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue(&self, result: Result<String, NarrationError>) {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(result);
    }

    /// How many times `narrate` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent situation passed to `narrate`.
    pub fn last_situation(&self) -> Option<Situation> {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }
}

#[async_trait]
impl Narrator for ScriptedNarrator {
    async fn narrate(&self, situation: &Situation) -> Result<String, NarrationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(situation.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        next.unwrap_or_else(|| Ok(Self::DEFAULT_TEXT.to_string()))
    }
}

// ============================================================================
// Sample Characters
// ============================================================================

/// Level 3 fighter: 28 HP, AC 18, longsword.
pub fn create_sample_fighter(name: &str) -> Character {
    let mut character = Character::new(name);
    character.ability_scores = AbilityScores::new(16, 14, 14, 10, 12, 8);
    character.level = 3;
    character.hit_points = HitPoints::new(28);
    character.weapon = Weapon::longsword();
    character.armor_class = ArmorClass::worn(16, ArmorType::Heavy).with_shield(2);

    character.saving_throw_proficiencies.insert(Ability::Strength);
    character.saving_throw_proficiencies.insert(Ability::Constitution);
    for skill in [Skill::Athletics, Skill::Perception, Skill::Intimidation] {
        character.skill_proficiencies.insert(skill, ProficiencyLevel::Proficient);
    }
    character
}

/// Level 3 cleric: 24 HP, AC 16, mace, four 1st and two 2nd level slots.
pub fn create_sample_cleric(name: &str) -> Character {
    let mut character = Character::new(name);
    character.ability_scores = AbilityScores::new(14, 10, 14, 10, 16, 12);
    character.level = 3;
    character.hit_points = HitPoints::new(24);
    character.weapon = Weapon::mace();
    character.armor_class = ArmorClass::worn(14, ArmorType::Medium).with_shield(2);
    character.spellcasting = Some(Spellcasting::new(
        Ability::Wisdom,
        3,
        SpellSlotPool::with_totals(&[4, 2]),
    ));

    character.saving_throw_proficiencies.insert(Ability::Wisdom);
    character.saving_throw_proficiencies.insert(Ability::Charisma);
    for skill in [Skill::Medicine, Skill::Religion, Skill::Insight] {
        character.skill_proficiencies.insert(skill, ProficiencyLevel::Proficient);
    }
    character
}

/// Level 3 wizard: 17 HP, AC 12, quarterstaff, four 1st and two 2nd level
/// slots.
pub fn create_sample_wizard(name: &str) -> Character {
    let mut character = Character::new(name);
    character.ability_scores = AbilityScores::new(8, 14, 14, 16, 12, 10);
    character.level = 3;
    character.hit_points = HitPoints::new(17);
    character.weapon = Weapon::quarterstaff();
    character.armor_class = ArmorClass::unarmored();
    character.spellcasting = Some(Spellcasting::new(
        Ability::Intelligence,
        3,
        SpellSlotPool::with_totals(&[4, 2]),
    ));

    character.saving_throw_proficiencies.insert(Ability::Intelligence);
    character.saving_throw_proficiencies.insert(Ability::Wisdom);
    for skill in [Skill::Arcana, Skill::History, Skill::Investigation] {
        character.skill_proficiencies.insert(skill, ProficiencyLevel::Proficient);
    }
    character
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_dice() {
        let mut dice = ScriptedDice::new([3, 20]);
        assert_eq!(dice.roll_die(6), 3);
        assert_eq!(dice.remaining(), 1);
        assert_eq!(dice.roll_die(20), 20);
        assert!(dice.is_exhausted());
    }

    #[test]
    #[should_panic(expected = "ran out of faces")]
    fn test_scripted_dice_exhausted() {
        ScriptedDice::default().roll_die(20);
    }

    #[test]
    fn test_sample_characters() {
        let fighter = create_sample_fighter("Roland");
        assert_eq!(fighter.current_ac(), 18);
        assert_eq!(fighter.proficiency_bonus(), 2);

        let cleric = create_sample_cleric("Brother Aldric");
        assert_eq!(cleric.current_ac(), 16);

        let wizard = create_sample_wizard("Ayla");
        assert_eq!(wizard.current_ac(), 12);
        assert_eq!(wizard.spellcasting.as_ref().unwrap().slots.available(1), 4);
    }

    #[tokio::test]
    async fn test_scripted_narrator() {
        let narrator = ScriptedNarrator::new()
            .with_text("The goblin falls.")
            .with_failure(NarrationError::Timeout);
        let situation = Situation::new("Ayla", "I attack", crate::dm::IntentKind::Attack);

        assert_eq!(narrator.narrate(&situation).await.unwrap(), "The goblin falls.");
        assert_eq!(narrator.narrate(&situation).await, Err(NarrationError::Timeout));
        assert_eq!(
            narrator.narrate(&situation).await.unwrap(),
            ScriptedNarrator::DEFAULT_TEXT
        );
        assert_eq!(narrator.calls(), 3);
        assert_eq!(narrator.last_situation().unwrap().character, "Ayla");
    }
}
