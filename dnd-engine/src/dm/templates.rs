//! Fixed prose used when narration is unavailable.

use super::intent::IntentKind;
use super::narrator::Situation;
use crate::combat::{CombatError, IllegalAction};
use crate::rules::Effect;
use crate::spells::SpellError;

/// Templated narration for `situation`. Always carries the mechanical
/// summary verbatim.
pub fn fallback_narrative(situation: &Situation) -> String {
    let lead = match situation.intent {
        IntentKind::Attack => format!("{} presses the attack.", situation.character),
        IntentKind::Spell => format!("{} gathers arcane power.", situation.character),
        IntentKind::SkillCheck => format!("{} makes the attempt.", situation.character),
        IntentKind::Dialogue => format!("{} speaks up.", situation.character),
        IntentKind::Other => format!("{} considers the next move.", situation.character),
    };

    let mut text = lead;
    if !situation.mechanics.is_empty() {
        text.push(' ');
        text.push_str(&situation.mechanics);
    }
    if situation
        .effects
        .iter()
        .any(|e| matches!(e, Effect::CombatEnded { .. }))
    {
        text.push_str(" The fight is over.");
    }
    text
}

/// Short in-character explanation for a refused spell.
pub fn explain_spell_error(error: &SpellError) -> String {
    match error {
        SpellError::NoSlotsAvailable { .. } => "You don't have a spell slot left for that.".to_string(),
        SpellError::BelowMinimumLevel { spell, minimum, .. } => {
            format!("{spell} needs at least a level {minimum} slot.")
        }
        SpellError::InvalidSlotLevel(level) => format!("There is no such thing as a level {level} slot."),
        SpellError::UnknownSpell(name) => format!("You don't know any spell called {name}."),
    }
}

/// Short in-character explanation for a refused combat action.
pub fn explain_combat_error(error: &CombatError) -> String {
    match error {
        CombatError::Spell(spell) => explain_spell_error(spell),
        CombatError::IllegalAction(illegal) => match illegal {
            IllegalAction::NotYourTurn { current, .. } => format!("Hold on, it's {current}'s turn."),
            IllegalAction::UnknownTarget(_) => "There's no one like that to target.".to_string(),
            IllegalAction::ActorDown(_) => "You're in no state to do anything.".to_string(),
            IllegalAction::ActorIncapacitated(_) => "You can't move a muscle.".to_string(),
            IllegalAction::ActionAlreadyTaken(_) => "You've already acted this turn.".to_string(),
            IllegalAction::TargetDown(name) => format!("{name} is already down."),
            IllegalAction::CannotTargetSelf => "You can't aim that at yourself.".to_string(),
            IllegalAction::NotASpellcaster(_) => "You don't know how to cast spells.".to_string(),
            IllegalAction::NoTargets => "That spell needs a target.".to_string(),
            IllegalAction::TooManyTargets { max } => {
                format!("That spell can only reach {max} targets.")
            }
            IllegalAction::UnknownCombatant(_) => "You aren't part of this fight.".to_string(),
        },
        CombatError::EmptyEncounter => "There's no one here to fight.".to_string(),
        CombatError::AlreadyStarted | CombatError::NotActive { .. } => {
            "The fight isn't waiting on you right now.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_keeps_mechanics() {
        let situation = Situation::new("Ayla", "I attack", IntentKind::Attack)
            .with_mechanics("Ayla attacks Snag with Longsword: 17 vs AC 15, hit. Snag takes 6 slashing damage.");
        assert_eq!(
            fallback_narrative(&situation),
            "Ayla presses the attack. Ayla attacks Snag with Longsword: 17 vs AC 15, hit. Snag takes 6 slashing damage."
        );
    }

    #[test]
    fn test_fallback_mentions_end_of_combat() {
        let situation = Situation::new("Ayla", "I attack", IntentKind::Attack)
            .with_effects(vec![Effect::CombatEnded { rounds: 2 }]);
        assert_eq!(
            fallback_narrative(&situation),
            "Ayla presses the attack. The fight is over."
        );
    }

    #[test]
    fn test_explanations() {
        let error = CombatError::Spell(SpellError::NoSlotsAvailable { level: 1 });
        assert_eq!(explain_combat_error(&error), "You don't have a spell slot left for that.");
        let error = CombatError::IllegalAction(IllegalAction::TargetDown("Snag".to_string()));
        assert_eq!(explain_combat_error(&error), "Snag is already down.");
    }
}
