//! Keyword classification of player input.
//!
//! Classification never consults the narration backend, so it behaves the
//! same whether or not narration is available.

use crate::npc::SocialSituation;
use crate::spells::all_spells;
use crate::world::{Ability, Skill};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A skill check or a saving throw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckKind {
    Skill(Skill),
    Save(Ability),
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Skill(skill) => write!(f, "{skill} check"),
            CheckKind::Save(ability) => write!(f, "{ability} saving throw"),
        }
    }
}

/// What the player is trying to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerIntent {
    Attack {
        target: Option<String>,
    },
    SkillCheck {
        check: CheckKind,
        dc: Option<i32>,
    },
    Spell {
        spell: String,
        slot_level: Option<u8>,
        target: Option<String>,
    },
    Dialogue {
        npc: String,
        situation: SocialSituation,
    },
    Other,
}

impl PlayerIntent {
    pub fn kind(&self) -> IntentKind {
        match self {
            PlayerIntent::Attack { .. } => IntentKind::Attack,
            PlayerIntent::SkillCheck { .. } => IntentKind::SkillCheck,
            PlayerIntent::Spell { .. } => IntentKind::Spell,
            PlayerIntent::Dialogue { .. } => IntentKind::Dialogue,
            PlayerIntent::Other => IntentKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentKind {
    Attack,
    SkillCheck,
    Spell,
    Dialogue,
    Other,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntentKind::Attack => "attack",
            IntentKind::SkillCheck => "skill check",
            IntentKind::Spell => "spell",
            IntentKind::Dialogue => "dialogue",
            IntentKind::Other => "other",
        };
        write!(f, "{name}")
    }
}

/// Names the classifier can resolve against.
#[derive(Debug, Clone, Default)]
pub struct IntentContext {
    /// Combatants in the current encounter.
    pub combatants: Vec<String>,
    /// Known NPCs.
    pub npcs: Vec<String>,
}

impl IntentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_combatants(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.combatants = names.into_iter().collect();
        self
    }

    pub fn with_npcs(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.npcs = names.into_iter().collect();
        self
    }
}

const ATTACK_WORDS: &[&str] = &[
    "attack", "attacks", "hit", "strike", "stab", "slash", "shoot", "swing", "smash", "punch",
    "kill",
];

const DIALOGUE_WORDS: &[&str] = &[
    "talk", "speak", "ask", "say", "tell", "persuade", "convince", "bribe", "pay", "offer",
    "intimidate", "threaten", "lie", "deceive", "bluff", "trick", "plead", "beg", "greet",
];

/// Classify free text into an intent.
pub fn classify(input: &str, context: &IntentContext) -> PlayerIntent {
    let lower = input.to_lowercase();
    let words = tokenize(&lower);
    let has = |list: &[&str]| words.iter().any(|w| list.contains(&w.as_str()));

    // Spells first: "cast" or a spell's name both count.
    if let Some(spell) = find_spell(&lower) {
        return PlayerIntent::Spell {
            spell,
            slot_level: parse_slot_level(&words),
            target: find_name(&lower, &context.combatants),
        };
    }
    if let Some(pos) = words.iter().position(|w| w == "cast" || w == "casts") {
        let spell = words[pos + 1..]
            .iter()
            .take_while(|w| !matches!(w.as_str(), "at" | "on" | "against" | "using"))
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        if !spell.is_empty() {
            return PlayerIntent::Spell {
                spell,
                slot_level: parse_slot_level(&words),
                target: find_name(&lower, &context.combatants),
            };
        }
    }

    if has(ATTACK_WORDS) {
        return PlayerIntent::Attack {
            target: find_name(&lower, &context.combatants),
        };
    }

    if has(DIALOGUE_WORDS) {
        if let Some(npc) = find_name(&lower, &context.npcs) {
            return PlayerIntent::Dialogue {
                npc,
                situation: social_situation(&words),
            };
        }
    }

    if let Some(check) = find_check(&lower, &words) {
        return PlayerIntent::SkillCheck {
            check,
            dc: parse_dc(&words),
        };
    }

    PlayerIntent::Other
}

fn tokenize(lower: &str) -> Vec<String> {
    lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(|w| w.trim_end_matches("'s").to_string())
        .collect()
}

/// Whether `needle` appears in `haystack` on word boundaries.
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// The longest of `names` mentioned in the text, in its original casing.
fn find_name(lower: &str, names: &[String]) -> Option<String> {
    names
        .iter()
        .filter(|name| contains_phrase(lower, &name.to_lowercase()))
        .max_by_key(|name| name.len())
        .cloned()
}

fn find_spell(lower: &str) -> Option<String> {
    all_spells()
        .filter(|spell| contains_phrase(lower, &spell.name.to_lowercase()))
        .max_by_key(|spell| spell.name.len())
        .map(|spell| spell.name.clone())
}

fn social_situation(words: &[String]) -> SocialSituation {
    let has = |list: &[&str]| words.iter().any(|w| list.contains(&w.as_str()));
    if has(&["bribe", "pay", "coin", "coins", "gold", "silver"]) {
        SocialSituation::Bribe
    } else if has(&["threaten", "threat"]) {
        SocialSituation::Threatened
    } else if has(&["intimidate", "scare", "menace", "glare"]) {
        SocialSituation::Intimidation
    } else if has(&["lie", "deceive", "bluff", "trick", "pretend"]) {
        SocialSituation::Deception
    } else if has(&["help", "assist", "aid", "favor", "favour"]) {
        SocialSituation::RequestHelp
    } else {
        SocialSituation::Persuasion
    }
}

/// Everyday verbs that imply a particular skill.
const SKILL_VERBS: &[(&str, Skill)] = &[
    ("climb", Skill::Athletics),
    ("jump", Skill::Athletics),
    ("swim", Skill::Athletics),
    ("tumble", Skill::Acrobatics),
    ("balance", Skill::Acrobatics),
    ("pickpocket", Skill::SleightOfHand),
    ("lockpick", Skill::SleightOfHand),
    ("sneak", Skill::Stealth),
    ("hide", Skill::Stealth),
    ("search", Skill::Investigation),
    ("investigate", Skill::Investigation),
    ("listen", Skill::Perception),
    ("spot", Skill::Perception),
    ("notice", Skill::Perception),
    ("track", Skill::Survival),
    ("forage", Skill::Survival),
    ("recall", Skill::History),
    ("pray", Skill::Religion),
    ("heal", Skill::Medicine),
    ("calm", Skill::AnimalHandling),
];

fn find_check(lower: &str, words: &[String]) -> Option<CheckKind> {
    if words.iter().any(|w| w == "save" || w == "saving") {
        let ability = Ability::all().into_iter().find(|a| {
            words
                .iter()
                .any(|w| *w == a.name().to_lowercase() || *w == a.abbreviation().to_lowercase())
        });
        if let Some(ability) = ability {
            return Some(CheckKind::Save(ability));
        }
    }

    let named = Skill::all()
        .into_iter()
        .filter(|skill| contains_phrase(lower, &skill.name().to_lowercase()))
        .max_by_key(|skill| skill.name().len());
    if let Some(skill) = named {
        return Some(CheckKind::Skill(skill));
    }

    SKILL_VERBS
        .iter()
        .find(|(verb, _)| words.iter().any(|w| w == verb))
        .map(|(_, skill)| CheckKind::Skill(*skill))
}

/// "DC 15" or "dc15".
fn parse_dc(words: &[String]) -> Option<i32> {
    words.iter().enumerate().find_map(|(i, word)| {
        if word == "dc" {
            words.get(i + 1)?.parse().ok()
        } else {
            word.strip_prefix("dc")?.parse().ok()
        }
    })
}

/// "at level 2", "level 3 slot", "2nd level", "3rd-level".
fn parse_slot_level(words: &[String]) -> Option<u8> {
    words.iter().enumerate().find_map(|(i, word)| {
        if word != "level" {
            return None;
        }
        if let Some(next) = words.get(i + 1).and_then(|w| w.parse().ok()) {
            return Some(next);
        }
        let previous = words.get(i.checked_sub(1)?)?;
        ["st", "nd", "rd", "th"]
            .iter()
            .find_map(|suffix| previous.strip_suffix(suffix))
            .and_then(|n| n.parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> IntentContext {
        IntentContext::new()
            .with_combatants(["Ayla".to_string(), "Goblin Archer".to_string(), "Goblin".to_string()])
            .with_npcs(["Tobin".to_string(), "Captain Mara".to_string()])
    }

    #[test]
    fn test_attack() {
        assert_eq!(
            classify("I attack the goblin archer!", &context()),
            PlayerIntent::Attack {
                target: Some("Goblin Archer".to_string())
            }
        );
        assert_eq!(
            classify("I swing wildly", &context()),
            PlayerIntent::Attack { target: None }
        );
        // "white" must not match "hit".
        assert_eq!(classify("I wave a white flag", &IntentContext::new()), PlayerIntent::Other);
    }

    #[test]
    fn test_spell() {
        assert_eq!(
            classify("I cast magic missile at the goblin at level 2", &context()),
            PlayerIntent::Spell {
                spell: "Magic Missile".to_string(),
                slot_level: Some(2),
                target: Some("Goblin".to_string()),
            }
        );
        assert_eq!(
            classify("Cure Wounds on Ayla using a 3rd level slot", &context()),
            PlayerIntent::Spell {
                spell: "Cure Wounds".to_string(),
                slot_level: Some(3),
                target: Some("Ayla".to_string()),
            }
        );
        assert_eq!(
            classify("I cast fireball at the goblin", &context()),
            PlayerIntent::Spell {
                spell: "fireball".to_string(),
                slot_level: None,
                target: Some("Goblin".to_string()),
            }
        );
    }

    #[test]
    fn test_dialogue() {
        assert_eq!(
            classify("I offer Tobin some gold for the map", &context()),
            PlayerIntent::Dialogue {
                npc: "Tobin".to_string(),
                situation: SocialSituation::Bribe,
            }
        );
        assert_eq!(
            classify("I ask Captain Mara to help us", &context()),
            PlayerIntent::Dialogue {
                npc: "Captain Mara".to_string(),
                situation: SocialSituation::RequestHelp,
            }
        );
        assert_eq!(
            classify("Tell Tobin we mean no harm", &context()),
            PlayerIntent::Dialogue {
                npc: "Tobin".to_string(),
                situation: SocialSituation::Persuasion,
            }
        );
    }

    #[test]
    fn test_skill_checks() {
        assert_eq!(
            classify("I try to sneak past, DC 15", &context()),
            PlayerIntent::SkillCheck {
                check: CheckKind::Skill(Skill::Stealth),
                dc: Some(15),
            }
        );
        assert_eq!(
            classify("Roll Sleight of Hand", &context()),
            PlayerIntent::SkillCheck {
                check: CheckKind::Skill(Skill::SleightOfHand),
                dc: None,
            }
        );
        assert_eq!(
            classify("make a dex save dc12", &context()),
            PlayerIntent::SkillCheck {
                check: CheckKind::Save(Ability::Dexterity),
                dc: Some(12),
            }
        );
    }

    #[test]
    fn test_other() {
        assert_eq!(classify("I wait for nightfall", &context()), PlayerIntent::Other);
        assert_eq!(PlayerIntent::Other.kind(), IntentKind::Other);
    }
}
