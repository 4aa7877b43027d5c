//! QA tests for narration failures and degraded mode.
//!
//! The narrator is scripted; timeouts use tokio's paused clock so nothing
//! actually waits.
//! Run with: `cargo test -p dnd-engine --test qa_degraded`

use dnd_engine::combat::monster;
use dnd_engine::dm::{DmConfig, DungeonMaster, NarrationError, SessionMode};
use dnd_engine::npc::NpcDirectory;
use dnd_engine::testing::{create_sample_fighter, ScriptedDice, ScriptedNarrator};
use dnd_engine::world::{AbilityScores, CharacterId, Weapon};
use dnd_engine::Effect;
use std::sync::Arc;
use std::time::Duration;

/// An ogre with plenty of HP that always misses Roland with a 2.
fn ogre() -> dnd_engine::combat::Combatant {
    monster(
        "Ogre",
        59,
        11,
        AbilityScores::new(19, 8, 16, 5, 7, 7),
        Weapon::longsword(),
    )
}

fn ogre_hp_change(effects: &[Effect], roland: CharacterId) -> Option<i32> {
    effects.iter().find_map(|e| match e {
        Effect::HpChanged {
            target_id, amount, ..
        } if *target_id != roland => Some(*amount),
        _ => None,
    })
}

// =============================================================================
// TEST 1: Repeated timeouts degrade the session, mechanics keep working
// =============================================================================

#[tokio::test]
async fn test_three_timeouts_degrade_but_mechanics_continue() {
    let narrator = Arc::new(
        ScriptedNarrator::new()
            .with_failure(NarrationError::Timeout)
            .with_failure(NarrationError::Timeout)
            .with_failure(NarrationError::Timeout),
    );

    // Initiative: Roland 15+2, Ogre 5-1. Each exchange: Roland hits (15+5)
    // for 4+3, the Ogre misses (2+6 vs 18).
    let mut faces = vec![15, 5];
    for _ in 0..4 {
        faces.extend([15, 4, 2]);
    }
    let mut dm = DungeonMaster::new(narrator.clone(), Arc::new(NpcDirectory::new()))
        .with_config(DmConfig::new().with_failure_threshold(3))
        .with_dice(ScriptedDice::new(faces));
    let roland = dm.add_character(create_sample_fighter("Roland"));
    dm.start_encounter(vec![ogre()]).unwrap();

    for exchange in 1..=3 {
        let response = dm.process_input(roland, "I attack the ogre").await.unwrap();
        assert!(response.degraded, "exchange {exchange} should use a template");
        assert_eq!(ogre_hp_change(&response.effects, roland), Some(-7));
        assert!(response.narrative.starts_with("Roland presses the attack."));
        assert!(response.narrative.contains(&response.mechanics));

        let expected = if exchange < 3 {
            SessionMode::GenerativeAvailable
        } else {
            SessionMode::Degraded
        };
        assert_eq!(dm.mode(), expected, "after exchange {exchange}");
    }
    assert_eq!(narrator.calls(), 3);

    // Degraded: the narrator is no longer asked, the fight goes on.
    let response = dm.process_input(roland, "I attack the ogre").await.unwrap();
    assert!(response.degraded);
    assert_eq!(ogre_hp_change(&response.effects, roland), Some(-7));
    assert_eq!(narrator.calls(), 3);

    let ogre_hp = dm
        .encounter()
        .unwrap()
        .combatants()
        .iter()
        .find(|c| c.name == "Ogre")
        .unwrap()
        .hit_points
        .current;
    assert_eq!(ogre_hp, 59 - 4 * 7);
}

// =============================================================================
// TEST 2: Default threshold degrades on the first failure
// =============================================================================

#[tokio::test]
async fn test_first_failure_degrades_by_default() {
    let narrator = Arc::new(
        ScriptedNarrator::new().with_failure(NarrationError::Unavailable("overloaded".to_string())),
    );
    let mut dm = DungeonMaster::new(narrator.clone(), Arc::new(NpcDirectory::new()))
        .with_dice(ScriptedDice::new([12, 12]));
    let roland = dm.add_character(create_sample_fighter("Roland"));

    let first = dm.process_input(roland, "I sneak past the guard").await.unwrap();
    assert!(first.degraded);
    assert!(dm.is_degraded());
    assert!(first.narrative.contains("Roland Stealth check: [12] + 2 = 14 vs DC 10, success."));

    // A scripted success is queued behind, but the breaker never asks.
    narrator.queue(Ok("You slip by.".to_string()));
    let second = dm.process_input(roland, "I sneak past the guard").await.unwrap();
    assert!(second.degraded);
    assert_eq!(narrator.calls(), 1);
}

// =============================================================================
// TEST 3: A narrator that hangs is cut off by the timeout
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_narrator_times_out() {
    let narrator = Arc::new(ScriptedNarrator::new().with_delay(Duration::from_secs(60)));
    let mut dm = DungeonMaster::new(narrator.clone(), Arc::new(NpcDirectory::new()))
        .with_config(DmConfig::new().with_narration_timeout(Duration::from_millis(50)))
        .with_dice(ScriptedDice::new([3]));
    let roland = dm.add_character(create_sample_fighter("Roland"));

    let response = dm
        .process_input(roland, "I climb the wall, DC 15")
        .await
        .unwrap();
    assert!(response.degraded);
    assert!(dm.is_degraded());
    // Athletics is proficient: 3 + 3 + 2 = 8
    assert_eq!(response.mechanics, "Roland Athletics check: [3] + 5 = 8 vs DC 15, failure.");
    assert!(response.narrative.contains(&response.mechanics));
    assert_eq!(narrator.calls(), 1);
}

// =============================================================================
// TEST 4: With a cooldown the session recovers
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cooldown_allows_recovery() {
    let narrator = Arc::new(
        ScriptedNarrator::new()
            .with_failure(NarrationError::Timeout)
            .with_text("The lock clicks open."),
    );
    let mut dm = DungeonMaster::new(narrator.clone(), Arc::new(NpcDirectory::new()))
        .with_config(DmConfig::new().with_cooldown(Duration::from_secs(30)))
        .with_dice(ScriptedDice::new([10, 10, 10]));
    let roland = dm.add_character(create_sample_fighter("Roland"));

    assert!(dm.process_input(roland, "I search the room").await.unwrap().degraded);
    assert!(dm.is_degraded());

    // Still cooling down: no call.
    assert!(dm.process_input(roland, "I search the room").await.unwrap().degraded);
    assert_eq!(narrator.calls(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    let response = dm.process_input(roland, "I search the room").await.unwrap();
    assert!(!response.degraded);
    assert_eq!(response.narrative, "The lock clicks open.");
    assert_eq!(dm.mode(), SessionMode::GenerativeAvailable);
    assert_eq!(narrator.calls(), 2);
}

// =============================================================================
// TEST 5: Mechanics don't depend on the narrator
// =============================================================================

#[tokio::test]
async fn test_same_dice_same_mechanics() {
    let healthy = Arc::new(ScriptedNarrator::new().with_text("A clean blow."));
    let broken = Arc::new(ScriptedNarrator::new().with_failure(NarrationError::Timeout));
    let faces = [15, 5, 15, 4, 2];

    let mut outcomes = Vec::new();
    for narrator in [healthy, broken] {
        let mut dm = DungeonMaster::new(narrator, Arc::new(NpcDirectory::new()))
            .with_dice(ScriptedDice::new(faces));
        let roland = dm.add_character(create_sample_fighter("Roland"));
        dm.start_encounter(vec![ogre()]).unwrap();
        let response = dm.process_input(roland, "I attack the ogre").await.unwrap();
        outcomes.push((response.mechanics, response.degraded));
    }

    assert_eq!(outcomes[0].0, outcomes[1].0);
    assert!(!outcomes[0].1);
    assert!(outcomes[1].1);
}
