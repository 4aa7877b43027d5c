//! The Dungeon Master coordinator.
//!
//! A [`DungeonMaster`] owns one play session: the party's character sheets,
//! the current encounter and a dice source. Player input is classified,
//! resolved by the rules core and only then handed to the narrator. If
//! narration fails or times out the circuit breaker trips and templated
//! prose is used instead; the mechanics are identical either way.

use super::breaker::{CircuitBreaker, SessionMode};
use super::intent::{classify, CheckKind, IntentContext, PlayerIntent};
use super::narrator::{ClaudeNarrator, NarrationError, Narrator, Situation};
use super::templates::{explain_combat_error, explain_spell_error, fallback_narrative};
use crate::combat::{CombatAction, CombatEncounter, CombatError, Combatant, EncounterConfig, Side};
use crate::dice::{Advantage, DieSource};
use crate::npc::{behavior_roll, BehaviorConfig, NpcDirectory, RelationshipDelta, SocialSituation};
use crate::rules::{self, Effect, Resolution};
use crate::spells::{self, SpellData};
use crate::world::{Character, CharacterId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on opposing turns played back-to-back.
const MAX_AUTO_TURNS: usize = 200;

/// Errors from misusing the Dungeon Master. Mechanical refusals are not
/// errors; they come back as narration, so `process_input` only fails with
/// `UnknownCharacter`.
#[derive(Debug, Error)]
pub enum DmError {
    #[error("Unknown character: {0}")]
    UnknownCharacter(CharacterId),

    /// `start_encounter` while a fight is running.
    #[error("An encounter is already running")]
    EncounterInProgress,

    /// `start_encounter` with nobody to fight.
    #[error(transparent)]
    Combat(#[from] CombatError),

    /// `from_env` could not build the Claude client.
    #[error("Claude API error: {0}")]
    Backend(#[from] claude::Error),
}

/// Configuration for the Dungeon Master.
#[derive(Debug, Clone)]
pub struct DmConfig {
    /// How long to wait for narration before falling back.
    pub narration_timeout: Duration,

    /// Consecutive narration failures before degrading.
    pub failure_threshold: u32,

    /// How long to stay degraded before probing again. `None` means the
    /// rest of the session.
    pub cooldown: Option<Duration>,

    /// DC for checks the player doesn't give one for.
    pub default_dc: i32,

    /// Model override for the Claude narrator.
    pub model: Option<String>,

    pub behavior: BehaviorConfig,
    pub encounter: EncounterConfig,
}

impl Default for DmConfig {
    fn default() -> Self {
        Self {
            narration_timeout: Duration::from_secs(10),
            failure_threshold: 1,
            cooldown: None,
            default_dc: 10,
            model: None,
            behavior: BehaviorConfig::default(),
            encounter: EncounterConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

impl DmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `DM_NARRATION_TIMEOUT_MS`,
    /// `DM_FAILURE_THRESHOLD`, `DM_COOLDOWN_SECS`, `DM_DEFAULT_DC` and
    /// `DM_MODEL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_parse::<u64>("DM_NARRATION_TIMEOUT_MS") {
            config.narration_timeout = Duration::from_millis(ms);
        }
        if let Some(threshold) = env_parse("DM_FAILURE_THRESHOLD") {
            config.failure_threshold = threshold;
        }
        if let Some(secs) = env_parse::<u64>("DM_COOLDOWN_SECS") {
            config.cooldown = Some(Duration::from_secs(secs));
        }
        if let Some(dc) = env_parse("DM_DEFAULT_DC") {
            config.default_dc = dc;
        }
        if let Ok(model) = std::env::var("DM_MODEL") {
            if !model.trim().is_empty() {
                config.model = Some(model);
            }
        }
        config
    }

    pub fn with_narration_timeout(mut self, timeout: Duration) -> Self {
        self.narration_timeout = timeout;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn with_default_dc(mut self, dc: i32) -> Self {
        self.default_dc = dc;
        self
    }

    pub fn with_behavior(mut self, behavior: BehaviorConfig) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_encounter(mut self, encounter: EncounterConfig) -> Self {
        self.encounter = encounter;
        self
    }
}

/// Response from the Dungeon Master.
#[derive(Debug, Clone)]
pub struct DmResponse {
    /// Prose for the player.
    pub narrative: String,

    /// How the input was read.
    pub intent: PlayerIntent,

    /// Every state change and roll, in order.
    pub effects: Vec<Effect>,

    /// Plain mechanical summary.
    pub mechanics: String,

    /// Templated prose was used instead of the narrator.
    pub degraded: bool,
}

/// What resolving an intent produced.
struct Outcome {
    resolution: Resolution,
    npc_persona: Option<String>,
}

impl From<Resolution> for Outcome {
    fn from(resolution: Resolution) -> Self {
        Self {
            resolution,
            npc_persona: None,
        }
    }
}

/// The Dungeon Master for one session.
pub struct DungeonMaster {
    config: DmConfig,
    dice: Box<dyn DieSource + Send>,
    narrator: Arc<dyn Narrator>,
    npcs: Arc<NpcDirectory>,
    breaker: CircuitBreaker,
    characters: HashMap<CharacterId, Character>,
    encounter: Option<CombatEncounter>,
}

impl std::fmt::Debug for DungeonMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DungeonMaster")
            .field("config", &self.config)
            .field("breaker", &self.breaker)
            .field("characters", &self.characters.len())
            .field("in_combat", &self.encounter.is_some())
            .finish_non_exhaustive()
    }
}

impl DungeonMaster {
    /// Create a session around a narrator and a shared NPC directory.
    pub fn new(narrator: Arc<dyn Narrator>, npcs: Arc<NpcDirectory>) -> Self {
        let config = DmConfig::default();
        Self {
            breaker: CircuitBreaker::new(config.failure_threshold, config.cooldown),
            config,
            dice: Box::new(StdRng::from_entropy()),
            narrator,
            npcs,
            characters: HashMap::new(),
            encounter: None,
        }
    }

    /// Create a session narrated by Claude, configured from the environment.
    pub fn from_env(npcs: Arc<NpcDirectory>) -> Result<Self, DmError> {
        let config = DmConfig::from_env();
        let mut client = claude::Claude::with_timeout(
            std::env::var("ANTHROPIC_API_KEY").map_err(|_| claude::Error::NoApiKey)?,
            config.narration_timeout,
        )?;
        if let Some(model) = &config.model {
            client = client.with_model(model.clone());
        }
        let narrator = Arc::new(ClaudeNarrator::new(client));
        Ok(Self::new(narrator, npcs).with_config(config))
    }

    /// Configure the session. Resets the circuit breaker.
    pub fn with_config(mut self, config: DmConfig) -> Self {
        self.breaker = CircuitBreaker::new(config.failure_threshold, config.cooldown);
        self.config = config;
        self
    }

    /// Use a specific dice source, e.g. a seeded RNG.
    pub fn with_dice(mut self, dice: impl DieSource + Send + 'static) -> Self {
        self.dice = Box::new(dice);
        self
    }

    pub fn config(&self) -> &DmConfig {
        &self.config
    }

    pub fn mode(&self) -> SessionMode {
        self.breaker.mode()
    }

    pub fn is_degraded(&self) -> bool {
        self.mode() == SessionMode::Degraded
    }

    pub fn npcs(&self) -> &Arc<NpcDirectory> {
        &self.npcs
    }

    /// Add a character to the party.
    pub fn add_character(&mut self, character: Character) -> CharacterId {
        let id = character.id;
        self.characters.insert(id, character);
        id
    }

    pub fn character(&self, id: CharacterId) -> Option<&Character> {
        self.characters.get(&id)
    }

    pub fn characters(&self) -> impl Iterator<Item = &Character> {
        self.characters.values()
    }

    pub fn encounter(&self) -> Option<&CombatEncounter> {
        self.encounter.as_ref()
    }

    pub fn in_combat(&self) -> bool {
        self.encounter.is_some()
    }

    // ========================================================================
    // Combat lifecycle
    // ========================================================================

    /// Start a fight between the whole party and `foes`. Opposing turns
    /// before the first party turn are played immediately.
    pub fn start_encounter(&mut self, foes: Vec<Combatant>) -> Result<Resolution, DmError> {
        if self.encounter.is_some() {
            return Err(DmError::EncounterInProgress);
        }
        let mut party: Vec<&Character> = self.characters.values().collect();
        party.sort_by(|a, b| a.name.cmp(&b.name));
        let mut combatants: Vec<Combatant> = party.into_iter().map(Combatant::from_character).collect();
        combatants.extend(foes.into_iter().map(|mut foe| {
            foe.side = Side::Foes;
            foe
        }));

        let mut encounter = CombatEncounter::with_config(combatants, self.config.encounter.clone());
        let mut resolution = encounter.start(&mut *self.dice)?;
        info!(combatants = encounter.combatants().len(), "encounter started");
        self.encounter = Some(encounter);
        self.play_opposing_turns(&mut resolution);
        Ok(resolution)
    }

    /// Play foes' turns until a party member is up or the fight ends, then
    /// settle a finished encounter.
    fn play_opposing_turns(&mut self, resolution: &mut Resolution) {
        for _ in 0..MAX_AUTO_TURNS {
            let Some(encounter) = self.encounter.as_mut() else {
                return;
            };
            if encounter.is_resolved() {
                break;
            }
            let Some(current) = encounter.current() else {
                break;
            };
            if current.side == Side::Party && current.can_act() {
                return;
            }

            if !encounter.has_acted() && current.can_act() {
                let actor = current.id;
                let target = encounter.first_standing(current.side.opposing()).map(|c| c.id);
                if let Some(target) = target {
                    let action = CombatAction::Attack {
                        target,
                        advantage: Advantage::Normal,
                    };
                    match encounter.submit_action(actor, action, &mut *self.dice) {
                        Ok(done) => resolution.absorb(done),
                        Err(e) => debug!(error = %e, "opposing turn skipped"),
                    }
                }
            }
            if encounter.is_resolved() {
                break;
            }
            match encounter.advance_turn(&mut *self.dice) {
                Ok(next) => resolution.absorb(next),
                Err(e) => {
                    warn!(error = %e, "could not advance turn");
                    break;
                }
            }
        }
        if self.encounter.as_ref().is_some_and(|e| e.is_resolved()) {
            self.settle_encounter(resolution);
        }
    }

    /// Copy the party's state back to their sheets and drop the encounter.
    fn settle_encounter(&mut self, resolution: &mut Resolution) {
        let Some(encounter) = self.encounter.take() else {
            return;
        };
        let rounds = encounter.round();
        for combatant in encounter.into_combatants() {
            if let Some(character) = self.characters.get_mut(&combatant.id) {
                combatant.write_back(character);
            }
        }
        info!(rounds, "encounter settled");
        if !resolution
            .effects
            .iter()
            .any(|e| matches!(e, Effect::CombatEnded { .. }))
        {
            resolution.push(Effect::CombatEnded { rounds });
        }
    }

    // ========================================================================
    // Player input
    // ========================================================================

    /// Handle one line of player input from `character`.
    pub async fn process_input(
        &mut self,
        character: CharacterId,
        input: &str,
    ) -> Result<DmResponse, DmError> {
        let name = self
            .characters
            .get(&character)
            .map(|c| c.name.clone())
            .ok_or(DmError::UnknownCharacter(character))?;

        let context = IntentContext::new()
            .with_combatants(
                self.encounter
                    .iter()
                    .flat_map(|e| e.combatants())
                    .map(|c| c.name.clone())
                    .chain(self.characters.values().map(|c| c.name.clone())),
            )
            .with_npcs(self.npcs.names().await);
        let intent = classify(input, &context);
        debug!(character = %name, ?intent, "input classified");

        let outcome = match &intent {
            PlayerIntent::Attack { target } => self.resolve_attack(character, target.as_deref()).into(),
            PlayerIntent::Spell {
                spell,
                slot_level,
                target,
            } => self
                .resolve_spell(character, spell, *slot_level, target.as_deref())
                .into(),
            PlayerIntent::SkillCheck { check, dc } => self.resolve_check(character, *check, *dc).into(),
            PlayerIntent::Dialogue { npc, situation } => {
                self.resolve_dialogue(character, &name, npc, *situation).await
            }
            PlayerIntent::Other => Outcome::from(Resolution::default()),
        };

        let Outcome {
            resolution,
            npc_persona,
        } = outcome;
        let mut situation = Situation::new(name, input, intent.kind())
            .with_mechanics(resolution.summary.clone())
            .with_effects(resolution.effects.clone());
        if let Some(persona) = npc_persona {
            situation = situation.with_npc_persona(persona);
        }
        let (narrative, degraded) = self.narrate(&situation).await;

        Ok(DmResponse {
            narrative,
            intent,
            effects: resolution.effects,
            mechanics: resolution.summary,
            degraded,
        })
    }

    /// Narrate through the breaker, falling back to a template.
    async fn narrate(&mut self, situation: &Situation) -> (String, bool) {
        if !self.breaker.allow_request() {
            return (fallback_narrative(situation), true);
        }
        let result = tokio::time::timeout(self.config.narration_timeout, self.narrator.narrate(situation))
            .await
            .unwrap_or(Err(NarrationError::Timeout));
        match result {
            Ok(text) => {
                self.breaker.record_success();
                (text, false)
            }
            Err(e) => {
                warn!(error = %e, "narration failed, using template");
                self.breaker.record_failure();
                (fallback_narrative(situation), true)
            }
        }
    }

    fn resolve_attack(&mut self, character: CharacterId, target: Option<&str>) -> Resolution {
        let Some(encounter) = self.encounter.as_ref() else {
            return Resolution::new("There's nothing here to fight.");
        };
        let side = encounter.combatant(character).map(|c| c.side).unwrap_or(Side::Party);
        let target = match target {
            Some(name) => encounter
                .combatants()
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .map(|c| c.id),
            None => encounter.first_standing(side.opposing()).map(|c| c.id),
        };
        let Some(target) = target else {
            return Resolution::new("There's no one like that to target.");
        };
        self.combat_turn(
            character,
            CombatAction::Attack {
                target,
                advantage: Advantage::Normal,
            },
        )
    }

    /// Submit a party member's action, then play out the foes' turns.
    fn combat_turn(&mut self, character: CharacterId, action: CombatAction) -> Resolution {
        let Some(encounter) = self.encounter.as_mut() else {
            return Resolution::default();
        };
        let mut resolution = match encounter.submit_action(character, action, &mut *self.dice) {
            Ok(resolution) => resolution,
            Err(e) => {
                debug!(error = %e, "combat action refused");
                return Resolution::new(explain_combat_error(&e));
            }
        };
        if !encounter.is_resolved() {
            match encounter.advance_turn(&mut *self.dice) {
                Ok(next) => resolution.absorb(next),
                Err(e) => warn!(error = %e, "could not advance turn"),
            }
        }
        self.play_opposing_turns(&mut resolution);
        resolution
    }

    fn resolve_spell(
        &mut self,
        character: CharacterId,
        spell_name: &str,
        slot_level: Option<u8>,
        target: Option<&str>,
    ) -> Resolution {
        let spell = match spells::require_spell(spell_name) {
            Ok(spell) => spell,
            Err(e) => return Resolution::new(explain_spell_error(&e)),
        };

        let Some(encounter) = self.encounter.as_ref() else {
            return self.cast_outside_combat(character, spell, slot_level, target);
        };
        let side = encounter.combatant(character).map(|c| c.side).unwrap_or(Side::Party);
        let named = target.and_then(|name| {
            encounter
                .combatants()
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .map(|c| c.id)
        });
        let targets = match named {
            Some(id) => vec![id],
            None if spell.needs_other_target() => encounter
                .first_standing(side.opposing())
                .map(|c| vec![c.id])
                .unwrap_or_default(),
            None => vec![character],
        };
        self.combat_turn(
            character,
            CombatAction::CastSpell {
                spell: spell.name.clone(),
                slot_level,
                targets,
            },
        )
    }

    /// Healing between fights.
    fn cast_outside_combat(
        &mut self,
        caster_id: CharacterId,
        spell: &SpellData,
        slot_level: Option<u8>,
        target: Option<&str>,
    ) -> Resolution {
        if spell.needs_other_target() {
            return Resolution::new("There's nothing here to aim that at.");
        }
        if spell.boon.is_some() {
            return Resolution::new(format!("{} only matters once a fight starts.", spell.name));
        }
        let target_id = target
            .and_then(|name| {
                self.characters
                    .values()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                    .map(|c| c.id)
            })
            .unwrap_or(caster_id);

        let Some(caster) = self.characters.get_mut(&caster_id) else {
            return Resolution::default();
        };
        let caster_name = caster.name.clone();
        let Some(casting) = caster.spellcasting.as_mut() else {
            return Resolution::new("You don't know how to cast spells.");
        };
        let casting_mod = caster.ability_scores.modifier(casting.ability) as i32;

        let mut resolution = Resolution::default();
        let mut cast_level = spell.level;
        match casting.slots.expend_for_spell(spell, slot_level) {
            Ok(Some((level, remaining))) => {
                cast_level = level;
                resolution.push(Effect::SpellSlotUsed {
                    caster_id,
                    level,
                    remaining,
                });
            }
            Ok(None) => {}
            Err(e) => return Resolution::new(explain_spell_error(&e)),
        }
        resolution.note(format!("{caster_name} casts {}.", spell.name));

        if spell.concentration {
            if let Some(previous) = caster.concentration.start(spell.name.clone(), 0) {
                resolution.push(Effect::ConcentrationBroken {
                    caster_id,
                    spell: previous.spell,
                });
            }
            resolution.push(Effect::ConcentrationStarted {
                caster_id,
                spell: spell.name.clone(),
            });
        }

        if let Some(base) = spell.effective_healing(cast_level) {
            let roll = base.with_modifier(base.modifier() + casting_mod).evaluate(&mut *self.dice);
            resolution.push(Effect::DiceRolled {
                roll: roll.clone(),
                purpose: format!("{} healing", spell.name),
            });
            if let Some(target) = self.characters.get_mut(&target_id) {
                let healed = target.hit_points.heal(roll.total.max(0));
                resolution.push(Effect::HpChanged {
                    target_id,
                    amount: healed,
                    new_current: target.hit_points.current,
                    new_max: target.hit_points.maximum,
                    dropped_to_zero: false,
                });
                resolution.note(format!("{} regains {healed} hit points.", target.name));
            }
        }
        resolution
    }

    fn resolve_check(&mut self, character: CharacterId, check: CheckKind, dc: Option<i32>) -> Resolution {
        let Some(sheet) = self.characters.get(&character) else {
            return Resolution::default();
        };
        let dc = dc.unwrap_or(self.config.default_dc);
        let result = match check {
            CheckKind::Skill(skill) => {
                rules::skill_check(sheet.skill_modifier(skill), dc, Advantage::Normal, &mut *self.dice)
            }
            CheckKind::Save(ability) => {
                rules::saving_throw(sheet.saving_throw_modifier(ability), dc, &mut *self.dice)
            }
        };
        let purpose = format!("{} {check}", sheet.name);
        let outcome = if result.success { "success" } else { "failure" };
        Resolution::new(format!("{purpose}: {} vs DC {dc}, {outcome}.", result.roll))
        .with_effect(Effect::DiceRolled {
            roll: result.roll.clone(),
            purpose: purpose.clone(),
        })
        .with_effect(Effect::CheckResolved {
            purpose,
            total: result.total,
            dc,
            success: result.success,
        })
    }

    async fn resolve_dialogue(
        &mut self,
        character: CharacterId,
        character_name: &str,
        npc_name: &str,
        situation: SocialSituation,
    ) -> Outcome {
        let Some(npc) = self.npcs.find_by_name(npc_name).await else {
            return Resolution::default().into();
        };
        let roll = behavior_roll(&npc, Some(character), situation, &self.config.behavior, &mut *self.dice);
        let summary = roll.summary(&npc.name);
        let outcome = if roll.player_prevails { "succeeded" } else { "failed" };
        let event = format!("{character_name}'s {situation} {outcome}");
        let delta = interaction_delta(situation, roll.player_prevails);

        if let Err(e) = self.npcs.record_interaction(npc.id, character, event, delta).await {
            warn!(error = %e, "could not record interaction");
        }
        let persona = match self.npcs.get(npc.id).await {
            Some(updated) => updated.persona_summary(Some(character)),
            None => npc.persona_summary(Some(character)),
        };

        let purpose = format!("{} {situation}", npc.name);
        let resolution = Resolution::new(summary)
            .with_effect(Effect::DiceRolled {
                roll: roll.check.roll.clone(),
                purpose: purpose.clone(),
            })
            .with_effect(Effect::CheckResolved {
                purpose,
                total: roll.check.total,
                dc: roll.check.dc,
                success: roll.success,
            });
        Outcome {
            resolution,
            npc_persona: Some(persona),
        }
    }
}

/// How a social attempt shifts the NPC's feelings.
fn interaction_delta(situation: SocialSituation, player_prevails: bool) -> RelationshipDelta {
    match (situation, player_prevails) {
        (SocialSituation::Persuasion, true) => RelationshipDelta::trust(1),
        (SocialSituation::RequestHelp, true) => RelationshipDelta::affection(1),
        (SocialSituation::Bribe, true) => RelationshipDelta::trust(1),
        (SocialSituation::Bribe, false) => RelationshipDelta::respect(-1),
        (SocialSituation::Intimidation, true) => RelationshipDelta::new(-1, 0, 1),
        (SocialSituation::Intimidation, false) => RelationshipDelta::new(-1, 0, -1),
        (SocialSituation::Deception, false) => RelationshipDelta::trust(-3),
        (SocialSituation::Threatened, true) => RelationshipDelta::affection(-2),
        (SocialSituation::Threatened, false) => RelationshipDelta::new(-2, 0, -1),
        _ => RelationshipDelta::default(),
    }
}
