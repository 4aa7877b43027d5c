//! Turn-based combat encounters.
//!
//! An encounter moves `Pending -> Active -> (RoundTransition -> Active)* ->
//! Resolved`. Only the combatant at the turn pointer may act, once per turn.
//! Every action resolves through [`crate::rules`] and [`crate::spells`] and
//! reports what happened as ordered [`Effect`]s.

mod combatant;
mod policy;

pub use combatant::{bandit, goblin, monster, wolf, ActiveBoon, Combatant, OngoingDamage, Side};
pub use policy::{
    DexterityThenOrder, EncounterConfig, InsertionOrder, LastSideStanding, PartyDefeated,
    PartyFirst, TerminationRule, TiebreakRule,
};

use crate::dice::{Advantage, DiceExpression, DieSource};
use crate::rules::{self, Effect, Resolution};
use crate::spells::{self, Concentration, SaveEffect, SpellBoon, SpellData, SpellError};
use crate::world::{Ability, ActiveCondition, CharacterId, Condition};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const UNCONSCIOUS_SOURCE: &str = "0 hit points";

/// Lifecycle of an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncounterState {
    Pending,
    Active,
    RoundTransition,
    Resolved,
}

impl fmt::Display for EncounterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncounterState::Pending => "pending",
            EncounterState::Active => "active",
            EncounterState::RoundTransition => "between rounds",
            EncounterState::Resolved => "resolved",
        };
        write!(f, "{name}")
    }
}

/// What a combatant does on its turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatAction {
    /// Weapon attack
    Attack {
        target: CharacterId,
        advantage: Advantage,
    },
    CastSpell {
        spell: String,
        /// Slot to spend; `None` uses the spell's own level.
        slot_level: Option<u8>,
        targets: Vec<CharacterId>,
    },
    Dodge,
    Pass,
}

/// Why an action was refused. The turn does not advance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IllegalAction {
    #[error("It is {current}'s turn, not {actor}'s")]
    NotYourTurn { actor: String, current: String },

    #[error("No combatant with id {0}")]
    UnknownCombatant(CharacterId),

    #[error("No target with id {0}")]
    UnknownTarget(CharacterId),

    #[error("{0} is down and cannot act")]
    ActorDown(String),

    #[error("{0} is incapacitated and cannot act")]
    ActorIncapacitated(String),

    #[error("{0} has already acted this turn")]
    ActionAlreadyTaken(String),

    #[error("{0} is already down")]
    TargetDown(String),

    #[error("A combatant cannot target itself with that")]
    CannotTargetSelf,

    #[error("{0} cannot cast spells")]
    NotASpellcaster(String),

    #[error("That spell needs a target")]
    NoTargets,

    #[error("That spell can affect at most {max} targets")]
    TooManyTargets { max: u8 },
}

/// Errors from driving an encounter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombatError {
    #[error("An encounter needs at least one combatant")]
    EmptyEncounter,

    #[error("The encounter has already started")]
    AlreadyStarted,

    #[error("The encounter is {state}")]
    NotActive { state: EncounterState },

    #[error("Illegal action: {0}")]
    IllegalAction(#[from] IllegalAction),

    #[error(transparent)]
    Spell(#[from] SpellError),
}

/// A single fight. Not reusable once resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatEncounter {
    state: EncounterState,
    combatants: Vec<Combatant>,
    round: u32,
    turn: usize,
    acted: bool,
    #[serde(skip)]
    config: EncounterConfig,
}

impl CombatEncounter {
    pub fn new(combatants: Vec<Combatant>) -> Self {
        Self::with_config(combatants, EncounterConfig::default())
    }

    pub fn with_config(combatants: Vec<Combatant>, config: EncounterConfig) -> Self {
        Self {
            state: EncounterState::Pending,
            combatants,
            round: 0,
            turn: 0,
            acted: false,
            config,
        }
    }

    pub fn add_combatant(&mut self, combatant: Combatant) -> Result<(), CombatError> {
        if self.state != EncounterState::Pending {
            return Err(CombatError::AlreadyStarted);
        }
        self.combatants.push(combatant);
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> EncounterState {
        self.state
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn turn_index(&self) -> usize {
        self.turn
    }

    pub fn is_resolved(&self) -> bool {
        self.state == EncounterState::Resolved
    }

    /// Combatants in initiative order once started.
    pub fn combatants(&self) -> &[Combatant] {
        &self.combatants
    }

    pub fn combatant(&self, id: CharacterId) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.id == id)
    }

    /// The combatant whose turn it is.
    pub fn current(&self) -> Option<&Combatant> {
        match self.state {
            EncounterState::Active => self.combatants.get(self.turn),
            _ => None,
        }
    }

    pub fn has_acted(&self) -> bool {
        self.acted
    }

    /// First combatant on a side still above 0 HP, in initiative order.
    pub fn first_standing(&self, side: Side) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.side == side && c.is_up())
    }

    /// The side left standing, once resolved.
    pub fn winner(&self) -> Option<Side> {
        if !self.is_resolved() {
            return None;
        }
        let party = self.first_standing(Side::Party).is_some();
        let foes = self.first_standing(Side::Foes).is_some();
        match (party, foes) {
            (true, false) => Some(Side::Party),
            (false, true) => Some(Side::Foes),
            _ => None,
        }
    }

    /// Hand the final combatant values back to the caller.
    pub fn into_combatants(self) -> Vec<Combatant> {
        self.combatants
    }

    fn index_of(&self, id: CharacterId) -> Option<usize> {
        self.combatants.iter().position(|c| c.id == id)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Roll initiative and begin round 1.
    pub fn start<D: DieSource + ?Sized>(&mut self, dice: &mut D) -> Result<Resolution, CombatError> {
        if self.state != EncounterState::Pending {
            return Err(CombatError::AlreadyStarted);
        }
        if self.combatants.is_empty() {
            return Err(CombatError::EmptyEncounter);
        }

        let mut resolution = Resolution::new("Roll for initiative!").with_effect(Effect::CombatStarted);
        for combatant in &mut self.combatants {
            let roll = DiceExpression::d20(combatant.dex_modifier() as i32).evaluate(dice);
            combatant.initiative = Some(roll.total);
            resolution.push(Effect::InitiativeRolled {
                character_id: combatant.id,
                name: combatant.name.clone(),
                roll: roll.dice_total(),
                total: roll.total,
            });
        }

        // Stable sort: full ties keep insertion order.
        let tiebreak = Arc::clone(&self.config.tiebreak);
        self.combatants.sort_by(|a, b| {
            b.initiative
                .cmp(&a.initiative)
                .then_with(|| tiebreak.compare(a, b))
        });

        self.state = EncounterState::Active;
        self.round = 1;
        self.turn = 0;
        self.acted = false;

        let order: Vec<String> = self
            .combatants
            .iter()
            .map(|c| format!("{} ({})", c.name, c.initiative.unwrap_or_default()))
            .collect();
        info!(combatants = self.combatants.len(), "combat started");
        resolution.note(format!("Initiative order: {}.", order.join(", ")));

        if !self.finish_if_resolved(&mut resolution) && !self.combatants[0].can_act() {
            let skipped = self.advance_turn(dice)?;
            resolution.absorb(skipped);
        }
        Ok(resolution)
    }

    /// Apply the termination rule. Returns true once resolved.
    pub fn check_resolution(&mut self) -> bool {
        let mut ignored = Resolution::default();
        self.finish_if_resolved(&mut ignored)
    }

    fn finish_if_resolved(&mut self, resolution: &mut Resolution) -> bool {
        match self.state {
            EncounterState::Resolved => return true,
            EncounterState::Pending => return false,
            _ => {}
        }
        if !self.config.termination.is_resolved(&self.combatants) {
            return false;
        }

        self.state = EncounterState::Resolved;
        resolution.push(Effect::CombatEnded { rounds: self.round });
        let outcome = match self.winner() {
            Some(Side::Party) => "The party stands victorious.",
            Some(Side::Foes) => "The party has fallen.",
            None => "The fighting stops.",
        };
        resolution.note(outcome);
        info!(rounds = self.round, winner = ?self.winner(), "combat resolved");
        true
    }

    /// Move the pointer to the next combatant able to act. Wrapping past the
    /// end runs the round transition.
    pub fn advance_turn<D: DieSource + ?Sized>(
        &mut self,
        dice: &mut D,
    ) -> Result<Resolution, CombatError> {
        if self.state != EncounterState::Active {
            return Err(CombatError::NotActive { state: self.state });
        }

        let mut resolution = Resolution::default();
        let len = self.combatants.len();
        let start = self.turn;
        let mut idx = start;
        let mut wrapped = false;
        loop {
            idx += 1;
            if idx >= len {
                idx = 0;
                wrapped = true;
                self.transition_round(dice, &mut resolution);
                if self.is_resolved() {
                    return Ok(resolution);
                }
            }
            if self.combatants[idx].can_act() {
                break;
            }
            // Nobody can act this cycle; stop on the starting seat.
            if wrapped && idx >= start {
                break;
            }
        }

        self.turn = idx;
        self.acted = false;
        let current = &mut self.combatants[idx];
        current.dodging = false;
        debug!(round = self.round, combatant = %current.name, "turn advanced");
        resolution.push(Effect::TurnAdvanced {
            round: self.round,
            current_combatant: current.name.clone(),
        });
        resolution.note(format!("Round {}: {}'s turn.", self.round, current.name));
        Ok(resolution)
    }

    fn transition_round<D: DieSource + ?Sized>(&mut self, dice: &mut D, resolution: &mut Resolution) {
        self.state = EncounterState::RoundTransition;
        self.round += 1;
        debug!(round = self.round, "round transition");
        resolution.push(Effect::RoundStarted { round: self.round });

        for idx in 0..self.combatants.len() {
            let ticks = if self.combatants[idx].is_up() {
                self.combatants[idx].ongoing_damage.clone()
            } else {
                Vec::new()
            };
            for tick in ticks {
                let roll = tick.dice.evaluate(dice);
                let name = self.combatants[idx].name.clone();
                resolution.push(Effect::DiceRolled {
                    roll: roll.clone(),
                    purpose: format!("{} on {}", tick.source, name),
                });
                resolution.note(format!(
                    "{name} takes {} {} damage from {}.",
                    roll.total.max(0),
                    tick.damage_type,
                    tick.source
                ));
                self.damage_combatant(idx, roll.total.max(0), dice, resolution);
            }

            let combatant = &mut self.combatants[idx];
            for ongoing in &mut combatant.ongoing_damage {
                ongoing.rounds_remaining = ongoing.rounds_remaining.saturating_sub(1);
            }
            combatant.ongoing_damage.retain(|o| o.rounds_remaining > 0);

            let mut expired = Vec::new();
            combatant.conditions.retain_mut(|c| match c.duration_rounds.as_mut() {
                Some(rounds) => {
                    *rounds = rounds.saturating_sub(1);
                    if *rounds == 0 {
                        expired.push(c.condition);
                        false
                    } else {
                        true
                    }
                }
                None => true,
            });
            for condition in expired {
                resolution.push(Effect::ConditionRemoved {
                    target_id: combatant.id,
                    condition,
                });
                resolution.note(format!("{} is no longer {}.", combatant.name, condition));
            }
        }

        if !self.finish_if_resolved(resolution) {
            self.state = EncounterState::Active;
        }
    }

    // ========================================================================
    // Actions
    // ========================================================================

    /// Resolve the current combatant's action. Does not advance the turn.
    pub fn submit_action<D: DieSource + ?Sized>(
        &mut self,
        actor: CharacterId,
        action: CombatAction,
        dice: &mut D,
    ) -> Result<Resolution, CombatError> {
        if self.state != EncounterState::Active {
            return Err(CombatError::NotActive { state: self.state });
        }
        let actor_idx = self
            .index_of(actor)
            .ok_or(IllegalAction::UnknownCombatant(actor))?;
        let combatant = &self.combatants[actor_idx];
        if actor_idx != self.turn {
            return Err(IllegalAction::NotYourTurn {
                actor: combatant.name.clone(),
                current: self.combatants[self.turn].name.clone(),
            }
            .into());
        }
        if !combatant.is_up() {
            return Err(IllegalAction::ActorDown(combatant.name.clone()).into());
        }
        if !combatant.can_act() {
            return Err(IllegalAction::ActorIncapacitated(combatant.name.clone()).into());
        }
        if self.acted {
            return Err(IllegalAction::ActionAlreadyTaken(combatant.name.clone()).into());
        }

        let mut resolution = match action {
            CombatAction::Attack { target, advantage } => {
                self.resolve_attack(actor_idx, target, advantage, dice)?
            }
            CombatAction::CastSpell {
                spell,
                slot_level,
                targets,
            } => self.resolve_spell(actor_idx, &spell, slot_level, &targets, dice)?,
            CombatAction::Dodge => {
                let combatant = &mut self.combatants[actor_idx];
                combatant.dodging = true;
                Resolution::new(format!("{} takes the Dodge action.", combatant.name)).with_effect(
                    Effect::Dodging {
                        combatant_id: combatant.id,
                    },
                )
            }
            CombatAction::Pass => Resolution::new(format!(
                "{} holds back this turn.",
                self.combatants[actor_idx].name
            )),
        };

        self.acted = true;
        debug!(round = self.round, actor = %self.combatants[actor_idx].name, "action resolved");
        self.finish_if_resolved(&mut resolution);
        Ok(resolution)
    }

    /// Index of a valid target for `actor`.
    fn target_index(
        &self,
        actor: usize,
        target: CharacterId,
        harmful: bool,
    ) -> Result<usize, IllegalAction> {
        let idx = self
            .index_of(target)
            .ok_or(IllegalAction::UnknownTarget(target))?;
        if harmful {
            if idx == actor {
                return Err(IllegalAction::CannotTargetSelf);
            }
            if !self.combatants[idx].is_up() {
                return Err(IllegalAction::TargetDown(self.combatants[idx].name.clone()));
            }
        }
        Ok(idx)
    }

    fn attack_advantage(&self, requested: Advantage, attacker: usize, target: usize) -> Advantage {
        let attacker = &self.combatants[attacker];
        let target = &self.combatants[target];
        let mut sources = vec![requested];
        if attacker.conditions.iter().any(|c| c.condition.hampers_attacks()) {
            sources.push(Advantage::Disadvantage);
        }
        if target.conditions.iter().any(|c| c.condition.exposes_target()) {
            sources.push(Advantage::Advantage);
        }
        if target.dodging {
            sources.push(Advantage::Disadvantage);
        }
        rules::net_advantage(sources)
    }

    fn resolve_attack<D: DieSource + ?Sized>(
        &mut self,
        actor: usize,
        target: CharacterId,
        advantage: Advantage,
        dice: &mut D,
    ) -> Result<Resolution, CombatError> {
        let target = self.target_index(actor, target, true)?;
        let advantage = self.attack_advantage(advantage, actor, target);
        let mut resolution = Resolution::default();
        let bonus = self.roll_bonus(actor, "attack", dice, &mut resolution);
        let attacker = &self.combatants[actor];
        let defender = &self.combatants[target];
        let target_ac = defender.effective_ac();

        let attack = rules::attack_roll_with_advantage(
            attacker.attack_modifier().saturating_add(bonus),
            target_ac,
            advantage,
            dice,
        );
        let (attacker_id, target_id) = (attacker.id, defender.id);
        let line = format!(
            "{} attacks {} with {}: {} vs AC {target_ac}",
            attacker.name, defender.name, attacker.weapon.name, attack.total
        );
        let quarry = attacker.quarry_dice(target_id);

        resolution.push(Effect::DiceRolled {
            roll: attack.roll.clone(),
            purpose: format!("{} attack roll", attacker.name),
        });

        if !attack.hit {
            resolution.push(Effect::AttackMissed {
                attacker_id,
                target_id,
                total: attack.total,
            });
            resolution.note(format!("{line}, miss."));
            return Ok(resolution);
        }

        let damage_expr = attacker.weapon_damage();
        let damage_type = attacker.weapon.damage_type;
        resolution.push(Effect::AttackHit {
            attacker_id,
            target_id,
            total: attack.total,
            critical: attack.critical,
        });

        let damage = rules::damage_roll(&damage_expr, attack.critical, dice);
        resolution.push(Effect::DiceRolled {
            roll: damage.clone(),
            purpose: "damage".to_string(),
        });
        let mut total = damage.total;
        for (source, extra) in quarry {
            let roll = rules::damage_roll(&extra, attack.critical, dice);
            total = total.saturating_add(roll.total);
            resolution.push(Effect::DiceRolled {
                roll,
                purpose: format!("{source} damage"),
            });
        }
        resolution.note(format!(
            "{line}, {} for {total} {damage_type} damage.",
            if attack.critical { "critical hit" } else { "hit" },
        ));
        self.damage_combatant(target, total, dice, &mut resolution);
        Ok(resolution)
    }

    fn resolve_spell<D: DieSource + ?Sized>(
        &mut self,
        actor: usize,
        spell_name: &str,
        slot_level: Option<u8>,
        targets: &[CharacterId],
        dice: &mut D,
    ) -> Result<Resolution, CombatError> {
        let spell = spells::require_spell(spell_name)?;
        let caster = &self.combatants[actor];
        let Some(casting) = caster.spellcasting.as_ref() else {
            return Err(IllegalAction::NotASpellcaster(caster.name.clone()).into());
        };
        let caster_level = casting.caster_level;

        // Validate the slot and targets before spending anything.
        if let Some(level) = slot_level {
            casting.slots.slot(level)?;
        }
        let nominal_level = slot_level.unwrap_or(spell.level).max(spell.level);
        let max_targets = spell.target_count(nominal_level);
        let mut target_idx = Vec::new();
        if targets.is_empty() {
            if spell.needs_other_target() {
                return Err(IllegalAction::NoTargets.into());
            }
            target_idx.push(actor);
        }
        for &target in targets {
            let idx = self.target_index(actor, target, spell.needs_other_target())?;
            if !target_idx.contains(&idx) {
                target_idx.push(idx);
            }
        }
        if target_idx.len() > max_targets as usize {
            return Err(IllegalAction::TooManyTargets { max: max_targets }.into());
        }

        let caster = &mut self.combatants[actor];
        let (caster_id, caster_name) = (caster.id, caster.name.clone());
        let mut resolution = Resolution::default();
        let mut cast_level = spell.level;
        if let Some(casting) = caster.spellcasting.as_mut() {
            if let Some((level, remaining)) = casting.slots.expend_for_spell(spell, slot_level)? {
                cast_level = level;
                resolution.push(Effect::SpellSlotUsed {
                    caster_id,
                    level,
                    remaining,
                });
            }
        }

        let target_names: Vec<&str> = target_idx
            .iter()
            .map(|&i| self.combatants[i].name.as_str())
            .collect();
        let level_note = if spell.is_cantrip() {
            String::new()
        } else {
            format!(" at level {cast_level}")
        };
        resolution.note(format!(
            "{caster_name} casts {}{level_note} on {}.",
            spell.name,
            target_names.join(", ")
        ));

        if spell.concentration {
            if let Some(previous) = self.combatants[actor].concentration.end() {
                self.break_concentration(actor, previous, &mut resolution);
            }
            self.combatants[actor]
                .concentration
                .start(spell.name.clone(), self.round);
            resolution.push(Effect::ConcentrationStarted {
                caster_id,
                spell: spell.name.clone(),
            });
        }

        if let Some(boon) = &spell.boon {
            self.grant_boon(actor, spell, boon, &target_idx, &mut resolution);
        }

        if spell.is_healing() {
            self.resolve_healing_spell(actor, spell, cast_level, &target_idx, dice, &mut resolution);
        } else if spell.auto_hit || spell.attack_type.is_some() {
            self.resolve_attack_spell(
                actor,
                spell,
                caster_level,
                cast_level,
                &target_idx,
                dice,
                &mut resolution,
            );
        } else if spell.save_type.is_some() {
            self.resolve_save_spell(
                actor,
                spell,
                caster_level,
                cast_level,
                &target_idx,
                dice,
                &mut resolution,
            );
        }

        Ok(resolution)
    }

    fn resolve_healing_spell<D: DieSource + ?Sized>(
        &mut self,
        actor: usize,
        spell: &SpellData,
        cast_level: u8,
        targets: &[usize],
        dice: &mut D,
        resolution: &mut Resolution,
    ) {
        let Some(base) = spell.effective_healing(cast_level) else {
            return;
        };
        let bonus = self.combatants[actor].spellcasting_modifier().unwrap_or(0) as i32;
        let expr = base.with_modifier(base.modifier() + bonus);
        for &target in targets {
            let roll = expr.evaluate(dice);
            resolution.push(Effect::DiceRolled {
                roll: roll.clone(),
                purpose: format!("{} healing", spell.name),
            });
            self.heal_combatant(target, roll.total.max(0), resolution);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_attack_spell<D: DieSource + ?Sized>(
        &mut self,
        actor: usize,
        spell: &SpellData,
        caster_level: u8,
        cast_level: u8,
        targets: &[usize],
        dice: &mut D,
        resolution: &mut Resolution,
    ) {
        let Some(damage_expr) = spell.effective_damage(caster_level, cast_level) else {
            return;
        };
        let damage_type = spell.damage_type.map(|d| d.name()).unwrap_or("magical");
        let attack_bonus = self.combatants[actor].spell_attack_bonus().unwrap_or(0);
        let shots = if spell.is_projectile() {
            spell.target_count(cast_level) as usize
        } else {
            targets.len()
        };
        let caster_id = self.combatants[actor].id;

        for shot in 0..shots {
            let target = targets[shot % targets.len()];
            if !self.combatants[target].is_up() {
                continue;
            }
            let target_id = self.combatants[target].id;
            let target_name = self.combatants[target].name.clone();

            let critical = if spell.auto_hit {
                false
            } else {
                let advantage = self.attack_advantage(Advantage::Normal, actor, target);
                let bonus = self.roll_bonus(actor, "attack", dice, resolution);
                let attack = rules::attack_roll_with_advantage(
                    attack_bonus.saturating_add(bonus),
                    self.combatants[target].effective_ac(),
                    advantage,
                    dice,
                );
                resolution.push(Effect::DiceRolled {
                    roll: attack.roll.clone(),
                    purpose: format!("{} spell attack", spell.name),
                });
                if !attack.hit {
                    resolution.push(Effect::AttackMissed {
                        attacker_id: caster_id,
                        target_id,
                        total: attack.total,
                    });
                    resolution.note(format!("{} misses {target_name}.", spell.name));
                    continue;
                }
                resolution.push(Effect::AttackHit {
                    attacker_id: caster_id,
                    target_id,
                    total: attack.total,
                    critical: attack.critical,
                });
                attack.critical
            };

            let damage = rules::damage_roll(&damage_expr, critical, dice);
            resolution.push(Effect::DiceRolled {
                roll: damage.clone(),
                purpose: format!("{} damage", spell.name),
            });
            resolution.note(format!(
                "{} hits {target_name} for {} {damage_type} damage.",
                spell.name, damage.total
            ));
            self.damage_combatant(target, damage.total, dice, resolution);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_save_spell<D: DieSource + ?Sized>(
        &mut self,
        actor: usize,
        spell: &SpellData,
        caster_level: u8,
        cast_level: u8,
        targets: &[usize],
        dice: &mut D,
        resolution: &mut Resolution,
    ) {
        let Some(save) = spell.save_type else {
            return;
        };
        let dc = self.combatants[actor].spell_save_dc().unwrap_or(10);
        let caster_name = self.combatants[actor].name.clone();

        // Area damage is rolled once for every target.
        let damage = spell
            .effective_damage(caster_level, cast_level)
            .map(|expr| rules::damage_roll(&expr, false, dice));
        if let Some(roll) = &damage {
            resolution.push(Effect::DiceRolled {
                roll: roll.clone(),
                purpose: format!("{} damage", spell.name),
            });
        }

        for &target in targets {
            if !self.combatants[target].is_up() {
                continue;
            }
            let bonus = self.roll_bonus(target, "save", dice, resolution);
            let defender = &self.combatants[target];
            let (target_id, target_name) = (defender.id, defender.name.clone());
            let check = rules::saving_throw(defender.save_modifier(save).saturating_add(bonus), dc, dice);
            resolution.push(Effect::DiceRolled {
                roll: check.roll.clone(),
                purpose: format!("{target_name} {} save", save.abbreviation()),
            });
            resolution.push(Effect::CheckResolved {
                purpose: format!("{target_name} {} save against {}", save.name(), spell.name),
                total: check.total,
                dc,
                success: check.success,
            });

            if let Some(roll) = &damage {
                let amount = match (check.success, spell.save_effect) {
                    (false, _) => roll.total,
                    (true, SaveEffect::HalfDamage) => roll.total / 2,
                    (true, SaveEffect::NoEffect) => 0,
                };
                let verdict = if check.success { "saves" } else { "fails" };
                resolution.note(format!(
                    "{target_name} {verdict} ({} vs DC {dc}) and takes {amount} damage.",
                    check.total
                ));
                if amount > 0 {
                    self.damage_combatant(target, amount, dice, resolution);
                }
            }

            if let Some((condition, rounds)) = spell.condition {
                if check.success {
                    if damage.is_none() {
                        resolution.note(format!(
                            "{target_name} resists ({} vs DC {dc}).",
                            check.total
                        ));
                    }
                    continue;
                }
                if !self.combatants[target].is_up() {
                    continue;
                }
                let source = if spell.concentration {
                    concentration_source(&spell.name, &caster_name)
                } else {
                    spell.name.clone()
                };
                self.combatants[target]
                    .add_condition(ActiveCondition::new(condition, source.clone()).with_duration(rounds));
                resolution.push(Effect::ConditionApplied {
                    target_id,
                    condition,
                    source,
                    duration_rounds: Some(rounds),
                });
                resolution.note(format!(
                    "{target_name} fails ({} vs DC {dc}) and is {condition}.",
                    check.total
                ));
            }
        }
    }

    // ========================================================================
    // HP Changes
    // ========================================================================

    /// Apply damage, dropping to Unconscious at 0 and testing concentration.
    fn damage_combatant<D: DieSource + ?Sized>(
        &mut self,
        idx: usize,
        amount: i32,
        dice: &mut D,
        resolution: &mut Resolution,
    ) {
        let target = &mut self.combatants[idx];
        let result = target.hit_points.take_damage(amount);
        resolution.push(Effect::HpChanged {
            target_id: target.id,
            amount: -result.hp_lost,
            new_current: target.hit_points.current,
            new_max: target.hit_points.maximum,
            dropped_to_zero: result.dropped_to_zero,
        });

        if result.dropped_to_zero {
            target.add_condition(ActiveCondition::new(Condition::Unconscious, UNCONSCIOUS_SOURCE));
            resolution.push(Effect::ConditionApplied {
                target_id: target.id,
                condition: Condition::Unconscious,
                source: UNCONSCIOUS_SOURCE.to_string(),
                duration_rounds: None,
            });
            resolution.note(format!("{} falls unconscious.", target.name));
            if let Some(lost) = target.concentration.end() {
                self.break_concentration(idx, lost, resolution);
            }
            return;
        }

        if result.damage_taken == 0 || !target.concentration.is_concentrating() {
            return;
        }
        let bonus = self.roll_bonus(idx, "concentration save", dice, resolution);
        let target = &mut self.combatants[idx];
        let con_save = target.save_modifier(Ability::Constitution).saturating_add(bonus);
        let check =
            spells::concentration_check(&mut target.concentration, result.damage_taken, con_save, dice);
        resolution.push(Effect::DiceRolled {
            roll: check.check.roll.clone(),
            purpose: format!("{} concentration save", target.name),
        });
        match check.broken {
            Some(lost) => self.break_concentration(idx, lost, resolution),
            None => {
                let spell = target.concentration.spell().unwrap_or_default().to_string();
                resolution.note(format!("{} keeps concentrating on {spell}.", target.name));
                resolution.push(Effect::ConcentrationMaintained {
                    caster_id: target.id,
                    spell,
                    dc: check.check.dc,
                });
            }
        }
    }

    fn heal_combatant(&mut self, idx: usize, amount: i32, resolution: &mut Resolution) {
        let target = &mut self.combatants[idx];
        let was_down = !target.is_up();
        let healed = target.hit_points.heal(amount);
        resolution.push(Effect::HpChanged {
            target_id: target.id,
            amount: healed,
            new_current: target.hit_points.current,
            new_max: target.hit_points.maximum,
            dropped_to_zero: false,
        });
        resolution.note(format!("{} regains {healed} hit points.", target.name));

        if was_down && healed > 0 && target.remove_condition(Condition::Unconscious) {
            resolution.push(Effect::ConditionRemoved {
                target_id: target.id,
                condition: Condition::Unconscious,
            });
            resolution.note(format!("{} is back on their feet.", target.name));
        }
    }

    /// Drop a concentration spell and lift every condition it was holding.
    fn break_concentration(&mut self, caster: usize, lost: Concentration, resolution: &mut Resolution) {
        let (caster_id, caster_name) = (self.combatants[caster].id, self.combatants[caster].name.clone());
        resolution.push(Effect::ConcentrationBroken {
            caster_id,
            spell: lost.spell.clone(),
        });
        resolution.note(format!("{caster_name} loses concentration on {}.", lost.spell));
        debug!(caster = %caster_name, spell = %lost.spell, "concentration broken");

        let source = concentration_source(&lost.spell, &caster_name);
        for combatant in &mut self.combatants {
            let lifted: Vec<Condition> = combatant
                .conditions
                .iter()
                .filter(|c| c.source == source)
                .map(|c| c.condition)
                .collect();
            combatant.conditions.retain(|c| c.source != source);
            for condition in lifted {
                resolution.push(Effect::ConditionRemoved {
                    target_id: combatant.id,
                    condition,
                });
            }

            let before = combatant.boons.len();
            combatant.boons.retain(|b| b.source != source);
            if combatant.boons.len() != before {
                resolution.push(Effect::BoonEnded {
                    target_id: combatant.id,
                    spell: lost.spell.clone(),
                });
            }
        }
    }

    /// Put a spell's lasting benefit on its targets, or on the caster for a
    /// quarry mark.
    fn grant_boon(
        &mut self,
        actor: usize,
        spell: &SpellData,
        boon: &SpellBoon,
        targets: &[usize],
        resolution: &mut Resolution,
    ) {
        let caster_name = self.combatants[actor].name.clone();
        let source = if spell.concentration {
            concentration_source(&spell.name, &caster_name)
        } else {
            spell.name.clone()
        };
        for &target in targets {
            let target_id = self.combatants[target].id;
            let (holder, against) = match boon {
                SpellBoon::Quarry(_) => (actor, Some(target_id)),
                _ => (target, None),
            };
            let holder = &mut self.combatants[holder];
            holder.boons.push(ActiveBoon {
                boon: boon.clone(),
                source: source.clone(),
                against,
            });
            resolution.push(Effect::BoonGranted {
                target_id: holder.id,
                spell: spell.name.clone(),
            });
        }
        let names: Vec<&str> = targets
            .iter()
            .map(|&i| self.combatants[i].name.as_str())
            .collect();
        let text = match boon {
            SpellBoon::RollBonus(dice) => format!("{} add {dice} to attacks and saves", names.join(", ")),
            SpellBoon::Quarry(dice) => {
                format!("{caster_name}'s hits on {} deal an extra {dice}", names.join(", "))
            }
            SpellBoon::ArmorBonus(bonus) => format!("{} gain +{bonus} AC", names.join(", ")),
        };
        resolution.note(format!("{text} while {} lasts.", spell.name));
    }

    /// Roll every bonus die a combatant adds to its d20 rolls.
    fn roll_bonus<D: DieSource + ?Sized>(
        &self,
        idx: usize,
        purpose: &str,
        dice: &mut D,
        resolution: &mut Resolution,
    ) -> i8 {
        let combatant = &self.combatants[idx];
        let mut bonus = 0i32;
        for expr in combatant.roll_bonus_dice() {
            let roll = expr.evaluate(dice);
            bonus = bonus.saturating_add(roll.total);
            resolution.push(Effect::DiceRolled {
                roll,
                purpose: format!("{} {purpose} bonus", combatant.name),
            });
        }
        bonus.clamp(i8::MIN as i32, i8::MAX as i32) as i8
    }
}

fn concentration_source(spell: &str, caster: &str) -> String {
    format!("{spell} ({caster})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spells::{SpellSlotPool, Spellcasting};
    use crate::testing::{create_sample_cleric, create_sample_wizard, ScriptedDice};
    use crate::world::{AbilityScores, Weapon};

    fn hero(name: &str, dex: u8) -> Combatant {
        Combatant::new(
            name,
            Side::Party,
            20,
            14,
            AbilityScores::new(14, dex, 12, 10, 10, 10),
        )
        .with_weapon(Weapon::longsword())
    }

    fn started(combatants: Vec<Combatant>, initiative: &[u32]) -> CombatEncounter {
        let mut encounter = CombatEncounter::new(combatants);
        let mut dice = ScriptedDice::new(initiative.iter().copied());
        encounter.start(&mut dice).unwrap();
        assert!(dice.is_exhausted());
        encounter
    }

    fn names(encounter: &CombatEncounter) -> Vec<&str> {
        encounter
            .combatants()
            .iter()
            .map(|c| c.name.as_str())
            .collect()
    }

    #[test]
    fn test_empty_encounter() {
        let mut encounter = CombatEncounter::new(Vec::new());
        let mut dice = ScriptedDice::default();
        assert_eq!(encounter.start(&mut dice), Err(CombatError::EmptyEncounter));
        assert_eq!(encounter.state(), EncounterState::Pending);
    }

    #[test]
    fn test_initiative_order() {
        let encounter = started(vec![hero("Slow", 10), goblin("Snag"), hero("Fast", 10)], &[5, 10, 18]);
        assert_eq!(names(&encounter), vec!["Fast", "Snag", "Slow"]);
        assert_eq!(encounter.state(), EncounterState::Active);
        assert_eq!(encounter.round(), 1);
        assert_eq!(encounter.current().unwrap().name, "Fast");
    }

    #[test]
    fn test_initiative_tie_goes_to_higher_dexterity() {
        // Dex +1 rolls 12, Dex +3 rolls 10: both total 13.
        let encounter = started(vec![hero("Plodder", 12), hero("Nimble", 16), goblin("Snag")], &[12, 10, 1]);
        assert_eq!(names(&encounter)[..2], ["Nimble", "Plodder"]);
    }

    #[test]
    fn test_insertion_order_tiebreak() {
        let config = EncounterConfig::new().with_tiebreak(InsertionOrder);
        let mut encounter = CombatEncounter::with_config(
            vec![hero("Plodder", 12), hero("Nimble", 16), goblin("Snag")],
            config,
        );
        encounter.start(&mut ScriptedDice::new([12, 10, 1])).unwrap();
        assert_eq!(names(&encounter)[..2], ["Plodder", "Nimble"]);
    }

    #[test]
    fn test_full_cycle_increments_round_once() {
        let mut encounter = started(
            vec![hero("A", 10), hero("B", 10), hero("C", 10), goblin("Snag")],
            &[20, 15, 10, 1],
        );
        let mut dice = ScriptedDice::default();
        for _ in 0..4 {
            encounter.advance_turn(&mut dice).unwrap();
        }
        assert_eq!(encounter.turn_index(), 0);
        assert_eq!(encounter.round(), 2);
    }

    #[test]
    fn test_lone_combatant_cycles_on_its_own_seat() {
        let config = EncounterConfig::new().with_termination(PartyDefeated);
        let mut encounter = CombatEncounter::with_config(vec![hero("Solo", 10)], config);
        encounter.start(&mut ScriptedDice::new([10])).unwrap();
        let mut dice = ScriptedDice::default();

        for round in 2..=4 {
            encounter.advance_turn(&mut dice).unwrap();
            assert_eq!(encounter.turn_index(), 0);
            assert_eq!(encounter.round(), round);
            assert_eq!(encounter.state(), EncounterState::Active);
        }
    }

    #[test]
    fn test_full_cycle_from_a_middle_seat() {
        let mut encounter = started(
            vec![hero("A", 10), hero("B", 10), goblin("Snag")],
            &[20, 15, 1],
        );
        let mut dice = ScriptedDice::default();
        encounter.advance_turn(&mut dice).unwrap();
        assert_eq!(encounter.turn_index(), 1);
        assert_eq!(encounter.round(), 1);

        for _ in 0..3 {
            encounter.advance_turn(&mut dice).unwrap();
        }
        assert_eq!(encounter.turn_index(), 1);
        assert_eq!(encounter.current().unwrap().name, "B");
        assert_eq!(encounter.round(), 2);
    }

    #[test]
    fn test_wrong_turn_is_illegal() {
        let mut encounter = started(vec![hero("Roland", 10), goblin("Snag")], &[15, 2]);
        let goblin_id = encounter.combatants()[1].id;
        let hero_id = encounter.combatants()[0].id;
        let mut dice = ScriptedDice::default();

        let err = encounter
            .submit_action(
                goblin_id,
                CombatAction::Attack {
                    target: hero_id,
                    advantage: Advantage::Normal,
                },
                &mut dice,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CombatError::IllegalAction(IllegalAction::NotYourTurn { .. })
        ));
        assert_eq!(encounter.turn_index(), 0);
        assert!(!encounter.has_acted());
    }

    #[test]
    fn test_unknown_target_is_illegal() {
        let mut encounter = started(vec![hero("Roland", 10), goblin("Snag")], &[15, 2]);
        let hero_id = encounter.combatants()[0].id;
        let stranger = CharacterId::new();
        let err = encounter
            .submit_action(
                hero_id,
                CombatAction::Attack {
                    target: stranger,
                    advantage: Advantage::Normal,
                },
                &mut ScriptedDice::default(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            CombatError::IllegalAction(IllegalAction::UnknownTarget(stranger))
        );
    }

    #[test]
    fn test_one_action_per_turn() {
        let mut encounter = started(vec![hero("Roland", 10), goblin("Snag")], &[15, 2]);
        let hero_id = encounter.combatants()[0].id;
        let mut dice = ScriptedDice::default();
        encounter
            .submit_action(hero_id, CombatAction::Dodge, &mut dice)
            .unwrap();
        assert!(encounter.combatants()[0].dodging);
        assert_eq!(
            encounter.submit_action(hero_id, CombatAction::Pass, &mut dice),
            Err(CombatError::IllegalAction(IllegalAction::ActionAlreadyTaken(
                "Roland".to_string()
            )))
        );
    }

    #[test]
    fn test_critical_hit_drops_goblin_and_resolves() {
        let mut encounter = started(vec![hero("Roland", 10), goblin("Snag")], &[15, 5]);
        let hero_id = encounter.combatants()[0].id;
        let goblin_id = encounter.combatants()[1].id;

        // Natural 20, then 2d8 for the critical: 3 + 4 + 2 = 9.
        let mut dice = ScriptedDice::new([20, 3, 4]);
        let resolution = encounter
            .submit_action(
                hero_id,
                CombatAction::Attack {
                    target: goblin_id,
                    advantage: Advantage::Normal,
                },
                &mut dice,
            )
            .unwrap();
        assert!(dice.is_exhausted());

        assert!(resolution.effects.contains(&Effect::AttackHit {
            attacker_id: hero_id,
            target_id: goblin_id,
            total: 24,
            critical: true,
        }));
        assert_eq!(resolution.hp_delta(goblin_id), -7);
        let goblin = encounter.combatant(goblin_id).unwrap();
        assert_eq!(goblin.hit_points.current, 0);
        assert!(goblin.has_condition(Condition::Unconscious));

        assert!(encounter.is_resolved());
        assert_eq!(encounter.winner(), Some(Side::Party));
        assert!(matches!(
            resolution.effects.last(),
            Some(Effect::CombatEnded { rounds: 1 })
        ));
        assert_eq!(
            encounter.submit_action(hero_id, CombatAction::Pass, &mut dice),
            Err(CombatError::NotActive {
                state: EncounterState::Resolved
            })
        );
        assert!(encounter.advance_turn(&mut dice).is_err());
    }

    #[test]
    fn test_dodge_imposes_disadvantage() {
        let mut encounter = started(vec![hero("Roland", 10), goblin("Snag")], &[15, 5]);
        let hero_id = encounter.combatants()[0].id;
        let mut dice = ScriptedDice::default();
        encounter
            .submit_action(hero_id, CombatAction::Dodge, &mut dice)
            .unwrap();
        encounter.advance_turn(&mut dice).unwrap();

        let goblin_id = encounter.current().unwrap().id;
        // 15 and 3 with disadvantage keeps 3: 3 + 4 = 7 vs AC 14 misses.
        let mut dice = ScriptedDice::new([15, 3]);
        let resolution = encounter
            .submit_action(
                goblin_id,
                CombatAction::Attack {
                    target: hero_id,
                    advantage: Advantage::Normal,
                },
                &mut dice,
            )
            .unwrap();
        assert!(resolution
            .effects
            .iter()
            .any(|e| matches!(e, Effect::AttackMissed { total: 7, .. })));
        assert_eq!(encounter.combatant(hero_id).unwrap().hit_points.current, 20);
    }

    #[test]
    fn test_incapacitated_combatants_are_skipped() {
        let stunned = goblin("Dazed").with_condition(ActiveCondition::new(Condition::Stunned, "test"));
        let mut encounter = started(vec![hero("Roland", 10), stunned, goblin("Snag")], &[15, 10, 5]);
        let mut dice = ScriptedDice::default();
        encounter.advance_turn(&mut dice).unwrap();
        assert_eq!(encounter.current().unwrap().name, "Snag");
        assert_eq!(encounter.round(), 1);
    }

    #[test]
    fn test_magic_missile_spends_slot_and_splits_darts() {
        let wizard = Combatant::from_character(&create_sample_wizard("Ayla"));
        let mut encounter = started(vec![wizard, goblin("Snag"), goblin("Grub")], &[18, 5, 4]);
        let wizard_id = encounter.combatants()[0].id;
        let snag = encounter.combatants()[1].id;
        let grub = encounter.combatants()[2].id;

        // Three darts of 1d4+1, alternating targets.
        let mut dice = ScriptedDice::new([1, 1, 1]);
        let resolution = encounter
            .submit_action(
                wizard_id,
                CombatAction::CastSpell {
                    spell: "magic missile".to_string(),
                    slot_level: None,
                    targets: vec![snag, grub],
                },
                &mut dice,
            )
            .unwrap();
        assert!(dice.is_exhausted());
        assert_eq!(resolution.hp_delta(snag), -4);
        assert_eq!(resolution.hp_delta(grub), -2);
        assert!(resolution.effects.contains(&Effect::SpellSlotUsed {
            caster_id: wizard_id,
            level: 1,
            remaining: 3,
        }));
    }

    #[test]
    fn test_impossible_slot_level_is_refused_before_targeting() {
        let wizard = Combatant::from_character(&create_sample_wizard("Ayla"));
        let mut encounter = started(vec![wizard, goblin("Snag")], &[18, 1]);
        let wizard_id = encounter.combatants()[0].id;
        let snag = encounter.combatants()[1].id;

        let err = encounter
            .submit_action(
                wizard_id,
                CombatAction::CastSpell {
                    spell: "Magic Missile".to_string(),
                    slot_level: Some(255),
                    targets: vec![snag],
                },
                &mut ScriptedDice::default(),
            )
            .unwrap_err();
        assert_eq!(err, CombatError::Spell(SpellError::InvalidSlotLevel(255)));
        assert!(!encounter.has_acted());
        let casting = encounter.combatants()[0].spellcasting.as_ref().unwrap();
        assert_eq!(casting.slots.available(1), 4);
    }

    #[test]
    fn test_no_slots_is_reported_and_turn_kept() {
        let mut character = create_sample_wizard("Ayla");
        if let Some(casting) = character.spellcasting.as_mut() {
            casting.slots = spells::SpellSlotPool::with_totals(&[0]);
        }
        let wizard = Combatant::from_character(&character);
        let mut encounter = started(vec![wizard, goblin("Snag")], &[18, 5]);
        let wizard_id = encounter.combatants()[0].id;
        let snag = encounter.combatants()[1].id;
        let mut dice = ScriptedDice::default();

        let err = encounter
            .submit_action(
                wizard_id,
                CombatAction::CastSpell {
                    spell: "Magic Missile".to_string(),
                    slot_level: None,
                    targets: vec![snag],
                },
                &mut dice,
            )
            .unwrap_err();
        assert_eq!(
            err,
            CombatError::Spell(SpellError::NoSlotsAvailable { level: 1 })
        );
        assert!(!encounter.has_acted());
        assert!(encounter
            .submit_action(wizard_id, CombatAction::Pass, &mut dice)
            .is_ok());
    }

    #[test]
    fn test_damage_breaks_concentration_and_lifts_hold_person() {
        let wizard = Combatant::from_character(&create_sample_wizard("Ayla"));
        let mut encounter = started(vec![wizard, goblin("Snag"), bandit("Rook")], &[15, 10, 5]);
        let wizard_id = encounter.combatants()[0].id;
        let goblin_id = encounter.combatants()[1].id;
        let bandit_id = encounter.combatants()[2].id;

        // Bandit Wisdom save: 5 + 0 vs DC 13 fails.
        let mut dice = ScriptedDice::new([5]);
        encounter
            .submit_action(
                wizard_id,
                CombatAction::CastSpell {
                    spell: "Hold Person".to_string(),
                    slot_level: None,
                    targets: vec![bandit_id],
                },
                &mut dice,
            )
            .unwrap();
        let bandit = encounter.combatant(bandit_id).unwrap();
        assert!(bandit.has_condition(Condition::Paralyzed));
        assert_eq!(
            encounter.combatant(wizard_id).unwrap().concentration.spell(),
            Some("Hold Person")
        );

        encounter.advance_turn(&mut dice).unwrap();
        // Goblin hits (15 + 4 vs AC 12) for 4 + 2; concentration save 3 + 2 vs DC 10 fails.
        let mut dice = ScriptedDice::new([15, 4, 3]);
        let resolution = encounter
            .submit_action(
                goblin_id,
                CombatAction::Attack {
                    target: wizard_id,
                    advantage: Advantage::Normal,
                },
                &mut dice,
            )
            .unwrap();
        assert!(dice.is_exhausted());
        assert!(resolution.effects.contains(&Effect::ConcentrationBroken {
            caster_id: wizard_id,
            spell: "Hold Person".to_string(),
        }));
        assert!(resolution.effects.contains(&Effect::ConditionRemoved {
            target_id: bandit_id,
            condition: Condition::Paralyzed,
        }));
        assert!(!encounter
            .combatant(bandit_id)
            .unwrap()
            .has_condition(Condition::Paralyzed));
    }

    #[test]
    fn test_bless_adds_to_attacks_until_concentration_breaks() {
        let cleric = Combatant::from_character(&create_sample_cleric("Tam"));
        let mut encounter = started(vec![cleric, hero("Roland", 10), goblin("Snag")], &[18, 15, 2]);
        let tam = encounter.combatants()[0].id;
        let roland = encounter.combatants()[1].id;
        let snag = encounter.combatants()[2].id;
        let mut dice = ScriptedDice::default();

        let resolution = encounter
            .submit_action(
                tam,
                CombatAction::CastSpell {
                    spell: "Bless".to_string(),
                    slot_level: None,
                    targets: vec![roland],
                },
                &mut dice,
            )
            .unwrap();
        assert!(resolution.effects.contains(&Effect::BoonGranted {
            target_id: roland,
            spell: "Bless".to_string(),
        }));
        encounter.advance_turn(&mut dice).unwrap();

        // Bless 3, then 8 + 4 + 3 = 15 hits AC 15; longsword 1 + 2.
        let mut dice = ScriptedDice::new([3, 8, 1]);
        let resolution = encounter
            .submit_action(
                roland,
                CombatAction::Attack {
                    target: snag,
                    advantage: Advantage::Normal,
                },
                &mut dice,
            )
            .unwrap();
        assert!(dice.is_exhausted());
        assert!(resolution.effects.contains(&Effect::AttackHit {
            attacker_id: roland,
            target_id: snag,
            total: 15,
            critical: false,
        }));
        assert_eq!(resolution.hp_delta(snag), -3);
        encounter.advance_turn(&mut dice).unwrap();

        // Snag hits Tam (15 + 4 vs AC 16) for 4 + 2; concentration 3 + 2 fails.
        let mut dice = ScriptedDice::new([15, 4, 3]);
        let resolution = encounter
            .submit_action(
                snag,
                CombatAction::Attack {
                    target: tam,
                    advantage: Advantage::Normal,
                },
                &mut dice,
            )
            .unwrap();
        assert!(resolution.effects.contains(&Effect::BoonEnded {
            target_id: roland,
            spell: "Bless".to_string(),
        }));
        let roland = encounter.combatant(roland).unwrap();
        assert!(roland.boons.is_empty());
        assert!(roland.roll_bonus_dice().is_empty());
    }

    #[test]
    fn test_shield_of_faith_raises_armor_class() {
        let cleric = Combatant::from_character(&create_sample_cleric("Tam"));
        let mut encounter = started(vec![cleric, goblin("Snag")], &[18, 2]);
        let tam = encounter.combatants()[0].id;
        let snag = encounter.combatants()[1].id;
        let mut dice = ScriptedDice::default();

        encounter
            .submit_action(
                tam,
                CombatAction::CastSpell {
                    spell: "Shield of Faith".to_string(),
                    slot_level: None,
                    targets: Vec::new(),
                },
                &mut dice,
            )
            .unwrap();
        let tam_now = encounter.combatant(tam).unwrap();
        assert_eq!(tam_now.armor_class, 16);
        assert_eq!(tam_now.effective_ac(), 18);
        encounter.advance_turn(&mut dice).unwrap();

        // 13 + 4 = 17 would hit AC 16.
        let resolution = encounter
            .submit_action(
                snag,
                CombatAction::Attack {
                    target: tam,
                    advantage: Advantage::Normal,
                },
                &mut ScriptedDice::new([13]),
            )
            .unwrap();
        assert!(resolution.effects.contains(&Effect::AttackMissed {
            attacker_id: snag,
            target_id: tam,
            total: 17,
        }));
        assert!(resolution.summary.contains("17 vs AC 18, miss."));
    }

    #[test]
    fn test_hunters_mark_adds_damage_against_the_quarry_only() {
        let ranger = hero("Vex", 10).with_spellcasting(Spellcasting::new(
            Ability::Wisdom,
            3,
            SpellSlotPool::with_totals(&[2]),
        ));
        let mut encounter = started(vec![ranger, bandit("Rook"), goblin("Snag")], &[15, 5, 2]);
        let vex = encounter.combatants()[0].id;
        let rook = encounter.combatants()[1].id;
        let snag = encounter.combatants()[2].id;
        let mut dice = ScriptedDice::default();

        let cast = |targets: Vec<CharacterId>| CombatAction::CastSpell {
            spell: "Hunter's Mark".to_string(),
            slot_level: None,
            targets,
        };
        assert_eq!(
            encounter.submit_action(vex, cast(Vec::new()), &mut dice),
            Err(CombatError::IllegalAction(IllegalAction::NoTargets))
        );
        encounter.submit_action(vex, cast(vec![rook]), &mut dice).unwrap();

        let marker = encounter.combatant(vex).unwrap();
        assert_eq!(marker.quarry_dice(rook).len(), 1);
        assert!(marker.quarry_dice(snag).is_empty());

        for _ in 0..3 {
            encounter.advance_turn(&mut dice).unwrap();
        }
        assert_eq!(encounter.current().unwrap().id, vex);

        // 10 + 4 hits AC 12; longsword 2 + 2, mark 5.
        let mut dice = ScriptedDice::new([10, 2, 5]);
        let resolution = encounter
            .submit_action(
                vex,
                CombatAction::Attack {
                    target: rook,
                    advantage: Advantage::Normal,
                },
                &mut dice,
            )
            .unwrap();
        assert!(dice.is_exhausted());
        assert_eq!(resolution.hp_delta(rook), -9);
        assert!(resolution.summary.contains("hit for 9 slashing damage."));
    }

    #[test]
    fn test_ongoing_damage_ticks_between_rounds() {
        let burning = goblin("Cinder")
            .with_current_hp(3)
            .with_ongoing_damage(OngoingDamage::new(
                "burning oil",
                DiceExpression::of(1, crate::dice::DieType::D6),
                rules::DamageType::Fire,
                2,
            ));
        let mut encounter = started(vec![hero("Roland", 10), burning], &[15, 5]);
        let mut dice = ScriptedDice::new([6]);
        encounter.advance_turn(&mut dice).unwrap();
        let resolution = encounter.advance_turn(&mut dice).unwrap();

        assert!(resolution.effects.contains(&Effect::RoundStarted { round: 2 }));
        assert!(encounter.is_resolved());
        assert_eq!(encounter.winner(), Some(Side::Party));
    }

    #[test]
    fn test_condition_duration_expires() {
        let prone = hero("Roland", 10)
            .with_condition(ActiveCondition::new(Condition::Prone, "trip").with_duration(1));
        let mut encounter = started(vec![prone, goblin("Snag")], &[15, 5]);
        let mut dice = ScriptedDice::default();
        encounter.advance_turn(&mut dice).unwrap();
        let resolution = encounter.advance_turn(&mut dice).unwrap();

        let hero_id = encounter.combatants()[0].id;
        assert!(resolution.effects.contains(&Effect::ConditionRemoved {
            target_id: hero_id,
            condition: Condition::Prone,
        }));
        assert!(encounter.combatants()[0].conditions.is_empty());
    }

    #[test]
    fn test_party_defeated_rule_ignores_fallen_foes() {
        let config = EncounterConfig::new().with_termination(PartyDefeated);
        let mut encounter = CombatEncounter::with_config(vec![hero("Roland", 10), goblin("Snag")], config);
        encounter.start(&mut ScriptedDice::new([15, 5])).unwrap();
        let hero_id = encounter.combatants()[0].id;
        let goblin_id = encounter.combatants()[1].id;

        let mut dice = ScriptedDice::new([20, 8, 8]);
        encounter
            .submit_action(
                hero_id,
                CombatAction::Attack {
                    target: goblin_id,
                    advantage: Advantage::Normal,
                },
                &mut dice,
            )
            .unwrap();
        assert!(!encounter.is_resolved());
    }

    #[test]
    fn test_into_combatants_returns_final_state() {
        let mut encounter = started(vec![hero("Roland", 10), goblin("Snag")], &[15, 5]);
        let hero_id = encounter.combatants()[0].id;
        let goblin_id = encounter.combatants()[1].id;
        encounter
            .submit_action(
                hero_id,
                CombatAction::Attack {
                    target: goblin_id,
                    advantage: Advantage::Normal,
                },
                &mut ScriptedDice::new([12, 3]),
            )
            .unwrap();

        let combatants = encounter.into_combatants();
        let goblin = combatants.iter().find(|c| c.id == goblin_id).unwrap();
        assert_eq!(goblin.hit_points.current, 2);
    }
}
