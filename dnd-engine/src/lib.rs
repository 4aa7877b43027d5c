//! D&D 5e session engine with a fault-tolerant AI Dungeon Master.
//!
//! This crate provides:
//! - Dice notation parsing and evaluation with injectable randomness
//! - Ability checks, attacks, damage and armor class
//! - Spell slots, a spell catalog and concentration
//! - A turn-based combat state machine
//! - NPC relationships, memory and behavior rolls
//! - A Dungeon Master that narrates through Claude and keeps running on
//!   templated prose when Claude is unavailable
//!
//! # Quick Start
//!
//! ```ignore
//! use dnd_engine::combat::goblin;
//! use dnd_engine::dm::DungeonMaster;
//! use dnd_engine::npc::NpcDirectory;
//! use dnd_engine::testing::create_sample_fighter;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut dm = DungeonMaster::from_env(Arc::new(NpcDirectory::new()))?;
//!     let roland = dm.add_character(create_sample_fighter("Roland"));
//!
//!     dm.start_encounter(vec![goblin("Snag")])?;
//!     let response = dm.process_input(roland, "I attack Snag").await?;
//!     println!("{}", response.narrative);
//!     Ok(())
//! }
//! ```

pub mod combat;
pub mod dice;
pub mod dm;
pub mod npc;
pub mod rules;
pub mod spells;
pub mod testing;
pub mod world;

// Primary public API
pub use dice::{roll, Advantage, DiceError, DiceExpression, DieSource, RollResult};
pub use dm::{DmConfig, DmError, DmResponse, DungeonMaster};
pub use rules::{Effect, Resolution};
pub use world::{Character, CharacterId};
