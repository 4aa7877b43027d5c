//! AI Dungeon Master module.
//!
//! Routes player input to the rules core and wraps the result in prose,
//! falling back to templates when the narration backend is down.

mod agent;
pub mod breaker;
pub mod intent;
pub mod narrator;
pub mod templates;

pub use agent::{DmConfig, DmError, DmResponse, DungeonMaster};
pub use breaker::{BreakerState, CircuitBreaker, SessionMode};
pub use intent::{classify, CheckKind, IntentContext, IntentKind, PlayerIntent};
pub use narrator::{ClaudeNarrator, NarrationError, Narrator, Situation};
