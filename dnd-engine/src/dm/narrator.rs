//! Narration backends.
//!
//! A [`Narrator`] turns an already-resolved [`Situation`] into prose. It is
//! never asked to decide anything mechanical.

use super::intent::IntentKind;
use crate::rules::Effect;
use async_trait::async_trait;
use claude::{Claude, Message, Request};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NarrationError {
    #[error("Narration backend unavailable: {0}")]
    Unavailable(String),

    #[error("Narration timed out")]
    Timeout,
}

impl From<claude::Error> for NarrationError {
    fn from(e: claude::Error) -> Self {
        match e {
            claude::Error::Timeout => NarrationError::Timeout,
            other => NarrationError::Unavailable(other.to_string()),
        }
    }
}

/// Everything a narrator needs to describe one player action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Situation {
    pub character: String,
    pub player_input: String,
    pub intent: IntentKind,
    /// Plain-text mechanical outcome.
    pub mechanics: String,
    pub effects: Vec<Effect>,
    pub npc_persona: Option<String>,
}

impl Situation {
    pub fn new(character: impl Into<String>, player_input: impl Into<String>, intent: IntentKind) -> Self {
        Self {
            character: character.into(),
            player_input: player_input.into(),
            intent,
            mechanics: String::new(),
            effects: Vec::new(),
            npc_persona: None,
        }
    }

    pub fn with_mechanics(mut self, mechanics: impl Into<String>) -> Self {
        self.mechanics = mechanics.into();
        self
    }

    pub fn with_effects(mut self, effects: Vec<Effect>) -> Self {
        self.effects = effects;
        self
    }

    pub fn with_npc_persona(mut self, persona: impl Into<String>) -> Self {
        self.npc_persona = Some(persona.into());
        self
    }
}

/// Generates prose for a resolved situation.
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, situation: &Situation) -> Result<String, NarrationError>;
}

/// Narration through the Claude Messages API.
#[derive(Debug, Clone)]
pub struct ClaudeNarrator {
    client: Claude,
    max_tokens: usize,
    temperature: f32,
}

impl ClaudeNarrator {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            max_tokens: 300,
            temperature: 0.8,
        }
    }

    /// Build from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, claude::Error> {
        Ok(Self::new(Claude::from_env()?))
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_request(&self, situation: &Situation) -> Request {
        let mut prompt = String::new();
        prompt.push_str(&format!("## Character\n{}\n", situation.character));
        prompt.push_str(&format!("\n## Player said\n{}\n", situation.player_input));
        prompt.push_str(&format!("\n## Action type\n{}\n", situation.intent));
        if !situation.mechanics.is_empty() {
            prompt.push_str(&format!("\n## Mechanical result\n{}\n", situation.mechanics));
        }
        if let Some(persona) = &situation.npc_persona {
            prompt.push_str(&format!("\n## NPC\n{persona}\n"));
        }

        Request::new(vec![Message::user(prompt)])
            .with_system(include_str!("prompts/narrator.txt"))
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
    }
}

#[async_trait]
impl Narrator for ClaudeNarrator {
    async fn narrate(&self, situation: &Situation) -> Result<String, NarrationError> {
        let response = self.client.complete(self.build_request(situation)).await?;
        debug!(
            output_tokens = response.usage.output_tokens,
            "narration received"
        );
        let text = response.text.trim();
        if text.is_empty() {
            return Err(NarrationError::Unavailable("empty narration".to_string()));
        }
        Ok(text.to_string())
    }
}
