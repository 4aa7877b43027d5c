//! Dice notation evaluator.
//!
//! Supports single-term notation `XdY+Z` over the standard D&D die set.
//! Every roll draws from an injected [`DieSource`], so the same source state
//! always reproduces the same [`RollResult`].

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound on dice in a single expression.
const MAX_DICE: u32 = 1000;

/// Upper bound on the flat modifier, either sign.
const MAX_MODIFIER: i32 = 10_000;

/// Error type for dice parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("Invalid dice notation '{notation}': {reason}")]
    InvalidNotation {
        notation: String,
        reason: &'static str,
    },
}

/// Source of die faces.
///
/// Implemented for every [`rand::RngCore`], so a seeded `StdRng` gives
/// reproducible rolls. Tests can script exact faces with
/// [`crate::testing::ScriptedDice`].
pub trait DieSource {
    /// Roll one die, returning a value in `1..=sides`.
    fn roll_die(&mut self, sides: u32) -> u32;
}

impl<R: RngCore> DieSource for R {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.gen_range(1..=sides)
    }
}

/// Whether a d20 is rolled once, or twice keeping the higher or lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl Advantage {
    /// Stack two sources. Advantage and disadvantage cancel out.
    pub fn combine(self, other: Advantage) -> Advantage {
        match (self, other) {
            (Advantage::Normal, x) | (x, Advantage::Normal) => x,
            (a, b) if a == b => a,
            _ => Advantage::Normal,
        }
    }
}

/// The die sizes dice notation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DieType {
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
    D100,
}

const DIE_SIDES: [(DieType, u32); 7] = [
    (DieType::D4, 4),
    (DieType::D6, 6),
    (DieType::D8, 8),
    (DieType::D10, 10),
    (DieType::D12, 12),
    (DieType::D20, 20),
    (DieType::D100, 100),
];

impl DieType {
    pub fn sides(self) -> u32 {
        DIE_SIDES[self as usize].1
    }

    pub fn from_sides(sides: u32) -> Option<DieType> {
        DIE_SIDES
            .iter()
            .find(|(_, n)| *n == sides)
            .map(|(die, _)| *die)
    }
}

impl fmt::Display for DieType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.sides())
    }
}

/// A parsed dice expression such as `2d6+3`.
///
/// Fields are private: an expression never changes after it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceExpression {
    count: u32,
    die_type: DieType,
    modifier: i32,
}

impl DiceExpression {
    /// Build an expression from parts. `count` must be at least 1.
    pub fn new(count: u32, die_type: DieType, modifier: i32) -> Result<Self, DiceError> {
        if count == 0 || count > MAX_DICE {
            return Err(DiceError::InvalidNotation {
                notation: format!("{count}{die_type}"),
                reason: "dice count must be between 1 and 1000",
            });
        }
        if modifier.unsigned_abs() > MAX_MODIFIER.unsigned_abs() {
            return Err(DiceError::InvalidNotation {
                notation: format!("{count}{die_type}{modifier:+}"),
                reason: "modifier out of range",
            });
        }
        Ok(Self {
            count,
            die_type,
            modifier,
        })
    }

    /// `count` dice of one type with no modifier. Panics on a zero count.
    pub fn of(count: u32, die_type: DieType) -> Self {
        assert!(
            (1..=MAX_DICE).contains(&count),
            "dice count {count} out of range"
        );
        Self {
            count,
            die_type,
            modifier: 0,
        }
    }

    /// A single d20 plus a modifier.
    pub fn d20(modifier: i32) -> Self {
        Self {
            count: 1,
            die_type: DieType::D20,
            modifier,
        }
    }

    /// Parse `<count>d<sides>[+|-<modifier>]`.
    ///
    /// Whitespace and case are ignored; a missing count means one die.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let invalid = |reason: &'static str| DiceError::InvalidNotation {
            notation: notation.trim().to_string(),
            reason,
        };

        let compact: String = notation
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        if compact.is_empty() {
            return Err(invalid("empty expression"));
        }

        let d_pos = compact.find('d').ok_or_else(|| invalid("missing 'd'"))?;
        let count_str = &compact[..d_pos];
        let count: u32 = if count_str.is_empty() {
            1
        } else {
            parse_digits(count_str).ok_or_else(|| invalid("dice count is not a number"))?
        };
        if count == 0 {
            return Err(invalid("dice count must be at least 1"));
        }
        if count > MAX_DICE {
            return Err(invalid("too many dice"));
        }

        let rest = &compact[d_pos + 1..];
        let (sides_str, modifier_str) = match rest.find(|c: char| c == '+' || c == '-') {
            Some(pos) => (&rest[..pos], Some(&rest[pos..])),
            None => (rest, None),
        };

        let sides: u32 =
            parse_digits(sides_str).ok_or_else(|| invalid("die size is not a number"))?;
        let die_type =
            DieType::from_sides(sides).ok_or_else(|| invalid("unsupported die size"))?;

        let modifier = match modifier_str {
            None => 0,
            Some(m) => {
                let value: i32 =
                    parse_digits(&m[1..]).ok_or_else(|| invalid("modifier is not a number"))?;
                if value > MAX_MODIFIER {
                    return Err(invalid("modifier out of range"));
                }
                if m.starts_with('-') {
                    -value
                } else {
                    value
                }
            }
        };

        Ok(Self {
            count,
            die_type,
            modifier,
        })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn die_type(&self) -> DieType {
        self.die_type
    }

    pub fn modifier(&self) -> i32 {
        self.modifier
    }

    /// The same expression with twice as many dice (critical hits).
    pub fn doubled(&self) -> Self {
        Self {
            count: self.count * 2,
            ..self.clone()
        }
    }

    /// The same dice with a different flat modifier.
    pub fn with_modifier(&self, modifier: i32) -> Self {
        Self {
            modifier,
            ..self.clone()
        }
    }

    pub fn min(&self) -> i32 {
        (self.count as i32).saturating_add(self.modifier)
    }

    pub fn max(&self) -> i32 {
        ((self.count * self.die_type.sides()) as i32).saturating_add(self.modifier)
    }

    pub fn is_single_d20(&self) -> bool {
        self.count == 1 && self.die_type == DieType::D20
    }

    /// Roll every die once and add the modifier.
    pub fn evaluate<D: DieSource + ?Sized>(&self, dice: &mut D) -> RollResult {
        let rolls: Vec<u32> = (0..self.count)
            .map(|_| draw(dice, self.die_type))
            .collect();
        RollResult::from_rolls(self.clone(), rolls.clone(), rolls)
    }

    /// Roll with advantage/disadvantage. Only single-d20 expressions roll
    /// twice; anything else evaluates normally.
    pub fn evaluate_with_advantage<D: DieSource + ?Sized>(
        &self,
        advantage: Advantage,
        dice: &mut D,
    ) -> RollResult {
        if advantage == Advantage::Normal || !self.is_single_d20() {
            return self.evaluate(dice);
        }

        let first = draw(dice, DieType::D20);
        let second = draw(dice, DieType::D20);
        let chosen = match advantage {
            Advantage::Advantage => first.max(second),
            _ => first.min(second),
        };

        RollResult::from_rolls(self.clone(), vec![first, second], vec![chosen])
    }
}

fn parse_digits<T: FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn draw<D: DieSource + ?Sized>(dice: &mut D, die_type: DieType) -> u32 {
    let value = dice.roll_die(die_type.sides());
    assert!(
        (1..=die_type.sides()).contains(&value),
        "die source produced {value} for a {die_type}"
    );
    value
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.die_type)?;
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{m}"),
            m => write!(f, "{m}"),
        }
    }
}

/// Complete, immutable result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    pub expression: DiceExpression,
    /// Every die that was rolled, in order.
    pub rolls: Vec<u32>,
    /// Dice that count toward the total (differs from `rolls` only with
    /// advantage or disadvantage).
    pub kept: Vec<u32>,
    pub modifier: i32,
    pub total: i32,
    pub natural_20: bool,
    pub natural_1: bool,
}

impl RollResult {
    fn from_rolls(expression: DiceExpression, rolls: Vec<u32>, kept: Vec<u32>) -> Self {
        let dice_total: i32 = kept.iter().map(|&r| r as i32).sum();
        let modifier = expression.modifier;
        let natural = if expression.is_single_d20() {
            kept.first().copied()
        } else {
            None
        };

        Self {
            expression,
            rolls,
            kept,
            modifier,
            total: dice_total.saturating_add(modifier),
            natural_20: natural == Some(20),
            natural_1: natural == Some(1),
        }
    }

    /// The kept face of a single-d20 roll.
    pub fn natural(&self) -> Option<u32> {
        if self.expression.is_single_d20() {
            self.kept.first().copied()
        } else {
            None
        }
    }

    /// Sum of the kept dice, without the modifier.
    pub fn dice_total(&self) -> i32 {
        self.kept.iter().map(|&r| r as i32).sum()
    }

    /// Format the individual dice for display. Dropped dice are shown in
    /// parentheses.
    pub fn dice_display(&self) -> String {
        let faces = if self.rolls.len() > self.kept.len() {
            let mut kept_used = vec![false; self.kept.len()];
            self.rolls
                .iter()
                .map(|&roll| {
                    let slot = self
                        .kept
                        .iter()
                        .enumerate()
                        .position(|(i, &k)| k == roll && !kept_used[i]);
                    match slot {
                        Some(i) => {
                            kept_used[i] = true;
                            roll.to_string()
                        }
                        None => format!("({roll})"),
                    }
                })
                .collect::<Vec<_>>()
        } else {
            self.rolls.iter().map(|r| r.to_string()).collect()
        };

        let dice_str = format!("[{}]", faces.join(", "));
        match self.modifier {
            0 => dice_str,
            m if m > 0 => format!("{dice_str} + {m}"),
            m => format!("{dice_str} - {}", m.unsigned_abs()),
        }
    }

    pub fn meets_dc(&self, dc: i32) -> bool {
        self.total >= dc
    }
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.dice_display(), self.total)
    }
}

/// Parse and evaluate in one step.
pub fn roll<D: DieSource + ?Sized>(notation: &str, dice: &mut D) -> Result<RollResult, DiceError> {
    Ok(DiceExpression::parse(notation)?.evaluate(dice))
}
