//! Word-guessing game, one independent game per session.
//!
//! Feedback per letter: 3 = right letter, right place; 2 = right letter,
//! wrong place; 1 = not in the word. Repeated guess letters only earn 2s
//! while unmatched copies remain in the secret.

use std::collections::HashMap;

use collab_protocol::CoreError;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;

use crate::{Args, InvocationContext, Outcome, ParamSpec, Scope, Service, ServiceDescriptor};

const WORDS: &[&str] = &[
    "cat", "dog", "sun", "map", "red", "toy", "fox", "jam",
    "fish", "bird", "tree", "rain", "snow", "milk", "door", "ship",
    "apple", "crack", "house", "plant", "stone", "water", "cloud", "bread",
    "smile", "tiger", "piano", "grape",
    "orange", "silver", "garden", "pencil", "rocket", "castle",
    "picture", "morning", "teacher", "kitchen", "penguin",
    "elephant", "mountain", "sandwich", "computer", "treasure",
];

enum GameState {
    Idle,
    Playing { word: String },
    Finished { won: bool },
}

/// Session-scoped guessing game. State is never shared across sessions; the
/// broker creates one instance per session and drops it on close.
pub struct WordGuess {
    descriptor: ServiceDescriptor,
    words: Vec<&'static str>,
    state: Mutex<GameState>,
}

impl WordGuess {
    pub fn new() -> Self {
        Self::with_words(WORDS.to_vec())
    }

    fn with_words(words: Vec<&'static str>) -> Self {
        Self {
            descriptor: ServiceDescriptor::new("word-guess", Scope::PerSession)
                .action("start", vec![ParamSpec::required("length")])
                .action("guess", vec![ParamSpec::required("word")])
                .action("giveUp", vec![]),
            words,
            state: Mutex::new(GameState::Idle),
        }
    }

    fn start(&self, length: i64) -> Result<Outcome, CoreError> {
        let candidates: Vec<_> = self
            .words
            .iter()
            .filter(|w| w.len() as i64 == length)
            .collect();
        if candidates.is_empty() {
            return Err(CoreError::bad_request(format!(
                "No words of length {length} available"
            )));
        }
        let pick = candidates[rand::rng().random_range(0..candidates.len())];
        *self.state.lock() = GameState::Playing { word: pick.to_string() };
        Ok(Outcome::Value(json!(null)))
    }

    fn guess(&self, guess: &str) -> Result<Outcome, CoreError> {
        let mut state = self.state.lock();
        let word = running_word(&state)?;
        if guess.len() != word.len() {
            return Err(CoreError::bad_request(format!(
                "Guess must have length {}",
                word.len()
            )));
        }
        if !guess.chars().all(|c| c.is_ascii_lowercase()) {
            return Err(CoreError::bad_request("Invalid guess"));
        }

        let marks = feedback(word, guess);
        if marks.iter().all(|&m| m == 3) {
            *state = GameState::Finished { won: true };
        }
        Ok(Outcome::Value(json!(marks)))
    }

    fn give_up(&self) -> Result<Outcome, CoreError> {
        let mut state = self.state.lock();
        let word = running_word(&state)?.to_string();
        *state = GameState::Finished { won: false };
        Ok(Outcome::Value(json!(word)))
    }
}

impl Default for WordGuess {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for WordGuess {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        action: &str,
        args: &Args,
    ) -> Result<Outcome, CoreError> {
        match action {
            "start" => self.start(args.i64_arg("length")?),
            "guess" => self.guess(args.str_arg("word")?),
            "giveUp" => self.give_up(),
            _ => Err(CoreError::unknown_action("word-guess", action)),
        }
    }
}

/// The running game's secret, or the reason there is nothing to guess at.
fn running_word(state: &GameState) -> Result<&str, CoreError> {
    match state {
        GameState::Playing { word } => Ok(word),
        GameState::Finished { won: true } => Err(CoreError::bad_request("Game already won")),
        GameState::Finished { won: false } => Err(CoreError::bad_request("Game over")),
        GameState::Idle => Err(CoreError::bad_request("Game not started")),
    }
}

/// Per-letter marks for `guess` against `secret`, duplicate-aware: exact
/// matches claim their letters first, then leftover copies earn 2s from
/// left to right.
fn feedback(secret: &str, guess: &str) -> Vec<u8> {
    let secret: Vec<char> = secret.chars().collect();
    let guess: Vec<char> = guess.chars().collect();
    let mut marks = vec![1u8; guess.len()];
    let mut remaining: HashMap<char, usize> = HashMap::new();

    for (i, (s, g)) in secret.iter().zip(&guess).enumerate() {
        if s == g {
            marks[i] = 3;
        } else {
            *remaining.entry(*s).or_insert(0) += 1;
        }
    }
    for (i, g) in guess.iter().enumerate() {
        if marks[i] == 3 {
            continue;
        }
        if let Some(count) = remaining.get_mut(g) {
            if *count > 0 {
                *count -= 1;
                marks[i] = 2;
            }
        }
    }
    marks
}
