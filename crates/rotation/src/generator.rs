//! Password generation
//!
//! The policy knobs mirror a secret store's random-password API so an
//! existing rotation configuration carries over unchanged.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NUMBERS: &str = "0123456789";
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Upper bound on generated length
pub const MAX_PASSWORD_LENGTH: usize = 4096;

/// Character policy for generated passwords
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    /// Number of characters
    pub length: usize,
    /// Characters never used
    pub exclude_characters: String,
    /// Drop a-z
    pub exclude_lowercase: bool,
    /// Drop A-Z
    pub exclude_uppercase: bool,
    /// Drop 0-9
    pub exclude_numbers: bool,
    /// Drop ASCII punctuation
    pub exclude_punctuation: bool,
    /// Allow the space character
    pub include_space: bool,
    /// At least one character from every included class
    pub require_each_included_type: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: 32,
            // Characters that break connection strings and shell quoting
            exclude_characters: "/@\"'\\".to_string(),
            exclude_lowercase: false,
            exclude_uppercase: false,
            exclude_numbers: false,
            exclude_punctuation: false,
            include_space: false,
            require_each_included_type: true,
        }
    }
}

impl PasswordPolicy {
    /// Character classes left after exclusions, empty classes dropped
    fn classes(&self) -> Vec<Vec<char>> {
        let mut classes: Vec<&str> = Vec::new();
        if !self.exclude_lowercase {
            classes.push(LOWERCASE);
        }
        if !self.exclude_uppercase {
            classes.push(UPPERCASE);
        }
        if !self.exclude_numbers {
            classes.push(NUMBERS);
        }
        if !self.exclude_punctuation {
            classes.push(PUNCTUATION);
        }
        if self.include_space {
            classes.push(" ");
        }

        classes
            .into_iter()
            .map(|class| {
                class
                    .chars()
                    .filter(|c| !self.exclude_characters.contains(*c))
                    .collect::<Vec<_>>()
            })
            .filter(|class| !class.is_empty())
            .collect()
    }

    /// Check the policy can produce a password
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.length == 0 || self.length > MAX_PASSWORD_LENGTH {
            return Err(ConfigError::InvalidValue {
                field: "password.length".into(),
                reason: format!("must be between 1 and {MAX_PASSWORD_LENGTH}, got {}", self.length),
            });
        }

        let classes = self.classes();
        if classes.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "password".into(),
                reason: "exclusions leave no usable characters".into(),
            });
        }

        if self.require_each_included_type && self.length < classes.len() {
            return Err(ConfigError::InvalidValue {
                field: "password.length".into(),
                reason: format!(
                    "must be at least {} to include every character class",
                    classes.len()
                ),
            });
        }

        Ok(())
    }

    /// Generate a password from the thread-local CSPRNG
    pub fn generate(&self) -> Result<String, ConfigError> {
        self.validate()?;

        let classes = self.classes();
        let all: Vec<char> = classes.iter().flatten().copied().collect();
        let mut rng = rand::rng();

        let mut chars: Vec<char> = Vec::with_capacity(self.length);
        if self.require_each_included_type {
            for class in &classes {
                chars.push(class[rng.random_range(0..class.len())]);
            }
        }
        while chars.len() < self.length {
            chars.push(all[rng.random_range(0..all.len())]);
        }
        chars.shuffle(&mut rng);

        Ok(chars.into_iter().collect())
    }
}
