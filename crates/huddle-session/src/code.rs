//! Join-code generation.

use huddle_core::{LobbyError, Result, SessionCode};
use rand::Rng;

/// Characters a join code is drawn from.
pub const ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Code length used when none is configured.
pub const DEFAULT_CODE_LENGTH: usize = 5;

/// Produces uniformly random join codes.
///
/// Pure: no I/O and no shared state. Each call draws from the thread-local
/// RNG, so a generator can be shared freely between tasks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeGenerator {
    alphabet: Vec<char>,
    length: usize,
}

impl CodeGenerator {
    /// Generator over [`ALPHABET`]. A zero length is raised to one.
    pub fn new(length: usize) -> Self {
        Self {
            alphabet: ALPHABET.chars().collect(),
            length: length.max(1),
        }
    }

    /// Replace the alphabet. Duplicate characters are kept and skew the
    /// distribution accordingly.
    pub fn with_alphabet(mut self, alphabet: &str) -> Result<Self> {
        if alphabet.is_empty() {
            return Err(LobbyError::validation("code alphabet cannot be empty"));
        }
        self.alphabet = alphabet.chars().collect();
        Ok(self)
    }

    /// Configured code length.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Number of distinct codes, saturating at `u64::MAX`.
    pub fn code_space(&self) -> u64 {
        let base = u64::try_from(self.alphabet.len()).unwrap_or(u64::MAX);
        let exp = u32::try_from(self.length).unwrap_or(u32::MAX);
        base.saturating_pow(exp)
    }

    /// Draw one candidate code.
    pub fn generate(&self) -> SessionCode {
        let mut rng = rand::rng();
        let code: String = (0..self.length)
            .map(|_| self.alphabet[rng.random_range(0..self.alphabet.len())])
            .collect();
        SessionCode::from(code)
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn default_length_is_five() {
        let code = CodeGenerator::default().generate();
        assert_eq!(code.chars().count(), 5);
    }

    #[test]
    fn zero_length_raised_to_one() {
        assert_eq!(CodeGenerator::new(0).length(), 1);
    }

    #[test]
    fn code_space() {
        assert_eq!(CodeGenerator::new(5).code_space(), 36u64.pow(5));
        assert_eq!(
            CodeGenerator::new(2).with_alphabet("AB").unwrap().code_space(),
            4
        );
        assert_eq!(CodeGenerator::new(100).code_space(), u64::MAX);
    }

    #[test]
    fn empty_alphabet_rejected() {
        assert!(CodeGenerator::new(5).with_alphabet("").is_err());
    }

    #[test]
    fn custom_alphabet_is_honored() {
        let generator = CodeGenerator::new(3).with_alphabet("X").unwrap();
        for _ in 0..10 {
            assert_eq!(generator.generate().as_str(), "XXX");
        }
    }

    #[test]
    fn small_space_is_covered() {
        let generator = CodeGenerator::new(1).with_alphabet("AB").unwrap();
        let seen: HashSet<_> = (0..200).map(|_| generator.generate().into_inner()).collect();
        assert_eq!(seen.len(), 2);
    }

    proptest! {
        #[test]
        fn codes_use_alphabet_and_length(length in 1usize..16) {
            let code = CodeGenerator::new(length).generate();
            prop_assert_eq!(code.chars().count(), length);
            prop_assert!(code.chars().all(|c| ALPHABET.contains(c)));
        }
    }
}
