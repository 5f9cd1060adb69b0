//! Player display-name rules.

use crate::errors::{LobbyError, Result};

/// Maximum player name length in Unicode code points, after trimming.
pub const MAX_NAME_CHARS: usize = 20;

/// Trim surrounding whitespace and enforce the 1..=20 code point rule.
///
/// The returned string is the canonical form used for both storage and the
/// duplicate-name check.
pub fn normalize_player_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(LobbyError::validation("Name cannot be empty"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(LobbyError::validation(format!(
            "Name too long, only {MAX_NAME_CHARS} characters allowed"
        )));
    }
    Ok(name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn trims_whitespace() {
        assert_eq!(normalize_player_name("  Alice \t").unwrap(), "Alice");
    }

    #[test]
    fn empty_rejected() {
        let err = normalize_player_name("").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn whitespace_only_rejected() {
        let err = normalize_player_name("   \n ").unwrap_err();
        assert_eq!(err.to_string(), "Name cannot be empty");
    }

    #[test]
    fn twenty_chars_with_padding_accepted() {
        let raw = format!("   {}   ", "x".repeat(20));
        assert_eq!(normalize_player_name(&raw).unwrap().chars().count(), 20);
    }

    #[test]
    fn twenty_one_chars_rejected() {
        let err = normalize_player_name(&"x".repeat(21)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn counts_code_points_not_bytes() {
        // 20 multi-byte code points, 60+ bytes
        let name = "ß日本🎲".repeat(5);
        assert_eq!(name.chars().count(), 20);
        assert!(normalize_player_name(&name).is_ok());
    }

    #[test]
    fn inner_whitespace_kept() {
        assert_eq!(normalize_player_name(" Mary Ann ").unwrap(), "Mary Ann");
    }

    proptest! {
        #[test]
        fn accepted_names_are_trimmed_and_bounded(raw in "\\PC{0,30}") {
            if let Ok(name) = normalize_player_name(&raw) {
                prop_assert_eq!(name.trim(), name.as_str());
                prop_assert!(!name.is_empty());
                prop_assert!(name.chars().count() <= MAX_NAME_CHARS);
            }
        }

        #[test]
        fn padding_never_changes_outcome(core in "[a-zA-Z0-9]{1,25}", pad in 0usize..4) {
            let padded = format!("{}{core}{}", " ".repeat(pad), " ".repeat(pad));
            prop_assert_eq!(
                normalize_player_name(&core).is_ok(),
                normalize_player_name(&padded).is_ok()
            );
        }
    }
}
