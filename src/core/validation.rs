//! Input validation primitives.
//!
//! Small helpers shared by the config and pipeline lookup code so every
//! failure surfaces as a typed `Error` rather than an ad-hoc message.

use crate::error::{Error, Result};

/// Collect the names of required fields whose value is absent or blank.
///
/// Returns every missing field at once so the caller can report them
/// together instead of failing on the first.
pub fn missing_fields(fields: &[(&str, Option<&str>)]) -> Vec<String> {
    fields
        .iter()
        .filter(|(_, value)| value.map(|v| v.trim().is_empty()).unwrap_or(true))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, field: &str, message: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation_invalid_argument(field, message, None, None))
    } else {
        Ok(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_reports_none_and_blank() {
        let missing = missing_fields(&[
            ("a", Some("x")),
            ("b", None),
            ("c", Some("   ")),
        ]);
        assert_eq!(missing, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn missing_fields_empty_when_all_present() {
        assert!(missing_fields(&[("a", Some("x")), ("b", Some("y"))]).is_empty());
    }

    #[test]
    fn require_non_empty_trims_whitespace() {
        let result = require_non_empty("  hello  ", "field", "msg");
        assert_eq!(result.unwrap(), "hello");
    }

    #[test]
    fn require_non_empty_fails_for_whitespace_only() {
        let result = require_non_empty("   ", "field", "Cannot be empty");
        assert!(result.is_err());
    }
}
