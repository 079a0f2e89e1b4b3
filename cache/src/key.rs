use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// How keys, and tags, are compared for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyComparison {
  /// Byte-for-byte comparison.
  #[default]
  Ordinal,
  /// Comparison after Unicode lowercase folding.
  OrdinalIgnoreCase,
}

impl KeyComparison {
  /// Returns the form of `key` used for hashing and map lookups.
  #[inline]
  pub(crate) fn normalize<'a>(&self, key: &'a str) -> Cow<'a, str> {
    match self {
      KeyComparison::Ordinal => Cow::Borrowed(key),
      KeyComparison::OrdinalIgnoreCase => {
        if key.chars().any(|c| c.to_lowercase().ne(std::iter::once(c))) {
          Cow::Owned(key.to_lowercase())
        } else {
          Cow::Borrowed(key)
        }
      }
    }
  }

  /// Compares two strings under this mode.
  pub fn matches(&self, a: &str, b: &str) -> bool {
    match self {
      KeyComparison::Ordinal => a == b,
      KeyComparison::OrdinalIgnoreCase => a == b || self.normalize(a) == self.normalize(b),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ordinal_is_case_sensitive() {
    let cmp = KeyComparison::Ordinal;
    assert!(cmp.matches("key", "key"));
    assert!(!cmp.matches("Key", "key"));
    assert_eq!(cmp.normalize("Key"), "Key");
  }

  #[test]
  fn ignore_case_folds() {
    let cmp = KeyComparison::OrdinalIgnoreCase;
    assert!(cmp.matches("ÜBER", "über"));
    assert_eq!(cmp.normalize("User:42"), "user:42");
    assert!(matches!(cmp.normalize("already"), Cow::Borrowed(_)));
  }

  #[test]
  fn titlecase_folds_like_uppercase() {
    let cmp = KeyComparison::OrdinalIgnoreCase;
    // U+01C5 is titlecase, not uppercase, but still lowercases to U+01C6.
    assert!(cmp.matches("\u{01C5}", "\u{01C6}"));
    assert_eq!(cmp.normalize("\u{01C5}"), cmp.normalize("\u{01C6}"));
    assert_eq!(cmp.normalize("x\u{1F88}"), "x\u{1F80}");
  }
}
