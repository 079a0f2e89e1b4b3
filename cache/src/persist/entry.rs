use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The durable twin of a cache entry.
///
/// Times are wall-clock timestamps so they stay meaningful after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEntry {
  pub key: String,
  pub value: serde_json::Value,
  /// Descriptor used to pick the decoder on reload.
  pub value_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tags: Option<Vec<String>>,
  /// The deadline in effect when the record was written.
  pub expires_at: DateTime<Utc>,
  /// The hard ceiling, if the entry has one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub absolute_expiration: Option<DateTime<Utc>>,
  /// The sliding window in milliseconds, for sliding entries.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sliding_expiration: Option<u64>,
}

impl PersistedEntry {
  /// Returns `true` if the record is already dead at `now`.
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    self.expires_at <= now || self.absolute_expiration.is_some_and(|ceiling| ceiling <= now)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  #[test]
  fn uses_camel_case_field_names() {
    let now = Utc::now();
    let record = PersistedEntry {
      key: "k".into(),
      value: serde_json::json!([1, 2]),
      value_type: "alloc::vec::Vec<i64>".into(),
      tags: None,
      expires_at: now,
      absolute_expiration: Some(now),
      sliding_expiration: Some(1500),
    };
    let json = serde_json::to_value(&record).unwrap();
    assert!(json.get("valueType").is_some());
    assert!(json.get("expiresAt").is_some());
    assert!(json.get("absoluteExpiration").is_some());
    assert_eq!(json["slidingExpiration"], 1500);
    assert!(json.get("tags").is_none());
  }

  #[test]
  fn expiry_checks_both_deadlines() {
    let now = Utc::now();
    let mut record = PersistedEntry {
      key: "k".into(),
      value: serde_json::Value::Null,
      value_type: "unit".into(),
      tags: None,
      expires_at: now + Duration::seconds(10),
      absolute_expiration: None,
      sliding_expiration: None,
    };
    assert!(!record.is_expired_at(now));
    record.absolute_expiration = Some(now - Duration::seconds(1));
    assert!(record.is_expired_at(now));
  }
}
