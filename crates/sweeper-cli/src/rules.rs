//! Rules - コマンドラインから組み立てる削除条件
//!
//! - `--match /sender=fake_outbound_mms`: JSON pointer の値が一致する
//! - `--older-than-minutes 15 --timestamp /created_at`: タイムスタンプが 15 分以上前
//!
//! 条件はすべて AND。タイムスタンプは RFC 3339 文字列か epoch ミリ秒を受け付けます。

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use sweeper_core::domain::{Instruction, MessageChecker, Payload, PredicateError, RemovePredicate};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("expected POINTER=VALUE with a pointer starting with '/', got {0:?}")]
    InvalidMatch(String),

    #[error("age of {0} minutes is out of range")]
    AgeOutOfRange(i64),

    #[error("at least one of --match or --older-than-minutes is required")]
    Empty,
}

/// `pointer == expected` on the decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatch {
    pointer: String,
    expected: Value,
}

impl FieldMatch {
    /// Parse `POINTER=VALUE`. VALUE is read as JSON when it parses, else as a string.
    pub fn parse(raw: &str) -> Result<Self, RuleError> {
        let (pointer, value) = raw
            .split_once('=')
            .filter(|(pointer, _)| pointer.starts_with('/'))
            .ok_or_else(|| RuleError::InvalidMatch(raw.to_string()))?;
        let expected =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        Ok(Self {
            pointer: pointer.to_string(),
            expected,
        })
    }

    fn matches(&self, value: &Value) -> bool {
        value.pointer(&self.pointer) == Some(&self.expected)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgeRule {
    pointer: String,
    older_than: TimeDelta,
}

impl AgeRule {
    pub fn minutes(pointer: impl Into<String>, minutes: i64) -> Result<Self, RuleError> {
        let older_than = TimeDelta::try_minutes(minutes).ok_or(RuleError::AgeOutOfRange(minutes))?;
        Ok(Self {
            pointer: pointer.into(),
            older_than,
        })
    }

    /// Messages without the timestamp field are never old enough.
    fn matches(&self, value: &Value, now: DateTime<Utc>) -> Result<bool, PredicateError> {
        let stamped = match value.pointer(&self.pointer) {
            None | Some(Value::Null) => return Ok(false),
            Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| format!("timestamp {n} is out of range"))?,
            Some(other) => return Err(format!("timestamp {other} is not a string or number").into()),
        };
        Ok(now - stamped > self.older_than)
    }
}

/// All configured conditions, combined with AND.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRule {
    matches: Vec<FieldMatch>,
    age: Option<AgeRule>,
}

impl MessageRule {
    pub fn new(matches: Vec<FieldMatch>, age: Option<AgeRule>) -> Result<Self, RuleError> {
        if matches.is_empty() && age.is_none() {
            return Err(RuleError::Empty);
        }
        Ok(Self { matches, age })
    }

    pub fn evaluate(&self, payload: &Payload, now: DateTime<Utc>) -> Result<bool, PredicateError> {
        let value: Value = serde_json::from_slice(payload)?;
        if !self.matches.iter().all(|m| m.matches(&value)) {
            return Ok(false);
        }
        match &self.age {
            Some(age) => age.matches(&value, now),
            None => Ok(true),
        }
    }
}

impl RemovePredicate for MessageRule {
    fn should_remove(&self, payload: &Payload) -> Result<bool, PredicateError> {
        self.evaluate(payload, Utc::now())
    }
}

/// Removes matching messages and asks the loop to stop after `limit` removals.
#[derive(Debug)]
pub struct RemoveUpTo {
    rule: MessageRule,
    limit: u64,
    removed: AtomicU64,
}

impl RemoveUpTo {
    pub fn new(rule: MessageRule, limit: u64) -> Self {
        Self {
            rule,
            limit: limit.max(1),
            removed: AtomicU64::new(0),
        }
    }
}

impl MessageChecker for RemoveUpTo {
    fn check(&self, payload: &Payload) -> Result<Instruction, PredicateError> {
        if !self.rule.should_remove(payload)? {
            return Ok(Instruction::new(false, true));
        }
        let removed = self.removed.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Instruction::new(true, removed < self.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn bytes(value: Value) -> Vec<u8> {
        value.to_string().into_bytes()
    }

    #[rstest]
    #[case("/sender=fake_outbound_mms", "/sender", json!("fake_outbound_mms"))]
    #[case("/content/id=42", "/content/id", json!(42))]
    #[case("/flag=true", "/flag", json!(true))]
    #[case("/note=a=b", "/note", json!("a=b"))]
    fn parses_field_matches(#[case] raw: &str, #[case] pointer: &str, #[case] expected: Value) {
        let parsed = FieldMatch::parse(raw).unwrap();
        assert_eq!(parsed.pointer, pointer);
        assert_eq!(parsed.expected, expected);
    }

    #[rstest]
    #[case("sender=x")]
    #[case("/sender")]
    #[case("")]
    fn rejects_malformed_matches(#[case] raw: &str) {
        assert_eq!(
            FieldMatch::parse(raw),
            Err(RuleError::InvalidMatch(raw.to_string()))
        );
    }

    #[test]
    fn empty_rule_is_rejected() {
        assert_eq!(MessageRule::new(vec![], None), Err(RuleError::Empty));
    }

    #[rstest]
    #[case::old_and_matching(json!({"sender": "fake_outbound_mms", "created_at": "2024-05-01T11:30:00Z"}), true)]
    #[case::too_recent(json!({"sender": "fake_outbound_mms", "created_at": "2024-05-01T11:50:00Z"}), false)]
    #[case::other_sender(json!({"sender": "someone", "created_at": "2024-05-01T11:30:00Z"}), false)]
    #[case::epoch_millis(json!({"sender": "fake_outbound_mms", "created_at": 1_714_563_000_000_i64}), true)]
    #[case::no_timestamp(json!({"sender": "fake_outbound_mms"}), false)]
    fn combines_match_and_age(#[case] message: Value, #[case] expected: bool) {
        let rule = MessageRule::new(
            vec![FieldMatch::parse("/sender=fake_outbound_mms").unwrap()],
            Some(AgeRule::minutes("/created_at", 15).unwrap()),
        )
        .unwrap();
        assert_eq!(rule.evaluate(&bytes(message), now()).unwrap(), expected);
    }

    #[test]
    fn bad_timestamp_is_an_error() {
        let rule = MessageRule::new(vec![], Some(AgeRule::minutes("/created_at", 1).unwrap())).unwrap();
        let message = bytes(json!({"created_at": "yesterday"}));
        assert!(rule.evaluate(&message, now()).is_err());
    }

    #[test]
    fn non_json_payload_is_an_error() {
        let rule = MessageRule::new(vec![FieldMatch::parse("/a=1").unwrap()], None).unwrap();
        assert!(rule.should_remove(b"not json").is_err());
    }

    #[test]
    fn remove_up_to_stops_on_the_last_allowed_removal() {
        let rule = MessageRule::new(vec![FieldMatch::parse("/kind=junk").unwrap()], None).unwrap();
        let checker = RemoveUpTo::new(rule, 2);

        let junk = bytes(json!({"kind": "junk"}));
        let keep = bytes(json!({"kind": "keep"}));

        assert_eq!(checker.check(&keep).unwrap(), Instruction::new(false, true));
        assert_eq!(checker.check(&junk).unwrap(), Instruction::new(true, true));
        assert_eq!(checker.check(&keep).unwrap(), Instruction::new(false, true));
        assert_eq!(checker.check(&junk).unwrap(), Instruction::new(true, false));
    }
}
