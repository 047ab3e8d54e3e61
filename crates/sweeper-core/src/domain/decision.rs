//! Decision model: what the caller wants done with each delivery.
//!
//! The loop never inspects payloads itself. It asks caller-supplied capabilities:
//! - [`RemovePredicate`]: "should this message be removed?" (cycle-detect strategy)
//! - [`CycleKeyExtractor`]: "which value identifies this message?" (cycle-detect strategy)
//! - [`MessageChecker`]: "remove it? keep going?" (instructed strategy)
//!
//! Any closure with the right shape can be used through [`remove_when`],
//! [`key_from`] and [`check_with`].

use serde::{Deserialize, Serialize};

use super::delivery::Payload;
use super::errors::PredicateError;

/// Structured decision returned by a [`MessageChecker`].
///
/// `remove=true` always acks and `remove=false` always requeues.
/// `proceed=false` ends the loop after this delivery is disposed, whatever `remove` says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub remove: bool,
    #[serde(rename = "continue")]
    pub proceed: bool,
}

impl Instruction {
    pub fn new(remove: bool, proceed: bool) -> Self {
        Self { remove, proceed }
    }
}

/// Value identifying the logical message a delivery carries.
///
/// A requeued message must yield an identical key every time it is redelivered.
/// Keys that never compare equal (random ids, timestamps of receipt, ...) mean the
/// cycle is never detected; that is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleKey(serde_json::Value);

impl CycleKey {
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        Self(value.into())
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for CycleKey {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl From<&str> for CycleKey {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for CycleKey {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl From<u64> for CycleKey {
    fn from(value: u64) -> Self {
        Self(value.into())
    }
}

/// Decides whether a message should be permanently removed.
pub trait RemovePredicate: Send + Sync {
    fn should_remove(&self, payload: &Payload) -> Result<bool, PredicateError>;
}

/// Derives the [`CycleKey`] of a message.
pub trait CycleKeyExtractor: Send + Sync {
    fn cycle_key(&self, payload: &Payload) -> Result<CycleKey, PredicateError>;
}

/// Decides removal and continuation in one step.
pub trait MessageChecker: Send + Sync {
    fn check(&self, payload: &Payload) -> Result<Instruction, PredicateError>;
}

pub struct FnPredicate<F>(F);

impl<F> RemovePredicate for FnPredicate<F>
where
    F: Fn(&Payload) -> Result<bool, PredicateError> + Send + Sync,
{
    fn should_remove(&self, payload: &Payload) -> Result<bool, PredicateError> {
        (self.0)(payload)
    }
}

pub struct FnKeyExtractor<F>(F);

impl<F> CycleKeyExtractor for FnKeyExtractor<F>
where
    F: Fn(&Payload) -> Result<CycleKey, PredicateError> + Send + Sync,
{
    fn cycle_key(&self, payload: &Payload) -> Result<CycleKey, PredicateError> {
        (self.0)(payload)
    }
}

pub struct FnChecker<F>(F);

impl<F> MessageChecker for FnChecker<F>
where
    F: Fn(&Payload) -> Result<Instruction, PredicateError> + Send + Sync,
{
    fn check(&self, payload: &Payload) -> Result<Instruction, PredicateError> {
        (self.0)(payload)
    }
}

/// Wrap a closure as a [`RemovePredicate`].
pub fn remove_when<F>(f: F) -> FnPredicate<F>
where
    F: Fn(&Payload) -> Result<bool, PredicateError> + Send + Sync,
{
    FnPredicate(f)
}

/// Wrap a closure as a [`CycleKeyExtractor`].
pub fn key_from<F>(f: F) -> FnKeyExtractor<F>
where
    F: Fn(&Payload) -> Result<CycleKey, PredicateError> + Send + Sync,
{
    FnKeyExtractor(f)
}

/// Wrap a closure as a [`MessageChecker`].
pub fn check_with<F>(f: F) -> FnChecker<F>
where
    F: Fn(&Payload) -> Result<Instruction, PredicateError> + Send + Sync,
{
    FnChecker(f)
}

/// Extracts the cycle key from a JSON payload with a JSON pointer (e.g. `/id`).
#[derive(Debug, Clone)]
pub struct JsonPointerKey {
    pointer: String,
}

impl JsonPointerKey {
    pub fn new(pointer: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
        }
    }
}

impl CycleKeyExtractor for JsonPointerKey {
    fn cycle_key(&self, payload: &Payload) -> Result<CycleKey, PredicateError> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        value
            .pointer(&self.pointer)
            .cloned()
            .map(CycleKey)
            .ok_or_else(|| format!("cycle key {} not found in payload", self.pointer).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_uses_continue_on_the_wire() {
        let parsed: Instruction =
            serde_json::from_str(r#"{"remove":true,"continue":false}"#).unwrap();
        assert_eq!(parsed, Instruction::new(true, false));
    }

    #[test]
    fn closures_adapt_to_capabilities() {
        let predicate = remove_when(|payload| Ok(payload == b"drop"));
        assert!(predicate.should_remove(b"drop").unwrap());
        assert!(!predicate.should_remove(b"keep").unwrap());

        let checker = check_with(|_| Ok(Instruction::new(false, true)));
        assert_eq!(checker.check(b"").unwrap(), Instruction::new(false, true));
    }

    #[test]
    fn json_pointer_key_reads_nested_values() {
        let extractor = JsonPointerKey::new("/content/id");
        let key = extractor
            .cycle_key(br#"{"content":{"id":"abc"}}"#)
            .unwrap();
        assert_eq!(key, CycleKey::from("abc"));
    }

    #[test]
    fn json_pointer_key_errors_when_missing() {
        let extractor = JsonPointerKey::new("/id");
        let err = extractor.cycle_key(br#"{"other":1}"#).unwrap_err();
        assert!(err.to_string().contains("/id"));
    }

    #[test]
    fn json_pointer_key_errors_on_non_json() {
        let extractor = JsonPointerKey::new("/id");
        assert!(extractor.cycle_key(b"not json").is_err());
    }
}
