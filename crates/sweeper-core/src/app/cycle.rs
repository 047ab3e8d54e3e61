//! CycleDetector - キューを一周したことの検出
//!
//! 最初に観測したキーだけを基準として保持し、同じキーが再び現れたら
//! 「キュー全体を走査した」とみなします。一般的な既読集合ではないので、
//! 基準以外のキーの重複は検出しません。

use crate::domain::CycleKey;

#[derive(Debug, Default)]
pub struct CycleDetector {
    baseline: Option<CycleKey>,
}

impl CycleDetector {
    pub fn new() -> Self {
        Self { baseline: None }
    }

    /// Record or compare `key`. Returns true once the baseline key shows up again.
    pub fn observe(&mut self, key: CycleKey) -> bool {
        match &self.baseline {
            None => {
                self.baseline = Some(key);
                false
            }
            Some(baseline) => *baseline == key,
        }
    }

    pub fn baseline(&self) -> Option<&CycleKey> {
        self.baseline.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn first_key_becomes_baseline() {
        let mut detector = CycleDetector::new();
        assert!(!detector.observe(CycleKey::from("k1")));
        assert_eq!(detector.baseline(), Some(&CycleKey::from("k1")));
    }

    #[rstest]
    #[case::immediate(vec!["k1", "k1"], 2)]
    #[case::after_others(vec!["k1", "k2", "k3", "k1"], 4)]
    #[case::repeats_of_non_baseline(vec!["k1", "k2", "k2", "k3", "k2", "k1"], 6)]
    fn fires_exactly_when_baseline_returns(#[case] keys: Vec<&str>, #[case] position: usize) {
        let mut detector = CycleDetector::new();
        let fired_at = keys
            .into_iter()
            .position(|k| detector.observe(CycleKey::from(k)))
            .map(|i| i + 1);
        assert_eq!(fired_at, Some(position));
    }

    #[test]
    fn never_fires_without_repeat_of_baseline() {
        let mut detector = CycleDetector::new();
        for i in 0..100u64 {
            assert!(!detector.observe(CycleKey::from(i)));
        }
    }
}
