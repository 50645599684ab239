use std::time::Duration;

/// Decides whether the user counts as away from the keyboard.
pub struct AfkEvaluator {
    threshold_ms: u32,
}

impl AfkEvaluator {
    pub fn from_seconds(threshold_s: u32) -> Self {
        Self {
            threshold_ms: threshold_s * 1000,
        }
    }

    pub fn from_duration(threshold: Duration) -> Self {
        Self {
            threshold_ms: threshold.as_millis().min(u32::MAX as u128) as u32,
        }
    }

    pub fn is_afk(&self, idle_time: u32) -> bool {
        self.threshold_ms < idle_time
    }
}
