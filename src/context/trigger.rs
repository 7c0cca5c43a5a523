use super::ConfigError;

/// Decides whether compaction should run before the next turn is sent.
pub trait CompactionTrigger: Send + Sync {
    fn should_compact(&self, current_tokens: u32, max_tokens: u32) -> bool;

    /// Compatibility field some callers read generically; does not
    /// necessarily reflect the trigger's actual policy (see the token-based
    /// variant below).
    fn threshold_percentage(&self) -> f32;
}

/// Fires once usage crosses a fixed fraction of the context window.
pub struct ThresholdTrigger {
    p: f32,
}

impl ThresholdTrigger {
    pub const DEFAULT_P: f32 = 0.92;

    pub fn new(p: f32) -> Result<Self, ConfigError> {
        if !(0.5..=1.0).contains(&p) {
            return Err(ConfigError::new(format!(
                "threshold trigger p must be in [0.5, 1.0], got {p}"
            )));
        }
        Ok(Self { p })
    }
}

impl Default for ThresholdTrigger {
    fn default() -> Self {
        Self { p: Self::DEFAULT_P }
    }
}

impl CompactionTrigger for ThresholdTrigger {
    fn should_compact(&self, current_tokens: u32, max_tokens: u32) -> bool {
        if max_tokens == 0 {
            return false;
        }
        (current_tokens as f32 / max_tokens as f32) >= self.p
    }

    fn threshold_percentage(&self) -> f32 {
        self.p
    }
}

/// Fires when little room remains AND enough is prunable to be worth a
/// round — avoids compacting when there's nothing meaningful to reclaim.
pub struct TokenBasedTrigger {
    pub protect_recent: u32,
    pub minimum_prune: u32,
}

impl TokenBasedTrigger {
    pub const DEFAULT_PROTECT_RECENT: u32 = 40_000;
    pub const DEFAULT_MINIMUM_PRUNE: u32 = 20_000;

    pub fn new(protect_recent: u32, minimum_prune: u32) -> Self {
        Self {
            protect_recent,
            minimum_prune,
        }
    }
}

impl Default for TokenBasedTrigger {
    fn default() -> Self {
        Self {
            protect_recent: Self::DEFAULT_PROTECT_RECENT,
            minimum_prune: Self::DEFAULT_MINIMUM_PRUNE,
        }
    }
}

impl CompactionTrigger for TokenBasedTrigger {
    fn should_compact(&self, current_tokens: u32, max_tokens: u32) -> bool {
        if max_tokens == 0 {
            return false;
        }
        let prunable = current_tokens.saturating_sub(self.protect_recent);
        let remaining = max_tokens.saturating_sub(current_tokens);
        let approaching = remaining < self.protect_recent / 2;
        approaching && prunable >= self.minimum_prune
    }

    /// Constant for interface compatibility only — this trigger's real
    /// policy is the protect-recent/minimum-prune arithmetic above.
    fn threshold_percentage(&self) -> f32 {
        ThresholdTrigger::DEFAULT_P
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_rejects_out_of_range() {
        assert!(ThresholdTrigger::new(0.1).is_err());
        assert!(ThresholdTrigger::new(1.5).is_err());
        assert!(ThresholdTrigger::new(0.5).is_ok());
        assert!(ThresholdTrigger::new(1.0).is_ok());
    }

    #[test]
    fn scenario_b_threshold_trigger() {
        let t = ThresholdTrigger::new(0.92).unwrap();
        assert!(t.should_compact(9200, 10_000));
        assert!(!t.should_compact(9100, 10_000));
    }

    #[test]
    fn threshold_zero_max_never_compacts() {
        let t = ThresholdTrigger::default();
        assert!(!t.should_compact(100, 0));
    }

    #[test]
    fn token_based_fires_when_approaching_and_prunable() {
        let t = TokenBasedTrigger::default();
        // remaining = 200_000 - 185_000 = 15_000 < 40_000/2 = 20_000 (approaching)
        // prunable = 185_000 - 40_000 = 145_000 >= 20_000
        assert!(t.should_compact(185_000, 200_000));
    }

    #[test]
    fn token_based_does_not_fire_with_plenty_of_room() {
        let t = TokenBasedTrigger::default();
        assert!(!t.should_compact(50_000, 200_000));
    }

    #[test]
    fn token_based_does_not_fire_when_too_little_prunable() {
        let t = TokenBasedTrigger::new(40_000, 20_000);
        // remaining = 70_000 - 55_000 = 15_000 < 20_000 (approaching)
        // prunable = 55_000 - 40_000 = 15_000 < 20_000 (not enough to prune)
        assert!(!t.should_compact(55_000, 70_000));
    }
}
