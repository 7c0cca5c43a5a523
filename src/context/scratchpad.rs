use std::collections::BTreeMap;
use std::collections::VecDeque;

const DEFAULT_MAX_OBSERVATIONS: usize = 50;
const DEFAULT_MAX_CHARS: usize = 4_000;
const TRUNCATION_MARKER: &str = "\n[SCRATCHPAD TRUNCATED]";

/// External working memory for a session: a plan, a step counter, a bounded
/// FIFO of observations, and a small set of key facts. Not serialized
/// across processes — owned by the context manager for the lifetime of a
/// session.
pub struct Scratchpad {
    pub current_plan: Option<String>,
    pub current_step: u64,
    observations: VecDeque<String>,
    key_facts: BTreeMap<String, String>,
    pub max_chars: usize,
    pub max_observations: usize,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self {
            current_plan: None,
            current_step: 0,
            observations: VecDeque::new(),
            key_facts: BTreeMap::new(),
            max_chars: DEFAULT_MAX_CHARS,
            max_observations: DEFAULT_MAX_OBSERVATIONS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn with_max_observations(mut self, max_observations: usize) -> Self {
        self.max_observations = max_observations;
        self
    }

    /// Rejects null/whitespace-only observations. Evicts the oldest
    /// observation (FIFO) once `max_observations` is exceeded.
    pub fn add_observation(&mut self, s: impl Into<String>) {
        let s = s.into();
        if s.trim().is_empty() {
            return;
        }
        self.observations.push_back(s);
        while self.observations.len() > self.max_observations {
            self.observations.pop_front();
        }
    }

    /// Rejects null/whitespace keys. Case-insensitive key overwrite.
    pub fn set_fact(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if key.trim().is_empty() {
            return;
        }
        let lower = key.to_lowercase();
        // Remove any existing entry whose key differs only in case.
        if let Some(existing_key) = self
            .key_facts
            .keys()
            .find(|k| k.to_lowercase() == lower && **k != key)
            .cloned()
        {
            self.key_facts.remove(&existing_key);
        }
        self.key_facts.insert(key, value.into());
    }

    pub fn has_content(&self) -> bool {
        self.current_plan.is_some() || !self.observations.is_empty() || !self.key_facts.is_empty()
    }

    pub fn clear(&mut self) {
        self.current_plan = None;
        self.current_step = 0;
        self.observations.clear();
        self.key_facts.clear();
    }

    pub fn observations(&self) -> impl Iterator<Item = &str> {
        self.observations.iter().map(String::as_str)
    }

    /// Builds the `[SCRATCHPAD] ... [END SCRATCHPAD]` block: plan (with
    /// current step), key facts ordered by key (case-insensitively, via the
    /// `BTreeMap`'s natural order over lowercase-stable keys), and
    /// observations in insertion order. Truncates to `max_chars` with a
    /// trailing marker if the block would otherwise exceed it.
    pub fn to_context_block(&self) -> String {
        let mut out = String::from("[SCRATCHPAD]\n");
        if let Some(plan) = &self.current_plan {
            out.push_str(&format!("Plan (step {}): {plan}\n", self.current_step));
        }
        if !self.key_facts.is_empty() {
            out.push_str("Key facts:\n");
            let mut entries: Vec<(&String, &String)> = self.key_facts.iter().collect();
            entries.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));
            for (k, v) in entries {
                out.push_str(&format!("  {k}: {v}\n"));
            }
        }
        if !self.observations.is_empty() {
            out.push_str("Observations:\n");
            for obs in &self.observations {
                out.push_str(&format!("  - {obs}\n"));
            }
        }
        out.push_str("[END SCRATCHPAD]");

        if out.len() > self.max_chars {
            let cut = self.max_chars.min(out.len());
            let mut truncated: String = out.chars().take(cut).collect();
            truncated.push_str(TRUNCATION_MARKER);
            truncated
        } else {
            out
        }
    }
}

impl Default for Scratchpad {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_whitespace_observation() {
        let mut s = Scratchpad::new();
        s.add_observation("   ");
        assert!(!s.has_content());
    }

    #[test]
    fn invariant_10_fifo_eviction() {
        let mut s = Scratchpad::new().with_max_observations(3);
        for i in 0..10 {
            s.add_observation(format!("obs {i}"));
        }
        let remaining: Vec<&str> = s.observations().collect();
        assert_eq!(remaining, vec!["obs 7", "obs 8", "obs 9"]);
    }

    #[test]
    fn set_fact_overwrites_case_insensitively() {
        let mut s = Scratchpad::new();
        s.set_fact("Language", "Rust");
        s.set_fact("language", "Go");
        let block = s.to_context_block();
        assert!(block.contains("Go"));
        assert!(!block.contains("Rust"));
    }

    #[test]
    fn rejects_whitespace_key() {
        let mut s = Scratchpad::new();
        s.set_fact("  ", "value");
        assert!(!s.has_content());
    }

    #[test]
    fn has_content_reflects_any_populated_field() {
        let mut s = Scratchpad::new();
        assert!(!s.has_content());
        s.current_plan = Some("do the thing".into());
        assert!(s.has_content());
    }

    #[test]
    fn clear_resets_everything() {
        let mut s = Scratchpad::new();
        s.current_plan = Some("plan".into());
        s.current_step = 3;
        s.add_observation("obs");
        s.set_fact("k", "v");
        s.clear();
        assert!(!s.has_content());
        assert_eq!(s.current_step, 0);
    }

    #[test]
    fn truncates_oversize_block() {
        let mut s = Scratchpad::new().with_max_chars(50);
        for i in 0..20 {
            s.add_observation(format!("a fairly long observation line number {i}"));
        }
        let block = s.to_context_block();
        assert!(block.ends_with("[SCRATCHPAD TRUNCATED]"));
    }
}
