use std::collections::HashSet;

use regex::Regex;

use super::message::{ChatMessage, ContentItem, Role};

const GOAL_MAX_CHARS: usize = 200;
const ERROR_CODE_PATTERN: &str = r"(?:CS|CA|IDE|SA)\d{4,5}";
const FILE_MUTATING_VERBS: &[&str] = &["write", "edit", "create", "delete"];
const FILE_ARG_KEYS: &[&str] = &["path", "file_path", "filePath"];

/// Structured state carried across anchored-compaction rounds so summaries
/// don't silently forget facts the way naive iterated summarization does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationAnchors {
    pub session_goal: Option<String>,
    pub completed_steps: Vec<String>,
    pub files_modified: Vec<String>,
    pub failed_approaches: Vec<String>,
    pub key_decisions: Vec<String>,
    pub errors_encountered: Vec<String>,
}

fn push_dedup(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn push_dedup_ci(list: &mut Vec<String>, item: String) {
    if !list.iter().any(|existing| existing.eq_ignore_ascii_case(&item)) {
        list.push(item);
    }
}

impl ConversationAnchors {
    pub fn is_empty(&self) -> bool {
        self.session_goal.is_none()
            && self.completed_steps.is_empty()
            && self.files_modified.is_empty()
            && self.failed_approaches.is_empty()
            && self.key_decisions.is_empty()
            && self.errors_encountered.is_empty()
    }

    pub fn set_goal(&mut self, goal: &str) {
        if self.session_goal.is_some() {
            return;
        }
        self.session_goal = Some(truncate_goal(goal));
    }

    pub fn add_completed_step(&mut self, step: impl Into<String>) {
        push_dedup(&mut self.completed_steps, step.into());
    }

    pub fn add_file_modified(&mut self, path: impl Into<String>) {
        push_dedup_ci(&mut self.files_modified, path.into());
    }

    pub fn add_failed_approach(&mut self, text: impl Into<String>) {
        push_dedup(&mut self.failed_approaches, text.into());
    }

    pub fn add_key_decision(&mut self, text: impl Into<String>) {
        push_dedup(&mut self.key_decisions, text.into());
    }

    pub fn add_error(&mut self, code: impl Into<String>) {
        push_dedup(&mut self.errors_encountered, code.into());
    }

    /// `merged.sessionGoal = existing.goal ?? new.goal`; lists concatenate
    /// with dedup; `files_modified` unions case-insensitively. At-least-once
    /// capture: nothing present in `self` is ever dropped by merging `other`
    /// on top of it.
    pub fn merge(&self, other: &ConversationAnchors) -> ConversationAnchors {
        let mut merged = self.clone();
        if merged.session_goal.is_none() {
            merged.session_goal = other.session_goal.clone();
        }
        for step in &other.completed_steps {
            push_dedup(&mut merged.completed_steps, step.clone());
        }
        for file in &other.files_modified {
            push_dedup_ci(&mut merged.files_modified, file.clone());
        }
        for approach in &other.failed_approaches {
            push_dedup(&mut merged.failed_approaches, approach.clone());
        }
        for decision in &other.key_decisions {
            push_dedup(&mut merged.key_decisions, decision.clone());
        }
        for error in &other.errors_encountered {
            push_dedup(&mut merged.errors_encountered, error.clone());
        }
        merged
    }

    /// Serializes to the `[CONVERSATION STATE]` plaintext grammar. Only
    /// sections with content are emitted.
    pub fn format(&self) -> String {
        let mut out = String::from("[CONVERSATION STATE]\n");
        if let Some(goal) = &self.session_goal {
            out.push_str(&format!("Goal: {goal}\n"));
        }
        write_section(&mut out, "Completed:", &self.completed_steps);
        write_section(&mut out, "Files modified:", &self.files_modified);
        write_section(&mut out, "Failed approaches:", &self.failed_approaches);
        write_section(&mut out, "Key decisions:", &self.key_decisions);
        write_section(&mut out, "Errors:", &self.errors_encountered);
        out.push_str("[END STATE]");
        out
    }

    /// Best-effort parser: unparseable lines are dropped silently, never an
    /// error (spec §7: "State-block parse malformed" policy).
    pub fn parse(text: &str) -> ConversationAnchors {
        let mut anchors = ConversationAnchors::default();
        let mut current_section: Option<&'static str> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line == "[CONVERSATION STATE]" || line == "[END STATE]" {
                continue;
            }
            if let Some(rest) = line.strip_prefix("Goal:") {
                anchors.session_goal = Some(rest.trim().to_string());
                current_section = None;
                continue;
            }
            if line == "Completed:" {
                current_section = Some("completed");
                continue;
            }
            if line == "Files modified:" {
                current_section = Some("files");
                continue;
            }
            if line == "Failed approaches:" {
                current_section = Some("failed");
                continue;
            }
            if line == "Key decisions:" {
                current_section = Some("decisions");
                continue;
            }
            if line == "Errors:" {
                current_section = Some("errors");
                continue;
            }
            if let Some(item) = line.strip_prefix("- ") {
                match current_section {
                    Some("completed") => anchors.completed_steps.push(item.to_string()),
                    Some("files") => anchors.files_modified.push(item.to_string()),
                    Some("failed") => anchors.failed_approaches.push(item.to_string()),
                    Some("decisions") => anchors.key_decisions.push(item.to_string()),
                    Some("errors") => anchors.errors_encountered.push(item.to_string()),
                    _ => {} // unrecognized section content: drop silently
                }
            }
        }

        anchors
    }

    /// Extracts rule-based anchors from a prunable middle region (assistant
    /// file-mutating calls, error codes in message text, first user
    /// message as goal). Existing state-block system messages should be
    /// filtered out of `messages` before calling this.
    pub fn extract(messages: &[&ChatMessage]) -> ConversationAnchors {
        let mut anchors = ConversationAnchors::default();
        let error_re = Regex::new(ERROR_CODE_PATTERN).expect("valid error-code pattern");

        if let Some(first_user) = messages.iter().find(|m| m.role == Role::User) {
            anchors.set_goal(&first_user.text());
        }

        for msg in messages {
            if msg.role == Role::Assistant {
                for (_, name, arguments) in msg.function_calls() {
                    let lower = name.to_lowercase();
                    if FILE_MUTATING_VERBS.iter().any(|v| lower.contains(v)) {
                        for key in FILE_ARG_KEYS {
                            if let Some(path) = arguments.get(*key).and_then(|v| v.as_str()) {
                                anchors.add_file_modified(path);
                            }
                        }
                    }
                }
            }
            for m in error_re.find_iter(&msg.text()) {
                anchors.add_error(m.as_str());
            }
        }

        anchors
    }
}

fn truncate_goal(goal: &str) -> String {
    if goal.chars().count() <= GOAL_MAX_CHARS {
        goal.to_string()
    } else {
        let truncated: String = goal.chars().take(GOAL_MAX_CHARS).collect();
        format!("{truncated}...")
    }
}

fn write_section(out: &mut String, header: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(header);
    out.push('\n');
    for item in items {
        out.push_str("  - ");
        out.push_str(item);
        out.push('\n');
    }
}

/// Scans `history` for existing `[CONVERSATION STATE]` system messages,
/// parses and merges them (later messages win ties via `merge`'s
/// left-biased goal rule applied in encounter order), and returns the
/// parsed anchors alongside the indices of the state-block messages found
/// (so callers can filter them out before further processing).
pub fn extract_existing(history: &[ChatMessage]) -> (ConversationAnchors, HashSet<usize>) {
    let mut anchors = ConversationAnchors::default();
    let mut indices = HashSet::new();
    for (idx, msg) in history.iter().enumerate() {
        if msg.role == Role::System && msg.text().trim_start().starts_with("[CONVERSATION STATE]") {
            let parsed = ConversationAnchors::parse(&msg.text());
            anchors = anchors.merge(&parsed);
            indices.insert(idx);
        }
    }
    (anchors, indices)
}

pub fn is_state_block(msg: &ChatMessage) -> bool {
    msg.role == Role::System && msg.text().trim_start().starts_with("[CONVERSATION STATE]")
}
