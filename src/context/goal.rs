use super::message::{history_from, ChatMessage, History, Role};

const GOAL_MAX_CHARS: usize = 500;
const DEFAULT_TEMPLATE: &str = "[REMINDER] Current goal: {goal}";

/// Re-injects the session objective late in the prompt so it stays salient
/// once the original user message has scrolled out of the recent turns.
pub struct GoalReminder {
    pub enabled: bool,
    pub min_messages_before_reminder: usize,
    pub template: String,
    current_goal: Option<String>,
}

impl GoalReminder {
    pub fn new() -> Self {
        Self {
            enabled: true,
            min_messages_before_reminder: 6,
            template: DEFAULT_TEMPLATE.to_string(),
            current_goal: None,
        }
    }

    pub fn with_min_messages(mut self, n: usize) -> Self {
        self.min_messages_before_reminder = n;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn set_goal(&mut self, goal: impl Into<String>) {
        self.current_goal = Some(goal.into());
    }

    pub fn current_goal(&self) -> Option<&str> {
        self.current_goal.as_deref()
    }

    pub fn set_goal_from_first_user_message(&mut self, history: &[ChatMessage]) {
        if let Some(first_user) = history.iter().find(|m| m.role == Role::User) {
            let text = first_user.text();
            let truncated = if text.chars().count() > GOAL_MAX_CHARS {
                let head: String = text.chars().take(GOAL_MAX_CHARS).collect();
                format!("{head}...")
            } else {
                text
            };
            self.current_goal = Some(truncated);
        }
    }

    pub fn should_inject(&self, history: &[ChatMessage]) -> bool {
        if !self.enabled || self.current_goal.is_none() {
            return false;
        }
        let non_system = history.iter().filter(|m| m.role != Role::System).count();
        non_system >= self.min_messages_before_reminder
    }

    /// Returns a new history with one extra system message appended
    /// containing the rendered template, or the input unchanged.
    pub fn inject_if_needed(&self, history: &History) -> History {
        if !self.should_inject(history) {
            return history.clone();
        }
        let goal = self.current_goal.as_deref().unwrap_or_default();
        let rendered = self.template.replace("{goal}", goal);
        let mut out: Vec<ChatMessage> = history.iter().cloned().collect();
        out.push(ChatMessage::system(rendered));
        history_from(out)
    }
}

impl Default for GoalReminder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn history_of_len(n: usize) -> History {
        history_from((0..n).map(|i| ChatMessage::user(format!("turn {i}"))).collect())
    }

    #[test]
    fn no_inject_without_goal() {
        let reminder = GoalReminder::new();
        let history = history_of_len(10);
        let out = reminder.inject_if_needed(&history);
        assert!(Arc::ptr_eq(&history, &out));
    }

    #[test]
    fn no_inject_before_minimum_messages() {
        let mut reminder = GoalReminder::new().with_min_messages(6);
        reminder.set_goal("ship the feature");
        let history = history_of_len(3);
        let out = reminder.inject_if_needed(&history);
        assert!(Arc::ptr_eq(&history, &out));
    }

    #[test]
    fn injects_after_minimum_messages() {
        let mut reminder = GoalReminder::new().with_min_messages(6);
        reminder.set_goal("ship the feature");
        let history = history_of_len(6);
        let out = reminder.inject_if_needed(&history);
        assert_eq!(out.len(), history.len() + 1);
        assert_eq!(
            out.last().unwrap().text(),
            "[REMINDER] Current goal: ship the feature"
        );
    }

    #[test]
    fn goal_from_first_user_message_truncates() {
        let mut reminder = GoalReminder::new();
        let long = "y".repeat(600);
        let history = vec![ChatMessage::user(long)];
        reminder.set_goal_from_first_user_message(&history);
        let goal = reminder.current_goal().unwrap();
        assert!(goal.ends_with("..."));
        assert_eq!(goal.len(), 500 + 3);
    }
}
