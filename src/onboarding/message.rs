//! Chat transcript primitives: messages, buttons, tables, and the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::command::FlowCommand;
use super::model::{Candidate, OnboardingEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Assistant,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Secondary,
}

/// A selectable option attached to a message. Single-use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub value: FlowCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    /// Disabled buttons are placeholders or already-answered options.
    #[serde(default)]
    pub disabled: bool,
}

impl Button {
    pub fn new(label: impl Into<String>, value: FlowCommand) -> Self {
        Self {
            label: label.into(),
            value,
            style: None,
            disabled: false,
        }
    }

    pub fn primary(label: impl Into<String>, value: FlowCommand) -> Self {
        Self {
            style: Some(ButtonStyle::Primary),
            ..Self::new(label, value)
        }
    }

    pub fn secondary(label: impl Into<String>, value: FlowCommand) -> Self {
        Self {
            style: Some(ButtonStyle::Secondary),
            ..Self::new(label, value)
        }
    }

    /// A visible but unusable stand-in.
    pub fn placeholder(label: impl Into<String>, value: FlowCommand) -> Self {
        Self {
            disabled: true,
            ..Self::new(label, value)
        }
    }
}

/// A read-only table rendered from the working set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Render candidates with a leading row number and a trailing status column.
    pub fn from_candidates<T: OnboardingEntity>(candidates: &[Candidate<T>]) -> Self {
        let mut columns = vec!["#".to_string()];
        columns.extend(T::columns().iter().map(|c| c.to_string()));
        columns.push("Status".to_string());

        let rows = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut row = vec![(i + 1).to_string()];
                row.extend(c.entity.row());
                row.push(c.status_label());
                row
            })
            .collect();

        Self { columns, rows }
    }
}

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: MessageRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<Table>,
    /// Progress indicators; replaced by whatever is emitted next.
    #[serde(default)]
    pub is_transient: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            text: text.into(),
            buttons: Vec::new(),
            table: None,
            is_transient: false,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            ..Self::assistant(text)
        }
    }

    pub fn progress(text: impl Into<String>) -> Self {
        Self {
            is_transient: true,
            ..Self::assistant(text)
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        self.buttons = buttons;
        self
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.table = Some(table);
        self
    }

    fn is_interactive(&self) -> bool {
        self.buttons.iter().any(|b| !b.disabled)
    }
}

/// Append-only transcript with transient pruning.
#[derive(Debug, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
    limit: usize,
}

impl MessageLog {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Append a message. Any transient message is dropped first.
    pub fn push(&mut self, message: Message) -> Uuid {
        self.clear_transient();
        let id = message.id;
        self.messages.push(message);
        self.enforce_limit();
        id
    }

    /// Remove every transient message. Returns whether one was present.
    pub fn clear_transient(&mut self) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| !m.is_transient);
        before != self.messages.len()
    }

    /// Disable every live button; answered questions can't be answered twice.
    pub fn retire_buttons(&mut self) {
        for message in &mut self.messages {
            for button in &mut message.buttons {
                button.disabled = true;
            }
        }
    }

    /// The live button carrying `command`, if any.
    pub fn offered(&self, command: &FlowCommand) -> Option<&Button> {
        self.messages
            .iter()
            .flat_map(|m| m.buttons.iter())
            .find(|b| !b.disabled && &b.value == command)
    }

    pub fn is_offered(&self, command: &FlowCommand) -> bool {
        self.offered(command).is_some()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop the oldest messages without live buttons once over the limit.
    fn enforce_limit(&mut self) {
        let excess = self.messages.len().saturating_sub(self.limit);
        if excess == 0 {
            return;
        }
        let mut removed = 0;
        self.messages.retain(|m| {
            if removed < excess && !m.is_interactive() {
                removed += 1;
                false
            } else {
                true
            }
        });
        debug!(removed, "Pruned message history");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::workflows::Student;

    #[test]
    fn transient_is_replaced_by_next_push() {
        let mut log = MessageLog::new(100);
        log.push(Message::assistant("hello"));
        log.push(Message::progress("Working…"));
        assert_eq!(log.len(), 2);
        log.push(Message::assistant("done"));
        assert_eq!(log.len(), 2);
        assert!(log.messages().iter().all(|m| !m.is_transient));
        assert_eq!(log.last().unwrap().text, "done");
    }

    #[test]
    fn clear_transient_reports_presence() {
        let mut log = MessageLog::new(100);
        assert!(!log.clear_transient());
        log.push(Message::progress("Loading"));
        assert!(log.clear_transient());
        assert!(log.is_empty());
    }

    #[test]
    fn retired_buttons_are_not_offered() {
        let mut log = MessageLog::new(100);
        log.push(
            Message::assistant("pick").with_buttons(vec![Button::primary("Yes", FlowCommand::Confirm)]),
        );
        assert!(log.is_offered(&FlowCommand::Confirm));
        log.retire_buttons();
        assert!(!log.is_offered(&FlowCommand::Confirm));
    }

    #[test]
    fn placeholders_are_never_offered() {
        let mut log = MessageLog::new(100);
        log.push(
            Message::assistant("fix first")
                .with_buttons(vec![Button::placeholder("Confirm", FlowCommand::Confirm)]),
        );
        assert!(!log.is_offered(&FlowCommand::Confirm));
    }

    #[test]
    fn limit_prunes_oldest_inert_messages() {
        let mut log = MessageLog::new(3);
        log.push(Message::assistant("one").with_buttons(vec![Button::new("Close", FlowCommand::Close)]));
        log.push(Message::assistant("two"));
        log.push(Message::assistant("three"));
        log.push(Message::assistant("four"));
        assert_eq!(log.len(), 3);
        let texts: Vec<_> = log.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "three", "four"]);
    }

    #[test]
    fn table_has_number_and_status_columns() {
        let rows = vec![
            Candidate::valid(Student {
                name: "Alice".into(),
                birthdate: "2010-01-01".into(),
            }),
            Candidate::invalid(
                Student {
                    name: "Bob".into(),
                    birthdate: "".into(),
                },
                "Missing birthdate",
            ),
        ];
        let table = Table::from_candidates(&rows);
        assert_eq!(table.columns, vec!["#", "Name", "Birthdate", "Status"]);
        assert_eq!(table.rows[0], vec!["1", "Alice", "2010-01-01", "OK"]);
        assert_eq!(table.rows[1][3], "⚠ Missing birthdate");
    }
}
