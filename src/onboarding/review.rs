//! The confirmation table and everything that edits it.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::parser::ModificationAction;

use super::command::FlowCommand;
use super::engine::FlowEngine;
use super::message::{Button, Message, Table};
use super::model::{Candidate, OnboardingEntity, dedupe};
use super::state::FlowStep;

/// Rows beyond this get no per-row role buttons.
const MAX_ROLE_BUTTONS: usize = 10;

/// "remove", "delete one", "remove someone": asks which row, no parser needed.
static BARE_REMOVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(remove|delete)(\s+(one|some(one|thing)|a row|an? (entry|item)))?\s*[.!]?\s*$")
        .expect("static regex")
});

impl<T: OnboardingEntity> FlowEngine<T> {
    /// Render the working set with its actions. An empty set goes back to input.
    pub(super) fn present_table(&mut self, lead: Option<String>) {
        if self.state.working_set.is_empty() {
            self.begin_collection(lead);
            return;
        }
        self.set_step(FlowStep::ConfirmTable);

        let total = self.state.working_set.len();
        let kind = T::KIND;
        let mut lines: Vec<String> = lead.into_iter().collect();
        lines.push(format!("Here's what I have: {}.", kind.count(total)));

        let invalid = self.state.invalid_count();
        if invalid > 0 {
            lines.push(format!(
                "{} need{} fixing before I can add anything. Tell me what to change, or remove {}.",
                invalid,
                if invalid == 1 { "s" } else { "" },
                if invalid == 1 { "it" } else { "them" }
            ));
        }

        let over_quota = self
            .state
            .remaining_quota()
            .filter(|remaining| total > *remaining as usize);
        if let Some(remaining) = over_quota {
            let context = self
                .state
                .context
                .as_ref()
                .map(|c| c.name.as_str())
                .unwrap_or("this context");
            lines.push(format!(
                "You can add {} more to {context}, but {total} are listed. Remove some before confirming.",
                kind.count(remaining as usize)
            ));
        }

        let confirm_label = format!("Add {}", kind.count(total));
        let mut buttons = vec![if self.state.can_confirm() {
            Button::primary(confirm_label, FlowCommand::Confirm)
        } else {
            Button::placeholder(confirm_label, FlowCommand::Confirm)
        }];
        buttons.push(Button::secondary("Edit", FlowCommand::Modify));
        buttons.push(Button::secondary("Add another", FlowCommand::AddAnother));
        buttons.push(Button::secondary("Remove one", FlowCommand::OfferRemoval));
        if T::HAS_ROLE && total <= MAX_ROLE_BUTTONS {
            buttons.extend(self.state.working_set.iter().enumerate().map(|(index, c)| {
                Button::secondary(
                    format!("Change role: {}", c.entity.display_name()),
                    FlowCommand::ToggleRole { index },
                )
            }));
        }
        buttons.push(Button::secondary("Cancel", FlowCommand::Close));

        let table = Table::from_candidates(&self.state.working_set);
        self.log.push(
            Message::assistant(lines.join("\n"))
                .with_table(table)
                .with_buttons(buttons),
        );
    }

    pub(super) fn begin_modify(&mut self) {
        self.set_step(FlowStep::Modify);
        self.say_with(
            format!(
                "What should I change? For example: \"{}\"",
                T::MODIFY_EXAMPLE
            ),
            vec![
                Button::secondary("Back to the list", FlowCommand::BackToTable),
                Button::secondary("Cancel", FlowCommand::Close),
            ],
        );
    }

    pub(super) fn offer_removal(&mut self) {
        self.set_step(FlowStep::ChooseRemoval);
        let mut buttons: Vec<Button> = self
            .state
            .working_set
            .iter()
            .enumerate()
            .map(|(index, c)| {
                Button::new(
                    format!("{}. {}", index + 1, c.entity.display_name()),
                    FlowCommand::RemoveRow { index },
                )
            })
            .collect();
        buttons.push(Button::secondary("Back to the list", FlowCommand::BackToTable));
        self.say_with(
            format!("Which {} should I remove?", T::KIND.singular()),
            buttons,
        );
    }

    pub(super) fn remove_row(&mut self, index: usize) {
        if index >= self.state.working_set.len() {
            debug!(session = %self.id, index, "Removal index out of range");
            self.present_table(None);
            return;
        }
        let removed = self.state.working_set.remove(index);
        info!(session = %self.id, index, name = %removed.entity.display_name(), "Removed from working set");
        self.present_table(Some(format!("Removed {}.", removed.entity.display_name())));
    }

    /// Flip one row's role locally. No parser round-trip.
    pub(super) fn toggle_role(&mut self, index: usize) {
        let note = match self.state.working_set.get_mut(index) {
            Some(candidate) => {
                if candidate.entity.toggle_role() {
                    let role = candidate.entity.role_hint().unwrap_or_default();
                    Some(format!("{} is now {role}.", candidate.entity.display_name()))
                } else {
                    None
                }
            }
            None => None,
        };
        self.present_table(note);
    }

    /// A free-text correction against the whole working set.
    pub(super) async fn modify(&mut self, text: &str) {
        if BARE_REMOVE_RE.is_match(text) {
            self.offer_removal();
            return;
        }

        self.set_step(FlowStep::Modify);
        self.begin_remote("Updating the list…");
        let result = self
            .parser
            .apply_modification(text, &self.state.working_set)
            .await;
        self.end_remote();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session = %self.id, error = %e, "Modification failed");
                self.present_table(Some(format!(
                    "I couldn't apply that change ({e}). The list is unchanged. Try wording it \
                     like: \"{}\"",
                    T::MODIFY_EXAMPLE
                )));
                return;
            }
        };

        match outcome.action {
            ModificationAction::Unclear => {
                debug!(session = %self.id, "Modification unclear");
                let note = if outcome.message.trim().is_empty() {
                    format!(
                        "I'm not sure what to change. Try something like: \"{}\"",
                        T::MODIFY_EXAMPLE
                    )
                } else {
                    outcome.message
                };
                self.present_table(Some(note));
            }
            ModificationAction::Applied => {
                let revised: Vec<Candidate<T>> = outcome
                    .candidates
                    .into_iter()
                    .map(Candidate::revalidated)
                    .collect();
                let (kept, notices) = dedupe(revised);
                info!(
                    session = %self.id,
                    before = self.state.working_set.len(),
                    after = kept.len(),
                    "Modification applied"
                );
                self.state.working_set = kept;

                let mut lines: Vec<String> = Some(outcome.message)
                    .filter(|m| !m.trim().is_empty())
                    .into_iter()
                    .collect();
                lines.extend(notices);
                let note = Some(lines.join("\n")).filter(|n| !n.is_empty());
                self.present_table(note);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_remove_requests() {
        for text in ["remove", "Delete", "remove one", "remove someone.", "delete a row"] {
            assert!(BARE_REMOVE_RE.is_match(text), "{text}");
        }
        for text in ["remove Bob", "delete the second one", "removed"] {
            assert!(!BARE_REMOVE_RE.is_match(text), "{text}");
        }
    }
}
