//! Input collection: one item at a time, or a pasted batch.

use tracing::{debug, info, warn};

use super::command::FlowCommand;
use super::engine::FlowEngine;
use super::message::Button;
use super::model::{Candidate, OnboardingEntity, dedupe};
use super::state::{FlowMode, FlowStep, PartialEntry};

impl<T: OnboardingEntity> FlowEngine<T> {
    /// Ask for input in the current mode, optionally leading with a note.
    pub(super) fn begin_collection(&mut self, note: Option<String>) {
        let lead = note.map(|n| format!("{n} ")).unwrap_or_default();
        let buttons = self.collection_buttons();

        match self.state.mode {
            Some(FlowMode::Batch) => {
                self.set_step(FlowStep::CollectInputBatch);
                self.say_with(
                    format!(
                        "{lead}Paste or type the {} you'd like to add, in any format. \
                         For example: \"{}\"",
                        T::KIND.plural(),
                        T::BATCH_EXAMPLE
                    ),
                    buttons,
                );
            }
            _ => {
                self.set_step(FlowStep::CollectInput);
                self.state.partial = PartialEntry::default();
                let prompt = T::fields().first().map(|f| f.prompt).unwrap_or_default();
                self.say_with(format!("{lead}{prompt}"), buttons);
            }
        }
    }

    fn collection_buttons(&self) -> Vec<Button> {
        let mut buttons = Vec::new();
        if !self.state.working_set.is_empty() {
            buttons.push(Button::secondary("Back to the list", FlowCommand::BackToTable));
        }
        buttons.push(Button::secondary("Cancel", FlowCommand::Close));
        buttons
    }

    /// Ask again while collecting; text retires buttons, so offer them anew.
    fn reprompt(&mut self, text: impl Into<String>) {
        let buttons = self.collection_buttons();
        self.say_with(text, buttons);
    }

    /// One field of one item.
    pub(super) async fn collect_single(&mut self, text: &str) {
        let fields = T::fields();
        if self.state.partial.field_index >= fields.len() {
            self.state.partial = PartialEntry::default();
        }
        let index = self.state.partial.field_index;
        let field = fields[index];

        let local = match T::check_field(field.key, text) {
            Ok(value) => value,
            Err(e) => {
                debug!(session = %self.id, field = field.key, error = %e, "Field rejected locally");
                self.reprompt(format!("{e} {}", field.prompt));
                return;
            }
        };

        // Earlier answers travel with the new one so the parser sees the whole item.
        let composed = if index == 0 {
            text.to_string()
        } else {
            let mut parts: Vec<String> = fields[..index]
                .iter()
                .filter_map(|f| {
                    self.state
                        .partial
                        .values
                        .get(f.key)
                        .map(|v| format!("{}: {v}", f.key))
                })
                .collect();
            parts.push(format!("{}: {text}", field.key));
            parts.join("; ")
        };

        self.set_step(FlowStep::Parse);
        self.begin_remote(format!("Checking that {}…", field.label.to_lowercase()));
        let parsed = self.parser.parse_from_text(&composed).await;
        self.end_remote();

        let outcome = match parsed {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session = %self.id, error = %e, "Parser unavailable, using local value");
                self.state
                    .partial
                    .values
                    .insert(field.key.to_string(), local);
                self.advance_or_build(None);
                return;
            }
        };

        let mut candidates = outcome.candidates;
        match candidates.len() {
            0 => {
                let message = if outcome.message.trim().is_empty() {
                    format!("I couldn't find a {} in that. {}", T::KIND.singular(), field.prompt)
                } else {
                    outcome.message
                };
                self.set_step(FlowStep::CollectInput);
                self.reprompt(message);
            }
            1 => {
                let candidate = candidates.remove(0).with_invariant();
                if !candidate.valid {
                    self.reject_single(&candidate);
                    return;
                }
                self.state
                    .partial
                    .values
                    .insert(field.key.to_string(), local);
                self.advance_or_build(Some(candidate));
            }
            n => {
                info!(session = %self.id, count = n, "Single entry parsed as several");
                self.state.pending_batch = candidates.into_iter().map(Candidate::with_invariant).collect();
                self.set_step(FlowStep::ConfirmSwitchToBatch);
                self.say_with(
                    format!(
                        "That looks like {}. Switch to adding a list and keep all of them?",
                        T::KIND.count(n)
                    ),
                    vec![
                        Button::primary("Yes, add them all", FlowCommand::SwitchToBatch),
                        Button::secondary("No, one at a time", FlowCommand::StaySingle),
                        Button::secondary("Cancel", FlowCommand::Close),
                    ],
                );
            }
        }
    }

    /// Fill the partial entry from `parsed`, then ask for the next missing
    /// field or add the finished item.
    fn advance_or_build(&mut self, parsed: Option<Candidate<T>>) {
        let fields = T::fields();

        if let Some(candidate) = &parsed {
            if candidate.entity.is_complete() {
                let candidate = candidate.clone();
                self.add_single(candidate);
                return;
            }
            for f in fields {
                if let Some(value) = candidate.entity.field_value(f.key) {
                    self.state
                        .partial
                        .values
                        .entry(f.key.to_string())
                        .or_insert(value);
                }
            }
        }

        let next = fields
            .iter()
            .position(|f| !self.state.partial.values.contains_key(f.key));
        match next {
            Some(index) => {
                self.state.partial.field_index = index;
                self.set_step(FlowStep::CollectInput);
                self.reprompt(fields[index].prompt);
            }
            None => match T::from_fields(&self.state.partial.values) {
                Ok(entity) => self.add_single(Candidate::valid(entity)),
                Err(e) => {
                    debug!(session = %self.id, error = %e, "Collected fields don't form an entity");
                    self.state.partial = PartialEntry::default();
                    self.set_step(FlowStep::CollectInput);
                    let prompt = fields.first().map(|f| f.prompt).unwrap_or_default();
                    let name = parsed
                        .map(|c| format!("{}: ", c.entity.display_name()))
                        .unwrap_or_default();
                    self.reprompt(format!("{name}{e} Let's start that one again. {prompt}"));
                }
            },
        }
    }

    /// Surface an item the parser rejected and start it over.
    fn reject_single(&mut self, candidate: &Candidate<T>) {
        let reason = candidate.error.clone().unwrap_or_default();
        info!(session = %self.id, reason = %reason, "Single entry rejected");
        self.state.partial = PartialEntry::default();
        self.set_step(FlowStep::CollectInput);
        let prompt = T::fields().first().map(|f| f.prompt).unwrap_or_default();
        let name = candidate.entity.display_name();
        let subject = if name.trim().is_empty() {
            String::new()
        } else {
            format!("{name}: ")
        };
        self.reprompt(format!("{subject}{}. {prompt}", reason.trim_end_matches('.')));
    }

    /// Add one finished single-mode item and show the list.
    fn add_single(&mut self, candidate: Candidate<T>) {
        let candidate = candidate.revalidated();
        if !candidate.valid {
            self.reject_single(&candidate);
            return;
        }
        self.state.partial = PartialEntry::default();

        let key = candidate.entity.identity_key();
        if self
            .state
            .working_set
            .iter()
            .any(|c| c.entity.identity_key() == key)
        {
            let note = format!(
                "{} is already on the list.",
                candidate.entity.display_name()
            );
            self.present_table(Some(note));
            return;
        }

        info!(session = %self.id, name = %candidate.entity.display_name(), "Added to working set");
        self.state.working_set.push(candidate);
        self.present_table(None);
    }

    pub(super) fn accept_batch_switch(&mut self) {
        let pending = std::mem::take(&mut self.state.pending_batch);
        info!(session = %self.id, count = pending.len(), "Switched to batch mode");
        self.state.mode = Some(FlowMode::Batch);
        self.state.partial = PartialEntry::default();
        self.merge_into_working_set(pending, None);
    }

    /// Keep collecting the same field one item at a time.
    pub(super) fn decline_batch_switch(&mut self) {
        self.state.pending_batch.clear();
        self.set_step(FlowStep::CollectInput);
        let prompt = T::fields()
            .get(self.state.partial.field_index)
            .map(|f| f.prompt)
            .unwrap_or_default();
        self.reprompt(format!("OK, one at a time. {prompt}"));
    }

    /// A whole pasted list.
    pub(super) async fn collect_batch(&mut self, text: &str) {
        if text.is_empty() {
            self.reprompt(format!("Send me some {} to add.", T::KIND.plural()));
            return;
        }

        self.set_step(FlowStep::Parse);
        self.begin_remote(format!("Reading your {}…", T::KIND.plural()));
        let parsed = self.parser.parse_from_text(text).await;
        self.end_remote();

        let outcome = match parsed {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session = %self.id, error = %e, "Batch parse failed");
                self.set_step(FlowStep::CollectInputBatch);
                self.reprompt(format!(
                    "I couldn't read that list just now ({e}). Nothing was lost: send the same \
                     text again in a moment."
                ));
                return;
            }
        };

        if outcome.candidates.is_empty() {
            self.set_step(FlowStep::CollectInputBatch);
            let message = if outcome.message.trim().is_empty() {
                format!(
                    "I couldn't find any {} in that. For example: \"{}\"",
                    T::KIND.plural(),
                    T::BATCH_EXAMPLE
                )
            } else {
                outcome.message
            };
            self.reprompt(message);
            return;
        }

        let max = self.config.max_batch_candidates;
        if outcome.candidates.len() > max {
            warn!(session = %self.id, count = outcome.candidates.len(), max, "Batch too large");
            self.set_step(FlowStep::CollectInputBatch);
            self.reprompt(format!(
                "That's {}. I can take up to {max} at a time, so please send a shorter list.",
                T::KIND.count(outcome.candidates.len())
            ));
            return;
        }

        info!(session = %self.id, count = outcome.candidates.len(), "Batch parsed");
        let lead = Some(outcome.message).filter(|m| !m.trim().is_empty());
        self.merge_into_working_set(outcome.candidates, lead);
    }

    /// Append, revalidate, drop duplicates, and show the list.
    fn merge_into_working_set(&mut self, incoming: Vec<Candidate<T>>, lead: Option<String>) {
        let mut merged = std::mem::take(&mut self.state.working_set);
        merged.extend(incoming.into_iter().map(Candidate::revalidated));
        let (kept, notices) = dedupe(merged);
        self.state.working_set = kept;

        let mut lines: Vec<String> = lead.into_iter().collect();
        lines.extend(notices);
        let note = Some(lines.join("\n")).filter(|n| !n.is_empty());
        self.present_table(note);
    }
}
