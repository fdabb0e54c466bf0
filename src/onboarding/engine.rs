//! FlowEngine: one bulk-onboarding session.
//!
//! The engine owns the `FlowState` and the `MessageLog`, and is the only
//! caller of the parser and directory. Drivers feed it text and button
//! commands; every call returns the messages it emitted plus a snapshot.
//! Errors never escape `handle_user_text` / `handle_button`: each failure
//! path ends in an assistant message and a defined next step.
//!
//! Step logic is split across `collect.rs`, `review.rs`, and `execute.rs`.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FlowConfig;
use crate::directory::Directory;
use crate::parser::EntityParser;

use super::command::FlowCommand;
use super::message::{Button, Message, MessageLog};
use super::model::OnboardingEntity;
use super::state::{FlowMode, FlowSnapshot, FlowState, FlowStep, QuotaSnapshot};

/// Pushed to subscribers after every handled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// The full current transcript.
    Messages { messages: Vec<Message> },
    StateChanged { state: FlowSnapshot },
}

/// What one handled event produced.
#[derive(Debug, Clone, Serialize)]
pub struct FlowUpdate {
    /// Messages appended during this call that are still in the log.
    pub emitted: Vec<Message>,
    pub state: FlowSnapshot,
}

/// Bulk-onboarding state machine for one entity kind.
pub struct FlowEngine<T: OnboardingEntity> {
    pub(super) id: Uuid,
    pub(super) config: FlowConfig,
    pub(super) parser: Arc<dyn EntityParser<T>>,
    pub(super) directory: Arc<dyn Directory>,
    pub(super) state: FlowState<T>,
    pub(super) log: MessageLog,
    events: broadcast::Sender<FlowEvent>,
}

impl<T: OnboardingEntity> FlowEngine<T> {
    pub fn new(
        parser: Arc<dyn EntityParser<T>>,
        directory: Arc<dyn Directory>,
        config: FlowConfig,
    ) -> Self {
        let (events, _rx) = broadcast::channel(config.event_capacity.max(1));
        let log = MessageLog::new(config.history_limit);
        Self {
            id: Uuid::new_v4(),
            config,
            parser,
            directory,
            state: FlowState::default(),
            log,
            events,
        }
    }

    /// Suggest a context inferred from where the operator currently is.
    pub fn with_preferred_context(mut self, context_id: impl Into<String>) -> Self {
        self.state.preferred_context = Some(context_id.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &FlowState<T> {
        &self.state
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        self.state.snapshot()
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    /// Whether a button with this command is currently live.
    pub fn is_offered(&self, command: &FlowCommand) -> bool {
        self.log.is_offered(command)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    /// Open the session: offer one-at-a-time vs batch.
    pub async fn start(&mut self) -> FlowUpdate {
        let before = self.message_ids();
        info!(session = %self.id, kind = %T::KIND, "Flow started");
        self.set_step(FlowStep::ChooseMode);
        let plural = T::KIND.plural();
        self.say_with(
            format!("Let's add some {plural}. How would you like to enter them?"),
            vec![
                Button::primary(
                    "One at a time",
                    FlowCommand::ChooseMode {
                        mode: FlowMode::Single,
                    },
                ),
                Button::secondary(
                    format!("Paste a list of {plural}"),
                    FlowCommand::ChooseMode {
                        mode: FlowMode::Batch,
                    },
                ),
                Button::secondary("Cancel", FlowCommand::Close),
            ],
        );
        self.finish(before)
    }

    /// Free text from the operator.
    pub async fn handle_user_text(&mut self, text: &str) -> FlowUpdate {
        let before = self.message_ids();

        if !self.state.input_enabled || !self.state.step.accepts_text() {
            debug!(session = %self.id, step = %self.state.step, "Ignoring text while input is disabled");
            return self.finish(before);
        }

        let text = text.trim();
        // Earlier buttons point at rows that this text may change.
        self.log.retire_buttons();
        self.log.push(Message::user(text));

        match self.state.step {
            FlowStep::CollectInput => self.collect_single(text).await,
            FlowStep::CollectInputBatch => self.collect_batch(text).await,
            FlowStep::ConfirmTable | FlowStep::Modify | FlowStep::ChooseRemoval => {
                self.modify(text).await
            }
            _ => {}
        }

        self.finish(before)
    }

    /// A button press. Commands that are not currently offered are ignored.
    pub async fn handle_button(&mut self, command: FlowCommand) -> FlowUpdate {
        let before = self.message_ids();

        let Some(label) = self.log.offered(&command).map(|b| b.label.clone()) else {
            debug!(session = %self.id, %command, "Ignoring command that is not offered");
            return self.finish(before);
        };
        self.log.retire_buttons();
        self.log.push(Message::user(label));
        debug!(session = %self.id, %command, "Handling command");

        match command {
            FlowCommand::ChooseMode { mode } => self.choose_mode(mode).await,
            FlowCommand::SelectContext { id } => self.select_context(&id).await,
            FlowCommand::Retry => self.retry().await,
            FlowCommand::SwitchToBatch => self.accept_batch_switch(),
            FlowCommand::StaySingle => self.decline_batch_switch(),
            FlowCommand::Confirm => self.confirm().await,
            FlowCommand::Modify => self.begin_modify(),
            FlowCommand::AddAnother => self.begin_collection(None),
            FlowCommand::OfferRemoval => self.offer_removal(),
            FlowCommand::RemoveRow { index } => self.remove_row(index),
            FlowCommand::ToggleRole { index } => self.toggle_role(index),
            FlowCommand::BackToTable => self.present_table(None),
            FlowCommand::AssignPlacement {
                result,
                sub_context_id,
            } => self.assign_placement(result, sub_context_id).await,
            FlowCommand::AddMore => self.add_more().await,
            FlowCommand::PickDifferentContext => self.pick_different_context().await,
            FlowCommand::Close => self.close(),
        }

        self.finish(before)
    }

    // ── Mode, context, quota ────────────────────────────────────────

    async fn choose_mode(&mut self, mode: FlowMode) {
        info!(session = %self.id, %mode, "Mode chosen");
        self.state.mode = Some(mode);
        self.resolve_context().await;
    }

    /// List contexts and pick one: silently if unambiguous, otherwise ask.
    pub(super) async fn resolve_context(&mut self) {
        self.set_step(FlowStep::ResolveContext);
        let scope = T::CONTEXT_SCOPE;

        self.begin_remote(format!("Loading your {}…", scope.plural()));
        let listed = self.directory.list_contexts(scope).await;
        self.end_remote();

        let contexts = match listed {
            Ok(contexts) => contexts,
            Err(e) => {
                warn!(session = %self.id, error = %e, "Failed to list contexts");
                self.say_with(
                    format!(
                        "I couldn't load your {}: {e}. Try again in a moment, or contact your \
                         administrator if this keeps happening.",
                        scope.plural()
                    ),
                    vec![
                        Button::primary("Try again", FlowCommand::Retry),
                        Button::secondary("Cancel", FlowCommand::Close),
                    ],
                );
                return;
            }
        };

        if contexts.is_empty() {
            info!(session = %self.id, "No contexts available");
            self.say(format!(
                "There's no {} you can add {} to yet. Ask an administrator to set one up, \
                 then start again.",
                scope.singular(),
                T::KIND.plural()
            ));
            self.set_step(FlowStep::Halted);
            return;
        }

        self.state.contexts = contexts;
        let preferred = self
            .state
            .preferred_context
            .as_ref()
            .and_then(|id| self.state.contexts.iter().find(|c| &c.id == id))
            .cloned();

        match (self.state.contexts.len(), preferred) {
            (1, _) => {
                let id = self.state.contexts[0].id.clone();
                self.select_context(&id).await;
            }
            (_, Some(preferred)) => {
                let mut buttons = vec![Button::primary(
                    format!("Yes, {}", preferred.name),
                    FlowCommand::SelectContext {
                        id: preferred.id.clone(),
                    },
                )];
                buttons.extend(
                    self.state
                        .contexts
                        .iter()
                        .filter(|c| c.id != preferred.id)
                        .map(|c| {
                            Button::secondary(
                                c.name.clone(),
                                FlowCommand::SelectContext { id: c.id.clone() },
                            )
                        }),
                );
                buttons.push(Button::secondary("Cancel", FlowCommand::Close));
                self.say_with(
                    format!(
                        "Add these {} to {}?",
                        T::KIND.plural(),
                        preferred.name
                    ),
                    buttons,
                );
            }
            _ => {
                let mut buttons: Vec<Button> = self
                    .state
                    .contexts
                    .iter()
                    .map(|c| Button::new(c.name.clone(), FlowCommand::SelectContext { id: c.id.clone() }))
                    .collect();
                buttons.push(Button::secondary("Cancel", FlowCommand::Close));
                self.say_with(
                    format!(
                        "Which {} should the new {} join?",
                        scope.singular(),
                        T::KIND.plural()
                    ),
                    buttons,
                );
            }
        }
    }

    async fn select_context(&mut self, id: &str) {
        let Some(context) = self.state.contexts.iter().find(|c| c.id == id).cloned() else {
            warn!(session = %self.id, context = id, "Selected context is not in the listing");
            self.say_with(
                format!("That {} is no longer available.", T::CONTEXT_SCOPE.singular()),
                vec![
                    Button::primary("Reload the list", FlowCommand::Retry),
                    Button::secondary("Cancel", FlowCommand::Close),
                ],
            );
            return;
        };
        info!(session = %self.id, context = %context.id, name = %context.name, "Context selected");
        self.state.context = Some(context.clone());
        self.state.sub_contexts.clear();

        if T::PLACEMENT {
            self.begin_remote("Loading placement options…");
            let listed = self.directory.list_sub_contexts(&context.id).await;
            self.end_remote();
            match listed {
                Ok(subs) => self.state.sub_contexts = subs,
                Err(e) => {
                    warn!(session = %self.id, error = %e, "Failed to list sub-contexts");
                    self.say(format!(
                        "I couldn't load the places inside {} ({e}). New {} will still be \
                         created, but I won't ask where to place them.",
                        context.name,
                        T::KIND.plural()
                    ));
                }
            }
        }

        if T::USES_QUOTA {
            self.check_quota().await;
        } else {
            self.begin_collection(None);
        }
    }

    /// Re-read usage before any input; the count is shared with other sessions.
    pub(super) async fn check_quota(&mut self) {
        self.set_step(FlowStep::CheckQuota);
        let Some(context) = self.state.context.clone() else {
            warn!(session = %self.id, "Quota check without a selected context");
            self.say("I lost track of where these should go. Please start again.");
            self.set_step(FlowStep::Halted);
            return;
        };

        self.begin_remote(format!("Checking capacity for {}…", context.name));
        let usage = self.directory.get_usage(&context.id).await;
        self.end_remote();

        let usage = match usage {
            Ok(usage) => usage,
            Err(e) => {
                warn!(session = %self.id, error = %e, "Failed to fetch usage");
                self.say_with(
                    format!(
                        "I couldn't check how many {} {} has room for: {e}. Try again, or \
                         contact your administrator.",
                        T::KIND.plural(),
                        context.name
                    ),
                    vec![
                        Button::primary("Try again", FlowCommand::Retry),
                        Button::secondary("Cancel", FlowCommand::Close),
                    ],
                );
                return;
            }
        };

        self.state.quota = Some(QuotaSnapshot::new(usage));
        info!(
            session = %self.id,
            current = usage.current,
            limit = ?usage.limit,
            "Quota checked"
        );

        if usage.is_exhausted() {
            self.say_with(
                format!(
                    "{} has reached its limit of {} ({} in use). Remove some first or ask an \
                     administrator to raise the limit.",
                    context.name,
                    T::KIND.count(usage.limit.unwrap_or_default() as usize),
                    usage.current
                ),
                vec![Button::secondary("Close", FlowCommand::Close)],
            );
            self.set_step(FlowStep::Halted);
            return;
        }

        let note = usage.remaining().map(|r| {
            let noun = if r == 1 {
                T::KIND.singular()
            } else {
                T::KIND.plural()
            };
            format!("{} has room for {r} more {noun}.", context.name)
        });
        self.begin_collection(note);
    }

    async fn retry(&mut self) {
        match self.state.step {
            FlowStep::ResolveContext => self.resolve_context().await,
            FlowStep::CheckQuota => self.check_quota().await,
            step => debug!(session = %self.id, %step, "Nothing to retry"),
        }
    }

    async fn add_more(&mut self) {
        info!(session = %self.id, "Adding more to the same context");
        self.state.reset_round();
        if T::USES_QUOTA {
            self.check_quota().await;
        } else {
            self.begin_collection(None);
        }
    }

    async fn pick_different_context(&mut self) {
        self.state.reset_round();
        self.state.context = None;
        self.state.sub_contexts.clear();
        self.state.quota = None;
        self.state.preferred_context = None;
        self.resolve_context().await;
    }

    fn close(&mut self) {
        info!(session = %self.id, step = %self.state.step, "Flow closed");
        self.say("Closed. Anything already created stays in place.");
        self.set_step(FlowStep::Closed);
    }

    // ── Shared helpers ──────────────────────────────────────────────

    pub(super) fn set_step(&mut self, step: FlowStep) {
        let from = self.state.step;
        if from == step {
            return;
        }
        if !from.can_transition_to(step) {
            warn!(session = %self.id, %from, to = %step, "Unexpected step transition");
        }
        debug!(session = %self.id, %from, to = %step, "Step");
        self.state.step = step;
    }

    pub(super) fn say(&mut self, text: impl Into<String>) {
        self.log.push(Message::assistant(text));
    }

    pub(super) fn say_with(&mut self, text: impl Into<String>, buttons: Vec<Button>) {
        self.log.push(Message::assistant(text).with_buttons(buttons));
    }

    /// Disable input and show a progress line before a remote call.
    pub(super) fn begin_remote(&mut self, label: impl Into<String>) {
        self.state.input_enabled = false;
        self.log.push(Message::progress(label));
        self.publish();
    }

    /// Drop the progress line once the remote call has resolved.
    pub(super) fn end_remote(&mut self) {
        if self.log.clear_transient() {
            debug!(session = %self.id, "Cleared progress message");
        }
    }

    fn message_ids(&self) -> HashSet<Uuid> {
        self.log.messages().iter().map(|m| m.id).collect()
    }

    fn finish(&mut self, before: HashSet<Uuid>) -> FlowUpdate {
        self.log.clear_transient();
        self.state.input_enabled = self.state.step.accepts_text();
        self.publish();
        FlowUpdate {
            emitted: self
                .log
                .messages()
                .iter()
                .filter(|m| !before.contains(&m.id))
                .cloned()
                .collect(),
            state: self.state.snapshot(),
        }
    }

    fn publish(&self) {
        // No subscribers is fine.
        let _ = self.events.send(FlowEvent::Messages {
            messages: self.log.messages().to_vec(),
        });
        let _ = self.events.send(FlowEvent::StateChanged {
            state: self.state.snapshot(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_event_is_tagged_by_type() {
        let event = FlowEvent::Messages {
            messages: vec![Message::assistant("hi")],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "messages");
        assert_eq!(json["messages"][0]["text"], "hi");

        let state = FlowState::<crate::onboarding::workflows::Student>::default().snapshot();
        let json = serde_json::to_value(FlowEvent::StateChanged { state }).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["state"]["step"], "choose_mode");
    }
}
