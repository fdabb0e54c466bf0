//! Sequential creation, per-item placement, and the completion summary.

use tracing::{debug, info, warn};

use super::command::FlowCommand;
use super::engine::FlowEngine;
use super::message::Button;
use super::model::{ExecutionResult, OnboardingEntity};
use super::state::{ExecutionPlan, FlowStep};

impl<T: OnboardingEntity> FlowEngine<T> {
    /// Freeze the valid rows into a plan and start creating them.
    pub(super) async fn confirm(&mut self) {
        if !self.state.can_confirm() {
            self.present_table(Some(
                "Some rows still need attention before I can add them.".to_string(),
            ));
            return;
        }

        let items: Vec<T> = self
            .state
            .working_set
            .iter()
            .filter(|c| c.valid)
            .map(|c| c.entity.clone())
            .collect();
        info!(session = %self.id, count = items.len(), "Execution confirmed");
        self.state.plan = Some(ExecutionPlan::new(items));
        self.state.results.clear();
        self.set_step(FlowStep::Execute);
        self.run_execution().await;
    }

    /// Create items from `plan.next` onward, one call at a time.
    ///
    /// Returns early when a created item needs a placement decision; the
    /// matching `assign_placement` resumes from the following item.
    async fn run_execution(&mut self) {
        let Some(context) = self.state.context.clone() else {
            warn!(session = %self.id, "Execution without a selected context");
            self.complete();
            return;
        };

        while let Some(plan) = self.state.plan.as_ref().filter(|plan| !plan.is_finished()) {
            let (index, total) = (plan.next, plan.items.len());
            let item = plan.items[index].clone();

            let name = item.display_name();
            self.begin_remote(format!("Adding {name} ({}/{total})…", index + 1));
            let created = self
                .directory
                .create_entity(&context.id, T::KIND, item.to_fields())
                .await;
            self.end_remote();

            let placed_next = match created {
                Ok(created) => {
                    info!(session = %self.id, index, id = %created.id, "Created");
                    self.state
                        .results
                        .push(ExecutionResult::created(item, created.id));
                    T::PLACEMENT && !self.state.sub_contexts.is_empty()
                }
                Err(e) => {
                    warn!(session = %self.id, index, error = %e, "Create failed");
                    self.say(format!("Couldn't add {name}: {e}"));
                    self.state
                        .results
                        .push(ExecutionResult::failed(item, e.to_string()));
                    false
                }
            };
            if let Some(plan) = self.state.plan.as_mut() {
                plan.next += 1;
            }

            if placed_next {
                self.offer_placement(self.state.results.len() - 1);
                return;
            }
        }

        self.complete();
    }

    fn offer_placement(&mut self, result: usize) {
        let name = self.state.results[result].entity.display_name();
        self.state.awaiting_placement = Some(result);
        self.set_step(FlowStep::AwaitPlacement);

        let mut buttons: Vec<Button> = self
            .state
            .sub_contexts
            .iter()
            .map(|sub| {
                Button::new(
                    sub.name.clone(),
                    FlowCommand::AssignPlacement {
                        result,
                        sub_context_id: Some(sub.id.clone()),
                    },
                )
            })
            .collect();
        buttons.push(Button::secondary(
            "Skip",
            FlowCommand::AssignPlacement {
                result,
                sub_context_id: None,
            },
        ));
        buttons.push(Button::secondary("Stop here", FlowCommand::Close));

        self.say_with(format!("{name} was added. Where should they be placed?"), buttons);
    }

    /// Apply (or skip) a placement, then carry on with the next item.
    pub(super) async fn assign_placement(&mut self, result: usize, sub_context_id: Option<String>) {
        if self.state.awaiting_placement != Some(result) {
            debug!(session = %self.id, result, "Placement for an item that isn't waiting");
            return;
        }
        self.state.awaiting_placement = None;
        self.set_step(FlowStep::Execute);

        if let Some(sub_id) = sub_context_id {
            self.place(result, &sub_id).await;
        } else {
            debug!(session = %self.id, result, "Placement skipped");
        }

        self.run_execution().await;
    }

    async fn place(&mut self, result: usize, sub_id: &str) {
        let Some(sub) = self
            .state
            .sub_contexts
            .iter()
            .find(|s| s.id == sub_id)
            .cloned()
        else {
            warn!(session = %self.id, sub_context = sub_id, "Unknown placement target");
            return;
        };
        let outcome = &self.state.results[result];
        let name = outcome.entity.display_name();
        let role = outcome.entity.role_hint();
        let Some(entity_id) = outcome.created_id.clone() else {
            return;
        };

        self.begin_remote(format!("Placing {name} in {}…", sub.name));
        let assigned = self
            .directory
            .assign_to_sub_context(&sub.id, &entity_id, role)
            .await;
        self.end_remote();

        match assigned {
            Ok(()) => {
                info!(session = %self.id, result, sub_context = %sub.id, "Placed");
                self.say(format!("{name} placed in {}.", sub.name));
                self.state.results[result].sub_context_assigned = Some(sub);
            }
            Err(e) => {
                warn!(session = %self.id, result, error = %e, "Placement failed");
                self.say(format!(
                    "I couldn't place {name} in {}: {e}. They were still added, and can be \
                     placed later.",
                    sub.name
                ));
            }
        }
    }

    /// Summarize the run and offer what to do next.
    fn complete(&mut self) {
        self.set_step(FlowStep::Complete);
        let results = &self.state.results;
        let added: Vec<String> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| match &r.sub_context_assigned {
                Some(sub) => format!("• {} → {}", r.entity.display_name(), sub.name),
                None => format!("• {}", r.entity.display_name()),
            })
            .collect();
        let succeeded = added.len();
        let failed: Vec<String> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| {
                format!(
                    "• {}: {}",
                    r.entity.display_name(),
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        let placed = results
            .iter()
            .filter(|r| r.sub_context_assigned.is_some())
            .count();
        let context = self
            .state
            .context
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_default();

        info!(
            session = %self.id,
            succeeded,
            failed = failed.len(),
            placed,
            "Execution complete"
        );

        let mut lines = vec![format!("Added {} to {context}.", T::KIND.count(succeeded))];
        lines.extend(added);
        if placed > 0 {
            lines.push(format!("{placed} placed."));
        }
        if !failed.is_empty() {
            lines.push(format!("{} couldn't be added:", failed.len()));
            lines.extend(failed);
        }

        self.say_with(
            lines.join("\n"),
            vec![
                Button::primary(format!("Add more {}", T::KIND.plural()), FlowCommand::AddMore),
                Button::secondary(
                    format!("Choose a different {}", T::CONTEXT_SCOPE.singular()),
                    FlowCommand::PickDifferentContext,
                ),
                Button::secondary("Done", FlowCommand::Close),
            ],
        );
    }
}
