//! Flow state machine: which step a session is in and what it holds.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::directory::{Context, SubContext, Usage};

use super::model::{Candidate, ExecutionResult, OnboardingEntity};

/// Steps of a bulk-onboarding session.
///
/// Main path: ChooseMode → ResolveContext → CheckQuota → CollectInput(Batch)
/// → Parse → ConfirmTable ⇄ Modify → Execute (⇄ AwaitPlacement) → Complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    ChooseMode,
    ResolveContext,
    CheckQuota,
    CollectInput,
    CollectInputBatch,
    Parse,
    ConfirmSwitchToBatch,
    ConfirmTable,
    Modify,
    ChooseRemoval,
    Execute,
    AwaitPlacement,
    Complete,
    Halted,
    Closed,
}

impl FlowStep {
    /// Check if a transition from `self` to `target` is valid.
    ///
    /// Staying in the same step (a re-prompt) is always allowed.
    pub fn can_transition_to(&self, target: FlowStep) -> bool {
        use FlowStep::*;
        if *self == target {
            return !matches!(self, Closed);
        }
        if target == Closed {
            return !matches!(self, Execute | Parse);
        }
        matches!(
            (self, target),
            (ChooseMode, ResolveContext)
                | (ResolveContext, CheckQuota)
                | (ResolveContext, CollectInput)
                | (ResolveContext, CollectInputBatch)
                | (ResolveContext, Halted)
                | (CheckQuota, CollectInput)
                | (CheckQuota, CollectInputBatch)
                | (CheckQuota, Halted)
                | (CollectInput, Parse)
                | (CollectInput, ConfirmTable)
                | (CollectInputBatch, Parse)
                | (CollectInputBatch, ConfirmTable)
                | (Parse, CollectInput)
                | (Parse, CollectInputBatch)
                | (Parse, ConfirmSwitchToBatch)
                | (Parse, ConfirmTable)
                | (ConfirmSwitchToBatch, ConfirmTable)
                | (ConfirmSwitchToBatch, CollectInput)
                | (ConfirmSwitchToBatch, CollectInputBatch)
                | (ConfirmTable, Modify)
                | (ConfirmTable, ChooseRemoval)
                | (ConfirmTable, CollectInput)
                | (ConfirmTable, CollectInputBatch)
                | (ConfirmTable, Execute)
                | (Modify, ConfirmTable)
                | (Modify, ChooseRemoval)
                | (Modify, CollectInput)
                | (Modify, CollectInputBatch)
                | (ChooseRemoval, ConfirmTable)
                | (ChooseRemoval, Modify)
                | (ChooseRemoval, CollectInput)
                | (ChooseRemoval, CollectInputBatch)
                | (Execute, AwaitPlacement)
                | (Execute, Complete)
                | (AwaitPlacement, Execute)
                | (Complete, CheckQuota)
                | (Complete, CollectInput)
                | (Complete, CollectInputBatch)
                | (Complete, ResolveContext)
        )
    }

    /// Whether the session is over for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Halted | Self::Closed)
    }

    /// Whether free text is meaningful in this step.
    pub fn accepts_text(&self) -> bool {
        matches!(
            self,
            Self::CollectInput
                | Self::CollectInputBatch
                | Self::ConfirmTable
                | Self::Modify
                | Self::ChooseRemoval
        )
    }
}

impl std::fmt::Display for FlowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ChooseMode => "choose_mode",
            Self::ResolveContext => "resolve_context",
            Self::CheckQuota => "check_quota",
            Self::CollectInput => "collect_input",
            Self::CollectInputBatch => "collect_input_batch",
            Self::Parse => "parse",
            Self::ConfirmSwitchToBatch => "confirm_switch_to_batch",
            Self::ConfirmTable => "confirm_table",
            Self::Modify => "modify",
            Self::ChooseRemoval => "choose_removal",
            Self::Execute => "execute",
            Self::AwaitPlacement => "await_placement",
            Self::Complete => "complete",
            Self::Halted => "halted",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// One at a time vs. a pasted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowMode {
    Single,
    Batch,
}

impl std::fmt::Display for FlowMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

/// Usage as read at the last quota check. Stale after the next check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub usage: Usage,
    pub fetched_at: DateTime<Utc>,
}

impl QuotaSnapshot {
    pub fn new(usage: Usage) -> Self {
        Self {
            usage,
            fetched_at: Utc::now(),
        }
    }
}

/// Valid candidates frozen at the moment execution began, plus progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan<T> {
    pub items: Vec<T>,
    /// Index of the next item to create.
    pub next: usize,
}

impl<T> ExecutionPlan<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items, next: 0 }
    }

    pub fn is_finished(&self) -> bool {
        self.next >= self.items.len()
    }
}

/// Single-mode progress on the item currently being described.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialEntry {
    pub field_index: usize,
    pub values: BTreeMap<String, String>,
}

/// Session-scoped aggregate owned by one `FlowEngine`. Never persisted.
#[derive(Debug, Clone)]
pub struct FlowState<T> {
    pub step: FlowStep,
    pub input_enabled: bool,
    pub mode: Option<FlowMode>,
    /// Context suggested by where the operator currently is.
    pub preferred_context: Option<String>,
    /// Choices from the last listing.
    pub contexts: Vec<Context>,
    pub context: Option<Context>,
    pub sub_contexts: Vec<SubContext>,
    pub quota: Option<QuotaSnapshot>,
    pub working_set: Vec<Candidate<T>>,
    pub partial: PartialEntry,
    /// Parsed candidates held while the operator decides on batch mode.
    pub pending_batch: Vec<Candidate<T>>,
    pub plan: Option<ExecutionPlan<T>>,
    pub results: Vec<ExecutionResult<T>>,
    /// Result index awaiting a placement decision.
    pub awaiting_placement: Option<usize>,
}

impl<T> Default for FlowState<T> {
    fn default() -> Self {
        Self {
            step: FlowStep::ChooseMode,
            input_enabled: false,
            mode: None,
            preferred_context: None,
            contexts: Vec::new(),
            context: None,
            sub_contexts: Vec::new(),
            quota: None,
            working_set: Vec::new(),
            partial: PartialEntry::default(),
            pending_batch: Vec::new(),
            plan: None,
            results: Vec::new(),
            awaiting_placement: None,
        }
    }
}

impl<T: OnboardingEntity> FlowState<T> {
    pub fn valid_count(&self) -> usize {
        self.working_set.iter().filter(|c| c.valid).count()
    }

    pub fn invalid_count(&self) -> usize {
        self.working_set.len() - self.valid_count()
    }

    /// Remaining headroom from the last snapshot; `None` when unlimited or unchecked.
    pub fn remaining_quota(&self) -> Option<u32> {
        self.quota.and_then(|q| q.usage.remaining())
    }

    /// Every row valid and the whole set within quota.
    pub fn can_confirm(&self) -> bool {
        !self.working_set.is_empty()
            && self.invalid_count() == 0
            && self
                .quota
                .map(|q| q.usage.allows(self.working_set.len()))
                .unwrap_or(true)
    }

    /// Forget everything collected for the current round; keep the context.
    pub fn reset_round(&mut self) {
        self.working_set.clear();
        self.partial = PartialEntry::default();
        self.pending_batch.clear();
        self.plan = None;
        self.results.clear();
        self.awaiting_placement = None;
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            step: self.step,
            input_enabled: self.input_enabled,
            mode: self.mode,
            context_id: self.context.as_ref().map(|c| c.id.clone()),
            context_name: self.context.as_ref().map(|c| c.name.clone()),
            candidates: self.working_set.len(),
            valid_candidates: self.valid_count(),
            results: self.results.len(),
            succeeded: self.results.iter().filter(|r| r.success).count(),
            quota_remaining: self.remaining_quota(),
        }
    }
}

/// Serializable summary of a `FlowState`, for drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub step: FlowStep,
    pub input_enabled: bool,
    pub mode: Option<FlowMode>,
    pub context_id: Option<String>,
    pub context_name: Option<String>,
    pub candidates: usize,
    pub valid_candidates: usize,
    pub results: usize,
    pub succeeded: usize,
    pub quota_remaining: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::workflows::Student;

    fn student(name: &str) -> Student {
        Student {
            name: name.to_string(),
            birthdate: "2010-01-01".to_string(),
        }
    }

    #[test]
    fn main_path_transitions() {
        use FlowStep::*;
        let path = [
            ChooseMode,
            ResolveContext,
            CheckQuota,
            CollectInputBatch,
            Parse,
            ConfirmTable,
            Modify,
            ConfirmTable,
            Execute,
            AwaitPlacement,
            Execute,
            Complete,
            CheckQuota,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} should transition to {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn invalid_transitions() {
        use FlowStep::*;
        // Skip the table
        assert!(!Parse.can_transition_to(Execute));
        // Leave execution except via placement or completion
        assert!(!Execute.can_transition_to(ConfirmTable));
        assert!(!Execute.can_transition_to(Closed));
        // Terminal
        assert!(!Halted.can_transition_to(ResolveContext));
        assert!(!Closed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(ChooseMode));
    }

    #[test]
    fn re_prompt_is_allowed() {
        assert!(FlowStep::CollectInput.can_transition_to(FlowStep::CollectInput));
        assert!(FlowStep::ConfirmTable.can_transition_to(FlowStep::ConfirmTable));
    }

    #[test]
    fn text_and_terminal_flags() {
        assert!(FlowStep::CollectInput.accepts_text());
        assert!(FlowStep::ConfirmTable.accepts_text());
        assert!(!FlowStep::AwaitPlacement.accepts_text());
        assert!(!FlowStep::Complete.accepts_text());
        assert!(FlowStep::Halted.is_terminal());
        assert!(!FlowStep::Complete.is_terminal());
    }

    #[test]
    fn display_matches_serde() {
        use FlowStep::*;
        for step in [
            ChooseMode,
            ResolveContext,
            CheckQuota,
            CollectInput,
            CollectInputBatch,
            Parse,
            ConfirmSwitchToBatch,
            ConfirmTable,
            Modify,
            ChooseRemoval,
            Execute,
            AwaitPlacement,
            Complete,
            Halted,
            Closed,
        ] {
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(format!("\"{step}\""), json, "mismatch for {step:?}");
        }
    }

    #[test]
    fn can_confirm_respects_quota_and_validity() {
        let mut state = FlowState::<Student>::default();
        assert!(!state.can_confirm(), "empty set never confirms");

        state.working_set = vec![Candidate::valid(student("A")), Candidate::valid(student("B"))];
        assert!(state.can_confirm(), "no quota snapshot means unconstrained");

        state.quota = Some(QuotaSnapshot::new(Usage {
            current: 9,
            limit: Some(10),
        }));
        assert!(!state.can_confirm());

        state.quota = Some(QuotaSnapshot::new(Usage {
            current: 9,
            limit: None,
        }));
        assert!(state.can_confirm(), "null limit is unlimited");

        state.working_set.push(Candidate::invalid(student("C"), "Name rejected"));
        assert!(!state.can_confirm());
    }

    #[test]
    fn reset_round_keeps_context() {
        let mut state = FlowState::<Student>::default();
        state.context = Some(Context {
            id: "c1".into(),
            name: "Room 1".into(),
            scope: crate::directory::ContextScope::Classroom,
            capacity_limit: Some(30),
            current_usage: 3,
        });
        state.working_set.push(Candidate::valid(student("A")));
        state.results.push(ExecutionResult::created(student("A"), "s-1"));
        state.plan = Some(ExecutionPlan::new(vec![student("A")]));

        state.reset_round();
        assert!(state.working_set.is_empty());
        assert!(state.results.is_empty());
        assert!(state.plan.is_none());
        assert!(state.context.is_some());
    }

    #[test]
    fn plan_progress() {
        let mut plan = ExecutionPlan::new(vec![student("A"), student("B")]);
        assert!(!plan.is_finished());
        plan.next = 2;
        assert!(plan.is_finished());
    }
}
