//! Button commands: the engine's small, typed command protocol.

use serde::{Deserialize, Serialize};

use super::state::FlowMode;

/// What a button does when pressed.
///
/// Only meaningful to the engine that offered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowCommand {
    ChooseMode { mode: FlowMode },
    SelectContext { id: String },
    /// Re-run the remote call that failed in the current step.
    Retry,
    SwitchToBatch,
    StaySingle,
    Confirm,
    Modify,
    AddAnother,
    OfferRemoval,
    RemoveRow { index: usize },
    ToggleRole { index: usize },
    BackToTable,
    AssignPlacement {
        result: usize,
        sub_context_id: Option<String>,
    },
    AddMore,
    PickDifferentContext,
    Close,
}

impl std::fmt::Display for FlowCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChooseMode { mode } => write!(f, "choose_mode:{mode}"),
            Self::SelectContext { id } => write!(f, "select_context:{id}"),
            Self::Retry => write!(f, "retry"),
            Self::SwitchToBatch => write!(f, "switch_to_batch"),
            Self::StaySingle => write!(f, "stay_single"),
            Self::Confirm => write!(f, "confirm"),
            Self::Modify => write!(f, "modify"),
            Self::AddAnother => write!(f, "add_another"),
            Self::OfferRemoval => write!(f, "offer_removal"),
            Self::RemoveRow { index } => write!(f, "remove_row:{index}"),
            Self::ToggleRole { index } => write!(f, "toggle_role:{index}"),
            Self::BackToTable => write!(f, "back_to_table"),
            Self::AssignPlacement {
                result,
                sub_context_id,
            } => write!(
                f,
                "assign_placement:{result}:{}",
                sub_context_id.as_deref().unwrap_or("skip")
            ),
            Self::AddMore => write!(f, "add_more"),
            Self::PickDifferentContext => write!(f, "pick_different_context"),
            Self::Close => write!(f, "close"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_is_tagged() {
        let cmd = FlowCommand::AssignPlacement {
            result: 2,
            sub_context_id: None,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["kind"], "assign_placement");
        assert_eq!(json["result"], 2);

        let parsed: FlowCommand =
            serde_json::from_str(r#"{"kind": "select_context", "id": "org-1"}"#).unwrap();
        assert_eq!(
            parsed,
            FlowCommand::SelectContext {
                id: "org-1".into()
            }
        );
    }

    #[test]
    fn display_reads_like_a_command_string() {
        assert_eq!(
            FlowCommand::AssignPlacement {
                result: 0,
                sub_context_id: Some("sch-4".into())
            }
            .to_string(),
            "assign_placement:0:sch-4"
        );
        assert_eq!(
            FlowCommand::ChooseMode {
                mode: FlowMode::Batch
            }
            .to_string(),
            "choose_mode:batch"
        );
    }
}
