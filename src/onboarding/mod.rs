//! Bulk onboarding: conversational flows that add many teachers, students,
//! or classrooms at once.
//!
//! A `FlowEngine` drives one session through its steps: pick a mode, resolve
//! the target context, check capacity, collect free text, parse it into
//! candidates, let the operator review and correct them in a table, then
//! create them one by one. Everything role-specific lives behind the
//! `OnboardingEntity` trait in `workflows`.

mod collect;
pub mod command;
pub mod engine;
mod execute;
pub mod message;
pub mod model;
mod review;
pub mod routes;
pub mod session;
pub mod state;
pub mod workflows;

pub use command::FlowCommand;
pub use engine::{FlowEngine, FlowEvent, FlowUpdate};
pub use message::{Button, ButtonStyle, Message, MessageLog, MessageRole, Table};
pub use model::{Candidate, EntityKind, ExecutionResult, FieldSpec, OnboardingEntity, dedupe};
pub use routes::{FlowRouteState, flow_routes};
pub use session::{
    AnyFlow, FlowView, OpenedFlow, SessionDeps, SessionManager, spawn_expiry_sweep,
};
pub use state::{FlowMode, FlowSnapshot, FlowState, FlowStep};
pub use workflows::{Classroom, StaffRole, Student, Teacher};
