//! Roster Onboard: conversational bulk onboarding for school rosters.

pub mod config;
pub mod directory;
pub mod error;
pub mod llm;
pub mod onboarding;
pub mod parser;
