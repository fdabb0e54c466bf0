//! Concrete onboarding workflows: one `OnboardingEntity` per role.

pub mod classroom;
pub mod student;
pub mod teacher;

pub use classroom::Classroom;
pub use student::{Student, parse_birthdate};
pub use teacher::{StaffRole, Teacher};

/// Trim and collapse internal whitespace.
pub(crate) fn tidy_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Shared local check for a person or room name.
pub(crate) fn check_name(raw: &str, max_len: usize) -> Result<String, String> {
    let name = tidy_name(raw);
    if name.is_empty() {
        return Err("The name can't be empty.".to_string());
    }
    if !name.chars().any(char::is_alphabetic) {
        return Err(format!("'{name}' doesn't look like a name."));
    }
    if name.chars().count() > max_len {
        return Err(format!("Names are limited to {max_len} characters."));
    }
    Ok(name)
}
