//! Prompts for entity extraction and correction, plus response cleanup.

use crate::onboarding::model::{EntityKind, OnboardingEntity};

fn rules(kind: EntityKind) -> String {
    format!(
        "Rules:\n\
         - Extract every {singular} mentioned; keep them in the order given.\n\
         - Leave a field as an empty string when it isn't mentioned. Missing fields are not errors.\n\
         - Set \"valid\": false with a short \"error\" only when a provided value is unacceptable \
           (offensive or non-name text, impossible date, malformed email).\n\
         - Otherwise set \"valid\": true and \"error\": null.\n\
         - Never invent {plural} that are not in the text.",
        singular = kind.singular(),
        plural = kind.plural(),
    )
}

/// System prompt for parse-from-scratch.
pub fn parse_system_prompt<T: OnboardingEntity>() -> String {
    let kind = T::KIND;
    format!(
        "You extract {plural} for a school-management system from free text.\n\n\
         Each {singular} is a JSON object shaped like:\n{schema}\n\n\
         {rules}\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"candidates\": [ ...objects with \"valid\" and \"error\" added... ], \
           \"message\": \"one friendly sentence for the operator\"}}\n\
         If no {plural} are present, return an empty candidates array and use the \
         message to explain what you need.",
        plural = kind.plural(),
        singular = kind.singular(),
        schema = T::SCHEMA,
        rules = rules(kind),
    )
}

/// System prompt for applying a correction to the full working set.
pub fn modification_system_prompt<T: OnboardingEntity>() -> String {
    let kind = T::KIND;
    format!(
        "You edit a list of {plural} for a school-management system.\n\n\
         Each {singular} is a JSON object shaped like:\n{schema}\n\n\
         You receive the COMPLETE current list and an instruction. Apply the \
         instruction and return the COMPLETE resulting list, unchanged rows included, \
         in the same order.\n\n\
         {rules}\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"action\": \"applied\" | \"unclear\", \"candidates\": [...], \
           \"message\": \"one sentence describing what changed or what is unclear\"}}\n\
         Use \"unclear\" when you cannot tell which {singular} or which change is meant; \
         in that case return the list exactly as received.",
        plural = kind.plural(),
        singular = kind.singular(),
        schema = T::SCHEMA,
        rules = rules(kind),
    )
}

/// User prompt for a correction: current list + instruction.
pub fn modification_user_prompt(current_json: &str, instruction: &str) -> String {
    format!("Current list:\n{current_json}\n\nInstruction: {instruction}")
}

/// Extract a JSON object from model output that might contain markdown or extra text.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    // Fenced block
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }

    // Outermost braces
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::workflows::{Student, Teacher};

    #[test]
    fn extract_direct_object() {
        let input = r#"{"candidates": [], "message": "none"}"#;
        assert_eq!(extract_json_object(input), Some(input));
    }

    #[test]
    fn extract_from_markdown_fence() {
        let input = "Sure:\n```json\n{\"candidates\": []}\n```\nanything else?";
        assert_eq!(extract_json_object(input), Some("{\"candidates\": []}"));
    }

    #[test]
    fn extract_with_surrounding_text() {
        let input = "Here you go {\"message\": \"ok\"} hope that helps";
        assert_eq!(extract_json_object(input), Some("{\"message\": \"ok\"}"));
    }

    #[test]
    fn extract_gives_up_without_braces() {
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn prompts_mention_kind_and_schema() {
        let p = parse_system_prompt::<Student>();
        assert!(p.contains("students"));
        assert!(p.contains("birthdate"));

        let m = modification_system_prompt::<Teacher>();
        assert!(m.contains("COMPLETE"));
        assert!(m.contains("\"unclear\""));
        assert!(m.contains("email"));
    }
}
