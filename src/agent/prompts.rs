//! Prompt templates for the three agent roles.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the persona instructions live server-side
//!    with each agent; what varies per turn is exactly which context blocks
//!    the message carries, and that is decided in one place.
//!
//! 2. **Testability** — unit tests assert which blocks each role receives
//!    without spinning up an agent service.
//!
//! The three templates differ only in their blocks: the Analyst sees the
//! running extract *and* the Reviewer's feedback, the Reviewer sees the
//! extract it must judge (feedback would be its own prior output), and the
//! Formatter sees nothing but the template and the converged extract.

use crate::agent::AgentRole;

/// Divider between context blocks. Wide enough that block boundaries survive
/// whatever whitespace normalisation the model applies.
const BLOCK_DIVIDER: &str = "\n\n-------------------------------------------------------\n\n";

/// Inputs available to a prompt build. All values are pre-rendered strings;
/// the caller decides how JSON values become text.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    /// Target schema (Analyst/Reviewer) or format template (Formatter).
    pub schema: &'a str,
    pub ocr_text: &'a str,
    pub key_values: &'a str,
    pub current_extract: &'a str,
    pub current_feedback: &'a str,
}

/// Build the user-message text for one turn of the given role.
pub fn build_prompt(role: AgentRole, inputs: &PromptInputs<'_>) -> String {
    let blocks: Vec<String> = match role {
        AgentRole::Analyst => vec![
            format!("## Target Schema: {}", inputs.schema),
            format!("## Document OCR Text: {}", inputs.ocr_text),
            format!("## Document Key-Value Pairs: {}", inputs.key_values),
            format!("## Current Extract: {}", inputs.current_extract),
            format!("## Current Feedback: {}", inputs.current_feedback),
        ],
        AgentRole::Reviewer => vec![
            format!("## Target Schema: {}", inputs.schema),
            format!("## Current Extract: {}", inputs.current_extract),
            format!("## Document OCR Text: {}", inputs.ocr_text),
            format!("## Document Key-Value Pairs: {}", inputs.key_values),
        ],
        AgentRole::Formatter => vec![
            format!("## Format Template: {}", inputs.schema),
            format!("## Current Extract: {}", inputs.current_extract),
        ],
    };
    blocks.join(BLOCK_DIVIDER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> PromptInputs<'static> {
        PromptInputs {
            schema: "{\"total\": \"number\"}",
            ocr_text: "INVOICE 123",
            key_values: "{\"Total\": \"9.50\"}",
            current_extract: "{\"total\": 9.5}",
            current_feedback: "{\"complete\": false}",
        }
    }

    #[test]
    fn analyst_prompt_carries_all_blocks() {
        let p = build_prompt(AgentRole::Analyst, &inputs());
        assert!(p.contains("## Target Schema:"));
        assert!(p.contains("## Document OCR Text: INVOICE 123"));
        assert!(p.contains("## Document Key-Value Pairs:"));
        assert!(p.contains("## Current Extract:"));
        assert!(p.contains("## Current Feedback:"));
    }

    #[test]
    fn reviewer_prompt_omits_feedback() {
        let p = build_prompt(AgentRole::Reviewer, &inputs());
        assert!(p.contains("## Target Schema:"));
        assert!(p.contains("## Current Extract:"));
        assert!(p.contains("## Document OCR Text:"));
        assert!(!p.contains("## Current Feedback:"));
    }

    #[test]
    fn formatter_prompt_is_template_and_extract_only() {
        let p = build_prompt(AgentRole::Formatter, &inputs());
        assert!(p.contains("## Format Template:"));
        assert!(p.contains("## Current Extract:"));
        assert!(!p.contains("OCR"));
        assert!(!p.contains("Key-Value"));
        assert!(!p.contains("Feedback"));
    }

    #[test]
    fn blocks_are_divider_separated() {
        let formatter = build_prompt(AgentRole::Formatter, &inputs());
        assert_eq!(formatter.matches(BLOCK_DIVIDER).count(), 1);

        let analyst = build_prompt(AgentRole::Analyst, &inputs());
        assert_eq!(analyst.matches(BLOCK_DIVIDER).count(), 4);
    }
}
