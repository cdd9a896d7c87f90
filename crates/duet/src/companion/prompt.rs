//! Prompt template for the companion model
//!
//! The template is plain text with a `{user_text}` placeholder that receives
//! the caller's most recent user message.

use crate::config::USER_TEXT_PLACEHOLDER;

/// Template used when neither `prompt_template` nor `prompt_file` is configured
///
/// Placeholder: {user_text} - the latest user message of the inbound request
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"Another assistant is answering the following message in full.

Message:
{user_text}

Add one short, complementary note the main answer is likely to miss: a caveat, an alternative, or a useful follow-up. Reply with the note only."#;

/// Substitute the user text into every placeholder of the template
pub fn build_companion_prompt(template: &str, user_text: &str) -> String {
    template.replace(USER_TEXT_PLACEHOLDER, user_text)
}
