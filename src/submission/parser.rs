use std::sync::LazyLock;

use regex::Regex;

use crate::error::RoundupError;

static NAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Name:\s*(\S.*)$").expect("static regex"));
static NUMBER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Number:\s*(\S.*)$").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionDetails {
    pub display_name: String,
    pub phone_number: String,
}

/// Parse the two-line submission format:
///
/// ```text
/// Name: John Doe
/// Number: +256787xxxxxx
/// ```
///
/// Exactly two lines, in that order. Anything else is a validation
/// error and must not mutate session state.
pub fn parse_details(text: &str) -> Result<SubmissionDetails, RoundupError> {
    let lines: Vec<&str> = text.trim().lines().collect();
    if lines.len() != 2 {
        return Err(invalid_format());
    }
    let name = NAME_LINE
        .captures(lines[0].trim())
        .and_then(|c| c.get(1))
        .ok_or_else(invalid_format)?;
    let number = NUMBER_LINE
        .captures(lines[1].trim())
        .and_then(|c| c.get(1))
        .ok_or_else(invalid_format)?;

    Ok(SubmissionDetails {
        display_name: name.as_str().trim().to_string(),
        phone_number: number.as_str().trim().to_string(),
    })
}

fn invalid_format() -> RoundupError {
    RoundupError::Validation(
        "Invalid format. Please send in the format:\nName: John Doe\nNumber: +256787xxxxxx".into(),
    )
}
