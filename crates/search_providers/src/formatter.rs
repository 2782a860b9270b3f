//! Turns upstream choices and citations into the text returned to callers

use crate::models::Choice;
use std::fmt::Write;

/// Returned when the API answers with no choices at all
pub const NO_RESULTS: &str = "no results";

pub const CITATIONS_HEADER: &str = "Citations:";

/// Join the text of every choice with a single space and append a numbered
/// citation list when there is one. Citations are passed through verbatim and
/// in order.
pub fn format(choices: &[Choice], citations: &[String]) -> String {
    if choices.is_empty() {
        return NO_RESULTS.to_string();
    }

    let mut result = choices
        .iter()
        .filter_map(Choice::content)
        .collect::<Vec<_>>()
        .join(" ");

    if !citations.is_empty() {
        result.push_str("\n\n");
        result.push_str(CITATIONS_HEADER);
        result.push('\n');
        for (index, citation) in citations.iter().enumerate() {
            // Writing to a String cannot fail
            let _ = writeln!(result, "[{}] {}", index + 1, citation);
        }
    }

    result
}
