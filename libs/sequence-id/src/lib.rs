//! Pattern-driven sequential identifiers.
//!
//! Tenants configure their own invoice, receipt and client-number formats as
//! plain pattern strings such as `"INV-0000"` or `"HH/000/year"`. This crate
//! turns a pattern plus a sequence number into the display identifier. It has
//! no knowledge of persistence and never fails: unusual patterns degrade to
//! appending the number.

use std::ops::Range;
use std::sync::OnceLock;

use chrono::{Datelike, Utc};
use regex::Regex;
use tracing::trace;

fn year_token() -> &'static Regex {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    YEAR.get_or_init(|| Regex::new(r"(?i)year").expect("year token regex is valid"))
}

fn zero_run() -> &'static Regex {
    static ZEROS: OnceLock<Regex> = OnceLock::new();
    ZEROS.get_or_init(|| Regex::new(r"0+").expect("zero run regex is valid"))
}

/// Formats `sequence` with `pattern` using the current UTC calendar year.
///
/// ```
/// use clinic_sequence_id::generate_next_id;
///
/// assert_eq!(generate_next_id(Some("INV-0000"), 42), "INV-0042");
/// assert_eq!(generate_next_id(Some("PREFIX"), 7), "PREFIX7");
/// assert_eq!(generate_next_id(None, 5), "5");
/// ```
pub fn generate_next_id(pattern: Option<&str>, sequence: u64) -> String {
    generate_next_id_in_year(pattern, sequence, Utc::now().year())
}

/// Formats `sequence` with `pattern`, substituting `year` for every
/// case-insensitive `year` token.
///
/// The first run of zeros written by the pattern author sets the padding
/// width. Zeros that only exist because the year was substituted are used
/// as the placeholder only when the author wrote no zeros at all.
pub fn generate_next_id_in_year(pattern: Option<&str>, sequence: u64, year: i32) -> String {
    let pattern = match pattern {
        Some(value) if !value.is_empty() => value,
        _ => return sequence.to_string(),
    };

    let (expanded, authored) = substitute_year(pattern, year);

    let placeholder = authored
        .iter()
        .find_map(|span| {
            zero_run()
                .find(&expanded[span.clone()])
                .map(|found| span.start + found.start()..span.start + found.end())
        })
        .or_else(|| zero_run().find(&expanded).map(|found| found.range()));

    match placeholder {
        Some(range) => {
            let width = range.len();
            let padded = format!("{sequence:0>width$}");
            trace!(pattern, width, "padding sequence into zero run");

            let mut id = String::with_capacity(expanded.len() + padded.len());
            id.push_str(&expanded[..range.start]);
            id.push_str(&padded);
            id.push_str(&expanded[range.end..]);
            id
        }
        None => format!("{expanded}{sequence}"),
    }
}

/// Replaces every `year` token and returns the expanded pattern together with
/// the byte ranges that still hold author-written text.
fn substitute_year(pattern: &str, year: i32) -> (String, Vec<Range<usize>>) {
    let year = format!("{year:04}");
    let mut expanded = String::with_capacity(pattern.len() + 4);
    let mut authored = Vec::new();
    let mut cursor = 0;

    for token in year_token().find_iter(pattern) {
        push_authored(&mut expanded, &mut authored, &pattern[cursor..token.start()]);
        expanded.push_str(&year);
        cursor = token.end();
    }
    push_authored(&mut expanded, &mut authored, &pattern[cursor..]);

    (expanded, authored)
}

fn push_authored(expanded: &mut String, authored: &mut Vec<Range<usize>>, text: &str) {
    if text.is_empty() {
        return;
    }
    let start = expanded.len();
    expanded.push_str(text);
    authored.push(start..expanded.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_year_tracks_authored_spans() {
        let (expanded, authored) = substitute_year("HH/000/year", 2025);
        assert_eq!(expanded, "HH/000/2025");
        assert_eq!(authored, vec![0..7]);
    }

    #[test]
    fn substitute_year_is_case_insensitive() {
        let (expanded, authored) = substitute_year("YEAR-Year-yEaR", 2031);
        assert_eq!(expanded, "2031-2031-2031");
        assert_eq!(authored, vec![4..5, 9..10]);
    }

    #[test]
    fn year_is_rendered_with_four_digits() {
        let (expanded, _) = substitute_year("year", 987);
        assert_eq!(expanded, "0987");
    }

    #[test]
    fn padding_never_truncates() {
        assert_eq!(generate_next_id_in_year(Some("A-00"), 12345, 2025), "A-12345");
    }
}
