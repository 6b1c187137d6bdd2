//! Subject patterns.
//!
//! Subjects are dot-separated tokens. Patterns may use `*` to match exactly
//! one token and `>` (last token only) to match one or more trailing tokens.

use crate::error::{CoreError, CoreResult};

/// Single-token wildcard.
pub const WILDCARD_ONE: &str = "*";

/// Trailing multi-token wildcard.
pub const WILDCARD_TAIL: &str = ">";

/// Validates a subject pattern.
///
/// # Errors
///
/// Returns `InvalidSubject` if the pattern is empty, has an empty token,
/// contains whitespace, embeds a wildcard inside a token, or uses `>`
/// anywhere but the last token.
pub fn validate_pattern(pattern: &str) -> CoreResult<()> {
    let invalid = |reason| CoreError::InvalidSubject {
        subject: pattern.to_string(),
        reason,
    };

    if pattern.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if pattern.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }

    let tokens: Vec<&str> = pattern.split('.').collect();
    let last = tokens.len() - 1;
    for (i, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            return Err(invalid("must not contain empty tokens"));
        }
        if *token == WILDCARD_TAIL && i != last {
            return Err(invalid("'>' is only allowed as the last token"));
        }
        if token.len() > 1 && (token.contains('*') || token.contains('>')) {
            return Err(invalid("wildcards must be whole tokens"));
        }
    }
    Ok(())
}

/// Returns true if a concrete `subject` matches `pattern`.
#[must_use]
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    for token in pattern.split('.') {
        match token {
            WILDCARD_TAIL => return subject_tokens.next().is_some(),
            WILDCARD_ONE => {
                if subject_tokens.next().is_none() {
                    return false;
                }
            }
            literal => {
                if subject_tokens.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    subject_tokens.next().is_none()
}

/// Returns true if every subject matched by `filter` is also matched by
/// `pattern`.
///
/// Used to check that a cursor filter stays within its stream.
#[must_use]
pub fn is_subset(filter: &str, pattern: &str) -> bool {
    let filter_tokens: Vec<&str> = filter.split('.').collect();
    for (i, token) in pattern.split('.').enumerate() {
        match token {
            WILDCARD_TAIL => return filter_tokens.len() > i,
            WILDCARD_ONE => match filter_tokens.get(i) {
                None | Some(&WILDCARD_TAIL) => return false,
                Some(_) => {}
            },
            literal => {
                if filter_tokens.get(i) != Some(&literal) {
                    return false;
                }
            }
        }
    }
    filter_tokens.len() == pattern.split('.').count()
}
