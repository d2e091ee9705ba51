//! # Validation Module
//!
//! Segment-level checks shared by [`Path`](crate::Path) parsing and delta
//! flattening.
//!
//! ## What a Segment May Contain
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Segment Rules                                      │
//! │                                                                         │
//! │  ✅ "users", "a b", "ключ", "item-42", "$meta"                         │
//! │                                                                         │
//! │  ❌ ""          empty (paths collapse these, delta keys reject them)   │
//! │  ❌ "a/b"       separator inside a single key                          │
//! │  ❌ "." ".."    relative navigation is not part of the model           │
//! │  ❌ "a\u{0}b"   ASCII control characters                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, CoreResult};

/// Path separator.
pub const SEPARATOR: char = '/';

/// Reason string for a segment that cannot be used, or `None` if it is fine.
///
/// Empty segments and separators are handled by the callers, since paths
/// collapse them while delta keys reject them.
fn segment_problem(segment: &str) -> Option<String> {
    if segment == "." || segment == ".." {
        return Some(format!("segment '{}' is not allowed", segment));
    }

    if let Some(c) = segment.chars().find(|c| c.is_ascii_control()) {
        return Some(format!(
            "segment '{}' contains control character {:?}",
            segment.escape_debug(),
            c
        ));
    }

    None
}

/// Validates one segment of a path being parsed from `input`.
pub fn validate_segment(segment: &str, input: &str) -> CoreResult<()> {
    match segment_problem(segment) {
        Some(reason) => Err(CoreError::InvalidPath {
            path: input.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Validates a key of an update object.
///
/// ## Rules
/// - Must not be empty
/// - Must not contain the separator
/// - Must pass the segment rules
pub fn validate_delta_key(key: &str) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::InvalidDeltaKey {
            key: String::new(),
            reason: "key is empty".to_string(),
        });
    }

    if key.contains(SEPARATOR) {
        return Err(CoreError::InvalidDeltaKey {
            key: key.to_string(),
            reason: "key contains '/'".to_string(),
        });
    }

    match segment_problem(key) {
        Some(reason) => Err(CoreError::InvalidDeltaKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
