//! Tunables passed to state-file constructors.

use crate::error::StateError;
use crate::Result;

/// Width of short identifiers in the legacy format (tags, category keys and
/// values, member kinds, universe/selection/default names).
pub const SHORT_LIMIT: usize = 55;
/// Width of absolute and relative paths in the legacy format.
pub const PATH_LIMIT: usize = 511;
/// Width of trajectory paths in the legacy format.
pub const TRAJECTORY_PATH_LIMIT: usize = 255;
/// Width of version strings in the legacy format.
pub const VERSION_LIMIT: usize = 15;
/// Exact length of a canonical hyphenated uuid.
pub const UUID_LEN: usize = 36;

/// Whether the current backend re-imposes the legacy field widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthPolicy {
    /// Reject values that would not fit a legacy column.
    #[default]
    Legacy,
    /// Accept any length.
    Unbounded,
}

impl LengthPolicy {
    pub(crate) fn check(self, field: &str, limit: usize, value: &str) -> Result<()> {
        match self {
            LengthPolicy::Unbounded => Ok(()),
            LengthPolicy::Legacy => check_width(field, limit, value),
        }
    }
}

/// Fail with `FieldTooLong` when `value` is wider than `limit` utf-8 bytes.
pub(crate) fn check_width(field: &str, limit: usize, value: &str) -> Result<()> {
    if value.len() > limit {
        return Err(StateError::FieldTooLong {
            field: field.to_string(),
            limit,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Options shared by every facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateOptions {
    pub length_policy: LengthPolicy,
    /// Pretty-print JSON state files.
    pub pretty: bool,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            length_policy: LengthPolicy::Legacy,
            pretty: true,
        }
    }
}

impl StateOptions {
    /// Disable legacy width checks.
    pub fn unbounded(mut self) -> Self {
        self.length_policy = LengthPolicy::Unbounded;
        self
    }

    /// Write compact JSON.
    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_policy_rejects_wide_tag() {
        let tag = "x".repeat(SHORT_LIMIT + 1);
        let err = LengthPolicy::Legacy.check("tag", SHORT_LIMIT, &tag).unwrap_err();
        assert!(matches!(err, StateError::FieldTooLong { limit: 55, .. }));
    }

    #[test]
    fn limit_counts_bytes_like_legacy_columns() {
        // "é" is two bytes in utf-8.
        let fits = "é".repeat(27);
        assert!(LengthPolicy::Legacy.check("tag", SHORT_LIMIT, &fits).is_ok());
        let wide = "é".repeat(28);
        let err = LengthPolicy::Legacy.check("tag", SHORT_LIMIT, &wide).unwrap_err();
        assert!(matches!(err, StateError::FieldTooLong { limit: 55, .. }));
    }

    #[test]
    fn unbounded_policy_accepts_anything() {
        let tag = "x".repeat(10_000);
        assert!(LengthPolicy::Unbounded.check("tag", SHORT_LIMIT, &tag).is_ok());
    }
}
