// src/core/key.rs

//! The composite key identifying a watchable/fetchable config item.

use crate::error::{AcmError, Result};
use std::fmt;

/// The group used when the caller supplies an empty or blank group.
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// `(dataId, group, namespace)`, canonically encoded as `dataId+group+namespace`.
///
/// `group` is normalized to [`DEFAULT_GROUP`] when empty or blank before validation runs,
/// mirroring the server-side default. `namespace` may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    pub data_id: String,
    pub group: String,
    pub namespace: String,
}

impl CompositeKey {
    /// Builds a key, normalizing `group` and validating `dataId`/`group` against
    /// `[A-Za-z0-9._:-]`.
    pub fn new(
        data_id: impl Into<String>,
        group: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<Self> {
        let data_id = data_id.into();
        let group = normalize_group(group.into());
        let namespace = namespace.into();

        validate_token("dataId", &data_id)?;
        validate_token("group", &group)?;

        Ok(Self {
            data_id,
            group,
            namespace,
        })
    }

    /// Canonical on-disk/in-memory string form: `dataId+group+namespace`.
    pub fn encode(&self) -> String {
        format!("{}+{}+{}", self.data_id, self.group, self.namespace)
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

fn normalize_group(group: String) -> String {
    if group.trim().is_empty() {
        DEFAULT_GROUP.to_string()
    } else {
        group
    }
}

fn validate_token(field: &str, value: &str) -> Result<()> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'));
    if ok {
        Ok(())
    } else {
        Err(AcmError::InvalidArgument(format!(
            "{field} must match [A-Za-z0-9._:-] and be non-empty, got {value:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_as_plus_joined_triple() {
        let key = CompositeKey::new("my.data-id", "GROUP", "ns1").unwrap();
        assert_eq!(key.encode(), "my.data-id+GROUP+ns1");
    }

    #[test]
    fn blank_group_defaults() {
        let key = CompositeKey::new("d", "   ", "").unwrap();
        assert_eq!(key.group, DEFAULT_GROUP);
        assert_eq!(key.encode(), "d+DEFAULT_GROUP+");
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(CompositeKey::new("bad id", "g", "").is_err());
        assert!(CompositeKey::new("d", "bad/group", "").is_err());
    }

    #[test]
    fn accepts_full_allowed_charset() {
        let key = CompositeKey::new("a.b_c:d-1", "g.h_i:j-2", "ns").unwrap();
        assert_eq!(key.encode(), "a.b_c:d-1+g.h_i:j-2+ns");
    }
}
