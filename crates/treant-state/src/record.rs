//! Backend-agnostic record schema.
//!
//! A [`Record`] is the whole content of one state file. Both codecs load a
//! complete `Record`, facades mutate it in memory, and the codec stores it
//! back in one piece.
//!
//! Field families:
//! - `version`: schema version, set at creation
//! - `coordinator`: optional absolute path (legacy `"None"` means absent)
//! - `tags`: unique, case-sensitive strings
//! - `categories`: string keys to string values, last write wins
//! - `members`: group records only, keyed by member uuid
//! - `simulation`: sim records only, see [`crate::universe`]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StateError;
use crate::options::{LengthPolicy, PATH_LIMIT, SHORT_LIMIT, UUID_LEN};
use crate::paths::PathPair;
use crate::universe::SimState;
use crate::Result;

/// Schema version written into every new record.
pub const SCHEMA_VERSION: &str = "0.7.0";

/// Extension of legacy tabular state files.
pub const LEGACY_EXTENSION: &str = "h5";

/// Extension of current JSON state files.
pub const CURRENT_EXTENSION: &str = "json";

/// Which kind of object a state file describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// Plain container.
    Treant,
    /// Container of containers.
    Group,
    /// Simulation descriptor.
    Sim,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Treant, RecordKind::Group, RecordKind::Sim];

    /// Filename prefix, as in `Group.<uuid>.json`.
    pub fn prefix(self) -> &'static str {
        match self {
            RecordKind::Treant => "Treant",
            RecordKind::Group => "Group",
            RecordKind::Sim => "Sim",
        }
    }

    /// Parse a filename prefix. Case-sensitive.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }

    /// `{prefix}.{uuid}.{extension}`
    pub fn filename(self, uuid: &str, extension: &str) -> String {
        format!("{}.{}.{}", self.prefix(), uuid, extension)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Serde adapter for optional names where legacy files wrote `"None"`.
///
/// Absent values are written as `null`; reading `"None"` or `""` yields
/// `None`.
pub(crate) mod none_sentinel {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_some(v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.and_then(|s| super::from_sentinel(&s)))
    }
}

/// Translate a stored name that may carry the legacy `"None"` sentinel.
pub fn from_sentinel(raw: &str) -> Option<String> {
    match raw {
        "" | "None" => None,
        other => Some(other.to_string()),
    }
}

/// Inverse of [`from_sentinel`] for writing legacy fields.
pub fn to_sentinel(value: Option<&str>) -> &str {
    value.unwrap_or("None")
}

/// Validate and canonicalize a member uuid (lowercase, hyphenated).
pub fn canonical_uuid(raw: &str) -> Result<String> {
    if raw.len() != UUID_LEN {
        return Err(StateError::InvalidUuid(raw.to_string()));
    }
    let parsed = Uuid::try_parse(raw).map_err(|_| StateError::InvalidUuid(raw.to_string()))?;
    Ok(parsed.hyphenated().to_string())
}

/// Remove the entries at `positions` from `items`.
///
/// Positions refer to the list before any removal. They are processed in
/// ascending order, each one shifted down by the number already removed.
/// Duplicates and out-of-range positions are ignored. Returns the number of
/// entries removed.
pub fn remove_positions<T>(items: &mut Vec<T>, positions: &[usize]) -> usize {
    let mut sorted = positions.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut removed = 0;
    for position in sorted {
        let index = position - removed;
        if index >= items.len() {
            break;
        }
        items.remove(index);
        removed += 1;
    }
    removed
}

/// One member of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    pub uuid: String,
    /// Kind of the member, e.g. `Sim`.
    pub kind: String,
    pub abspath: String,
    pub relpath: String,
}

impl MemberRef {
    /// Both paths to the member's basedir.
    pub fn paths(&self) -> PathPair {
        PathPair {
            abspath: self.abspath.clone(),
            relpath: self.relpath.clone(),
        }
    }
}

/// The whole content of one state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub version: String,

    #[serde(
        default,
        with = "none_sentinel",
        skip_serializing_if = "Option::is_none"
    )]
    pub coordinator: Option<String>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub categories: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<MemberRef>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimState>,
}

impl Record {
    /// Empty record of the given kind, stamped with the current schema version.
    pub fn new(kind: RecordKind) -> Self {
        let mut record = Record::default();
        record.ensure_shape(kind);
        record
    }

    /// Fill in anything a freshly loaded record of `kind` must have.
    pub fn ensure_shape(&mut self, kind: RecordKind) {
        if self.version.is_empty() {
            self.version = SCHEMA_VERSION.to_string();
        }
        match kind {
            RecordKind::Treant => {}
            RecordKind::Group => {
                self.members.get_or_insert_with(Vec::new);
            }
            RecordKind::Sim => {
                self.simulation.get_or_insert_with(SimState::default);
            }
        }
    }

    // -- tags -------------------------------------------------------------

    /// Add tags; existing tags are left as they are. Nothing is added if any
    /// tag is too wide.
    pub fn add_tags<I, S>(&mut self, tags: I, policy: LengthPolicy) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        for tag in &tags {
            policy.check("tag", SHORT_LIMIT, tag)?;
        }
        self.tags.extend(tags);
        Ok(())
    }

    /// Remove tags. Unknown tags are ignored.
    pub fn remove_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            self.tags.remove(tag.as_ref());
        }
    }

    pub fn purge_tags(&mut self) {
        self.tags.clear();
    }

    // -- categories -------------------------------------------------------

    /// Insert or overwrite categories. Values are stored as their string form.
    pub fn add_categories<I, K, V>(&mut self, categories: I, policy: LengthPolicy) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let pairs: Vec<(String, String)> = categories
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();
        for (key, value) in &pairs {
            policy.check("category", SHORT_LIMIT, key)?;
            policy.check("category value", SHORT_LIMIT, value)?;
        }
        self.categories.extend(pairs);
        Ok(())
    }

    /// Remove categories by key. Unknown keys are ignored.
    pub fn remove_categories<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.categories.remove(key.as_ref());
        }
    }

    pub fn purge_categories(&mut self) {
        self.categories.clear();
    }

    // -- members ----------------------------------------------------------

    /// Members in storage order; empty for non-group records.
    pub fn members(&self) -> &[MemberRef] {
        self.members.as_deref().unwrap_or_default()
    }

    fn members_mut(&mut self) -> &mut Vec<MemberRef> {
        self.members.get_or_insert_with(Vec::new)
    }

    /// Look up a member by uuid.
    pub fn get_member(&self, uuid: &str) -> Result<&MemberRef> {
        let key = canonical_uuid(uuid).unwrap_or_else(|_| uuid.to_string());
        self.members()
            .iter()
            .find(|m| m.uuid == key)
            .ok_or_else(|| StateError::MemberNotFound(uuid.to_string()))
    }

    /// Add a member, or update the paths of an existing one in place.
    ///
    /// The relative path is computed from `abspath` and `location`.
    pub fn add_member(
        &mut self,
        uuid: &str,
        kind: &str,
        abspath: impl AsRef<Path>,
        location: &Path,
        policy: LengthPolicy,
    ) -> Result<()> {
        let uuid = canonical_uuid(uuid)?;
        policy.check("member kind", SHORT_LIMIT, kind)?;
        let paths = PathPair::resolve(abspath, location)?;
        policy.check("member abspath", PATH_LIMIT, &paths.abspath)?;
        policy.check("member relpath", PATH_LIMIT, &paths.relpath)?;

        let members = self.members_mut();
        match members.iter_mut().find(|m| m.uuid == uuid) {
            Some(existing) => {
                existing.abspath = paths.abspath;
                existing.relpath = paths.relpath;
            }
            None => members.push(MemberRef {
                uuid,
                kind: kind.to_string(),
                abspath: paths.abspath,
                relpath: paths.relpath,
            }),
        }
        Ok(())
    }

    /// Remove members by uuid. Unknown uuids are ignored. Returns how many
    /// were removed.
    pub fn remove_members<I, S>(&mut self, uuids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let doomed: BTreeSet<String> = uuids
            .into_iter()
            .map(|u| canonical_uuid(u.as_ref()).unwrap_or_else(|_| u.as_ref().to_string()))
            .collect();
        let positions: Vec<usize> = self
            .members()
            .iter()
            .enumerate()
            .filter(|(_, m)| doomed.contains(&m.uuid))
            .map(|(i, _)| i)
            .collect();
        self.remove_members_at(&positions)
    }

    /// Remove members by position in storage order.
    pub fn remove_members_at(&mut self, positions: &[usize]) -> usize {
        remove_positions(self.members_mut(), positions)
    }

    pub fn purge_members(&mut self) {
        self.members_mut().clear();
    }

    // -- simulation -------------------------------------------------------

    /// Simulation fields, if this is a sim record.
    pub fn simulation(&self) -> Option<&SimState> {
        self.simulation.as_ref()
    }

    /// Simulation fields, created empty if missing.
    pub fn simulation_mut(&mut self) -> &mut SimState {
        self.simulation.get_or_insert_with(SimState::default)
    }
}
