//! Simulation fields: universes, atom selections, residue numbering.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::options::{LengthPolicy, PATH_LIMIT, SHORT_LIMIT, TRAJECTORY_PATH_LIMIT};
use crate::paths::PathPair;
use crate::record::none_sentinel;
use crate::Result;

/// Simulation schema version written into every new sim record.
pub const MDS_SCHEMA_VERSION: &str = "0.6.0";

/// A stored atom selection: either selection expressions or atom indices.
///
/// The two forms are never converted into one another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum SelectionValue {
    Expressions(Vec<String>),
    Indices(Vec<i64>),
}

impl SelectionValue {
    pub fn len(&self) -> usize {
        match self {
            SelectionValue::Expressions(v) => v.len(),
            SelectionValue::Indices(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<String>> for SelectionValue {
    fn from(v: Vec<String>) -> Self {
        SelectionValue::Expressions(v)
    }
}

impl From<Vec<&str>> for SelectionValue {
    fn from(v: Vec<&str>) -> Self {
        SelectionValue::Expressions(v.into_iter().map(String::from).collect())
    }
}

impl From<Vec<i64>> for SelectionValue {
    fn from(v: Vec<i64>) -> Self {
        SelectionValue::Indices(v)
    }
}

/// Topology and trajectory files plus everything defined on top of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseDef {
    pub topology: PathPair,
    #[serde(default)]
    pub trajectory: Vec<PathPair>,
    #[serde(default)]
    pub selections: BTreeMap<String, SelectionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resnums: Option<Vec<u32>>,
}

/// Simulation-only part of a record.
///
/// Invariant: `default`, when set, names a key of `universes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimState {
    #[serde(default = "default_mds_version")]
    pub mds_version: String,
    #[serde(default)]
    pub universes: BTreeMap<String, UniverseDef>,
    #[serde(default, with = "none_sentinel")]
    pub default: Option<String>,
}

fn default_mds_version() -> String {
    MDS_SCHEMA_VERSION.to_string()
}

/// Universe and selection names become node names in legacy files.
pub(crate) fn check_name(field: &'static str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(StateError::InvalidName {
            field,
            name: name.to_string(),
        });
    }
    Ok(())
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            mds_version: MDS_SCHEMA_VERSION.to_string(),
            universes: BTreeMap::new(),
            default: None,
        }
    }
}

impl SimState {
    pub fn list_universes(&self) -> Vec<String> {
        self.universes.keys().cloned().collect()
    }

    pub fn universe(&self, name: &str) -> Result<&UniverseDef> {
        self.universes
            .get(name)
            .ok_or_else(|| StateError::UniverseNotFound(name.to_string()))
    }

    fn universe_mut(&mut self, name: &str) -> Result<&mut UniverseDef> {
        self.universes
            .get_mut(name)
            .ok_or_else(|| StateError::UniverseNotFound(name.to_string()))
    }

    /// Define a universe, or replace the files of an existing one while
    /// keeping its selections and resnums.
    ///
    /// The first universe added becomes the default if none is set.
    pub fn add_universe<P, Q>(
        &mut self,
        name: &str,
        topology: P,
        trajectory: &[Q],
        location: &Path,
        policy: LengthPolicy,
    ) -> Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        check_name("universe", name)?;
        policy.check("universe", SHORT_LIMIT, name)?;
        let topology = PathPair::resolve(topology, location)?;
        policy.check("topology abspath", PATH_LIMIT, &topology.abspath)?;
        policy.check("topology relpath", PATH_LIMIT, &topology.relpath)?;

        let trajectory = trajectory
            .iter()
            .map(|t| -> Result<PathPair> {
                let pair = PathPair::resolve(t, location)?;
                policy.check("trajectory abspath", TRAJECTORY_PATH_LIMIT, &pair.abspath)?;
                policy.check("trajectory relpath", TRAJECTORY_PATH_LIMIT, &pair.relpath)?;
                Ok(pair)
            })
            .collect::<Result<Vec<_>>>()?;

        match self.universes.get_mut(name) {
            Some(existing) => {
                existing.topology = topology;
                existing.trajectory = trajectory;
            }
            None => {
                self.universes.insert(
                    name.to_string(),
                    UniverseDef {
                        topology,
                        trajectory,
                        selections: BTreeMap::new(),
                        resnums: None,
                    },
                );
            }
        }

        if self.default.is_none() {
            self.default = Some(name.to_string());
        }
        Ok(())
    }

    /// Remove a universe. Clears the default if it pointed here.
    pub fn remove_universe(&mut self, name: &str) -> Result<UniverseDef> {
        let removed = self
            .universes
            .remove(name)
            .ok_or_else(|| StateError::UniverseNotFound(name.to_string()))?;
        if self.default.as_deref() == Some(name) {
            self.default = None;
        }
        Ok(removed)
    }

    /// Rename a universe, carrying the default along.
    pub fn rename_universe(&mut self, from: &str, to: &str, policy: LengthPolicy) -> Result<()> {
        if !self.universes.contains_key(from) {
            return Err(StateError::UniverseNotFound(from.to_string()));
        }
        check_name("universe", to)?;
        if from == to {
            return Ok(());
        }
        if self.universes.contains_key(to) {
            return Err(StateError::UniverseExists(to.to_string()));
        }
        policy.check("universe", SHORT_LIMIT, to)?;

        if let Some(def) = self.universes.remove(from) {
            self.universes.insert(to.to_string(), def);
        }
        if self.default.as_deref() == Some(from) {
            self.default = Some(to.to_string());
        }
        Ok(())
    }

    /// Residue numbering of a universe, `None` if never set.
    pub fn resnums(&self, universe: &str) -> Result<Option<&[u32]>> {
        Ok(self.universe(universe)?.resnums.as_deref())
    }

    /// Replace or clear the residue numbering of a universe.
    pub fn update_resnums(&mut self, universe: &str, resnums: Option<Vec<u32>>) -> Result<()> {
        self.universe_mut(universe)?.resnums = resnums;
        Ok(())
    }

    pub fn list_selections(&self, universe: &str) -> Result<Vec<String>> {
        Ok(self.universe(universe)?.selections.keys().cloned().collect())
    }

    pub fn selection(&self, universe: &str, name: &str) -> Result<&SelectionValue> {
        self.universe(universe)?
            .selections
            .get(name)
            .ok_or_else(|| StateError::SelectionNotFound {
                universe: universe.to_string(),
                selection: name.to_string(),
            })
    }

    /// Store a selection, overwriting any selection of the same name.
    pub fn add_selection(
        &mut self,
        universe: &str,
        name: &str,
        value: impl Into<SelectionValue>,
        policy: LengthPolicy,
    ) -> Result<()> {
        check_name("selection", name)?;
        policy.check("selection", SHORT_LIMIT, name)?;
        let def = self.universe_mut(universe)?;
        def.selections.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Remove selections; fails without removing anything if one is missing.
    pub fn remove_selections<I, S>(&mut self, universe: &str, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<S> = names.into_iter().collect();
        let def = self.universe_mut(universe)?;
        if let Some(missing) = names
            .iter()
            .find(|n| !def.selections.contains_key(n.as_ref()))
        {
            return Err(StateError::SelectionNotFound {
                universe: universe.to_string(),
                selection: missing.as_ref().to_string(),
            });
        }
        for name in &names {
            def.selections.remove(name.as_ref());
        }
        Ok(())
    }

    pub fn default_universe(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Point the default at an existing universe, or clear it.
    pub fn set_default(&mut self, name: Option<&str>) -> Result<()> {
        match name {
            Some(n) if !self.universes.contains_key(n) => {
                Err(StateError::UniverseNotFound(n.to_string()))
            }
            Some(n) => {
                self.default = Some(n.to_string());
                Ok(())
            }
            None => {
                self.default = None;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_with(names: &[&str]) -> SimState {
        let mut sim = SimState::default();
        for name in names {
            sim.add_universe(
                name,
                "/data/top.pdb",
                &["/data/run1.xtc"],
                Path::new("/data/sim"),
                LengthPolicy::Legacy,
            )
            .unwrap();
        }
        sim
    }

    #[test]
    fn first_universe_becomes_default() {
        let sim = sim_with(&["prod", "equil"]);
        assert_eq!(sim.default_universe(), Some("prod"));
    }

    #[test]
    fn relpaths_are_derived_from_location() {
        let sim = sim_with(&["prod"]);
        let u = sim.universe("prod").unwrap();
        assert_eq!(u.topology.relpath, "../top.pdb");
        assert_eq!(u.trajectory[0].relpath, "../run1.xtc");
    }

    #[test]
    fn readding_universe_keeps_selections() {
        let mut sim = sim_with(&["prod"]);
        sim.add_selection("prod", "ca", vec!["name CA"], LengthPolicy::Legacy)
            .unwrap();
        sim.add_universe(
            "prod",
            "/data/other.gro",
            &["/data/a.xtc", "/data/b.xtc"],
            Path::new("/data"),
            LengthPolicy::Legacy,
        )
        .unwrap();

        let u = sim.universe("prod").unwrap();
        assert_eq!(u.topology.abspath, "/data/other.gro");
        assert_eq!(u.trajectory.len(), 2);
        assert!(u.selections.contains_key("ca"));
    }

    #[test]
    fn rename_to_existing_is_conflict_and_changes_nothing() {
        let mut sim = sim_with(&["a", "b"]);
        let before = sim.clone();
        let err = sim.rename_universe("a", "b", LengthPolicy::Legacy).unwrap_err();
        assert!(matches!(err, StateError::UniverseExists(ref n) if n == "b"));
        assert_eq!(sim, before);
    }

    #[test]
    fn rename_moves_default() {
        let mut sim = sim_with(&["a"]);
        sim.rename_universe("a", "z", LengthPolicy::Legacy).unwrap();
        assert_eq!(sim.default_universe(), Some("z"));
        assert!(sim.universe("a").unwrap_err().is_not_found());
    }

    #[test]
    fn removing_default_universe_clears_default() {
        let mut sim = sim_with(&["a", "b"]);
        sim.remove_universe("a").unwrap();
        assert_eq!(sim.default_universe(), None);
    }

    #[test]
    fn set_default_requires_existing_universe() {
        let mut sim = sim_with(&["a"]);
        assert!(sim.set_default(Some("missing")).is_err());
        assert_eq!(sim.default_universe(), Some("a"));
        sim.set_default(None).unwrap();
        assert_eq!(sim.default_universe(), None);
    }

    #[test]
    fn selections_keep_their_form() {
        let mut sim = sim_with(&["a"]);
        sim.add_selection("a", "idx", vec![1i64, 5, 9], LengthPolicy::Legacy)
            .unwrap();
        assert_eq!(
            sim.selection("a", "idx").unwrap(),
            &SelectionValue::Indices(vec![1, 5, 9])
        );
    }

    #[test]
    fn remove_missing_selection_removes_nothing() {
        let mut sim = sim_with(&["a"]);
        sim.add_selection("a", "ca", vec!["name CA"], LengthPolicy::Legacy)
            .unwrap();
        let err = sim.remove_selections("a", ["ca", "nope"]).unwrap_err();
        assert!(matches!(err, StateError::SelectionNotFound { .. }));
        assert_eq!(sim.list_selections("a").unwrap(), vec!["ca".to_string()]);
    }

    #[test]
    fn selection_on_missing_universe_is_universe_not_found() {
        let sim = SimState::default();
        assert!(matches!(
            sim.selection("x", "ca"),
            Err(StateError::UniverseNotFound(_))
        ));
    }

    #[test]
    fn none_string_default_reads_as_absent() {
        let sim: SimState =
            serde_json::from_str(r#"{"mds_version":"0.6.0","universes":{},"default":"None"}"#)
                .unwrap();
        assert_eq!(sim.default, None);
    }

    #[test]
    fn resnums_roundtrip_through_update() {
        let mut sim = sim_with(&["a"]);
        assert_eq!(sim.resnums("a").unwrap(), None);
        sim.update_resnums("a", Some(vec![1, 2, 3])).unwrap();
        assert_eq!(sim.resnums("a").unwrap(), Some(&[1u32, 2, 3][..]));
    }

    #[test]
    fn names_that_would_split_node_paths_are_rejected() {
        let mut sim = sim_with(&["a"]);
        let before = sim.clone();
        for bad in ["", "x/y", "/"] {
            let err = sim
                .add_universe(bad, "/t.pdb", &[] as &[&str], Path::new("/"), LengthPolicy::Legacy)
                .unwrap_err();
            assert!(matches!(err, StateError::InvalidName { field: "universe", .. }), "{bad:?}");
            assert!(matches!(
                sim.rename_universe("a", bad, LengthPolicy::Legacy),
                Err(StateError::InvalidName { .. })
            ));
            assert!(matches!(
                sim.add_selection("a", bad, vec!["name CA"], LengthPolicy::Unbounded),
                Err(StateError::InvalidName { field: "selection", .. })
            ));
        }
        assert_eq!(sim, before);
    }

    #[test]
    fn missing_mds_version_gets_current_default() {
        let sim: SimState = serde_json::from_str(r#"{"universes":{}}"#).unwrap();
        assert_eq!(sim.mds_version, MDS_SCHEMA_VERSION);
    }
}
