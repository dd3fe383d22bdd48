use std::path::Path;

use crate::error::StateError;
use crate::facade::StateHandle;
use crate::options::StateOptions;
use crate::record::RecordKind;
use crate::transaction::{StateFile, Transaction};
use crate::universe::{SelectionValue, SimState, UniverseDef};
use crate::Result;

impl Transaction<'_> {
    /// Simulation fields of the loaded record.
    pub fn sim(&self) -> Result<&SimState> {
        self.require_kind(RecordKind::Sim)?;
        self.record()
            .simulation()
            .ok_or(StateError::KindMismatch {
                expected: RecordKind::Sim,
                found: self.kind(),
            })
    }

    fn sim_mut(&mut self) -> Result<&mut SimState> {
        self.require_kind(RecordKind::Sim)?;
        Ok(self.record_mut()?.simulation_mut())
    }

    pub fn add_universe<P, Q>(&mut self, name: &str, topology: P, trajectory: &[Q]) -> Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let location = self.location();
        let policy = self.policy();
        self.sim_mut()?
            .add_universe(name, topology, trajectory, location, policy)
    }

    pub fn remove_universe(&mut self, name: &str) -> Result<UniverseDef> {
        self.sim_mut()?.remove_universe(name)
    }

    pub fn rename_universe(&mut self, from: &str, to: &str) -> Result<()> {
        let policy = self.policy();
        self.sim_mut()?.rename_universe(from, to, policy)
    }

    pub fn update_resnums(&mut self, universe: &str, resnums: Option<Vec<u32>>) -> Result<()> {
        self.sim_mut()?.update_resnums(universe, resnums)
    }

    pub fn add_selection(
        &mut self,
        universe: &str,
        name: &str,
        value: impl Into<SelectionValue>,
    ) -> Result<()> {
        let policy = self.policy();
        self.sim_mut()?.add_selection(universe, name, value, policy)
    }

    pub fn remove_selections<I, S>(&mut self, universe: &str, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sim_mut()?.remove_selections(universe, names)
    }

    pub fn set_default(&mut self, universe: Option<&str>) -> Result<()> {
        self.sim_mut()?.set_default(universe)
    }
}

/// State file of a simulation: a treant plus universes and selections.
#[derive(Debug)]
pub struct SimFile {
    state: StateFile,
}

impl SimFile {
    pub fn open(path: impl AsRef<Path>, options: StateOptions) -> Result<Self> {
        StateFile::open(path, RecordKind::Sim, options).map(|state| Self { state })
    }

    /// Find or create `Sim.{uuid}.*` in `dir`.
    pub fn discover(dir: impl AsRef<Path>, uuid: &str, options: StateOptions) -> Result<Self> {
        StateFile::discover(dir, RecordKind::Sim, uuid, options).map(|state| Self { state })
    }

    pub fn into_state(self) -> StateFile {
        self.state
    }

    pub fn get_mds_version(&self) -> Result<String> {
        self.state.read(|txn| Ok(txn.sim()?.mds_version.clone()))
    }

    pub fn list_universes(&self) -> Result<Vec<String>> {
        self.state.read(|txn| Ok(txn.sim()?.list_universes()))
    }

    pub fn get_universe(&self, name: &str) -> Result<UniverseDef> {
        self.state.read(|txn| txn.sim()?.universe(name).cloned())
    }

    /// Define a universe from a topology and trajectory files.
    ///
    /// Re-adding an existing name replaces its files and keeps its
    /// selections and resnums.
    pub fn add_universe<P, Q>(&self, name: &str, topology: P, trajectory: &[Q]) -> Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        self.state
            .write(|txn| txn.add_universe(name, topology, trajectory))
    }

    /// Remove a universe. The default is cleared if it pointed here.
    pub fn del_universe(&self, name: &str) -> Result<()> {
        self.state.write(|txn| txn.remove_universe(name).map(|_| ()))
    }

    pub fn rename_universe(&self, from: &str, to: &str) -> Result<()> {
        self.state.write(|txn| txn.rename_universe(from, to))
    }

    pub fn get_resnums(&self, universe: &str) -> Result<Option<Vec<u32>>> {
        self.state
            .read(|txn| Ok(txn.sim()?.resnums(universe)?.map(<[u32]>::to_vec)))
    }

    /// Replace the residue numbering of a universe; `None` clears it.
    pub fn update_resnums(&self, universe: &str, resnums: Option<Vec<u32>>) -> Result<()> {
        self.state.write(|txn| txn.update_resnums(universe, resnums))
    }

    pub fn list_selections(&self, universe: &str) -> Result<Vec<String>> {
        self.state.read(|txn| txn.sim()?.list_selections(universe))
    }

    pub fn get_selection(&self, universe: &str, name: &str) -> Result<SelectionValue> {
        self.state
            .read(|txn| txn.sim()?.selection(universe, name).cloned())
    }

    pub fn add_selection(
        &self,
        universe: &str,
        name: &str,
        value: impl Into<SelectionValue>,
    ) -> Result<()> {
        self.state
            .write(|txn| txn.add_selection(universe, name, value))
    }

    /// Remove selections from a universe. Fails, removing nothing, if any
    /// of them is missing.
    pub fn del_selection<I, S>(&self, universe: &str, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.state
            .write(|txn| txn.remove_selections(universe, names))
    }

    pub fn get_default(&self) -> Result<Option<String>> {
        self.state
            .read(|txn| Ok(txn.sim()?.default_universe().map(String::from)))
    }

    pub fn set_default(&self, universe: Option<&str>) -> Result<()> {
        self.state.write(|txn| txn.set_default(universe))
    }
}

impl TryFrom<StateFile> for SimFile {
    type Error = StateError;

    fn try_from(state: StateFile) -> Result<Self> {
        match state.kind() {
            RecordKind::Sim => Ok(Self { state }),
            found => Err(StateError::KindMismatch {
                expected: RecordKind::Sim,
                found,
            }),
        }
    }
}

impl StateHandle for SimFile {
    fn state(&self) -> &StateFile {
        &self.state
    }
}
