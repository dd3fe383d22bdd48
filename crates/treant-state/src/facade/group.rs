use std::path::Path;

use tracing::debug;

use crate::error::StateError;
use crate::facade::StateHandle;
use crate::options::StateOptions;
use crate::paths::PathPair;
use crate::record::{MemberRef, RecordKind};
use crate::transaction::{StateFile, Transaction};
use crate::Result;

impl Transaction<'_> {
    /// Members in storage order.
    pub fn members(&self) -> Result<&[MemberRef]> {
        self.require_kind(RecordKind::Group)?;
        Ok(self.record().members())
    }

    pub fn member(&self, uuid: &str) -> Result<&MemberRef> {
        self.require_kind(RecordKind::Group)?;
        self.record().get_member(uuid)
    }

    /// Add a member or update the paths of an existing one.
    pub fn add_member(&mut self, uuid: &str, kind: &str, abspath: impl AsRef<Path>) -> Result<()> {
        self.require_kind(RecordKind::Group)?;
        let location = self.location();
        let policy = self.policy();
        self.record_mut()?
            .add_member(uuid, kind, abspath, location, policy)
    }

    pub fn remove_members<I, S>(&mut self, uuids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.require_kind(RecordKind::Group)?;
        Ok(self.record_mut()?.remove_members(uuids))
    }

    pub fn remove_members_at(&mut self, positions: &[usize]) -> Result<usize> {
        self.require_kind(RecordKind::Group)?;
        Ok(self.record_mut()?.remove_members_at(positions))
    }

    pub fn purge_members(&mut self) -> Result<()> {
        self.require_kind(RecordKind::Group)?;
        self.record_mut()?.purge_members();
        Ok(())
    }
}

/// State file of a group: a treant plus an ordered member list.
#[derive(Debug)]
pub struct GroupFile {
    state: StateFile,
}

impl GroupFile {
    pub fn open(path: impl AsRef<Path>, options: StateOptions) -> Result<Self> {
        StateFile::open(path, RecordKind::Group, options).map(|state| Self { state })
    }

    /// Find or create `Group.{uuid}.*` in `dir`.
    pub fn discover(dir: impl AsRef<Path>, uuid: &str, options: StateOptions) -> Result<Self> {
        StateFile::discover(dir, RecordKind::Group, uuid, options).map(|state| Self { state })
    }

    pub fn into_state(self) -> StateFile {
        self.state
    }

    pub fn get_member(&self, uuid: &str) -> Result<MemberRef> {
        self.state.read(|txn| txn.member(uuid).cloned())
    }

    pub fn get_members(&self) -> Result<Vec<MemberRef>> {
        self.state.read(|txn| Ok(txn.members()?.to_vec()))
    }

    pub fn get_members_uuid(&self) -> Result<Vec<String>> {
        self.state
            .read(|txn| Ok(txn.members()?.iter().map(|m| m.uuid.clone()).collect()))
    }

    pub fn get_members_kind(&self) -> Result<Vec<String>> {
        self.state
            .read(|txn| Ok(txn.members()?.iter().map(|m| m.kind.clone()).collect()))
    }

    /// Basedir of every member as an absolute/relative pair.
    pub fn get_members_basedir(&self) -> Result<Vec<PathPair>> {
        self.state
            .read(|txn| Ok(txn.members()?.iter().map(MemberRef::paths).collect()))
    }

    pub fn add_member(&self, uuid: &str, kind: &str, abspath: impl AsRef<Path>) -> Result<()> {
        self.state.write(|txn| txn.add_member(uuid, kind, abspath))
    }

    /// Add several members in one transaction. Nothing is stored if any
    /// member is rejected.
    pub fn add_members<I, U, K, P>(&self, members: I) -> Result<()>
    where
        I: IntoIterator<Item = (U, K, P)>,
        U: AsRef<str>,
        K: AsRef<str>,
        P: AsRef<Path>,
    {
        self.state.write(|txn| {
            for (uuid, kind, abspath) in members {
                txn.add_member(uuid.as_ref(), kind.as_ref(), abspath)?;
            }
            Ok(())
        })
    }

    /// Remove members by uuid; returns how many were present.
    pub fn del_members<I, S>(&self, uuids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let removed = self.state.write(|txn| txn.remove_members(uuids))?;
        debug!(path = %self.state.path().display(), removed, "members removed");
        Ok(removed)
    }

    /// Remove members by position in storage order.
    pub fn del_members_at(&self, positions: &[usize]) -> Result<usize> {
        self.state.write(|txn| txn.remove_members_at(positions))
    }

    pub fn purge_members(&self) -> Result<()> {
        self.state.write(|txn| txn.purge_members())
    }
}

impl TryFrom<StateFile> for GroupFile {
    type Error = StateError;

    fn try_from(state: StateFile) -> Result<Self> {
        match state.kind() {
            RecordKind::Group => Ok(Self { state }),
            found => Err(StateError::KindMismatch {
                expected: RecordKind::Group,
                found,
            }),
        }
    }
}

impl StateHandle for GroupFile {
    fn state(&self) -> &StateFile {
        &self.state
    }
}
