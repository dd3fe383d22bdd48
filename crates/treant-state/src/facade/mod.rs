//! Per-kind handles over a [`StateFile`].
//!
//! Each public method is one top-level transaction. The field-level
//! operations they are built from live on [`Transaction`], so callers can
//! compose several of them inside one `write` and store once.

mod group;
mod sim;
mod treant;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub use group::GroupFile;
pub use sim::SimFile;
pub use treant::TreantFile;

use crate::options::PATH_LIMIT;
use crate::paths::absolutize;
use crate::transaction::{StateFile, Transaction};
use crate::Result;

// -- field-level operations shared by every kind ---------------------------

impl Transaction<'_> {
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.record().tags
    }

    pub fn add_tags<I, S>(&mut self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let policy = self.policy();
        self.record_mut()?.add_tags(tags, policy)
    }

    pub fn remove_tags<I, S>(&mut self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.record_mut()?.remove_tags(tags);
        Ok(())
    }

    pub fn purge_tags(&mut self) -> Result<()> {
        self.record_mut()?.purge_tags();
        Ok(())
    }

    pub fn categories(&self) -> &BTreeMap<String, String> {
        &self.record().categories
    }

    pub fn add_categories<I, K, V>(&mut self, categories: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let policy = self.policy();
        self.record_mut()?.add_categories(categories, policy)
    }

    pub fn remove_categories<I, S>(&mut self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.record_mut()?.remove_categories(keys);
        Ok(())
    }

    pub fn purge_categories(&mut self) -> Result<()> {
        self.record_mut()?.purge_categories();
        Ok(())
    }

    /// Set or clear the coordinator directory. Stored as an absolute path.
    pub fn set_coordinator(&mut self, coordinator: Option<&Path>) -> Result<()> {
        let policy = self.policy();
        let value = match coordinator {
            Some(path) => {
                let abs = absolutize(path)?.to_string_lossy().into_owned();
                policy.check("coordinator", PATH_LIMIT, &abs)?;
                Some(abs)
            }
            None => None,
        };
        self.record_mut()?.coordinator = value;
        Ok(())
    }
}

// -- one-call accessors ----------------------------------------------------

/// Operations every record kind supports.
///
/// Implementors only provide [`StateHandle::state`].
pub trait StateHandle {
    fn state(&self) -> &StateFile;

    fn path(&self) -> &Path {
        self.state().path()
    }

    /// Directory holding the record file.
    fn location(&self) -> &Path {
        self.state().location()
    }

    fn get_version(&self) -> Result<String> {
        self.state().read(|txn| Ok(txn.record().version.clone()))
    }

    fn get_coordinator(&self) -> Result<Option<String>> {
        self.state()
            .read(|txn| Ok(txn.record().coordinator.clone()))
    }

    fn update_coordinator(&self, coordinator: Option<&Path>) -> Result<()> {
        self.state().write(|txn| txn.set_coordinator(coordinator))
    }

    fn get_tags(&self) -> Result<BTreeSet<String>> {
        self.state().read(|txn| Ok(txn.tags().clone()))
    }

    /// Add tags. Tags already present are kept once.
    fn add_tags<I, S>(&self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().write(|txn| txn.add_tags(tags))
    }

    fn del_tags<I, S>(&self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.state().write(|txn| txn.remove_tags(tags))
    }

    fn purge_tags(&self) -> Result<()> {
        self.state().write(|txn| txn.purge_tags())
    }

    fn get_categories(&self) -> Result<BTreeMap<String, String>> {
        self.state().read(|txn| Ok(txn.categories().clone()))
    }

    /// Add categories; later values for a key replace earlier ones.
    fn add_categories<I, K, V>(&self, categories: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        self.state().write(|txn| txn.add_categories(categories))
    }

    fn del_categories<I, S>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.state().write(|txn| txn.remove_categories(keys))
    }

    fn purge_categories(&self) -> Result<()> {
        self.state().write(|txn| txn.purge_categories())
    }
}
