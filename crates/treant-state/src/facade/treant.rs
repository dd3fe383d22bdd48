use std::path::Path;

use crate::error::StateError;
use crate::facade::StateHandle;
use crate::options::StateOptions;
use crate::record::RecordKind;
use crate::transaction::StateFile;
use crate::Result;

/// State file of a plain treant: tags, categories and a coordinator.
#[derive(Debug)]
pub struct TreantFile {
    state: StateFile,
}

impl TreantFile {
    pub fn open(path: impl AsRef<Path>, options: StateOptions) -> Result<Self> {
        StateFile::open(path, RecordKind::Treant, options).map(|state| Self { state })
    }

    /// Find or create `Treant.{uuid}.*` in `dir`.
    pub fn discover(dir: impl AsRef<Path>, uuid: &str, options: StateOptions) -> Result<Self> {
        StateFile::discover(dir, RecordKind::Treant, uuid, options).map(|state| Self { state })
    }

    pub fn into_state(self) -> StateFile {
        self.state
    }
}

impl TryFrom<StateFile> for TreantFile {
    type Error = StateError;

    fn try_from(state: StateFile) -> Result<Self> {
        match state.kind() {
            RecordKind::Treant => Ok(Self { state }),
            found => Err(StateError::KindMismatch {
                expected: RecordKind::Treant,
                found,
            }),
        }
    }
}

impl StateHandle for TreantFile {
    fn state(&self) -> &StateFile {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_treant_has_version_and_nothing_else() {
        let dir = tempfile::tempdir().unwrap();
        let treant = TreantFile::open(dir.path().join("Treant.a.json"), StateOptions::default())
            .unwrap();
        assert_eq!(treant.get_version().unwrap(), crate::record::SCHEMA_VERSION);
        assert!(treant.get_tags().unwrap().is_empty());
        assert!(treant.get_categories().unwrap().is_empty());
        assert_eq!(treant.get_coordinator().unwrap(), None);
    }

    #[test]
    fn coordinator_is_stored_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let treant = TreantFile::open(dir.path().join("Treant.a.json"), StateOptions::default())
            .unwrap();
        treant
            .update_coordinator(Some(dir.path().join("coord/../coord").as_path()))
            .unwrap();
        let stored = treant.get_coordinator().unwrap().unwrap();
        assert_eq!(Path::new(&stored), dir.path().join("coord"));

        treant.update_coordinator(None).unwrap();
        assert_eq!(treant.get_coordinator().unwrap(), None);
    }

    #[test]
    fn wrong_kind_state_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::open(
            dir.path().join("Group.a.json"),
            RecordKind::Group,
            StateOptions::default(),
        )
        .unwrap();
        let err = TreantFile::try_from(state).unwrap_err();
        assert!(matches!(err, StateError::KindMismatch { .. }));
    }
}
