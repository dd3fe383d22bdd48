//! Legacy format: record fields mapped onto fixed-schema tables.
//!
//! Layout:
//!
//! ```text
//! /version                      version[15]
//! /coordinator                  abspath[511]         ("None" = absent)
//! /tags                         tag[55]
//! /categories                   category[55] value[55]
//! /members                      uuid[36] treanttype[55] abspath[511] relCont[511]
//! /mds_version                  version[15]
//! /default                      default[55]          ("None" = absent)
//! /universes/<u>/topology       abspath[511] relCont[511]
//! /universes/<u>/trajectory     abspath[255] relCont[255]
//! /universes/<u>/resnums        resnum u32           (optional)
//! /universes/<u>/selections/<s> selection[255] | index i64
//! ```
//!
//! Sections that were never created read as empty.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, warn};

use super::tables::{Cell, Column, Table, TableFile};
use super::{BackendFormat, RecordBackend};
use crate::error::StateError;
use crate::options::{PATH_LIMIT, SHORT_LIMIT, TRAJECTORY_PATH_LIMIT, UUID_LEN, VERSION_LIMIT};
use crate::paths::PathPair;
use crate::record::{from_sentinel, to_sentinel, MemberRef, Record, RecordKind};
use crate::universe::{SelectionValue, SimState, UniverseDef};
use crate::Result;

/// Width of one selection expression.
pub const SELECTION_LIMIT: usize = 255;

const SELECTION_COLUMN: &str = "selection";
const INDEX_COLUMN: &str = "index";

fn version_columns() -> Vec<Column> {
    vec![Column::string("version", VERSION_LIMIT)]
}

fn coordinator_columns() -> Vec<Column> {
    vec![Column::string("abspath", PATH_LIMIT)]
}

fn tag_columns() -> Vec<Column> {
    vec![Column::string("tag", SHORT_LIMIT)]
}

fn category_columns() -> Vec<Column> {
    vec![
        Column::string("category", SHORT_LIMIT),
        Column::string("value", SHORT_LIMIT),
    ]
}

fn member_columns() -> Vec<Column> {
    vec![
        Column::string("uuid", UUID_LEN),
        Column::string("treanttype", SHORT_LIMIT),
        Column::string("abspath", PATH_LIMIT),
        Column::string("relCont", PATH_LIMIT),
    ]
}

fn default_columns() -> Vec<Column> {
    vec![Column::string("default", SHORT_LIMIT)]
}

fn topology_columns() -> Vec<Column> {
    vec![
        Column::string("abspath", PATH_LIMIT),
        Column::string("relCont", PATH_LIMIT),
    ]
}

fn trajectory_columns() -> Vec<Column> {
    vec![
        Column::string("abspath", TRAJECTORY_PATH_LIMIT),
        Column::string("relCont", TRAJECTORY_PATH_LIMIT),
    ]
}

fn universe_path(name: &str) -> String {
    format!("/universes/{name}")
}

/// Codec for legacy tabular state files.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyBackend;

impl RecordBackend for LegacyBackend {
    fn format(&self) -> BackendFormat {
        BackendFormat::Legacy
    }

    fn load(&self, path: &Path, kind: RecordKind) -> Result<Record> {
        match TableFile::read(path)? {
            Some(file) => record_from_tables(&file, kind, path),
            None => {
                debug!(path = %path.display(), "legacy state file absent, starting empty");
                Ok(Record::new(kind))
            }
        }
    }

    fn store(&self, path: &Path, record: &Record) -> Result<()> {
        let mut file = TableFile::read(path)?.unwrap_or_default();
        tables_from_record(&mut file, record)?;
        file.write(path)?;
        debug!(path = %path.display(), "stored legacy state file");
        Ok(())
    }
}

// -- load -------------------------------------------------------------------

fn path_pairs(table: &Table) -> Vec<PathPair> {
    table
        .strings("abspath")
        .into_iter()
        .zip(table.strings("relCont"))
        .map(|(abspath, relpath)| PathPair { abspath, relpath })
        .collect()
}

fn read_selection(table: &Table) -> SelectionValue {
    if table.column_index(INDEX_COLUMN).is_some() {
        SelectionValue::Indices(
            table
                .rows()
                .iter()
                .filter_map(|r| r.first().and_then(Cell::as_i64))
                .collect(),
        )
    } else {
        SelectionValue::Expressions(table.strings(SELECTION_COLUMN))
    }
}

fn read_universe(file: &TableFile, name: &str, origin: &Path) -> Result<UniverseDef> {
    let base = universe_path(name);
    let topology = file
        .get_table(&format!("{base}/topology"))
        .and_then(|t| path_pairs(t).into_iter().next())
        .ok_or_else(|| StateError::corrupt(origin, format!("universe '{name}' has no topology")))?;

    let trajectory = file
        .get_table(&format!("{base}/trajectory"))
        .map(path_pairs)
        .unwrap_or_default();

    let resnums = file.get_table(&format!("{base}/resnums")).map(|t| {
        t.rows()
            .iter()
            .filter_map(|r| r.first().and_then(Cell::as_u32))
            .collect()
    });

    let selections_path = format!("{base}/selections");
    let mut selections = BTreeMap::new();
    for sel in file.list(&selections_path) {
        if let Some(table) = file.get_table(&format!("{selections_path}/{sel}")) {
            selections.insert(sel, read_selection(table));
        }
    }

    Ok(UniverseDef {
        topology,
        trajectory,
        selections,
        resnums,
    })
}

fn record_from_tables(file: &TableFile, kind: RecordKind, origin: &Path) -> Result<Record> {
    let mut record = Record {
        version: file
            .get_table("/version")
            .and_then(|t| t.first_string("version"))
            .unwrap_or_default(),
        coordinator: file
            .get_table("/coordinator")
            .and_then(|t| t.first_string("abspath"))
            .and_then(|s| from_sentinel(&s)),
        tags: file
            .get_table("/tags")
            .map(|t| t.strings("tag").into_iter().collect())
            .unwrap_or_else(BTreeSet::new),
        categories: file
            .get_table("/categories")
            .map(|t| {
                t.strings("category")
                    .into_iter()
                    .zip(t.strings("value"))
                    .collect()
            })
            .unwrap_or_default(),
        members: None,
        simulation: None,
    };

    match kind {
        RecordKind::Treant => {}
        RecordKind::Group => {
            let members = file
                .get_table("/members")
                .map(|t| {
                    let uuids = t.strings("uuid");
                    let kinds = t.strings("treanttype");
                    let abspaths = t.strings("abspath");
                    let relpaths = t.strings("relCont");
                    uuids
                        .into_iter()
                        .zip(kinds)
                        .zip(abspaths.into_iter().zip(relpaths))
                        .map(|((uuid, kind), (abspath, relpath))| MemberRef {
                            uuid,
                            kind,
                            abspath,
                            relpath,
                        })
                        .collect()
                })
                .unwrap_or_default();
            record.members = Some(members);
        }
        RecordKind::Sim => {
            let mut sim = SimState::default();
            if let Some(v) = file
                .get_table("/mds_version")
                .and_then(|t| t.first_string("version"))
            {
                sim.mds_version = v;
            }
            for name in file.list("/universes") {
                let def = read_universe(file, &name, origin)?;
                sim.universes.insert(name, def);
            }
            sim.default = file
                .get_table("/default")
                .and_then(|t| t.first_string("default"))
                .and_then(|s| from_sentinel(&s));
            if let Some(name) = sim.default.clone() {
                if !sim.universes.contains_key(&name) {
                    warn!(path = %origin.display(), default = %name, "default names a missing universe, clearing");
                    sim.default = None;
                }
            }
            record.simulation = Some(sim);
        }
    }

    record.ensure_shape(kind);
    Ok(record)
}

// -- store ------------------------------------------------------------------

fn store_scalar(file: &mut TableFile, path: &str, columns: Vec<Column>, value: &str) -> Result<()> {
    let column = columns[0].name.clone();
    let table = file.create_table(path, columns)?;
    if table.is_empty() {
        table.append(vec![Cell::from(value)])
    } else {
        let extra: Vec<usize> = (1..table.len()).collect();
        table.remove_rows(&extra);
        table.set(0, &column, Cell::from(value))
    }
}

/// Drop rows whose key is unwanted or repeated, then append missing keys.
/// Returns the keys already present after the purge, in row order.
fn prune_keyed_rows(table: &mut Table, key_column: &str, wanted: &BTreeSet<&str>) -> Vec<String> {
    let keys = table.strings(key_column);
    let mut seen = BTreeSet::new();
    let mut doomed = Vec::new();
    let mut kept = Vec::new();
    for (i, key) in keys.into_iter().enumerate() {
        if !wanted.contains(key.as_str()) || !seen.insert(key.clone()) {
            doomed.push(i);
        } else {
            kept.push(key);
        }
    }
    table.remove_rows(&doomed);
    kept
}

fn store_tags(file: &mut TableFile, tags: &BTreeSet<String>) -> Result<()> {
    let table = file.create_table("/tags", tag_columns())?;
    let wanted: BTreeSet<&str> = tags.iter().map(String::as_str).collect();
    let kept: BTreeSet<String> = prune_keyed_rows(table, "tag", &wanted).into_iter().collect();
    for tag in tags.iter().filter(|t| !kept.contains(*t)) {
        table.append(vec![Cell::from(tag.as_str())])?;
    }
    Ok(())
}

fn store_categories(file: &mut TableFile, categories: &BTreeMap<String, String>) -> Result<()> {
    let table = file.create_table("/categories", category_columns())?;
    let wanted: BTreeSet<&str> = categories.keys().map(String::as_str).collect();
    let kept = prune_keyed_rows(table, "category", &wanted);
    for (row, key) in kept.iter().enumerate() {
        table.set(row, "value", Cell::from(categories[key].as_str()))?;
    }
    for (key, value) in categories.iter().filter(|(k, _)| !kept.contains(*k)) {
        table.append(vec![Cell::from(key.as_str()), Cell::from(value.as_str())])?;
    }
    Ok(())
}

fn member_row(m: &MemberRef) -> Vec<Cell> {
    vec![
        Cell::from(m.uuid.as_str()),
        Cell::from(m.kind.as_str()),
        Cell::from(m.abspath.as_str()),
        Cell::from(m.relpath.as_str()),
    ]
}

fn store_members(file: &mut TableFile, members: &[MemberRef]) -> Result<()> {
    let table = file.create_table("/members", member_columns())?;
    let wanted: BTreeSet<&str> = members.iter().map(|m| m.uuid.as_str()).collect();
    let kept = prune_keyed_rows(table, "uuid", &wanted);

    // Kept rows must line up with the record's order; otherwise rewrite.
    let in_order = kept
        .iter()
        .zip(members)
        .all(|(uuid, member)| *uuid == member.uuid);
    if !in_order {
        table.clear();
        for m in members {
            table.append(member_row(m))?;
        }
        return Ok(());
    }

    for (row, member) in members.iter().enumerate().take(kept.len()) {
        table.set(row, "treanttype", Cell::from(member.kind.as_str()))?;
        table.set(row, "abspath", Cell::from(member.abspath.as_str()))?;
        table.set(row, "relCont", Cell::from(member.relpath.as_str()))?;
    }
    for m in &members[kept.len()..] {
        table.append(member_row(m))?;
    }
    Ok(())
}

fn store_universe(file: &mut TableFile, name: &str, def: &UniverseDef) -> Result<()> {
    let base = universe_path(name);
    file.remove_node(&base);
    file.create_group(&base)?;

    let topology = file.create_table(&format!("{base}/topology"), topology_columns())?;
    topology.append(vec![
        Cell::from(def.topology.abspath.as_str()),
        Cell::from(def.topology.relpath.as_str()),
    ])?;

    let trajectory = file.create_table(&format!("{base}/trajectory"), trajectory_columns())?;
    for pair in &def.trajectory {
        trajectory.append(vec![
            Cell::from(pair.abspath.as_str()),
            Cell::from(pair.relpath.as_str()),
        ])?;
    }

    if let Some(resnums) = &def.resnums {
        let table = file.create_table(&format!("{base}/resnums"), vec![Column::uint32("resnum")])?;
        for r in resnums {
            table.append(vec![Cell::UInt32(*r)])?;
        }
    }

    let selections = format!("{base}/selections");
    file.create_group(&selections)?;
    for (sel, value) in &def.selections {
        let path = format!("{selections}/{sel}");
        match value {
            SelectionValue::Expressions(exprs) => {
                let table = file.create_table(
                    &path,
                    vec![Column::string(SELECTION_COLUMN, SELECTION_LIMIT)],
                )?;
                for e in exprs {
                    table.append(vec![Cell::from(e.as_str())])?;
                }
            }
            SelectionValue::Indices(indices) => {
                let table = file.create_table(&path, vec![Column::int64(INDEX_COLUMN)])?;
                for i in indices {
                    table.append(vec![Cell::Int64(*i)])?;
                }
            }
        }
    }
    Ok(())
}

fn store_simulation(file: &mut TableFile, sim: &SimState) -> Result<()> {
    store_scalar(file, "/mds_version", version_columns(), &sim.mds_version)?;
    store_scalar(
        file,
        "/default",
        default_columns(),
        to_sentinel(sim.default.as_deref()),
    )?;

    file.create_group("/universes")?;
    for stale in file.list("/universes") {
        if !sim.universes.contains_key(&stale) {
            file.remove_node(&universe_path(&stale));
        }
    }
    for (name, def) in &sim.universes {
        store_universe(file, name, def)?;
    }
    Ok(())
}

fn tables_from_record(file: &mut TableFile, record: &Record) -> Result<()> {
    store_scalar(file, "/version", version_columns(), &record.version)?;
    store_scalar(
        file,
        "/coordinator",
        coordinator_columns(),
        to_sentinel(record.coordinator.as_deref()),
    )?;
    store_tags(file, &record.tags)?;
    store_categories(file, &record.categories)?;
    if let Some(members) = &record.members {
        store_members(file, members)?;
    }
    if let Some(sim) = &record.simulation {
        store_simulation(file, sim)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::LengthPolicy;

    const U1: &str = "11111111-1111-4111-8111-111111111111";
    const U2: &str = "22222222-2222-4222-8222-222222222222";
    const U3: &str = "33333333-3333-4333-8333-333333333333";

    fn sim_record(loc: &Path) -> Record {
        let mut r = Record::new(RecordKind::Sim);
        r.add_tags(["a", "b"], LengthPolicy::Legacy).unwrap();
        let sim = r.simulation_mut();
        sim.add_universe(
            "prod",
            "/data/top.pdb",
            &["/data/run1.xtc", "/data/run2.xtc"],
            loc,
            LengthPolicy::Legacy,
        )
        .unwrap();
        sim.add_selection("prod", "ca", vec!["name CA"], LengthPolicy::Legacy)
            .unwrap();
        sim.add_selection("prod", "first", vec![0i64, 1, 2], LengthPolicy::Legacy)
            .unwrap();
        sim.update_resnums("prod", Some(vec![1, 2, 3])).unwrap();
        r
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Sim.x.h5");
        let r = LegacyBackend.load(&path, RecordKind::Sim).unwrap();
        assert_eq!(r, Record::new(RecordKind::Sim));
    }

    #[test]
    fn sim_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Sim.x.h5");
        let record = sim_record(dir.path());

        LegacyBackend.store(&path, &record).unwrap();
        let loaded = LegacyBackend.load(&path, RecordKind::Sim).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn absent_default_stored_as_none_string_and_read_back_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Sim.x.h5");
        let mut record = sim_record(dir.path());
        record.simulation_mut().set_default(None).unwrap();
        LegacyBackend.store(&path, &record).unwrap();

        let raw = TableFile::read(&path).unwrap().unwrap();
        assert_eq!(
            raw.get_table("/default").unwrap().first_string("default").as_deref(),
            Some("None")
        );
        let loaded = LegacyBackend.load(&path, RecordKind::Sim).unwrap();
        assert_eq!(loaded.simulation().unwrap().default, None);
    }

    #[test]
    fn removed_members_are_deleted_positionally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Group.x.h5");
        let mut record = Record::new(RecordKind::Group);
        for u in [U1, U2, U3] {
            record
                .add_member(u, "Treant", dir.path().join(u), dir.path(), LengthPolicy::Legacy)
                .unwrap();
        }
        LegacyBackend.store(&path, &record).unwrap();

        record.remove_members([U1, U3]);
        LegacyBackend.store(&path, &record).unwrap();

        let raw = TableFile::read(&path).unwrap().unwrap();
        assert_eq!(raw.get_table("/members").unwrap().strings("uuid"), [U2]);
    }

    #[test]
    fn deleting_all_tags_leaves_empty_tag_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Treant.x.h5");
        let mut record = Record::new(RecordKind::Treant);
        record.add_tags(["only"], LengthPolicy::Legacy).unwrap();
        LegacyBackend.store(&path, &record).unwrap();

        record.purge_tags();
        LegacyBackend.store(&path, &record).unwrap();

        let raw = TableFile::read(&path).unwrap().unwrap();
        let tags = raw.get_table("/tags").unwrap();
        assert!(tags.is_empty());
        assert_eq!(tags.columns().len(), 1);
    }

    #[test]
    fn category_overwrite_updates_row_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Treant.x.h5");
        let mut record = Record::new(RecordKind::Treant);
        record
            .add_categories([("a", "1"), ("b", "x")], LengthPolicy::Legacy)
            .unwrap();
        LegacyBackend.store(&path, &record).unwrap();
        record.add_categories([("a", "2")], LengthPolicy::Legacy).unwrap();
        LegacyBackend.store(&path, &record).unwrap();

        let raw = TableFile::read(&path).unwrap().unwrap();
        let table = raw.get_table("/categories").unwrap();
        assert_eq!(table.len(), 2);
        let loaded = LegacyBackend.load(&path, RecordKind::Treant).unwrap();
        assert_eq!(loaded.categories["a"], "2");
    }

    #[test]
    fn dropped_universe_is_removed_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Sim.x.h5");
        let mut record = sim_record(dir.path());
        LegacyBackend.store(&path, &record).unwrap();

        record.simulation_mut().remove_universe("prod").unwrap();
        LegacyBackend.store(&path, &record).unwrap();

        let raw = TableFile::read(&path).unwrap().unwrap();
        assert!(raw.list("/universes").is_empty());
    }

    #[test]
    fn overlong_tag_fails_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Treant.x.h5");
        let mut record = Record::new(RecordKind::Treant);
        record
            .add_tags(["t".repeat(80)], LengthPolicy::Unbounded)
            .unwrap();
        let err = LegacyBackend.store(&path, &record).unwrap_err();
        assert!(matches!(err, StateError::FieldTooLong { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn universe_without_topology_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Sim.x.h5");
        let mut file = TableFile::new();
        file.create_group("/universes/broken").unwrap();
        file.write(&path).unwrap();

        let err = LegacyBackend.load(&path, RecordKind::Sim).unwrap_err();
        assert!(matches!(err, StateError::CorruptLegacyFile { .. }));
    }

    #[test]
    fn universe_without_selections_group_has_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Sim.x.h5");
        let mut file = TableFile::new();
        file.create_table("/universes/bare/topology", topology_columns())
            .unwrap()
            .append(vec![Cell::from("/t.pdb"), Cell::from("../t.pdb")])
            .unwrap();
        file.write(&path).unwrap();

        let r = LegacyBackend.load(&path, RecordKind::Sim).unwrap();
        let u = r.simulation().unwrap().universe("bare").unwrap();
        assert!(u.selections.is_empty());
        assert!(u.trajectory.is_empty());
        assert_eq!(u.resnums, None);
    }
}
