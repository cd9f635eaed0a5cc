//! Ledger-tracked migration runs against a [`ConnectionHandle`].
//!
//! Applied migrations are recorded by name in the `SequelizeMeta` table.
//! Each unit runs in its own transaction together with its ledger row, so
//! a failing unit leaves neither partial schema changes nor a ledger entry,
//! while earlier units stay applied.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dbstrap_core::TypeRegistry;
//! use dbstrap_setup::ConnectionConfig;
//! use dbstrap_sqlite::{ConnectionHandle, MigrationRunner};
//!
//! let config = ConnectionConfig::new("main", "app.db");
//! let handle = ConnectionHandle::open(&config, Arc::new(TypeRegistry::new())).unwrap();
//!
//! let report = MigrationRunner::new(&handle).apply_dir("setup").unwrap();
//! println!("applied {} migration(s)", report.applied.len());
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::Utc;
use dbstrap_core::{MigrationStep, MigrationUnit, TypeRegistry, validate_identifier};
use dbstrap_setup::SetupDir;
use rusqlite::params;
use tracing::{debug, info, warn};

use crate::error::{Result, SqliteError};
use crate::handle::ConnectionHandle;
use crate::schema::{ledger_table_sql, quote_ident, step_sql};

/// Name of the table recording applied migrations.
pub const LEDGER_TABLE: &str = "SequelizeMeta";

/// Ledger columns kept next to `name`. Ledgers created elsewhere may lack
/// them.
const LEDGER_OPTIONAL_COLUMNS: [(&str, &str); 2] =
    [("applied_at", "TEXT"), ("checksum", "TEXT")];

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub name: String,
    /// RFC 3339 timestamp; absent for rows written by other tools.
    pub applied_at: Option<String>,
    pub checksum: Option<String>,
}

/// Outcome of one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Units applied by this run, in order.
    pub applied: Vec<String>,
    /// Units that were already recorded in the ledger.
    pub skipped: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Ledger state compared with the migrations on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStatus {
    pub applied: Vec<MigrationRecord>,
    /// Units on disk that are not in the ledger, in application order.
    pub pending: Vec<String>,
    /// Ledger entries with no matching unit on disk.
    pub missing: Vec<String>,
    /// Applied units whose file changed since they ran.
    pub modified: Vec<String>,
}

/// Applies and reverts migration units on one connection.
pub struct MigrationRunner<'a> {
    handle: &'a ConnectionHandle,
    ledger_table: String,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(handle: &'a ConnectionHandle) -> Self {
        Self {
            handle,
            ledger_table: LEDGER_TABLE.to_string(),
        }
    }

    /// Uses a different ledger table name.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::ValidationError`] if `table` is not a plain
    /// identifier.
    pub fn with_ledger_table(mut self, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        self.ledger_table = table;
        Ok(self)
    }

    pub fn ledger_table(&self) -> &str {
        &self.ledger_table
    }

    fn types(&self) -> &TypeRegistry {
        self.handle.types()
    }

    /// Creates the ledger table if it does not exist, and adds the
    /// `applied_at` and `checksum` columns to a ledger that has only `name`.
    pub fn ensure_ledger(&self) -> Result<()> {
        self.handle.execute_batch(&ledger_table_sql(&self.ledger_table)?)?;

        let existing = self.ledger_columns()?;
        let ledger = quote_ident(&self.ledger_table)?;
        for (column, sql_type) in LEDGER_OPTIONAL_COLUMNS {
            if existing.contains(column) {
                continue;
            }
            info!(
                connection = %self.handle.name(),
                ledger = %self.ledger_table,
                column,
                "adding ledger column"
            );
            self.handle.execute_batch(&format!(
                "ALTER TABLE {ledger} ADD COLUMN {} {sql_type};",
                quote_ident(column)?
            ))?;
        }
        Ok(())
    }

    /// Lower-cased column names of the ledger table.
    fn ledger_columns(&self) -> Result<HashSet<String>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(&self.ledger_table)?);
        self.handle.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let names = stmt.query_map([], |row| {
                row.get::<_, String>(1).map(|name| name.to_ascii_lowercase())
            })?;
            names.collect()
        })
    }

    /// Returns the ledger rows ordered by name, which is application order.
    ///
    /// Optional columns missing from the ledger read as `None`; the table
    /// itself is never altered here.
    pub fn applied(&self) -> Result<Vec<MigrationRecord>> {
        if !self.handle.table_exists(&self.ledger_table)? {
            return Ok(Vec::new());
        }
        let columns = self.ledger_columns()?;
        let select = |column: &str| -> Result<String> {
            if columns.contains(column) {
                quote_ident(column)
            } else {
                Ok("NULL".to_string())
            }
        };
        let sql = format!(
            "SELECT name, {}, {} FROM {} ORDER BY name",
            select("applied_at")?,
            select("checksum")?,
            quote_ident(&self.ledger_table)?
        );
        self.handle.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok(MigrationRecord {
                    name: row.get(0)?,
                    applied_at: row.get(1)?,
                    checksum: row.get(2)?,
                })
            })?;
            rows.collect()
        })
    }

    /// Applies every unit not yet in the ledger, in name order.
    ///
    /// Stops at the first failing unit; units applied before it stay
    /// applied and recorded.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::MigrationFailed`] naming the failing unit.
    pub fn apply(&self, units: &[MigrationUnit]) -> Result<MigrationReport> {
        self.ensure_ledger()?;
        let applied: HashMap<String, Option<String>> = self
            .applied()?
            .into_iter()
            .map(|r| (r.name, r.checksum))
            .collect();

        let mut ordered: Vec<&MigrationUnit> = units.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        let mut report = MigrationReport::default();
        for unit in ordered {
            if let Some(recorded) = applied.get(&unit.name) {
                if is_modified(recorded.as_deref(), unit) {
                    warn!(
                        connection = %self.handle.name(),
                        migration = %unit.name,
                        "applied migration has changed on disk"
                    );
                }
                report.skipped += 1;
                continue;
            }

            self.run_unit(&unit.name, &unit.script.up, Some(&unit.checksum))?;
            info!(connection = %self.handle.name(), migration = %unit.name, "migration applied");
            report.applied.push(unit.name.clone());
        }

        if report.is_noop() {
            debug!(connection = %self.handle.name(), "no pending migrations");
        }
        Ok(report)
    }

    /// Loads the migrations under `setup_dir` and applies the pending ones.
    pub fn apply_dir(&self, setup_dir: impl AsRef<Path>) -> Result<MigrationReport> {
        let units = SetupDir::new(setup_dir.as_ref()).load_migrations(self.types())?;
        self.apply(&units)
    }

    /// Compares the ledger with `units`.
    pub fn status(&self, units: &[MigrationUnit]) -> Result<MigrationStatus> {
        let applied = self.applied()?;
        let recorded: HashSet<&str> = applied.iter().map(|r| r.name.as_str()).collect();
        let on_disk: HashMap<&str, &MigrationUnit> =
            units.iter().map(|u| (u.name.as_str(), u)).collect();

        let mut pending: Vec<String> = units
            .iter()
            .filter(|u| !recorded.contains(u.name.as_str()))
            .map(|u| u.name.clone())
            .collect();
        pending.sort();

        let mut missing = Vec::new();
        let mut modified = Vec::new();
        for record in &applied {
            match on_disk.get(record.name.as_str()) {
                None => missing.push(record.name.clone()),
                Some(unit) if is_modified(record.checksum.as_deref(), unit) => {
                    modified.push(record.name.clone());
                }
                Some(_) => {}
            }
        }

        Ok(MigrationStatus {
            applied,
            pending,
            missing,
            modified,
        })
    }

    /// Reverts the most recently applied unit and removes its ledger row.
    ///
    /// Returns the reverted unit's name, or `None` if nothing is applied.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::UnknownMigration`] if the unit is not among
    /// `units` and [`SqliteError::Irreversible`] if it has no down steps.
    pub fn undo_last(&self, units: &[MigrationUnit]) -> Result<Option<String>> {
        let Some(last) = self.applied()?.pop() else {
            return Ok(None);
        };
        let unit = units
            .iter()
            .find(|u| u.name == last.name)
            .ok_or_else(|| SqliteError::UnknownMigration(last.name.clone()))?;
        if !unit.is_reversible() {
            return Err(SqliteError::Irreversible(unit.name.clone()));
        }

        self.run_unit(&unit.name, &unit.script.down, None)?;
        info!(connection = %self.handle.name(), migration = %unit.name, "migration reverted");
        Ok(Some(unit.name.clone()))
    }

    /// [`undo_last`](Self::undo_last) with the units under `setup_dir`.
    pub fn undo_last_in_dir(&self, setup_dir: impl AsRef<Path>) -> Result<Option<String>> {
        let units = SetupDir::new(setup_dir.as_ref()).load_migrations(self.types())?;
        self.undo_last(&units)
    }

    /// Runs `steps` and the ledger update in one transaction.
    ///
    /// With a checksum the unit is recorded, without one it is removed.
    fn run_unit(&self, name: &str, steps: &[MigrationStep], checksum: Option<&str>) -> Result<()> {
        let statements = steps
            .iter()
            .map(|step| step_sql(step, self.types()))
            .collect::<Result<Vec<_>>>()?;
        let ledger = quote_ident(&self.ledger_table)?;
        for sql in &statements {
            self.handle.log_sql(sql);
        }

        self.handle
            .with_connection(|conn| {
                let tx = conn.transaction()?;
                for sql in &statements {
                    tx.execute_batch(sql)?;
                }
                match checksum {
                    Some(checksum) => tx.execute(
                        &format!(
                            "INSERT INTO {ledger} (name, applied_at, checksum) VALUES (?1, ?2, ?3)"
                        ),
                        params![name, Utc::now().to_rfc3339(), checksum],
                    )?,
                    None => tx.execute(&format!("DELETE FROM {ledger} WHERE name = ?1"), [name])?,
                };
                tx.commit()
            })
            .map_err(|err| match err {
                SqliteError::DatabaseError(source) => SqliteError::MigrationFailed {
                    migration: name.to_string(),
                    source,
                },
                other => other,
            })
    }
}

fn is_modified(recorded: Option<&str>, unit: &MigrationUnit) -> bool {
    recorded.is_some_and(|c| !unit.checksum.is_empty() && c != unit.checksum)
}

/// Applies the pending migrations under `setup_dir` to `handle` using the
/// default ledger table.
pub fn apply_migrations(
    setup_dir: impl AsRef<Path>,
    handle: &ConnectionHandle,
) -> Result<MigrationReport> {
    MigrationRunner::new(handle).apply_dir(setup_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use dbstrap_core::{ColumnSchema, MigrationScript};
    use dbstrap_setup::ConnectionConfig;

    fn memory() -> ConnectionHandle {
        ConnectionHandle::open(
            &ConnectionConfig::new("test", ":memory:"),
            Arc::new(TypeRegistry::new()),
        )
        .unwrap()
    }

    fn create(name: &str, table: &str) -> MigrationUnit {
        let mut columns = std::collections::BTreeMap::new();
        columns.insert("id".to_string(), ColumnSchema::primary_key());
        let mut unit = MigrationUnit::new(
            name,
            MigrationScript {
                up: vec![MigrationStep::CreateTable {
                    table: table.to_string(),
                    columns,
                    if_not_exists: false,
                }],
                down: vec![MigrationStep::DropTable {
                    table: table.to_string(),
                    if_exists: false,
                }],
            },
        );
        unit.checksum = format!("sum-{name}");
        unit
    }

    fn raw(name: &str, sql: &str) -> MigrationUnit {
        MigrationUnit::new(
            name,
            MigrationScript {
                up: vec![MigrationStep::Sql {
                    sql: sql.to_string(),
                }],
                down: Vec::new(),
            },
        )
    }

    #[test]
    fn test_apply_in_name_order_and_record() {
        let handle = memory();
        let runner = MigrationRunner::new(&handle);
        let units = vec![create("002-b", "b"), create("001-a", "a")];

        let report = runner.apply(&units).unwrap();
        assert_eq!(report.applied, vec!["001-a", "002-b"]);

        let names: Vec<String> = runner.applied().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["001-a", "002-b"]);
        assert!(handle.table_exists("a").unwrap());
        assert!(handle.table_exists("b").unwrap());
    }

    #[test]
    fn test_second_run_is_noop() {
        let handle = memory();
        let runner = MigrationRunner::new(&handle);
        let units = vec![create("001-a", "a")];

        runner.apply(&units).unwrap();
        let report = runner.apply(&units).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_failure_stops_run_and_keeps_earlier_units() {
        let handle = memory();
        let runner = MigrationRunner::new(&handle);
        let units = vec![
            create("001-a", "a"),
            raw("002-bad", "CREATE TABLE c (id INTEGER); INSERT INTO nowhere VALUES (1);"),
            create("003-d", "d"),
        ];

        let err = runner.apply(&units).unwrap_err();
        assert!(matches!(err, SqliteError::MigrationFailed { ref migration, .. } if migration == "002-bad"));

        let names: Vec<String> = runner.applied().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["001-a"]);
        assert!(!handle.table_exists("c").unwrap());
        assert!(!handle.table_exists("d").unwrap());
    }

    #[test]
    fn test_status_reports_pending_missing_and_modified() {
        let handle = memory();
        let runner = MigrationRunner::new(&handle);
        runner.apply(&[create("001-a", "a"), create("002-b", "b")]).unwrap();

        let mut changed = create("001-a", "a");
        changed.checksum = "different".to_string();
        let status = runner.status(&[changed, create("003-c", "c")]).unwrap();

        assert_eq!(status.applied.len(), 2);
        assert_eq!(status.pending, vec!["003-c"]);
        assert_eq!(status.missing, vec!["002-b"]);
        assert_eq!(status.modified, vec!["001-a"]);
    }

    #[test]
    fn test_undo_last() {
        let handle = memory();
        let runner = MigrationRunner::new(&handle);
        let units = vec![create("001-a", "a"), create("002-b", "b")];
        runner.apply(&units).unwrap();

        assert_eq!(runner.undo_last(&units).unwrap().as_deref(), Some("002-b"));
        assert!(!handle.table_exists("b").unwrap());
        assert_eq!(runner.applied().unwrap().len(), 1);

        assert_eq!(runner.undo_last(&units).unwrap().as_deref(), Some("001-a"));
        assert_eq!(runner.undo_last(&units).unwrap(), None);
    }

    #[test]
    fn test_undo_irreversible() {
        let handle = memory();
        let runner = MigrationRunner::new(&handle);
        let units = vec![raw("001-raw", "CREATE TABLE r (id INTEGER);")];
        runner.apply(&units).unwrap();

        assert!(matches!(
            runner.undo_last(&units),
            Err(SqliteError::Irreversible(name)) if name == "001-raw"
        ));
        assert!(matches!(
            runner.undo_last(&[]),
            Err(SqliteError::UnknownMigration(_))
        ));
    }

    fn name_only_ledger(handle: &ConnectionHandle) {
        handle
            .execute_batch(
                "CREATE TABLE \"SequelizeMeta\" (name VARCHAR(255) NOT NULL PRIMARY KEY);
                 INSERT INTO \"SequelizeMeta\" (name) VALUES ('000-legacy');",
            )
            .unwrap();
    }

    #[test]
    fn test_name_only_ledger_is_readable() {
        let handle = memory();
        name_only_ledger(&handle);
        let runner = MigrationRunner::new(&handle);

        let applied = runner.applied().unwrap();
        assert_eq!(
            applied,
            vec![MigrationRecord {
                name: "000-legacy".to_string(),
                applied_at: None,
                checksum: None,
            }]
        );

        let status = runner.status(&[create("001-a", "a")]).unwrap();
        assert_eq!(status.pending, vec!["001-a"]);
        assert_eq!(status.missing, vec!["000-legacy"]);
        assert!(status.modified.is_empty());
    }

    #[test]
    fn test_apply_upgrades_name_only_ledger() {
        let handle = memory();
        name_only_ledger(&handle);
        let runner = MigrationRunner::new(&handle);
        let units = vec![create("001-a", "a"), create("002-b", "b")];

        let report = runner.apply(&units).unwrap();
        assert_eq!(report.applied, vec!["001-a", "002-b"]);

        let applied = runner.applied().unwrap();
        assert_eq!(applied.len(), 3);
        assert_eq!(applied[0].applied_at, None);
        assert_eq!(applied[1].checksum.as_deref(), Some("sum-001-a"));
        assert!(applied[2].applied_at.is_some());

        // the added columns survive a second run
        assert!(runner.apply(&units).unwrap().is_noop());
        assert_eq!(runner.undo_last(&units).unwrap().as_deref(), Some("002-b"));
    }

    #[test]
    fn test_custom_ledger_table() {
        let handle = memory();
        let runner = MigrationRunner::new(&handle)
            .with_ledger_table("schema_history")
            .unwrap();
        runner.apply(&[create("001-a", "a")]).unwrap();
        assert!(handle.table_exists("schema_history").unwrap());
        assert!(!handle.table_exists(LEDGER_TABLE).unwrap());

        assert!(MigrationRunner::new(&handle).with_ledger_table("bad name").is_err());
    }
}
