//! SQLite metric store
//!
//! Supplies the object inventory for host and service reports and answers
//! availability lookups with a configurable SQL query. The query receives
//! `?1` = object id, `?2` = period start, `?3` = period end (civil
//! timestamps, `%Y-%m-%d %H:%M:%S`) and must return one nullable REAL.

use crate::filter::Attributes;
use crate::provider::{ObjectRef, ReportKind, SlaMetricProvider};
use crate::timerange::TIMESTAMP_FORMAT;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Mean of the availability samples recorded for the object inside the period
pub const DEFAULT_AVAILABILITY_QUERY: &str = "SELECT AVG(ok_percent) FROM availability \
     WHERE object_id = ?1 AND sample_time BETWEEN ?2 AND ?3";

/// Tables the backend reads
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS hosts (
    object_id INTEGER PRIMARY KEY,
    host_name TEXT NOT NULL,
    display_name TEXT,
    instance_name TEXT NOT NULL DEFAULT 'default'
);
CREATE TABLE IF NOT EXISTS services (
    object_id INTEGER PRIMARY KEY,
    host_object_id INTEGER NOT NULL REFERENCES hosts(object_id),
    service_description TEXT NOT NULL,
    display_name TEXT
);
CREATE TABLE IF NOT EXISTS hostgroup_members (
    hostgroup_name TEXT NOT NULL,
    host_object_id INTEGER NOT NULL REFERENCES hosts(object_id)
);
CREATE TABLE IF NOT EXISTS servicegroup_members (
    servicegroup_name TEXT NOT NULL,
    service_object_id INTEGER NOT NULL REFERENCES services(object_id)
);
CREATE TABLE IF NOT EXISTS customvars (
    object_id INTEGER NOT NULL,
    varname TEXT NOT NULL,
    varvalue TEXT
);
CREATE TABLE IF NOT EXISTS availability (
    object_id INTEGER NOT NULL,
    sample_time TEXT NOT NULL,
    ok_percent REAL
);
CREATE INDEX IF NOT EXISTS availability_object_time ON availability (object_id, sample_time);
";

/// Create the backend tables on a connection
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .context("failed to create metric store schema")
}

fn open_read_only(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open metric store: {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

pub struct SqliteBackend {
    conn: Connection,
    availability_query: String,
}

impl SqliteBackend {
    /// Open an existing store read-only
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_connection(open_read_only(path)?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        SqliteBackend {
            conn,
            availability_query: DEFAULT_AVAILABILITY_QUERY.to_string(),
        }
    }

    pub fn with_availability_query(mut self, query: impl Into<String>) -> Self {
        self.availability_query = query.into();
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// All objects of `kind`, ordered by host then service display name
    pub fn objects(&self, kind: ReportKind) -> Result<Vec<ObjectRef>> {
        let objects = match kind {
            ReportKind::HostSla => self.host_objects(),
            ReportKind::ServiceSla => self.service_objects(),
        }?;
        debug!(kind = kind.as_str(), count = objects.len(), "loaded inventory");
        Ok(objects)
    }

    fn host_objects(&self) -> Result<Vec<ObjectRef>> {
        let groups = self.memberships(
            "SELECT host_object_id, hostgroup_name FROM hostgroup_members ORDER BY hostgroup_name",
        )?;
        let vars = self.custom_variables()?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT object_id, host_name, COALESCE(display_name, host_name), instance_name
                 FROM hosts
                 ORDER BY 3, object_id",
            )
            .context("failed to query hosts")?;
        let rows = stmt.query_map([], |row| {
            Ok(HostRecord {
                object_id: row.get(0)?,
                host_name: row.get(1)?,
                display_name: row.get(2)?,
                instance_name: row.get(3)?,
            })
        })?;

        let mut objects = Vec::new();
        for host in rows {
            let host = host.context("failed to read host row")?;
            let mut attributes = Attributes::new();
            host.add_attributes(&mut attributes, &groups, &vars);
            objects.push(ObjectRef {
                id: host.object_id.to_string(),
                dimensions: vec![host.display_name],
                attributes,
            });
        }
        Ok(objects)
    }

    fn service_objects(&self) -> Result<Vec<ObjectRef>> {
        let hostgroups = self.memberships(
            "SELECT host_object_id, hostgroup_name FROM hostgroup_members ORDER BY hostgroup_name",
        )?;
        let servicegroups = self.memberships(
            "SELECT service_object_id, servicegroup_name FROM servicegroup_members
             ORDER BY servicegroup_name",
        )?;
        let vars = self.custom_variables()?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT s.object_id, s.service_description,
                        COALESCE(s.display_name, s.service_description),
                        h.object_id, h.host_name, COALESCE(h.display_name, h.host_name),
                        h.instance_name
                 FROM services s
                 JOIN hosts h ON h.object_id = s.host_object_id
                 ORDER BY 6, 3, s.object_id",
            )
            .context("failed to query services")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                HostRecord {
                    object_id: row.get(3)?,
                    host_name: row.get(4)?,
                    display_name: row.get(5)?,
                    instance_name: row.get(6)?,
                },
            ))
        })?;

        let mut objects = Vec::new();
        for service in rows {
            let (object_id, description, display_name, host) =
                service.context("failed to read service row")?;
            let mut attributes = Attributes::new();
            host.add_attributes(&mut attributes, &hostgroups, &vars);
            attributes.insert("service_description".to_string(), vec![description]);
            if let Some(groups) = servicegroups.get(&object_id) {
                attributes.insert("servicegroup_name".to_string(), groups.clone());
            }
            add_custom_variables(&mut attributes, "_service_", vars.get(&object_id));
            objects.push(ObjectRef {
                id: object_id.to_string(),
                dimensions: vec![host.display_name, display_name],
                attributes,
            });
        }
        Ok(objects)
    }

    fn memberships(&self, sql: &str) -> Result<HashMap<i64, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("failed to query group memberships")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        let mut groups: HashMap<i64, Vec<String>> = HashMap::new();
        for row in rows {
            let (object_id, name) = row?;
            groups.entry(object_id).or_default().push(name);
        }
        Ok(groups)
    }

    fn custom_variables(&self) -> Result<HashMap<i64, Vec<(String, String)>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT object_id, varname, COALESCE(varvalue, '') FROM customvars ORDER BY varname")
            .context("failed to query custom variables")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut vars: HashMap<i64, Vec<(String, String)>> = HashMap::new();
        for row in rows {
            let (object_id, name, value) = row?;
            vars.entry(object_id).or_default().push((name, value));
        }
        Ok(vars)
    }
}

struct HostRecord {
    object_id: i64,
    host_name: String,
    display_name: String,
    instance_name: String,
}

impl HostRecord {
    fn add_attributes(
        &self,
        attributes: &mut Attributes,
        groups: &HashMap<i64, Vec<String>>,
        vars: &HashMap<i64, Vec<(String, String)>>,
    ) {
        attributes.insert("host_name".to_string(), vec![self.host_name.clone()]);
        attributes.insert("instance_name".to_string(), vec![self.instance_name.clone()]);
        if let Some(groups) = groups.get(&self.object_id) {
            attributes.insert("hostgroup_name".to_string(), groups.clone());
        }
        add_custom_variables(attributes, "_host_", vars.get(&self.object_id));
    }
}

/// Custom variables are stored lower-cased under `<prefix><name>`
fn add_custom_variables(
    attributes: &mut Attributes,
    prefix: &str,
    vars: Option<&Vec<(String, String)>>,
) {
    for (name, value) in vars.into_iter().flatten() {
        let column = format!("{}{}", prefix, name).to_ascii_lowercase();
        attributes.entry(column).or_default().push(value.clone());
    }
}

impl SlaMetricProvider for SqliteBackend {
    fn availability(
        &self,
        object_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<f64>> {
        query_availability(&self.conn, &self.availability_query, object_id, start, end)
    }
}

/// Read-only connections to one store, shareable across threads
///
/// Each lookup checks out an idle connection (opening a new one when none is
/// idle) and returns it afterwards, so concurrent lookups never share a
/// connection. This is the provider for
/// [`ReportAssembler::assemble_parallel`](crate::report::ReportAssembler::assemble_parallel).
pub struct SqlitePool {
    path: PathBuf,
    availability_query: String,
    idle: Mutex<Vec<Connection>>,
}

impl SqlitePool {
    /// Open the store once up front so a bad path fails before any fetch
    pub fn open(path: &Path) -> Result<Self> {
        let first = open_read_only(path)?;
        Ok(SqlitePool {
            path: path.to_path_buf(),
            availability_query: DEFAULT_AVAILABILITY_QUERY.to_string(),
            idle: Mutex::new(vec![first]),
        })
    }

    pub fn with_availability_query(mut self, query: impl Into<String>) -> Self {
        self.availability_query = query.into();
        self
    }

    /// Connections currently idle in the pool
    pub fn idle_connections(&self) -> usize {
        self.lock_idle().len()
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<Connection>> {
        // a panic while holding the lock leaves the Vec intact
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn checkout(&self) -> Result<Connection> {
        let idle = self.lock_idle().pop();
        match idle {
            Some(conn) => Ok(conn),
            None => open_read_only(&self.path),
        }
    }

    fn checkin(&self, conn: Connection) {
        self.lock_idle().push(conn);
    }
}

impl SlaMetricProvider for SqlitePool {
    fn availability(
        &self,
        object_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<f64>> {
        let conn = self.checkout()?;
        let value = query_availability(&conn, &self.availability_query, object_id, start, end);
        self.checkin(conn);
        value
    }
}

fn query_availability(
    conn: &Connection,
    sql: &str,
    object_id: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Option<f64>> {
    let id = match object_id.parse::<i64>() {
        Ok(n) => Value::Integer(n),
        Err(_) => Value::Text(object_id.to_string()),
    };
    let start = start.format(TIMESTAMP_FORMAT).to_string();
    let end = end.format(TIMESTAMP_FORMAT).to_string();

    let mut stmt = conn
        .prepare_cached(sql)
        .context("failed to prepare availability query")?;
    let value = stmt
        .query_row(params![id, start, end], |row| row.get::<_, Option<f64>>(0))
        .optional()
        .with_context(|| {
            format!(
                "availability query failed for object {} between {} and {}",
                object_id, start, end
            )
        })?;
    Ok(value.flatten())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timerange::TIMESTAMP_FORMAT;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    fn store() -> SqliteBackend {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO hosts VALUES (1, 'web01', 'Web 01', 'default');
             INSERT INTO hosts VALUES (2, 'db01', NULL, 'default');
             INSERT INTO services VALUES (10, 1, 'http', 'HTTP');
             INSERT INTO services VALUES (11, 2, 'pgsql', NULL);
             INSERT INTO hostgroup_members VALUES ('linux', 1);
             INSERT INTO hostgroup_members VALUES ('linux', 2);
             INSERT INTO hostgroup_members VALUES ('web', 1);
             INSERT INTO servicegroup_members VALUES ('frontend', 10);
             INSERT INTO customvars VALUES (1, 'OS', 'debian');
             INSERT INTO customvars VALUES (10, 'team', 'ops');
             INSERT INTO availability VALUES (1, '2026-01-01 12:00:00', 100.0);
             INSERT INTO availability VALUES (1, '2026-01-02 12:00:00', 98.0);
             INSERT INTO availability VALUES (2, '2026-01-01 12:00:00', NULL);",
        )
        .unwrap();
        SqliteBackend::from_connection(conn)
    }

    #[test]
    fn test_host_inventory_is_ordered_by_display_name() {
        let objects = store().objects(ReportKind::HostSla).unwrap();
        let names: Vec<_> = objects.iter().map(|o| o.dimensions[0].as_str()).collect();
        assert_eq!(names, vec!["Web 01", "db01"]);
        assert_eq!(objects[0].id, "1");
        assert_eq!(objects[0].attributes["host_name"], vec!["web01"]);
        assert_eq!(objects[0].attributes["hostgroup_name"], vec!["linux", "web"]);
        assert_eq!(objects[0].attributes["_host_os"], vec!["debian"]);
        assert_eq!(objects[1].attributes["instance_name"], vec!["default"]);
    }

    #[test]
    fn test_service_inventory_carries_host_and_service_columns() {
        let objects = store().objects(ReportKind::ServiceSla).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].dimensions, vec!["Web 01", "HTTP"]);
        assert_eq!(objects[0].attributes["service_description"], vec!["http"]);
        assert_eq!(objects[0].attributes["servicegroup_name"], vec!["frontend"]);
        assert_eq!(objects[0].attributes["_service_team"], vec!["ops"]);
        assert_eq!(objects[0].attributes["_host_os"], vec!["debian"]);
        assert_eq!(objects[1].dimensions, vec!["db01", "pgsql"]);
    }

    #[test]
    fn test_availability_averages_samples_in_period() {
        let backend = store();
        let value = backend
            .availability("1", ts("2026-01-01 00:00:00"), ts("2026-01-31 23:59:59"))
            .unwrap();
        assert_eq!(value, Some(99.0));

        let first_day = backend
            .availability("1", ts("2026-01-01 00:00:00"), ts("2026-01-01 23:59:59"))
            .unwrap();
        assert_eq!(first_day, Some(100.0));
    }

    #[test]
    fn test_availability_without_samples_is_absent() {
        let backend = store();
        assert_eq!(
            backend
                .availability("2", ts("2026-01-01 00:00:00"), ts("2026-01-31 23:59:59"))
                .unwrap(),
            None
        );
        assert_eq!(
            backend
                .availability("1", ts("2025-01-01 00:00:00"), ts("2025-01-31 23:59:59"))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_custom_query_without_rows_is_absent() {
        let backend = store().with_availability_query(
            "SELECT ok_percent FROM availability WHERE object_id = ?1 AND sample_time = ?2 AND ?3 IS NOT NULL",
        );
        assert_eq!(
            backend
                .availability("1", ts("2026-03-01 00:00:00"), ts("2026-03-01 00:00:00"))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_broken_query_is_an_error() {
        let backend = store().with_availability_query("SELECT nope FROM nowhere");
        assert!(backend
            .availability("1", ts("2026-01-01 00:00:00"), ts("2026-01-31 23:59:59"))
            .is_err());
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SqliteBackend::open(&dir.path().join("missing.db")).is_err());
        assert!(SqlitePool::open(&dir.path().join("missing.db")).is_err());
    }

    fn store_on_disk(dir: &Path) -> PathBuf {
        let path = dir.join("metrics.db");
        let conn = Connection::open(&path).unwrap();
        create_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO availability VALUES (1, '2026-01-01 12:00:00', 100.0);
             INSERT INTO availability VALUES (1, '2026-01-02 12:00:00', 98.0);",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_pool_answers_like_single_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_on_disk(dir.path());
        let pool = SqlitePool::open(&path).unwrap();
        let backend = SqliteBackend::open(&path).unwrap();

        let (start, end) = (ts("2026-01-01 00:00:00"), ts("2026-01-31 23:59:59"));
        assert_eq!(pool.availability("1", start, end).unwrap(), Some(99.0));
        assert_eq!(
            pool.availability("1", start, end).unwrap(),
            backend.availability("1", start, end).unwrap()
        );
        assert_eq!(pool.availability("2", start, end).unwrap(), None);
        assert_eq!(pool.idle_connections(), 1);
    }

    #[test]
    fn test_pool_returns_connection_after_query_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_on_disk(dir.path());
        let pool = SqlitePool::open(&path)
            .unwrap()
            .with_availability_query("SELECT nope FROM nowhere");
        assert!(pool
            .availability("1", ts("2026-01-01 00:00:00"), ts("2026-01-31 23:59:59"))
            .is_err());
        assert_eq!(pool.idle_connections(), 1);
    }
}
