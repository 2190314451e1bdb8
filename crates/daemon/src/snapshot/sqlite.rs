// SQLite-backed snapshot store.
//
// One row per snapshot in `architecture_snapshots`; `graph_data` holds the
// document as JSON. Versions are assigned as MAX(version)+1 inside an
// IMMEDIATE transaction so concurrent writers serialize on the database
// lock, and UNIQUE(project_id, version) backs that up.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;
use vibegraph_common::graph::GraphDocument;
use vibegraph_common::sync::SnapshotEvent;
use vibegraph_common::types::{ProjectId, Snapshot, Version};

use super::{AppendOutcome, SnapshotStore, SnapshotStoreError};
use crate::feed::FeedHub;

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE architecture_snapshots (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id  TEXT NOT NULL,
    version     INTEGER NOT NULL,
    graph_data  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE (project_id, version)
);

CREATE INDEX architecture_snapshots_latest_idx
    ON architecture_snapshots (project_id, version DESC);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

#[derive(Debug)]
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
    feed: Option<FeedHub>,
}

impl SqliteSnapshotStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create snapshot db parent directory `{}`", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open snapshot db at `{}`", path.display()))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .context("failed to configure sqlite pragmas for snapshot db")?;

        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory snapshot db")?;
        Self::from_connection(conn)
    }

    /// Publish every successful append to `feed`.
    pub fn with_feed(mut self, feed: FeedHub) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.conn.lock().map_err(|_| anyhow::anyhow!("snapshot db lock poisoned"))?;
        current_schema_version(&conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn), feed: None })
    }

    fn insert(
        &self,
        project_id: ProjectId,
        expected_latest: Option<Version>,
        graph: &GraphDocument,
    ) -> Result<AppendOutcome, SnapshotStoreError> {
        let graph_json = serde_json::to_string(graph)?;
        let created_at = Utc::now();

        let outcome = {
            let mut conn = self.conn.lock().map_err(|_| SnapshotStoreError::Poisoned)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let latest: Version = tx.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM architecture_snapshots WHERE project_id = ?1",
                params![project_id.to_string()],
                |row| row.get(0),
            )?;

            if expected_latest.is_some_and(|expected| expected != latest) {
                let latest_row = select_latest(&tx, project_id)?;
                return Ok(AppendOutcome::VersionMismatch { latest: latest_row });
            }

            let version = latest + 1;
            tx.execute(
                "INSERT INTO architecture_snapshots (project_id, version, graph_data, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![project_id.to_string(), version, graph_json, created_at.to_rfc3339()],
            )?;
            tx.commit()?;
            version
        };

        debug!(%project_id, version = outcome, "appended snapshot");
        if let Some(feed) = &self.feed {
            feed.publish(SnapshotEvent {
                project_id,
                version: outcome,
                graph_data: graph.clone(),
                created_at,
            });
        }
        Ok(AppendOutcome::Appended(outcome))
    }

    fn read_latest(&self, project_id: ProjectId) -> Result<Option<Snapshot>, SnapshotStoreError> {
        let conn = self.conn.lock().map_err(|_| SnapshotStoreError::Poisoned)?;
        select_latest(&conn, project_id)
    }

    fn read_after(
        &self,
        project_id: ProjectId,
        after: Version,
    ) -> Result<Vec<Snapshot>, SnapshotStoreError> {
        let conn = self.conn.lock().map_err(|_| SnapshotStoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT version, graph_data, created_at FROM architecture_snapshots
             WHERE project_id = ?1 AND version > ?2
             ORDER BY version ASC",
        )?;
        let rows = stmt.query_map(params![project_id.to_string(), after], raw_row)?;

        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(decode_row(project_id, row?)?);
        }
        Ok(snapshots)
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    async fn append(
        &self,
        project_id: ProjectId,
        graph: &GraphDocument,
    ) -> Result<Version, SnapshotStoreError> {
        match self.insert(project_id, None, graph)? {
            AppendOutcome::Appended(version) => Ok(version),
            AppendOutcome::VersionMismatch { .. } => {
                Err(SnapshotStoreError::Unavailable("unconditional append was rejected".into()))
            }
        }
    }

    async fn append_if(
        &self,
        project_id: ProjectId,
        expected_latest: Version,
        graph: &GraphDocument,
    ) -> Result<AppendOutcome, SnapshotStoreError> {
        self.insert(project_id, Some(expected_latest), graph)
    }

    async fn latest(&self, project_id: ProjectId) -> Result<Option<Snapshot>, SnapshotStoreError> {
        self.read_latest(project_id)
    }

    async fn list_after(
        &self,
        project_id: ProjectId,
        after: Version,
    ) -> Result<Vec<Snapshot>, SnapshotStoreError> {
        self.read_after(project_id, after)
    }
}

type RawRow = (Version, String, String);

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn select_latest(
    conn: &Connection,
    project_id: ProjectId,
) -> Result<Option<Snapshot>, SnapshotStoreError> {
    let row = conn
        .query_row(
            "SELECT version, graph_data, created_at FROM architecture_snapshots
             WHERE project_id = ?1
             ORDER BY version DESC
             LIMIT 1",
            params![project_id.to_string()],
            raw_row,
        )
        .optional()?;
    row.map(|raw| decode_row(project_id, raw)).transpose()
}

fn decode_row(
    project_id: ProjectId,
    (version, graph_data, created_at): RawRow,
) -> Result<Snapshot, SnapshotStoreError> {
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|error| {
            SnapshotStoreError::Corrupt(format!("created_at `{created_at}` of v{version}: {error}"))
        })?
        .with_timezone(&Utc);
    Ok(Snapshot { project_id, version, graph_data: serde_json::from_str(&graph_data)?, created_at })
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply snapshot db migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::SnapshotFeed;
    use vibegraph_common::graph::{Edge, Node, NodeKind};

    fn sample_graph() -> GraphDocument {
        GraphDocument {
            nodes: vec![
                Node::new("api", NodeKind::Process, "API"),
                Node::new("db", NodeKind::Entity, "DB").with_description("postgres"),
            ],
            edges: vec![Edge::new("api-db", "api", "db").with_label("reads")],
            gaps: vec![],
        }
    }

    #[test]
    fn open_creates_schema() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let store = SqliteSnapshotStore::open(dir.path().join("nested/snapshots.db"))
            .expect("snapshot db should open");

        assert_eq!(store.schema_version().expect("schema version should be readable"), 1);
    }

    #[test]
    fn reopen_does_not_reapply_migrations() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("snapshots.db");
        drop(SqliteSnapshotStore::open(&path).expect("first open should succeed"));

        let store = SqliteSnapshotStore::open(&path).expect("second open should succeed");
        assert_eq!(store.schema_version().expect("schema version should be readable"), 1);
    }

    #[tokio::test]
    async fn append_and_read_back_graph() {
        let store = SqliteSnapshotStore::open_in_memory().expect("in-memory db should open");
        let project = ProjectId::new();

        assert_eq!(store.append(project, &GraphDocument::new()).await.unwrap(), 1);
        assert_eq!(store.append(project, &sample_graph()).await.unwrap(), 2);

        let latest = store.latest(project).await.unwrap().expect("latest should exist");
        assert_eq!(latest.version, 2);
        assert_eq!(latest.project_id, project);
        assert_eq!(latest.graph_data, sample_graph());
        assert!(store.latest(ProjectId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn versions_are_scoped_per_project() {
        let store = SqliteSnapshotStore::open_in_memory().expect("in-memory db should open");
        let project_a = ProjectId::new();
        let project_b = ProjectId::new();

        store.append(project_a, &GraphDocument::new()).await.unwrap();
        store.append(project_a, &GraphDocument::new()).await.unwrap();

        assert_eq!(store.append(project_b, &GraphDocument::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn append_if_detects_concurrent_writer() {
        let store = SqliteSnapshotStore::open_in_memory().expect("in-memory db should open");
        let project = ProjectId::new();

        assert_eq!(
            store.append_if(project, 0, &GraphDocument::new()).await.unwrap(),
            AppendOutcome::Appended(1)
        );
        assert_eq!(
            store.append_if(project, 1, &sample_graph()).await.unwrap(),
            AppendOutcome::Appended(2)
        );

        let outcome = store.append_if(project, 1, &GraphDocument::new()).await.unwrap();
        let AppendOutcome::VersionMismatch { latest: Some(latest) } = outcome else {
            panic!("expected mismatch with latest row, got {outcome:?}");
        };
        assert_eq!(latest.version, 2);
        assert_eq!(latest.graph_data, sample_graph());
    }

    #[tokio::test]
    async fn list_after_is_ordered() {
        let store = SqliteSnapshotStore::open_in_memory().expect("in-memory db should open");
        let project = ProjectId::new();
        for _ in 0..4 {
            store.append(project, &GraphDocument::new()).await.unwrap();
        }

        let versions: Vec<_> =
            store.list_after(project, 2).await.unwrap().into_iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![3, 4]);
    }

    #[tokio::test]
    async fn snapshots_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("snapshots.db");
        let project = ProjectId::new();

        {
            let store = SqliteSnapshotStore::open(&path).expect("db should open");
            store.append(project, &sample_graph()).await.unwrap();
        }

        let store = SqliteSnapshotStore::open(&path).expect("db should reopen");
        let latest = store.latest(project).await.unwrap().expect("snapshot should persist");
        assert_eq!(latest.version, 1);
        assert_eq!(latest.graph_data, sample_graph());
    }

    #[tokio::test]
    async fn appends_are_published_to_the_feed() {
        let hub = FeedHub::new();
        let store = SqliteSnapshotStore::open_in_memory()
            .expect("in-memory db should open")
            .with_feed(hub.clone());
        let project = ProjectId::new();
        let mut sub = hub.subscribe(project);

        store.append(project, &sample_graph()).await.unwrap();

        let event = sub.recv().await.expect("event should be published");
        assert_eq!(event.version, 1);
        assert_eq!(event.graph_data, sample_graph());
    }
}
