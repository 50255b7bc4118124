use std::path::Path;

use chrono::DateTime;
use deploypl_model::{Node, NodeState};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::error;

use crate::error::Result;

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS nodes (
    id        INTEGER PRIMARY KEY,
    name      TEXT NOT NULL,
    addr      TEXT,
    authority TEXT NOT NULL,
    state     TEXT NOT NULL,
    kernel    TEXT NOT NULL,
    os        TEXT NOT NULL,
    vsys      INTEGER NOT NULL,
    last_seen INTEGER NOT NULL
)";

/// Effective-uid transitions around store access.
///
/// The store file lives in a privileged location, so every session raises
/// privileges on entry and restores them on exit, on every path. The daemon
/// supervisor provides the real implementation; [`NoPrivileges`] serves
/// unprivileged runs and tests.
pub trait Privileges: Send + Sync {
    fn raise(&self) -> Result<()>;
    fn restore(&self) -> Result<()>;
}

/// No-op privilege transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrivileges;

impl Privileges for NoPrivileges {
    fn raise(&self) -> Result<()> {
        Ok(())
    }

    fn restore(&self) -> Result<()> {
        Ok(())
    }
}

/// Restores privileges when dropped, so no session exit path can leak an
/// elevated effective uid.
struct PrivilegeGuard<'a> {
    privileges: &'a dyn Privileges,
}

impl<'a> PrivilegeGuard<'a> {
    fn raise(privileges: &'a dyn Privileges) -> Result<Self> {
        privileges.raise()?;
        Ok(PrivilegeGuard { privileges })
    }
}

impl Drop for PrivilegeGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.privileges.restore() {
            error!("failed to drop privileges: {err}");
        }
    }
}

/// The embedded node store: one sqlite file, one `nodes` table keyed by the
/// stable node id. Rows are inserted on first observation of a node from
/// the seed and updated after each probe stage; the core never deletes
/// them.
#[derive(Debug, Clone)]
pub struct NodeStore {
    pool: SqlitePool,
}

impl NodeStore {
    /// Open (creating if absent) the store at `path` and apply the schema.
    /// The schema statement is idempotent, so reopening an existing store
    /// is safe.
    pub async fn open(path: &Path, privileges: &dyn Privileges) -> Result<Self> {
        let _guard = PrivilegeGuard::raise(privileges)?;
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect(options).await
    }

    /// An in-memory store, for tests and dry runs.
    pub async fn open_in_memory() -> Result<Self> {
        Self::connect(SqliteConnectOptions::new().in_memory(true)).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        // A single connection: sessions are serial by the single-daemon
        // rule, and it keeps an in-memory store on one database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(NodeStore { pool })
    }

    /// Begin a scoped transactional session. Privileges are raised before
    /// the transaction starts and restored when the session ends, whether
    /// it commits or is dropped (which rolls the transaction back).
    pub async fn session<'a>(&self, privileges: &'a dyn Privileges) -> Result<StoreSession<'a>> {
        let guard = PrivilegeGuard::raise(privileges)?;
        let tx = self.pool.begin().await?;
        Ok(StoreSession {
            tx: Some(tx),
            _guard: guard,
        })
    }
}

/// A transaction over the node store. Dropping the session without calling
/// [`StoreSession::commit`] rolls back every write made through it.
pub struct StoreSession<'a> {
    tx: Option<Transaction<'static, Sqlite>>,
    _guard: PrivilegeGuard<'a>,
}

impl std::fmt::Debug for StoreSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSession")
            .field("open", &self.tx.is_some())
            .finish()
    }
}

impl StoreSession<'_> {
    fn tx(&mut self) -> &mut Transaction<'static, Sqlite> {
        self.tx.as_mut().expect("store session already committed")
    }

    /// Load every persisted node, in unspecified order.
    pub async fn load_all(&mut self) -> Result<Vec<Node>> {
        let rows: Vec<NodeRow> = sqlx::query_as(
            "SELECT name, addr, authority, state, kernel, os, vsys, last_seen FROM nodes",
        )
        .fetch_all(&mut **self.tx())
        .await?;
        rows.into_iter().map(NodeRow::into_node).collect()
    }

    /// Insert a batch of newly observed nodes.
    pub async fn insert_all(&mut self, nodes: &[Node]) -> Result<()> {
        for node in nodes {
            sqlx::query(
                "INSERT INTO nodes (id, name, addr, authority, state, kernel, os, vsys, last_seen)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(node.id)
            .bind(&node.name)
            .bind(&node.addr)
            .bind(&node.authority)
            .bind(node.state().as_str())
            .bind(&node.kernel)
            .bind(&node.os)
            .bind(node.vsys)
            .bind(node.last_seen.timestamp())
            .execute(&mut **self.tx())
            .await?;
        }
        Ok(())
    }

    /// Update one node's row by id. The id itself never changes.
    pub async fn update(&mut self, node: &Node) -> Result<()> {
        sqlx::query(
            "UPDATE nodes
             SET addr = ?, authority = ?, state = ?, kernel = ?, os = ?, vsys = ?, last_seen = ?
             WHERE id = ?",
        )
        .bind(&node.addr)
        .bind(&node.authority)
        .bind(node.state().as_str())
        .bind(&node.kernel)
        .bind(&node.os)
        .bind(node.vsys)
        .bind(node.last_seen.timestamp())
        .bind(node.id)
        .execute(&mut **self.tx())
        .await?;
        Ok(())
    }

    /// Commit the transaction and restore privileges.
    pub async fn commit(mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NodeRow {
    name: String,
    addr: Option<String>,
    authority: String,
    state: String,
    kernel: String,
    os: String,
    vsys: bool,
    last_seen: i64,
}

impl NodeRow {
    fn into_node(self) -> Result<Node> {
        let state: NodeState = self.state.parse()?;
        let last_seen = DateTime::from_timestamp(self.last_seen, 0).unwrap_or(DateTime::UNIX_EPOCH);
        Ok(Node::from_parts(
            self.name,
            self.addr,
            self.authority,
            state,
            self.kernel,
            self.os,
            self.vsys,
            last_seen,
        ))
    }
}
