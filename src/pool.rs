//! Connection registry: one cached SQLite handle per (database, role).
//!
//! Tenant connections for non-admin roles carry an authorizer compiled from
//! the privilege matrix and a shared grant set, so revoking a database is
//! observed by handles that are already pooled.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::{Connection, OpenFlags};

use crate::error::{DbResultExt, Error, Result};
use crate::privileges::{self, Verb};
use crate::provision::WORKSPACE_DB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Staff,
    Learner,
    Service,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Learner => "learner",
            Role::Service => "service",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolLimits {
    pub max_lifetime: Duration,
    pub max_idle_time: Duration,
    pub busy_timeout: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        PoolLimits {
            max_lifetime: Duration::from_secs(15 * 60),
            max_idle_time: Duration::from_secs(2 * 60),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Shared handle to one pooled connection. Callers lock it for the duration
/// of a statement or transaction.
pub type DbHandle = Arc<Mutex<Connection>>;

pub(crate) fn lock(handle: &DbHandle) -> Result<MutexGuard<'_, Connection>> {
    handle
        .lock()
        .map_err(|_| Error::Infrastructure("database handle mutex poisoned".to_string()))
}

struct PooledEntry {
    conn: DbHandle,
    opened_at: Instant,
    last_used: Instant,
}

pub struct ConnectionRegistry {
    data_dir: PathBuf,
    limits: PoolLimits,
    entries: Mutex<HashMap<String, PooledEntry>>,
    grants: Arc<RwLock<HashSet<String>>>,
}

impl ConnectionRegistry {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_limits(data_dir, PoolLimits::default())
    }

    pub fn with_limits(data_dir: impl AsRef<Path>, limits: PoolLimits) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            Error::Infrastructure(format!("creating data dir {}: {e}", data_dir.display()))
        })?;
        Ok(ConnectionRegistry {
            data_dir,
            limits,
            entries: Mutex::new(HashMap::new()),
            grants: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    pub fn db_path(&self, db_name: &str) -> PathBuf {
        self.data_dir.join(format!("{db_name}.sqlite3"))
    }

    pub fn database_exists(&self, db_name: &str) -> bool {
        self.db_path(db_name).exists()
    }

    /// Returns the pooled handle for (database, role), opening one lazily.
    /// Entries past the lifetime or idle ceiling are recycled. Two racing
    /// first lookups may both open; the later insert wins and the loser is
    /// dropped with its caller's clone.
    pub fn get(&self, db_name: &str, role: Role) -> Result<DbHandle> {
        let key = format!("{role}@{db_name}");
        {
            let mut entries = self.lock_entries()?;
            if let Some(entry) = entries.get_mut(&key) {
                if entry.opened_at.elapsed() < self.limits.max_lifetime
                    && entry.last_used.elapsed() < self.limits.max_idle_time
                {
                    entry.last_used = Instant::now();
                    return Ok(entry.conn.clone());
                }
                tracing::debug!(key, "recycling expired connection");
                entries.remove(&key);
            }
        }

        let conn = self.open(db_name, role)?;
        let handle: DbHandle = Arc::new(Mutex::new(conn));
        let now = Instant::now();
        let mut entries = self.lock_entries()?;
        entries.insert(
            key,
            PooledEntry {
                conn: handle.clone(),
                opened_at: now,
                last_used: now,
            },
        );
        Ok(handle)
    }

    fn open(&self, db_name: &str, role: Role) -> Result<Connection> {
        let path = self.db_path(db_name);
        if !path.exists() {
            return Err(Error::not_found(format!("database {db_name}")));
        }
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .ctx(&format!("opening {db_name} as {role}"))?;

        conn.busy_timeout(self.limits.busy_timeout)
            .ctx("setting busy timeout")?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .ctx("enabling WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .ctx("enabling foreign keys")?;

        // Liveness probe before the handle is cached. A half-open handle is
        // discarded here rather than surfacing later from the pool.
        if let Err(e) = conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
            tracing::warn!(db = db_name, role = %role, error = %e, "discarding half-open connection");
            drop(conn);
            return Err(Error::Infrastructure(format!(
                "connection probe failed for {db_name} as {role}: {e}"
            )));
        }

        if db_name != WORKSPACE_DB {
            let workspace_path = self.db_path(WORKSPACE_DB);
            conn.execute(
                "ATTACH DATABASE ?1 AS workspace",
                [workspace_path.to_string_lossy()],
            )
            .ctx("attaching workspace")?;

            if role != Role::Admin {
                conn.authorizer(Some(privilege_authorizer(
                    role,
                    db_name.to_string(),
                    self.grants.clone(),
                )));
            }
        }

        tracing::debug!(db = db_name, role = %role, "opened connection");
        Ok(conn)
    }

    /// Creates the database file if absent (idempotent). Provisioning only;
    /// `get` never creates.
    pub(crate) fn create_database_file(&self, db_name: &str) -> Result<()> {
        let path = self.db_path(db_name);
        if path.exists() {
            return Ok(());
        }
        let conn = Connection::open(&path).ctx(&format!("creating database {db_name}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .ctx("enabling WAL")?;
        Ok(())
    }

    /// Drops pooled handles for the database and removes its file.
    pub(crate) fn remove_database_file(&self, db_name: &str) -> Result<()> {
        {
            let mut entries = self.lock_entries()?;
            let suffix = format!("@{db_name}");
            entries.retain(|key, _| !key.ends_with(&suffix));
        }
        let path = self.db_path(db_name);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                Error::Infrastructure(format!("removing database {db_name}: {e}"))
            })?;
        }
        for sidecar in ["-wal", "-shm"] {
            let mut p = path.clone().into_os_string();
            p.push(sidecar);
            let _ = std::fs::remove_file(PathBuf::from(p));
        }
        Ok(())
    }

    pub(crate) fn grant_database(&self, db_name: &str) {
        if let Ok(mut grants) = self.grants.write() {
            grants.insert(db_name.to_string());
        }
    }

    pub(crate) fn revoke_database(&self, db_name: &str) {
        if let Ok(mut grants) = self.grants.write() {
            grants.remove(db_name);
        }
    }

    pub fn is_granted(&self, db_name: &str) -> bool {
        self.grants
            .read()
            .map(|g| g.contains(db_name))
            .unwrap_or(false)
    }

    /// Drains the pool. Handles still held by callers stay usable until the
    /// last clone drops.
    pub fn shutdown(&self) -> Result<()> {
        let mut entries = self.lock_entries()?;
        let drained = entries.len();
        entries.clear();
        tracing::debug!(drained, "registry shut down");
        Ok(())
    }

    fn lock_entries(&self) -> Result<MutexGuard<'_, HashMap<String, PooledEntry>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Infrastructure("registry mutex poisoned".to_string()))
    }
}

fn privilege_authorizer(
    role: Role,
    db_name: String,
    grants: Arc<RwLock<HashSet<String>>>,
) -> impl for<'c> FnMut(AuthContext<'c>) -> Authorization + Send + 'static {
    move |ctx: AuthContext<'_>| {
        // Statements running inside a trigger (history capture) are part of
        // the enforcement boundary, not subject to it.
        if ctx.accessor.is_some() {
            return Authorization::Allow;
        }
        let (verb, table) = match ctx.action {
            AuthAction::Read { table_name, .. } => (Verb::Select, table_name),
            AuthAction::Insert { table_name } => (Verb::Insert, table_name),
            AuthAction::Update { table_name, .. } => (Verb::Update, table_name),
            AuthAction::Delete { table_name } => (Verb::Delete, table_name),
            _ => return Authorization::Allow,
        };
        if table.starts_with("sqlite_") {
            return Authorization::Allow;
        }
        // The attached workspace schema is read-only from tenant handles.
        if ctx.database_name == Some("workspace") {
            return if verb == Verb::Select {
                Authorization::Allow
            } else {
                Authorization::Deny
            };
        }
        let granted = grants
            .read()
            .map(|g| g.contains(&db_name))
            .unwrap_or(false);
        if !granted {
            return Authorization::Deny;
        }
        match privileges::verbs_for(role, table) {
            Some(verbs) if verbs.contains(&verb) => Authorization::Allow,
            _ => Authorization::Deny,
        }
    }
}
