use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Sqlite;
use std::any::Any;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::{ConnectionOptions, LocalTransaction, PersistenceBackend, PersistenceHandle};
use crate::error::{PersistError, PersistResult};

type SharedConnection = Arc<Mutex<Option<PoolConnection<Sqlite>>>>;

fn connection_closed() -> PersistError {
    PersistError::Database(sqlx::Error::PoolClosed)
}

/// Resource-local persistence backend over a SQLite database.
///
/// `start` connects the pool (creating the database file if missing), `stop`
/// closes it, and every handle is one pooled connection. Connection options
/// are applied as PRAGMA settings when the handle is created.
pub struct SqliteBackend {
    url: String,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteBackend {
    /// Create a backend for the given `sqlite:` URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: RwLock::new(None),
        }
    }

    fn pool(&self) -> PersistResult<SqlitePool> {
        self.pool.read().clone().ok_or_else(connection_closed)
    }
}

#[async_trait]
impl PersistenceBackend for SqliteBackend {
    fn is_running(&self) -> bool {
        self.pool.read().is_some()
    }

    async fn start(&self) -> PersistResult<()> {
        let options = SqliteConnectOptions::from_str(&self.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        *self.pool.write() = Some(pool);
        Ok(())
    }

    async fn stop(&self) -> PersistResult<()> {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await;
        }
        Ok(())
    }

    async fn create_handle(
        &self,
        options: Option<&ConnectionOptions>,
    ) -> PersistResult<Arc<dyn PersistenceHandle>> {
        let pool = self.pool()?;
        let mut conn = pool.acquire().await?;
        if let Some(options) = options {
            for (key, value) in options.iter() {
                sqlx::query(&format!("PRAGMA {key} = {value}"))
                    .execute(&mut *conn)
                    .await?;
            }
        }
        Ok(Arc::new(SqliteHandle::new(conn)))
    }
}

/// One pooled SQLite connection bound to a unit of work.
pub struct SqliteHandle {
    conn: SharedConnection,
    txn: Arc<SqliteLocalTransaction>,
    open: AtomicBool,
}

impl SqliteHandle {
    fn new(conn: PoolConnection<Sqlite>) -> Self {
        let conn: SharedConnection = Arc::new(Mutex::new(Some(conn)));
        Self {
            txn: Arc::new(SqliteLocalTransaction::new(Arc::clone(&conn))),
            conn,
            open: AtomicBool::new(true),
        }
    }

    /// Run a statement on this handle's connection.
    pub async fn execute(&self, sql: &str) -> PersistResult<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(connection_closed)?;
        let result = sqlx::query(sql).execute(&mut **conn).await?;
        Ok(result.rows_affected())
    }

    pub async fn fetch_all(&self, sql: &str) -> PersistResult<Vec<SqliteRow>> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(connection_closed)?;
        Ok(sqlx::query(sql).fetch_all(&mut **conn).await?)
    }

    pub async fn fetch_optional(&self, sql: &str) -> PersistResult<Option<SqliteRow>> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(connection_closed)?;
        Ok(sqlx::query(sql).fetch_optional(&mut **conn).await?)
    }
}

#[async_trait]
impl PersistenceHandle for SqliteHandle {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> PersistResult<()> {
        self.open.store(false, Ordering::SeqCst);
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            if self.txn.is_active() {
                // the connection goes back to the pool, never with a
                // transaction still open
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                self.txn.reset();
            }
        }
        Ok(())
    }

    fn local_transaction(&self) -> Arc<dyn LocalTransaction> {
        Arc::clone(&self.txn) as Arc<dyn LocalTransaction>
    }

    async fn join_transaction(&self) -> PersistResult<()> {
        // resource-local handle, nothing to join
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Transaction object driving BEGIN/COMMIT/ROLLBACK on the handle's
/// connection.
pub struct SqliteLocalTransaction {
    conn: SharedConnection,
    active: AtomicBool,
    rollback_only: AtomicBool,
}

impl SqliteLocalTransaction {
    fn new(conn: SharedConnection) -> Self {
        Self {
            conn,
            active: AtomicBool::new(false),
            rollback_only: AtomicBool::new(false),
        }
    }

    async fn run(&self, sql: &str) -> PersistResult<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(connection_closed)?;
        sqlx::query(sql).execute(&mut **conn).await?;
        Ok(())
    }

    fn reset(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalTransaction for SqliteLocalTransaction {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> PersistResult<()> {
        if self.is_active() {
            return Err(PersistError::InvalidTransactionState {
                operation: "begin",
                state: "active",
            });
        }
        self.run("BEGIN").await?;
        self.rollback_only.store(false, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> PersistResult<()> {
        self.run("COMMIT").await?;
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> PersistResult<()> {
        self.run("ROLLBACK").await?;
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }
}
