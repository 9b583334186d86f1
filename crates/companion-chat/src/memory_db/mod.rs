//! Memory database module - SQLite-based storage for users, conversations, messages and memory
pub mod schema;
pub mod migration;
pub mod conversation_store;
pub mod summary_store;
pub mod semantic_store;
pub mod episodic_store;
pub mod user_store;
pub use schema::*;
pub use migration::MigrationManager;
pub use conversation_store::ConversationStore;
pub use summary_store::SummaryStore;
pub use semantic_store::SemanticStore;
pub use episodic_store::EpisodicStore;
pub use user_store::{hash_token, UserStore};
use std::path::Path;
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Every store shares one pool; each operation checks out a connection for
/// its own duration only, so stores never hold two at once.
pub struct MemoryDatabase {
    pub conversations: ConversationStore,
    pub summaries: SummaryStore,
    pub semantic: SemanticStore,
    pub episodic: EpisodicStore,
    pub users: UserStore,
}

fn connection_init(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

impl MemoryDatabase {
    /// Open (creating if needed) a file-backed database and run migrations
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening chat database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(connection_init);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        info!("Chat database initialized successfully");
        Ok(Self::from_pool(pool))
    }

    /// Single-connection in-memory database, used by tests
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(connection_init);
        // An in-memory database lives and dies with its connection.
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: DbPool) -> Self {
        let pool = Arc::new(pool);
        Self {
            conversations: ConversationStore::new(Arc::clone(&pool)),
            summaries: SummaryStore::new(Arc::clone(&pool)),
            semantic: SemanticStore::new(Arc::clone(&pool)),
            episodic: EpisodicStore::new(Arc::clone(&pool)),
            users: UserStore::new(pool),
        }
    }

    /// Run blocking database work off the async runtime
    pub async fn run<T, F>(self: &Arc<Self>, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&MemoryDatabase) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow::anyhow!("Database task failed: {}", e))?
    }
}

pub(crate) fn get_conn(pool: &DbPool) -> anyhow::Result<DbConnection> {
    pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
}
