use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::path::Path;

/// Persistence connection pool size.
const MAX_CONNECTIONS: u32 = 16;

pub mod agent;
pub mod alert;
pub mod check;
pub mod monitor;
pub mod property;
pub mod snapshot;

/// 管理数据库（pika.db）的统一访问层。
///
/// 所有方法均为 `async fn`，底层使用 SeaORM + SQLite。
/// 时序分片存储（每日 .db 文件）由 `SqlitePartitionEngine` 管理。
pub struct PikaStore {
    pub(crate) db: DatabaseConnection,
}

impl PikaStore {
    /// 连接并初始化管理数据库，自动运行迁移。
    pub async fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("pika.db");
        let url = format!(
            "sqlite://{}?mode=rwc",
            db_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("non-UTF-8 data_dir path"))?
        );
        let mut options = ConnectOptions::new(url);
        options.max_connections(MAX_CONNECTIONS);
        let db = Database::connect(options).await?;

        db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        Migrator::up(&db, None).await?;

        tracing::info!(path = %db_path.display(), "Initialized domain store");
        Ok(Self { db })
    }

    /// In-memory store for tests. A single connection: every pooled
    /// `:memory:` connection would otherwise be its own database.
    pub async fn new_in_memory() -> Result<Self> {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1);
        let db = Database::connect(options).await?;
        Migrator::up(&db, None).await?;
        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}
