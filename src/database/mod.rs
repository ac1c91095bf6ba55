use std::path::Path;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use tracing::{debug, info};

use crate::models::DEAL_COLUMNS;
use crate::traits::DealSink;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path) = db_url.strip_prefix("sqlite:")
            && let Some(parent) = Path::new(path.trim_start_matches("//")).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        // Create database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database file");
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePool::connect(db_url).await?;
        Self::migrate(pool).await
    }

    /// Single-connection in-memory store
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM deals")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("total"))
    }

    /// Stored rows in insertion order, laid out like [`DEAL_COLUMNS`]
    pub async fn rows(&self) -> Result<Vec<Vec<String>>> {
        let rows = sqlx::query(
            r"
            SELECT received_at, sender_label, geo, cpa, crg, cpl, deal_type,
                   funnels, source, cap, raw_message
            FROM deals
            ORDER BY rowid
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (0..DEAL_COLUMNS.len())
                    .map(|index| row.get::<String, _>(index))
                    .collect()
            })
            .collect())
    }
}

#[async_trait]
impl DealSink for Database {
    async fn append_row(&self, row: &[String]) -> Result<bool> {
        if row.len() != DEAL_COLUMNS.len() {
            bail!(
                "Deal row has {} columns, expected {}",
                row.len(),
                DEAL_COLUMNS.len()
            );
        }

        // Identical rows share an id, so a redelivered message is stored once.
        let id = format!("{:x}", md5::compute(row.join("\u{1f}")));

        let result = sqlx::query(
            r"
            INSERT OR IGNORE INTO deals (
                id, received_at, sender_label, geo, cpa, crg, cpl, deal_type,
                funnels, source, cap, raw_message, stored_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&id)
        .bind(&row[0])
        .bind(&row[1])
        .bind(&row[2])
        .bind(&row[3])
        .bind(&row[4])
        .bind(&row[5])
        .bind(&row[6])
        .bind(&row[7])
        .bind(&row[8])
        .bind(&row[9])
        .bind(&row[10])
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let stored = result.rows_affected() > 0;
        if !stored {
            debug!("Row {} already stored", id);
        }

        Ok(stored)
    }
}
