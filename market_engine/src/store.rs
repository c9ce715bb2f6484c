//! Snapshot persistence
//! Postgres when a database is configured, flat JSON files otherwise

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use shared::{PriceRecord, Snapshot};
use sqlx::PgPool;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Raw snapshot document, or `None` when nothing was saved yet.
    async fn load(&self) -> Result<Option<Value>>;

    /// Replace the stored snapshot in one write.
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;

    async fn append_history(&self, records: &[PriceRecord]) -> Result<()>;
}

/* ----------------------- JSON files ------------------------ */

pub struct JsonFileStore {
    snapshot_path: PathBuf,
    history_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(snapshot_path: impl Into<PathBuf>, history_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            history_path: history_path.into(),
        }
    }

    async fn ensure_parent(path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Value>> {
        let raw = match tokio::fs::read_to_string(&self.snapshot_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", self.snapshot_path.display())),
        };
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", self.snapshot_path.display()))?;
        Ok(Some(value))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        Self::ensure_parent(&self.snapshot_path).await?;
        let body = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.snapshot_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.snapshot_path).await?;
        Ok(())
    }

    async fn append_history(&self, records: &[PriceRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        Self::ensure_parent(&self.history_path).await?;
        let mut lines = Vec::new();
        for record in records {
            serde_json::to_writer(&mut lines, record)?;
            lines.push(b'\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)
            .await?;
        file.write_all(&lines).await?;
        file.flush().await?;
        Ok(())
    }
}

/* ----------------------- Postgres ------------------------ */

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self { pool };
        store.ensure_schema().await?;

        info!("✅ Database connected");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_snapshot (
                id SMALLINT PRIMARY KEY,
                state JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id BIGSERIAL PRIMARY KEY,
                symbol TEXT NOT NULL,
                price DOUBLE PRECISION NOT NULL,
                trend_score DOUBLE PRECISION NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn load(&self) -> Result<Option<Value>> {
        let state = sqlx::query_scalar::<_, Value>("SELECT state FROM market_snapshot WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(state)
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO market_snapshot (id, state, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO UPDATE SET state = EXCLUDED.state, updated_at = NOW()
            "#,
        )
        .bind(snapshot.to_value())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_history(&self, records: &[PriceRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let symbols: Vec<String> = records.iter().map(|r| r.symbol.clone()).collect();
        let prices: Vec<f64> = records.iter().map(|r| r.price).collect();
        let trends: Vec<f64> = records.iter().map(|r| r.trend_score).collect();
        let times: Vec<DateTime<Utc>> = records.iter().map(|r| r.timestamp).collect();

        sqlx::query(
            r#"
            INSERT INTO price_history (symbol, price, trend_score, recorded_at)
            SELECT * FROM UNNEST($1::text[], $2::float8[], $3::float8[], $4::timestamptz[])
            "#,
        )
        .bind(&symbols)
        .bind(&prices)
        .bind(&trends)
        .bind(&times)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/* ----------------------- In memory ------------------------ */

/// Process-local store, used when nothing durable is wanted.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<Option<Value>>,
    history: Mutex<Vec<PriceRecord>>,
    failing_loads: Mutex<u32>,
    failing_history: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an arbitrary raw document.
    pub fn with_document(value: Value) -> Self {
        let store = Self::default();
        *store.state.lock() = Some(value);
        store
    }

    /// Make the next `count` loads fail.
    pub fn fail_loads(&self, count: u32) {
        *self.failing_loads.lock() = count;
    }

    pub fn fail_history(&self, failing: bool) {
        *self.failing_history.lock() = failing;
    }

    pub fn document(&self) -> Option<Value> {
        self.state.lock().clone()
    }

    pub fn history(&self) -> Vec<PriceRecord> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Option<Value>> {
        {
            let mut failing = self.failing_loads.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(anyhow!("snapshot storage unavailable"));
            }
        }
        Ok(self.state.lock().clone())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        *self.state.lock() = Some(snapshot.to_value());
        Ok(())
    }

    async fn append_history(&self, records: &[PriceRecord]) -> Result<()> {
        if *self.failing_history.lock() {
            return Err(anyhow!("history storage unavailable"));
        }
        self.history.lock().extend_from_slice(records);
        Ok(())
    }
}
