use crate::core::model::{FetchId, FetchKind, FetchStatus};
use anyhow::Context;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

/// Persistent record of fetches, so interrupted ones can be listed after
/// the process goes away.
#[derive(Clone)]
pub struct SqliteJournal {
    pool: SqlitePool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRecord {
    pub fetch_id: FetchId,
    pub name: String,
    pub kind: FetchKind,
    pub total_segments: Option<u64>,
    pub received: u64,
    pub status: FetchStatus,
    pub updated_at: i64,
}

impl SqliteJournal {
    pub async fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await
                .with_context(|| format!("create_dir_all {}", parent.display()))?;
        }

        let abs = if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            std::env::current_dir()
                .with_context(|| "current_dir")?
                .join(db_path)
        };

        let mut p = abs.to_string_lossy().to_string();
        if cfg!(windows) {
            p = p.replace('\\', "/");
        }

        // mode=rwc creates the file on first use
        let url = if p.starts_with('/') {
            format!("sqlite://{}?mode=rwc", p)
        } else {
            format!("sqlite:///{}?mode=rwc", p)
        };

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .with_context(|| format!("connect sqlite url={} (file={})", url, abs.display()))?;

        let journal = Self { pool };
        journal.migrate().await?;
        Ok(journal)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fetches (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              kind TEXT NOT NULL,
              total_segments INTEGER NULL,
              received INTEGER NOT NULL DEFAULT 0,
              status INTEGER NOT NULL, -- 0 Pending,1 Running,2 Completed,3 Failed
              started_at INTEGER NOT NULL,
              updated_at INTEGER NOT NULL
            );
            "#,
        )
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_fetches_status
            ON fetches(status);
            "#,
        )
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn now_epoch() -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    pub async fn begin(
        &self,
        fetch_id: FetchId,
        name: &str,
        kind: FetchKind,
        total_segments: Option<u64>,
    ) -> anyhow::Result<()> {
        let now = Self::now_epoch();
        sqlx::query(
            r#"
            INSERT INTO fetches
              (id, name, kind, total_segments, received, status, started_at, updated_at)
            VALUES
              (?, ?, ?, ?, 0, ?, ?, ?);
            "#,
        )
            .bind(fetch_id.to_string())
            .bind(name)
            .bind(kind.as_str())
            .bind(total_segments.map(|v| v as i64))
            .bind(status_to_int(FetchStatus::Running))
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("insert fetch")?;
        Ok(())
    }

    /// Bumps the received counter of a fetch that is still running.
    pub async fn add_received(&self, fetch_id: FetchId, count: u64) -> anyhow::Result<()> {
        let now = Self::now_epoch();
        sqlx::query(
            r#"
            UPDATE fetches
            SET received = received + ?, updated_at = ?
            WHERE id = ? AND status = ?;
            "#,
        )
            .bind(count as i64)
            .bind(now)
            .bind(fetch_id.to_string())
            .bind(status_to_int(FetchStatus::Running))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn finish(&self, fetch_id: FetchId, status: FetchStatus, received: u64) -> anyhow::Result<()> {
        let now = Self::now_epoch();
        sqlx::query(
            r#"
            UPDATE fetches
            SET status = ?, received = ?, updated_at = ?
            WHERE id = ?;
            "#,
        )
            .bind(status_to_int(status))
            .bind(received as i64)
            .bind(now)
            .bind(fetch_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, fetch_id: FetchId) -> anyhow::Result<Option<FetchRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, kind, total_segments, received, status, updated_at
            FROM fetches
            WHERE id = ?;
            "#,
        )
            .bind(fetch_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    pub async fn list_unfinished(&self) -> anyhow::Result<Vec<FetchRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, kind, total_segments, received, status, updated_at
            FROM fetches
            WHERE status IN (?, ?)
            ORDER BY started_at ASC;
            "#,
        )
            .bind(status_to_int(FetchStatus::Pending))
            .bind(status_to_int(FetchStatus::Running))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Drops finished records older than `before` (epoch seconds).
    pub async fn prune_finished(&self, before: i64) -> anyhow::Result<u64> {
        let done = sqlx::query(
            r#"DELETE FROM fetches WHERE status IN (?, ?) AND updated_at < ?"#,
        )
            .bind(status_to_int(FetchStatus::Completed))
            .bind(status_to_int(FetchStatus::Failed))
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}

fn row_to_record(r: &sqlx::sqlite::SqliteRow) -> anyhow::Result<FetchRecord> {
    let id: String = r.get("id");
    let kind: String = r.get("kind");
    Ok(FetchRecord {
        fetch_id: Uuid::parse_str(&id).with_context(|| format!("bad fetch id {id}"))?,
        name: r.get::<String, _>("name"),
        kind: FetchKind::parse(&kind).with_context(|| format!("bad fetch kind {kind}"))?,
        total_segments: r.try_get::<Option<i64>, _>("total_segments")?.map(|v| v as u64),
        received: r.get::<i64, _>("received").max(0) as u64,
        status: int_to_status(r.get::<i64, _>("status")),
        updated_at: r.get::<i64, _>("updated_at"),
    })
}

fn status_to_int(s: FetchStatus) -> i64 {
    match s {
        FetchStatus::Pending => 0,
        FetchStatus::Running => 1,
        FetchStatus::Completed => 2,
        FetchStatus::Failed => 3,
    }
}

fn int_to_status(v: i64) -> FetchStatus {
    match v {
        0 => FetchStatus::Pending,
        1 => FetchStatus::Running,
        2 => FetchStatus::Completed,
        3 => FetchStatus::Failed,
        _ => FetchStatus::Pending,
    }
}
