use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interfaces::{
    Article, ArticleStatus, ArticleStore, NewArticle, PurgeReport, Source, SourceSpec,
    SourceType, StatusCounts, StoreError, StoreResult, SummaryOutcome,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::Result;

const ARTICLE_COLUMNS: &str = "id, url, url_hash, title, source_name, category, published_at, \
     fetched_at, raw_content, summary, status, image_url, is_active, is_featured, claimed_at";

const SOURCE_COLUMNS: &str = "id, name, url, category, source_type, rate_limit_seconds, \
     is_active, last_fetched_at, consecutive_failures, article_count";

fn db(e: sqlx::Error) -> StoreError {
    StoreError::backend(e)
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and bring the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database schema is up to date");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn article_from_row(row: &PgRow) -> StoreResult<Article> {
        let status: String = row.try_get("status").map_err(db)?;
        let status = status.parse::<ArticleStatus>().map_err(StoreError::Corrupt)?;

        Ok(Article {
            id: row.try_get("id").map_err(db)?,
            url: row.try_get("url").map_err(db)?,
            url_hash: row.try_get("url_hash").map_err(db)?,
            title: row.try_get("title").map_err(db)?,
            source_name: row.try_get("source_name").map_err(db)?,
            category: row.try_get("category").map_err(db)?,
            published_at: row.try_get("published_at").map_err(db)?,
            fetched_at: row.try_get("fetched_at").map_err(db)?,
            raw_content: row.try_get("raw_content").map_err(db)?,
            summary: row.try_get("summary").map_err(db)?,
            status,
            image_url: row.try_get("image_url").map_err(db)?,
            is_active: row.try_get("is_active").map_err(db)?,
            is_featured: row.try_get("is_featured").map_err(db)?,
            claimed_at: row.try_get("claimed_at").map_err(db)?,
        })
    }

    fn source_from_row(row: &PgRow) -> StoreResult<Source> {
        let source_type: String = row.try_get("source_type").map_err(db)?;
        let rate_limit: i32 = row.try_get("rate_limit_seconds").map_err(db)?;
        let failures: i32 = row.try_get("consecutive_failures").map_err(db)?;
        let article_count: i64 = row.try_get("article_count").map_err(db)?;

        Ok(Source {
            id: row.try_get("id").map_err(db)?,
            name: row.try_get("name").map_err(db)?,
            url: row.try_get("url").map_err(db)?,
            category: row.try_get("category").map_err(db)?,
            source_type: source_type.parse().map_err(StoreError::Corrupt)?,
            rate_limit_seconds: rate_limit.max(0) as u32,
            is_active: row.try_get("is_active").map_err(db)?,
            last_fetched_at: row.try_get("last_fetched_at").map_err(db)?,
            consecutive_failures: failures.max(0) as u32,
            article_count: article_count.max(0) as u64,
        })
    }
}

#[async_trait]
impl ArticleStore for PgStore {
    async fn active_sources(&self, source_type: SourceType) -> StoreResult<Vec<Source>> {
        let sql = format!(
            "SELECT {SOURCE_COLUMNS} FROM sources \
             WHERE is_active = true AND source_type = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(source_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

        rows.iter().map(Self::source_from_row).collect()
    }

    async fn source_count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        Ok(count.max(0) as u64)
    }

    async fn add_sources(&self, specs: &[SourceSpec]) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut added = 0;

        for spec in specs {
            let result = sqlx::query(
                r#"
                INSERT INTO sources (id, name, url, category, source_type, rate_limit_seconds, is_active)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (url) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&spec.name)
            .bind(&spec.url)
            .bind(&spec.category)
            .bind(spec.source_type.as_str())
            .bind(spec.rate_limit_seconds as i32)
            .bind(spec.is_active)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

            added += result.rows_affected();
        }

        tx.commit().await.map_err(db)?;
        Ok(added)
    }

    async fn record_source_success(
        &self,
        source_id: Uuid,
        added: u64,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sources
            SET last_fetched_at = $1, article_count = article_count + $2, consecutive_failures = 0
            WHERE id = $3
            "#,
        )
        .bind(fetched_at)
        .bind(added as i64)
        .bind(source_id)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SourceNotFound { id: source_id });
        }
        Ok(())
    }

    async fn record_source_failure(&self, source_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE sources SET consecutive_failures = consecutive_failures + 1 WHERE id = $1",
        )
        .bind(source_id)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SourceNotFound { id: source_id });
        }
        Ok(())
    }

    async fn url_hash_exists(&self, url_hash: &str) -> StoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM articles WHERE url_hash = $1)")
            .bind(url_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(db)
    }

    async fn insert_articles(
        &self,
        articles: Vec<NewArticle>,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        if articles.is_empty() {
            return Ok(0);
        }

        let total = articles.len();
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut added = 0;

        for article in articles {
            let article = article.into_article(fetched_at);
            let result = sqlx::query(
                r#"
                INSERT INTO articles (id, url, url_hash, title, source_name, category, published_at,
                                      fetched_at, raw_content, status, image_url, is_active, is_featured)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(article.id)
            .bind(&article.url)
            .bind(&article.url_hash)
            .bind(&article.title)
            .bind(&article.source_name)
            .bind(&article.category)
            .bind(article.published_at)
            .bind(article.fetched_at)
            .bind(&article.raw_content)
            .bind(article.status.as_str())
            .bind(&article.image_url)
            .bind(article.is_active)
            .bind(article.is_featured)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

            added += result.rows_affected();
        }

        tx.commit().await.map_err(db)?;
        debug!("Stored {} new articles out of {} candidates", added, total);
        Ok(added)
    }

    async fn get_article(&self, id: Uuid) -> StoreResult<Option<Article>> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

        row.as_ref().map(Self::article_from_row).transpose()
    }

    async fn claim_pending(&self, claimed_at: DateTime<Utc>) -> StoreResult<Vec<Article>> {
        let sql = format!(
            "WITH claimed AS ( \
                 UPDATE articles SET status = 'processing', claimed_at = $1 \
                 WHERE status = 'pending' RETURNING {ARTICLE_COLUMNS} \
             ) SELECT * FROM claimed ORDER BY fetched_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(claimed_at)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

        rows.iter().map(Self::article_from_row).collect()
    }

    async fn finish_article(&self, id: Uuid, outcome: &SummaryOutcome) -> StoreResult<()> {
        let query = match outcome {
            SummaryOutcome::Summarised(summary) => {
                sqlx::query("UPDATE articles SET status = 'done', summary = $1 WHERE id = $2")
                    .bind(summary)
                    .bind(id)
            }
            SummaryOutcome::Hidden => sqlx::query(
                "UPDATE articles SET status = 'done', summary = NULL, is_active = false WHERE id = $1",
            )
            .bind(id),
            SummaryOutcome::Failed => {
                sqlx::query("UPDATE articles SET status = 'failed' WHERE id = $1").bind(id)
            }
        };

        let result = query.execute(&self.pool).await.map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ArticleNotFound { id });
        }
        Ok(())
    }

    async fn requeue_processing(
        &self,
        claimed_before: Option<DateTime<Utc>>,
    ) -> StoreResult<u64> {
        let result = match claimed_before {
            Some(cutoff) => sqlx::query(
                r#"
                UPDATE articles SET status = 'pending', claimed_at = NULL
                WHERE status = 'processing' AND (claimed_at IS NULL OR claimed_at < $1)
                "#,
            )
            .bind(cutoff),
            None => sqlx::query(
                "UPDATE articles SET status = 'pending', claimed_at = NULL WHERE status = 'processing'",
            ),
        }
        .execute(&self.pool)
        .await
        .map_err(db)?;

        Ok(result.rows_affected())
    }

    async fn requeue_failed(&self) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE articles SET status = 'pending', claimed_at = NULL WHERE status = 'failed'",
        )
        .execute(&self.pool)
        .await
        .map_err(db)?;

        Ok(result.rows_affected())
    }

    async fn requeue_article(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE articles SET status = 'pending', claimed_at = NULL, is_active = true
            WHERE id = $1 AND status IN ('done', 'failed')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> StoreResult<PurgeReport> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let safe: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT category FROM articles WHERE status = 'done' AND fetched_at >= $1",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(db)?;

        let unsummarised =
            sqlx::query("DELETE FROM articles WHERE fetched_at < $1 AND status <> 'done'")
                .bind(cutoff)
                .execute(&mut *tx)
                .await
                .map_err(db)?;

        let done = sqlx::query(
            "DELETE FROM articles WHERE fetched_at < $1 AND status = 'done' AND category = ANY($2)",
        )
        .bind(cutoff)
        .bind(&safe)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        let protected_categories: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT category FROM articles
            WHERE fetched_at < $1 AND status = 'done'
            ORDER BY category
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(db)?;

        tx.commit().await.map_err(db)?;

        Ok(PurgeReport {
            removed_unsummarised: unsummarised.rows_affected(),
            removed_done: done.rows_affected(),
            protected_categories,
        })
    }

    async fn status_counts(&self) -> StoreResult<StatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM articles GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(db)?;
            let n: i64 = row.try_get("n").map_err(db)?;
            let status = status.parse::<ArticleStatus>().map_err(StoreError::Corrupt)?;
            counts.add(status, n.max(0) as u64);
        }
        Ok(counts)
    }
}
