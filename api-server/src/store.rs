//! Post persistence.
//!
//! [`PostStore`] is the seam between the import pipeline and the database:
//! a bulk upsert, a single-row upsert, and the paged read used by the listing
//! endpoint. [`PgPostStore`] is the PostgreSQL implementation; the bulk write
//! is a single `UNNEST` statement, so it either applies every row or none.

use crate::models::Post;
use rocket_db_pools::sqlx::{self, PgPool};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// One page of posts plus the total row count.
#[derive(Debug, Clone, Default)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub total: i64,
}

/// Upsert-by-id storage for posts.
#[rocket::async_trait]
pub trait PostStore: Send + Sync {
    /// Write every post in one statement. Returns the number of rows written.
    async fn save_all(&self, posts: &[Post]) -> Result<u64, StoreError>;

    /// Write a single post.
    async fn save(&self, post: &Post) -> Result<(), StoreError>;

    /// Zero-based page of posts ordered by id ascending.
    async fn page(&self, page: i64, size: i64) -> Result<PostPage, StoreError>;
}

pub type SharedStore = Arc<dyn PostStore>;

#[derive(Clone)]
pub struct PgPostStore {
    pool: PgPool,
}

impl PgPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn shared(pool: PgPool) -> SharedStore {
        Arc::new(Self::new(pool))
    }
}

#[rocket::async_trait]
impl PostStore for PgPostStore {
    async fn save_all(&self, posts: &[Post]) -> Result<u64, StoreError> {
        if posts.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(posts.len());
        let mut user_ids = Vec::with_capacity(posts.len());
        let mut titles = Vec::with_capacity(posts.len());
        let mut bodies = Vec::with_capacity(posts.len());

        for post in posts {
            ids.push(post.id);
            user_ids.push(post.user_id);
            titles.push(post.title.clone());
            bodies.push(post.body.clone());
        }

        let result = sqlx::query(
            r#"INSERT INTO posts (id, user_id, title, body)
               SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::text[], $4::text[])
               ON CONFLICT (id) DO UPDATE
               SET user_id = EXCLUDED.user_id,
                   title = EXCLUDED.title,
                   body = EXCLUDED.body"#,
        )
        .bind(&ids)
        .bind(&user_ids)
        .bind(&titles)
        .bind(&bodies)
        .execute(&self.pool)
        .await?;

        log::trace!("bulk upserted {} posts", result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn save(&self, post: &Post) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO posts (id, user_id, title, body)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (id) DO UPDATE
               SET user_id = EXCLUDED.user_id,
                   title = EXCLUDED.title,
                   body = EXCLUDED.body"#,
        )
        .bind(post.id)
        .bind(post.user_id)
        .bind(&post.title)
        .bind(&post.body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn page(&self, page: i64, size: i64) -> Result<PostPage, StoreError> {
        let (posts, total) = tokio::try_join!(
            sqlx::query_as::<_, Post>(
                "SELECT id, user_id, title, body FROM posts ORDER BY id ASC LIMIT $1 OFFSET $2",
            )
            .bind(size)
            .bind(page.saturating_mul(size))
            .fetch_all(&self.pool),
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts").fetch_one(&self.pool),
        )?;

        Ok(PostPage { posts, total })
    }
}
