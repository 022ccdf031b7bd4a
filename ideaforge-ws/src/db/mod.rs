//! Database access for the workshop coordinator
//!
//! One SQLite database per deployment, holding every session's full
//! record: participants, ideas, clusters, votes, and the event log.
//! Every state transition is written here before the corresponding
//! event is published.

pub mod store;

use ideaforge_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool and create tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests. Single connection: every SQLite `:memory:`
/// connection is its own database, so a larger pool would scatter state.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            owner_token TEXT NOT NULL,
            created_at TEXT NOT NULL,
            step INTEGER NOT NULL DEFAULT 1,
            phase TEXT NOT NULL,
            company_context TEXT,
            selected_cluster TEXT,
            assessed_cluster TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS participants (
            session_id TEXT NOT NULL,
            participant_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            kind TEXT NOT NULL,
            is_owner INTEGER NOT NULL DEFAULT 0,
            joined_at TEXT NOT NULL,
            connected INTEGER NOT NULL DEFAULT 1,
            join_order INTEGER NOT NULL,
            PRIMARY KEY (session_id, participant_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ideas (
            session_id TEXT NOT NULL,
            sheet_index INTEGER NOT NULL,
            round INTEGER NOT NULL,
            position INTEGER NOT NULL,
            author TEXT NOT NULL,
            idea_text TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            PRIMARY KEY (session_id, sheet_index, round, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clusters (
            session_id TEXT NOT NULL,
            cluster_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            business_impact TEXT NOT NULL,
            implementation_effort TEXT NOT NULL,
            maturity_appropriateness TEXT NOT NULL,
            impact_rationale TEXT NOT NULL,
            maturity_rationale TEXT NOT NULL,
            fallback INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (session_id, cluster_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cluster_members (
            session_id TEXT NOT NULL,
            cluster_id TEXT NOT NULL,
            idea_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (session_id, cluster_id, idea_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS idea_labels (
            session_id TEXT NOT NULL,
            idea_id TEXT NOT NULL,
            business_impact TEXT NOT NULL,
            implementation_effort TEXT NOT NULL,
            impact_rationale TEXT NOT NULL,
            PRIMARY KEY (session_id, idea_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS votes (
            session_id TEXT NOT NULL,
            phase TEXT NOT NULL,
            participant_id TEXT NOT NULL,
            allocation TEXT NOT NULL,
            PRIMARY KEY (session_id, phase, participant_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            session_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            ts TEXT NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (session_id, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
