//! Thin project/source lookups the CLI needs before handing off to
//! `codetrace-engine`. Kept separate from the engine crate since resolving
//! a human-typed slug into a `ProjectId` is a CLI-edge concern, not part
//! of the indexing/retrieval pipeline itself.
use anyhow::{bail, Context, Result};
use codetrace_core::{Project, Source};
use sqlx::PgPool;

pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to database")?;
    sqlx::migrate!("../codetrace-engine/migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;
    Ok(pool)
}

pub async fn load_project_by_slug(pool: &PgPool, slug: &str) -> Result<Project> {
    let row = sqlx::query_as::<_, (uuid::Uuid, String, String, serde_json::Value)>(
        "SELECT id, slug, display_name, settings FROM projects WHERE slug = $1",
    )
    .bind(slug)
    .fetch_optional(pool)
    .await
    .context("failed to query project")?;

    match row {
        Some((id, slug, display_name, settings)) => Ok(Project { id, slug, display_name, settings }),
        None => bail!("no project found with slug '{slug}' — create it before indexing"),
    }
}

pub async fn load_sources_for_project(pool: &PgPool, project_id: uuid::Uuid) -> Result<Vec<Source>> {
    let rows = sqlx::query_as::<_, (
        uuid::Uuid,
        uuid::Uuid,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<chrono::DateTime<chrono::Utc>>,
    )>(
        r#"
        SELECT id, project_id, alias, path, last_indexed_commit, last_indexed_branch, last_indexed_at
        FROM sources
        WHERE project_id = $1
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to query sources")?;

    Ok(rows
        .into_iter()
        .map(|(id, project_id, alias, path, last_indexed_commit, last_indexed_branch, last_indexed_at)| Source {
            id,
            project_id,
            alias,
            path,
            last_indexed_commit,
            last_indexed_branch,
            last_indexed_at,
        })
        .collect())
}

pub async fn update_source_checkpoint(
    pool: &PgPool,
    source_id: uuid::Uuid,
    commit: Option<&str>,
    branch: Option<&str>,
    indexed_at: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sources
        SET last_indexed_commit = $2, last_indexed_branch = $3, last_indexed_at = $4
        WHERE id = $1
        "#,
    )
    .bind(source_id)
    .bind(commit)
    .bind(branch)
    .bind(indexed_at)
    .execute(pool)
    .await
    .context("failed to update source checkpoint")?;
    Ok(())
}
