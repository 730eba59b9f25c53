//! End-to-end integration test for the index/search/context commands.
//!
//! Requires a running PostgreSQL instance with the `vector` extension
//! available. Run with:
//! ```
//! DATABASE_URL=postgres://localhost/codetrace_test cargo test -p codetrace-cli --test index_search_test -- --ignored
//! ```
use assert_cmd::Command;
use sqlx::PgPool;
use uuid::Uuid;

#[tokio::test]
#[ignore] // requires PostgreSQL
async fn index_then_search_finds_a_seeded_function() {
    let db_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/codetrace_test".into());
    let pool = PgPool::connect(&db_url).await.unwrap();
    sqlx::migrate!("../codetrace-engine/migrations").run(&pool).await.unwrap();

    let slug = format!("cli-test-{}", Uuid::new_v4());
    let project_id = Uuid::new_v4();
    sqlx::query("INSERT INTO projects (id, slug, display_name, settings) VALUES ($1, $2, $3, '{}'::jsonb)")
        .bind(project_id)
        .bind(&slug)
        .bind("CLI test project")
        .execute(&pool)
        .await
        .unwrap();

    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("math.ts"),
        "export function addNumbers(a: number, b: number): number {\n  return a + b;\n}\n",
    )
    .unwrap();

    let source_id = Uuid::new_v4();
    sqlx::query("INSERT INTO sources (id, project_id, alias, path) VALUES ($1, $2, 'main', $3)")
        .bind(source_id)
        .bind(project_id)
        .bind(tmp.path().to_str().unwrap())
        .execute(&pool)
        .await
        .unwrap();

    Command::cargo_bin("codetrace")
        .unwrap()
        .args(["index", &slug])
        .env("DATABASE_URL", &db_url)
        .assert()
        .success();

    Command::cargo_bin("codetrace")
        .unwrap()
        .args(["search", "addNumbers", "--project", &slug])
        .env("DATABASE_URL", &db_url)
        .assert()
        .success()
        .stdout(predicates::str::contains("addNumbers"));
}
