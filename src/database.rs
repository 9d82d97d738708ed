//! Database bootstrap: connects to SQLite, tunes it for a single-writer,
//! many-reader cache store, and applies migrations.

use sqlx::sqlite::SqlitePool;
use tracing::info;

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, name: "create_cache_tables", sql: include_str!("../migrations/001_create_cache_tables.sql") },
    Migration { version: 2, name: "create_oauth_tokens", sql: include_str!("../migrations/002_create_oauth_tokens.sql") },
    Migration { version: 3, name: "add_oauth_refresh_token", sql: include_str!("../migrations/003_add_oauth_refresh_token.sql") },
];

pub async fn init_database(db_file: &str) -> Result<SqlitePool, Box<dyn std::error::Error>> {
    let pool = SqlitePool::connect(&format!("sqlite:{db_file}?mode=rwc")).await?;

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;
    sqlx::query("PRAGMA cache_size = -128000").execute(&pool).await?;
    sqlx::query("PRAGMA temp_store = MEMORY").execute(&pool).await?;
    sqlx::query("PRAGMA mmap_size = 536870912").execute(&pool).await?;
    sqlx::query("PRAGMA page_size = 8192").execute(&pool).await?;
    sqlx::query("PRAGMA auto_vacuum = INCREMENTAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;
    sqlx::query("PRAGMA wal_autocheckpoint = 1000").execute(&pool).await?;
    let _ = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&pool).await;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at REAL NOT NULL
        )",
    )
    .execute(&pool)
    .await?;

    for migration in MIGRATIONS {
        let applied = sqlx::query_as::<_, (i32,)>("SELECT version FROM schema_migrations WHERE version = ?")
            .bind(migration.version)
            .fetch_optional(&pool)
            .await?
            .is_some();

        if applied {
            continue;
        }

        info!(version = migration.version, name = migration.name, "running migration");

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .bind(current_timestamp())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    sqlx::query("ANALYZE").execute(&pool).await?;
    info!("database initialization complete");

    Ok(pool)
}

fn current_timestamp() -> f64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs_f64()
}
