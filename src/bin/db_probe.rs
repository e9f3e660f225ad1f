//! One-shot connection diagnostic: resolves the same credentials the daemon
//! uses, connects once, and prints basic table counts when reachable.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::Row;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config" || w[0] == "-c")
        .map(|w| w[1].clone())
        .unwrap_or_else(|| "gendash.toml".to_string());

    let _ = dotenvy::dotenv();

    let opts = resolve_options(&config_path)?;

    println!("Connecting...");
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(opts)
        .await
        .context("connection failed")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("verification query failed")?;
    println!("Connected.");

    for table in ["projects", "tasks", "memories", "prompts", "workflows"] {
        let sql = format!("SELECT COUNT(*)::bigint AS count FROM {}", table);
        match sqlx::query(&sql).fetch_one(&pool).await {
            Ok(row) => {
                let count: i64 = row.try_get("count").unwrap_or(0);
                println!("  {:<10} {}", table, count);
            }
            Err(e) => println!("  {:<10} unavailable ({})", table, e),
        }
    }

    pool.close().await;
    Ok(())
}

/// Credential resolution mirrors the daemon: DATABASE_URL from the
/// environment wins, then the config file's [database] section (url first,
/// discrete fields second).
fn resolve_options(config_path: &str) -> anyhow::Result<PgConnectOptions> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.is_empty() {
            return Ok(PgConnectOptions::from_str(&url)?);
        }
    }

    let raw = std::fs::read_to_string(config_path)
        .with_context(|| format!("no DATABASE_URL set and cannot read {}", config_path))?;
    let doc: toml::Value = toml::from_str(&raw)?;
    let db = doc
        .get("database")
        .context("config has no [database] section")?;

    let get_str = |key: &str| db.get(key).and_then(|v| v.as_str()).unwrap_or("");

    let url = get_str("url");
    if !url.is_empty() {
        return Ok(PgConnectOptions::from_str(url)?);
    }

    let user = get_str("user");
    if user.is_empty() {
        anyhow::bail!("no database credentials configured: set database.url or database.user");
    }
    let mut opts = PgConnectOptions::new()
        .host(db.get("host").and_then(|v| v.as_str()).unwrap_or("localhost"))
        .port(db.get("port").and_then(|v| v.as_integer()).unwrap_or(5432) as u16)
        .database(db.get("name").and_then(|v| v.as_str()).unwrap_or("gen_os"))
        .username(user);
    let password = get_str("password");
    if !password.is_empty() {
        opts = opts.password(password);
    }
    Ok(opts)
}
