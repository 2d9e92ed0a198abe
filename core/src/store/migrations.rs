use libsql::Connection;
use rust_embed::RustEmbed;

use crate::error::Result;

/// Embedded goose-style SQL migrations: `NNN_<name>.sql` files with
/// `-- +goose Up` / `-- +goose Down` markers.
#[derive(RustEmbed)]
#[folder = "migrations/"]
struct Migrations;

struct ParsedMigration {
    version: u32,
    name: String,
    up: String,
}

fn parse_migration(filename: &str, contents: &str) -> Option<ParsedMigration> {
    let stem = filename.strip_suffix(".sql")?;
    let (version_str, name) = stem.split_once('_')?;
    let version: u32 = version_str.parse().ok()?;

    let up_marker = "-- +goose Up";
    let down_marker = "-- +goose Down";

    let up_start = contents.find(up_marker)? + up_marker.len();
    let up_end = contents.find(down_marker).unwrap_or(contents.len());
    let up = contents[up_start..up_end].trim().to_string();

    Some(ParsedMigration {
        version,
        name: name.to_string(),
        up,
    })
}

fn embedded_migrations() -> Vec<ParsedMigration> {
    let mut migrations: Vec<ParsedMigration> = Migrations::iter()
        .filter_map(|path| {
            let contents = Migrations::get(&path)?;
            let text = std::str::from_utf8(contents.data.as_ref()).ok()?;
            parse_migration(&path, text)
        })
        .collect();

    migrations.sort_by_key(|m| m.version);
    migrations
}

/// Applies every embedded migration not already recorded in
/// `schema_migrations`, in ascending version order. Idempotent: re-running
/// against an up-to-date database is a no-op.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .await?;

    for migration in embedded_migrations() {
        let mut rows = conn
            .query(
                "SELECT 1 FROM schema_migrations WHERE version = ?1",
                libsql::params![migration.version],
            )
            .await?;

        if rows.next().await?.is_some() {
            continue;
        }

        tracing::info!(version = migration.version, name = %migration.name, "applying migration");
        conn.execute_batch(&migration.up).await?;
        conn.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            libsql::params![
                migration.version,
                migration.name.clone(),
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_name_and_up_section() {
        let contents = "-- +goose Up\nCREATE TABLE t (id TEXT);\n-- +goose Down\nDROP TABLE t;\n";
        let parsed = parse_migration("001_init.sql", contents).unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.name, "init");
        assert!(parsed.up.contains("CREATE TABLE t"));
        assert!(!parsed.up.contains("DROP TABLE"));
    }

    #[test]
    fn embedded_migrations_are_sorted_and_parseable() {
        let migrations = embedded_migrations();
        assert!(!migrations.is_empty());
        let versions: Vec<u32> = migrations.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
    }
}
