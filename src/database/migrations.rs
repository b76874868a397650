use crate::error::{EgressError, Result};
use sqlx::{Executor, PgPool};
use tracing::info;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    // Create migrations table if not exists
    create_migrations_table(pool).await?;

    // Run each migration in order
    let migrations = get_migrations();

    for (version, name, sql) in migrations {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            // Simple-query protocol so a migration may hold several statements
            pool.execute(sql).await.map_err(EgressError::Database)?;

            // Record migration
            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| EgressError::Database(e))?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let result = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await
    .map_err(|e| EgressError::Database(e))?;

    Ok(result > 0)
}

/// Record a migration as applied
async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await
        .map_err(|e| EgressError::Database(e))?;

    Ok(())
}

/// Get all migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "providers_table", MIGRATION_001_PROVIDERS),
        (2, "routing_rules_table", MIGRATION_002_ROUTING_RULES),
        (3, "secrets_table", MIGRATION_003_SECRETS),
    ]
}

// Migration 1: Providers table
const MIGRATION_001_PROVIDERS: &str = r#"
-- Provider records; credentials live in the secrets table
CREATE TABLE IF NOT EXISTS providers (
    name VARCHAR(255) PRIMARY KEY,
    gateway_host VARCHAR(255) NOT NULL,
    gateway_port INTEGER NOT NULL CHECK (gateway_port > 0 AND gateway_port < 65536),
    url_template JSONB NOT NULL,
    cost_per_gb DOUBLE PRECISION NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 100,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    geo_coverage JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_providers_enabled ON providers(enabled);

-- Updated_at trigger
CREATE OR REPLACE FUNCTION update_updated_at_column()
RETURNS TRIGGER AS $$
BEGIN
    NEW.updated_at = NOW();
    RETURN NEW;
END;
$$ language 'plpgsql';

DROP TRIGGER IF EXISTS update_providers_updated_at ON providers;
CREATE TRIGGER update_providers_updated_at
    BEFORE UPDATE ON providers
    FOR EACH ROW
    EXECUTE FUNCTION update_updated_at_column();
"#;

// Migration 2: Routing rules table
const MIGRATION_002_ROUTING_RULES: &str = r#"
CREATE TABLE IF NOT EXISTS routing_rules (
    id UUID PRIMARY KEY,
    domain_pattern VARCHAR(255) NOT NULL,
    preferred_providers JSONB NOT NULL DEFAULT '[]',
    required_country VARCHAR(2),
    session_type VARCHAR(20) NOT NULL DEFAULT 'rotating',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_routing_rules_pattern ON routing_rules(domain_pattern);
"#;

// Migration 3: Secrets table
const MIGRATION_003_SECRETS: &str = r#"
CREATE TABLE IF NOT EXISTS secrets (
    key VARCHAR(255) PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;
