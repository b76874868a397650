use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::info;

use super::ProviderStore;
use crate::error::{EgressError, Result};
use crate::models::{normalize_coverage, ProxyProvider, TemplateConfig};

#[derive(Debug, FromRow)]
struct ProviderRow {
    name: String,
    gateway_host: String,
    gateway_port: i32,
    url_template: Json<TemplateConfig>,
    cost_per_gb: f64,
    priority: i32,
    enabled: bool,
    geo_coverage: Option<Json<Vec<String>>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProviderRow> for ProxyProvider {
    type Error = EgressError;

    fn try_from(row: ProviderRow) -> Result<Self> {
        let gateway_port = u16::try_from(row.gateway_port).map_err(|_| {
            EgressError::Configuration(format!(
                "provider '{}' has invalid gateway_port {}",
                row.name, row.gateway_port
            ))
        })?;

        Ok(ProxyProvider {
            name: row.name,
            gateway_host: row.gateway_host,
            gateway_port,
            url_template: row.url_template.0,
            credentials: None,
            cost_per_gb: row.cost_per_gb,
            priority: row.priority,
            enabled: row.enabled,
            geo_coverage: row.geo_coverage.and_then(|codes| normalize_coverage(codes.0)),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for provider database operations
#[derive(Clone)]
pub struct ProviderRepository {
    pool: PgPool,
}

impl ProviderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn coverage_json(provider: &ProxyProvider) -> Option<Json<Vec<String>>> {
    provider
        .geo_coverage
        .as_ref()
        .map(|codes| Json(codes.iter().cloned().collect()))
}

#[async_trait]
impl ProviderStore for ProviderRepository {
    async fn list_providers(&self) -> Result<Vec<ProxyProvider>> {
        let rows = sqlx::query_as::<_, ProviderRow>(
            r#"
            SELECT name, gateway_host, gateway_port, url_template, cost_per_gb,
                   priority, enabled, geo_coverage, created_at, updated_at
            FROM providers
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProxyProvider::try_from).collect()
    }

    async fn insert_provider(&self, provider: &ProxyProvider) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO providers (name, gateway_host, gateway_port, url_template, cost_per_gb,
                                   priority, enabled, geo_coverage, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&provider.name)
        .bind(&provider.gateway_host)
        .bind(provider.gateway_port as i32)
        .bind(Json(&provider.url_template))
        .bind(provider.cost_per_gb)
        .bind(provider.priority)
        .bind(provider.enabled)
        .bind(coverage_json(provider))
        .bind(provider.created_at)
        .bind(provider.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                EgressError::DuplicateName(provider.name.clone())
            }
            _ => EgressError::Database(e),
        })?;

        info!(name = %provider.name, "Inserted provider");
        Ok(())
    }

    async fn update_provider(&self, provider: &ProxyProvider) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE providers
            SET gateway_host = $2, gateway_port = $3, url_template = $4, cost_per_gb = $5,
                priority = $6, enabled = $7, geo_coverage = $8
            WHERE name = $1
            "#,
        )
        .bind(&provider.name)
        .bind(&provider.gateway_host)
        .bind(provider.gateway_port as i32)
        .bind(Json(&provider.url_template))
        .bind(provider.cost_per_gb)
        .bind(provider.priority)
        .bind(provider.enabled)
        .bind(coverage_json(provider))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EgressError::NotFound(format!(
                "provider '{}'",
                provider.name
            )));
        }
        Ok(())
    }

    async fn delete_provider(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM providers WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
