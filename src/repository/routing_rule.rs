use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::RoutingRuleStore;
use crate::error::Result;
use crate::models::{RoutingRule, SessionType};

#[derive(Debug, FromRow)]
struct RoutingRuleRow {
    id: Uuid,
    domain_pattern: String,
    preferred_providers: Json<Vec<String>>,
    required_country: Option<String>,
    session_type: String,
    created_at: DateTime<Utc>,
}

impl From<RoutingRuleRow> for RoutingRule {
    fn from(row: RoutingRuleRow) -> Self {
        RoutingRule {
            id: row.id,
            domain_pattern: row.domain_pattern,
            preferred_providers: row.preferred_providers.0,
            required_country: row.required_country,
            session_type: SessionType::from_str(&row.session_type).unwrap_or_default(),
            created_at: row.created_at,
        }
    }
}

/// Repository for routing rule database operations
#[derive(Clone)]
pub struct RoutingRuleRepository {
    pool: PgPool,
}

impl RoutingRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoutingRuleStore for RoutingRuleRepository {
    async fn list_routing_rules(&self) -> Result<Vec<RoutingRule>> {
        let rows = sqlx::query_as::<_, RoutingRuleRow>(
            r#"
            SELECT id, domain_pattern, preferred_providers, required_country,
                   session_type, created_at
            FROM routing_rules
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RoutingRule::from).collect())
    }

    async fn insert_routing_rule(&self, rule: &RoutingRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO routing_rules (id, domain_pattern, preferred_providers,
                                       required_country, session_type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.domain_pattern)
        .bind(Json(&rule.preferred_providers))
        .bind(&rule.required_country)
        .bind(rule.session_type.as_str())
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_routing_rule(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM routing_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
