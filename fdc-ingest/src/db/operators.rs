//! Operators, their tokens and campaign assignments

use fdc_common::api::{generate_token, hash_token};
use sqlx::SqlitePool;
use tracing::info;

/// What an authenticated operator may write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessScope {
    pub operator_id: String,
    pub organization_id: String,
    pub campaigns: Vec<String>,
}

impl AccessScope {
    pub fn allows_campaign(&self, campaign_id: &str) -> bool {
        self.campaigns.iter().any(|c| c == campaign_id)
    }
}

/// Create or update an operator and issue a new token
///
/// Any previous token of the operator stops working. Campaign assignments
/// are replaced by `campaigns`. Returns the plaintext token; only its hash
/// is stored.
pub async fn grant(
    pool: &SqlitePool,
    operator_id: &str,
    organization_id: &str,
    campaigns: &[String],
) -> Result<String, sqlx::Error> {
    let token = generate_token();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO operators (id, organization_id, token_hash)
        VALUES (?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            organization_id = excluded.organization_id,
            token_hash = excluded.token_hash,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(operator_id)
    .bind(organization_id)
    .bind(hash_token(&token))
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM operator_campaigns WHERE operator_id = ?")
        .bind(operator_id)
        .execute(&mut *tx)
        .await?;

    for campaign in campaigns {
        sqlx::query(
            "INSERT OR IGNORE INTO operator_campaigns (operator_id, campaign_id) VALUES (?, ?)",
        )
        .bind(operator_id)
        .bind(campaign)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!(
        operator = operator_id,
        organization = organization_id,
        campaigns = campaigns.len(),
        "Issued access token"
    );
    Ok(token)
}

/// Scope of the operator owning `token_hash`, if any
pub async fn find_scope_by_token_hash(
    pool: &SqlitePool,
    token_hash: &str,
) -> Result<Option<AccessScope>, sqlx::Error> {
    let operator: Option<(String, String)> =
        sqlx::query_as("SELECT id, organization_id FROM operators WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(pool)
            .await?;

    let Some((operator_id, organization_id)) = operator else {
        return Ok(None);
    };

    let campaigns: Vec<String> = sqlx::query_scalar(
        "SELECT campaign_id FROM operator_campaigns WHERE operator_id = ? ORDER BY campaign_id",
    )
    .bind(&operator_id)
    .fetch_all(pool)
    .await?;

    Ok(Some(AccessScope {
        operator_id,
        organization_id,
        campaigns,
    }))
}
