//! Database access layer for fdc-ingest

use sqlx::SqlitePool;
use tracing::info;

pub mod encuestas;
pub mod operators;

/// Create the service tables if they do not exist
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS operators (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            token_hash TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS operator_campaigns (
            operator_id TEXT NOT NULL REFERENCES operators(id) ON DELETE CASCADE,
            campaign_id TEXT NOT NULL,
            PRIMARY KEY (operator_id, campaign_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Allowlisted payload kept as JSON; columns used for reporting are
    // extracted next to it
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS encuestas (
            id TEXT PRIMARY KEY,
            encuestador_id TEXT NOT NULL,
            organizacion_id TEXT NOT NULL,
            campana_id TEXT NOT NULL,
            intencion_voto INTEGER,
            simpatia INTEGER,
            duracion_segundos INTEGER,
            capturado_en TEXT,
            payload TEXT NOT NULL,
            recibido_en TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_encuestas_campana ON encuestas (campana_id, encuestador_id)",
    )
    .execute(pool)
    .await?;

    info!("Ingestion schema ready");
    Ok(())
}
