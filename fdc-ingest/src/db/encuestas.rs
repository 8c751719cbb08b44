//! Survey storage, scoped to one operator
//!
//! [`ScopedRepository`] is the only write path for surveys. It stamps every
//! row with the authenticated operator and organization; identity never
//! comes from the payload.

use fdc_common::schema::field;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::api::AccessScope;

pub struct ScopedRepository<'a> {
    pool: &'a SqlitePool,
    scope: &'a AccessScope,
}

impl<'a> ScopedRepository<'a> {
    pub fn new(pool: &'a SqlitePool, scope: &'a AccessScope) -> Self {
        Self { pool, scope }
    }

    /// Insert validated payloads in one transaction
    ///
    /// Returns the number of rows inserted.
    pub async fn insert_batch(&self, payloads: Vec<Map<String, Value>>) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for payload in &payloads {
            let campaign = payload.get(field::CAMPANA_ID).and_then(Value::as_str);
            let encoded = Value::Object(payload.clone()).to_string();

            sqlx::query(
                r#"
                INSERT INTO encuestas (
                    id, encuestador_id, organizacion_id, campana_id,
                    intencion_voto, simpatia, duracion_segundos, capturado_en, payload
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&self.scope.operator_id)
            .bind(&self.scope.organization_id)
            .bind(campaign)
            .bind(payload.get(field::INTENCION_VOTO).and_then(Value::as_i64))
            .bind(payload.get(field::SIMPATIA).and_then(Value::as_i64))
            .bind(payload.get(field::DURACION_SEGUNDOS).and_then(Value::as_i64))
            .bind(payload.get(field::CAPTURADO_EN).and_then(Value::as_str))
            .bind(encoded)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Surveys stored for this operator
    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM encuestas WHERE encuestador_id = ?")
            .bind(&self.scope.operator_id)
            .fetch_one(self.pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdc_common::db::open_memory_database;
    use serde_json::json;

    #[tokio::test]
    async fn test_rows_are_stamped_with_scope() {
        let pool = open_memory_database().await.unwrap();
        crate::db::init_schema(&pool).await.unwrap();
        let scope = AccessScope {
            operator_id: "op-1".into(),
            organization_id: "org-1".into(),
            campaigns: vec!["camp-1".into()],
        };
        let repo = ScopedRepository::new(&pool, &scope);

        let mut payload = Map::new();
        payload.insert("campana_id".into(), json!("camp-1"));
        payload.insert("simpatia".into(), json!(4));
        assert_eq!(repo.insert_batch(vec![payload]).await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 1);

        let (operator, organization, simpatia): (String, String, Option<i64>) = sqlx::query_as(
            "SELECT encuestador_id, organizacion_id, simpatia FROM encuestas",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(operator, "op-1");
        assert_eq!(organization, "org-1");
        assert_eq!(simpatia, Some(4));
    }
}
