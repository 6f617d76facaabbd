//! Postgres-backed price ledger.
//!
//! Records are stored as JSONB documents next to the columns the queries filter on. Every
//! write runs in a transaction; `commit` locks the unit row (`FOR UPDATE`) and compares its
//! version before anything is written.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure) | `40001` | `Conflict` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use boxprice_core::{ExpectedVersion, Money, RecommendationId, SiteId, TenantId, UnitId};
use boxprice_pricing::{AdjustmentPlan, PriceAdjustment, PriceHistoryEntry, PriceRecommendation, UnitRecord};

use super::ledger::{AdjustmentQuery, PriceLedger};
use crate::error::StoreError;

/// Tables used by [`PostgresPriceLedger`]; idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS price_units (
    tenant_id   UUID NOT NULL,
    unit_id     UUID NOT NULL,
    site_id     UUID NOT NULL,
    version     BIGINT NOT NULL,
    data        JSONB NOT NULL,
    PRIMARY KEY (tenant_id, unit_id)
);
CREATE INDEX IF NOT EXISTS price_units_site ON price_units (tenant_id, site_id);

CREATE TABLE IF NOT EXISTS price_recommendations (
    tenant_id         UUID NOT NULL,
    recommendation_id UUID NOT NULL,
    unit_id           UUID NOT NULL,
    site_id           UUID NOT NULL,
    status            TEXT NOT NULL,
    created_at        TIMESTAMPTZ NOT NULL,
    data              JSONB NOT NULL,
    PRIMARY KEY (tenant_id, recommendation_id)
);
CREATE INDEX IF NOT EXISTS price_recommendations_unit ON price_recommendations (tenant_id, unit_id, status);

CREATE TABLE IF NOT EXISTS price_adjustments (
    seq           BIGSERIAL PRIMARY KEY,
    tenant_id     UUID NOT NULL,
    adjustment_id UUID NOT NULL UNIQUE,
    unit_id       UUID NOT NULL,
    site_id       UUID NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL,
    data          JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS price_adjustments_scope ON price_adjustments (tenant_id, site_id, unit_id, created_at);

CREATE TABLE IF NOT EXISTS price_history (
    seq        BIGSERIAL PRIMARY KEY,
    tenant_id  UUID NOT NULL,
    unit_id    UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    data       JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS price_history_unit ON price_history (tenant_id, unit_id);
"#;

#[derive(Debug, Clone)]
pub struct PostgresPriceLedger {
    pool: PgPool,
}

impl PostgresPriceLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn locked_unit(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    unit_id: UnitId,
) -> Result<Option<UnitRecord>, StoreError> {
    let row = sqlx::query("SELECT data FROM price_units WHERE tenant_id = $1 AND unit_id = $2 FOR UPDATE")
        .bind(tenant_id.as_uuid())
        .bind(unit_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_unit", e))?;
    row.map(|r| decode::<UnitRecord>(&r)).transpose()
}

async fn write_unit(tx: &mut Transaction<'_, Postgres>, unit: &UnitRecord) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO price_units (tenant_id, unit_id, site_id, version, data)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (tenant_id, unit_id)
        DO UPDATE SET site_id = EXCLUDED.site_id, version = EXCLUDED.version, data = EXCLUDED.data
        "#,
    )
    .bind(unit.tenant_id.as_uuid())
    .bind(unit.id.as_uuid())
    .bind(unit.site_id.as_uuid())
    .bind(unit.version as i64)
    .bind(Json(unit))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_unit", e))?;
    Ok(())
}

async fn write_recommendation(
    tx: &mut Transaction<'_, Postgres>,
    rec: &PriceRecommendation,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO price_recommendations
            (tenant_id, recommendation_id, unit_id, site_id, status, created_at, data)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (tenant_id, recommendation_id)
        DO UPDATE SET status = EXCLUDED.status, data = EXCLUDED.data
        "#,
    )
    .bind(rec.tenant_id.as_uuid())
    .bind(rec.id.as_uuid())
    .bind(rec.unit_id.as_uuid())
    .bind(rec.site_id.as_uuid())
    .bind(rec.status.as_str())
    .bind(rec.created_at)
    .bind(Json(rec))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_recommendation", e))?;
    Ok(())
}

async fn locked_recommendation(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    id: RecommendationId,
) -> Result<Option<PriceRecommendation>, StoreError> {
    let row = sqlx::query(
        "SELECT data FROM price_recommendations WHERE tenant_id = $1 AND recommendation_id = $2 FOR UPDATE",
    )
    .bind(tenant_id.as_uuid())
    .bind(id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_recommendation", e))?;
    row.map(|r| decode::<PriceRecommendation>(&r)).transpose()
}

async fn finish(tx: Transaction<'_, Postgres>) -> Result<(), StoreError> {
    tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))
}

#[async_trait]
impl PriceLedger for PostgresPriceLedger {
    #[instrument(skip(self, unit), fields(tenant = %unit.tenant_id, unit = %unit.id), err)]
    async fn upsert_unit(&self, mut unit: UnitRecord) -> Result<UnitRecord, StoreError> {
        let mut tx = self.begin().await?;
        match locked_unit(&mut tx, unit.tenant_id, unit.id).await? {
            Some(existing) => {
                unit.current_price = existing.current_price;
                unit.anchor_price = existing.anchor_price;
                unit.price_changed_at = existing.price_changed_at;
                unit.last_auto_adjusted_at = existing.last_auto_adjusted_at;
                unit.version = existing.version + 1;
            }
            None => unit.version = 0,
        }
        write_unit(&mut tx, &unit).await?;
        finish(tx).await?;
        Ok(unit)
    }

    async fn unit(&self, tenant_id: TenantId, unit_id: UnitId) -> Result<Option<UnitRecord>, StoreError> {
        let row = sqlx::query("SELECT data FROM price_units WHERE tenant_id = $1 AND unit_id = $2")
            .bind(tenant_id.as_uuid())
            .bind(unit_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("unit", e))?;
        row.map(|r| decode(&r)).transpose()
    }

    async fn units_for_site(&self, tenant_id: TenantId, site_id: SiteId) -> Result<Vec<UnitRecord>, StoreError> {
        let rows = sqlx::query("SELECT data FROM price_units WHERE tenant_id = $1 AND site_id = $2 ORDER BY unit_id")
            .bind(tenant_id.as_uuid())
            .bind(site_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("units_for_site", e))?;
        rows.iter().map(decode).collect()
    }

    async fn site_directory(&self) -> Result<Vec<(TenantId, SiteId)>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT tenant_id, site_id FROM price_units ORDER BY tenant_id, site_id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("site_directory", e))?;
        rows.iter()
            .map(|r| {
                let tenant: uuid::Uuid = r.try_get("tenant_id").map_err(|e| map_sqlx_error("site_directory", e))?;
                let site: uuid::Uuid = r.try_get("site_id").map_err(|e| map_sqlx_error("site_directory", e))?;
                Ok((TenantId::from_uuid(tenant), SiteId::from_uuid(site)))
            })
            .collect()
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, unit = %unit_id), err)]
    async fn lock_unit_for_contract(&self, tenant_id: TenantId, unit_id: UnitId) -> Result<Money, StoreError> {
        let mut tx = self.begin().await?;
        let mut unit = locked_unit(&mut tx, tenant_id, unit_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("unit {unit_id}")))?;
        let price = unit.lock_for_contract();
        write_unit(&mut tx, &unit).await?;
        finish(tx).await?;
        Ok(price)
    }

    #[instrument(skip(self, rec), fields(tenant = %rec.tenant_id, unit = %rec.unit_id, recommendation = %rec.id), err)]
    async fn save_recommendation(
        &self,
        rec: PriceRecommendation,
    ) -> Result<Vec<PriceRecommendation>, StoreError> {
        if !rec.is_pending() {
            return Err(StoreError::Conflict(format!(
                "recommendation {} is {}, only pending recommendations are saved",
                rec.id,
                rec.status.as_str()
            )));
        }
        let mut tx = self.begin().await?;
        if locked_recommendation(&mut tx, rec.tenant_id, rec.id).await?.is_some() {
            return Err(StoreError::Conflict(format!("recommendation {} already exists", rec.id)));
        }

        let rows = sqlx::query(
            r#"
            SELECT data FROM price_recommendations
            WHERE tenant_id = $1 AND unit_id = $2 AND status = 'pending'
            FOR UPDATE
            "#,
        )
        .bind(rec.tenant_id.as_uuid())
        .bind(rec.unit_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("pending_for_unit", e))?;

        let mut superseded = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut stored: PriceRecommendation = decode(row)?;
            stored
                .mark_expired("superseded by a newer recommendation", rec.created_at)
                .map_err(|e| StoreError::Conflict(e.to_string()))?;
            write_recommendation(&mut tx, &stored).await?;
            superseded.push(stored);
        }
        write_recommendation(&mut tx, &rec).await?;
        finish(tx).await?;
        Ok(superseded)
    }

    async fn recommendation(
        &self,
        tenant_id: TenantId,
        id: RecommendationId,
    ) -> Result<Option<PriceRecommendation>, StoreError> {
        let row = sqlx::query("SELECT data FROM price_recommendations WHERE tenant_id = $1 AND recommendation_id = $2")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("recommendation", e))?;
        row.map(|r| decode(&r)).transpose()
    }

    async fn latest_recommendation(
        &self,
        tenant_id: TenantId,
        unit_id: UnitId,
    ) -> Result<Option<PriceRecommendation>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT data FROM price_recommendations
            WHERE tenant_id = $1 AND unit_id = $2
            ORDER BY created_at DESC, recommendation_id DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(unit_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_recommendation", e))?;
        row.map(|r| decode(&r)).transpose()
    }

    async fn pending_recommendations(
        &self,
        tenant_id: TenantId,
        site_id: Option<SiteId>,
    ) -> Result<Vec<PriceRecommendation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM price_recommendations
            WHERE tenant_id = $1 AND status = 'pending' AND ($2::uuid IS NULL OR site_id = $2)
            ORDER BY created_at DESC, recommendation_id DESC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(site_id.map(|s| *s.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending_recommendations", e))?;
        rows.iter().map(decode).collect()
    }

    #[instrument(skip(self, rec), fields(tenant = %rec.tenant_id, recommendation = %rec.id), err)]
    async fn resolve_recommendation(&self, rec: &PriceRecommendation) -> Result<(), StoreError> {
        if rec.is_pending() {
            return Err(StoreError::Conflict(format!("recommendation {} is still pending", rec.id)));
        }
        let mut tx = self.begin().await?;
        let stored = locked_recommendation(&mut tx, rec.tenant_id, rec.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("recommendation {}", rec.id)))?;
        if !stored.is_pending() {
            return Err(StoreError::Conflict(format!(
                "recommendation {} is already {}",
                rec.id,
                stored.status.as_str()
            )));
        }
        write_recommendation(&mut tx, rec).await?;
        finish(tx).await
    }

    #[instrument(
        skip(self, plan),
        fields(
            tenant = %plan.unit.tenant_id,
            unit = %plan.unit.id,
            expected_version = plan.expected_unit_version
        ),
        err
    )]
    async fn commit(&self, plan: &AdjustmentPlan) -> Result<(), StoreError> {
        let tenant_id = plan.unit.tenant_id;
        if plan.adjustment.tenant_id != tenant_id || plan.history.tenant_id != tenant_id {
            return Err(StoreError::TenantIsolation(
                "adjustment plan spans multiple tenants".to_string(),
            ));
        }

        let mut tx = self.begin().await?;

        // Dropping `tx` on an early return rolls everything back.
        let current = locked_unit(&mut tx, tenant_id, plan.unit.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("unit {}", plan.unit.id)))?;
        if !ExpectedVersion::Exact(plan.expected_unit_version).matches(current.version) {
            return Err(StoreError::VersionConflict {
                expected: plan.expected_unit_version,
                actual: current.version,
            });
        }
        if let Some(rec) = &plan.recommendation {
            if rec.tenant_id != tenant_id {
                return Err(StoreError::TenantIsolation(
                    "recommendation belongs to another tenant".to_string(),
                ));
            }
            let stored = locked_recommendation(&mut tx, tenant_id, rec.id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("recommendation {}", rec.id)))?;
            if !stored.is_pending() {
                return Err(StoreError::Conflict(format!(
                    "recommendation {} is already {}",
                    rec.id,
                    stored.status.as_str()
                )));
            }
            write_recommendation(&mut tx, rec).await?;
        }

        write_unit(&mut tx, &plan.unit).await?;

        let adjustment = &plan.adjustment;
        sqlx::query(
            r#"
            INSERT INTO price_adjustments (tenant_id, adjustment_id, unit_id, site_id, created_at, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(adjustment.id.as_uuid())
        .bind(adjustment.unit_id.as_uuid())
        .bind(adjustment.site_id.as_uuid())
        .bind(adjustment.created_at)
        .bind(Json(adjustment))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_adjustment", e))?;

        sqlx::query("INSERT INTO price_history (tenant_id, unit_id, created_at, data) VALUES ($1, $2, $3, $4)")
            .bind(tenant_id.as_uuid())
            .bind(plan.history.unit_id.as_uuid())
            .bind(plan.history.created_at)
            .bind(Json(&plan.history))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_history", e))?;

        finish(tx).await
    }

    async fn adjustments(
        &self,
        tenant_id: TenantId,
        query: &AdjustmentQuery,
    ) -> Result<Vec<PriceAdjustment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM price_adjustments
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR site_id = $2)
              AND ($3::uuid IS NULL OR unit_id = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at <= $5)
            ORDER BY seq DESC
            LIMIT $6
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(query.site_id.map(|s| *s.as_uuid()))
        .bind(query.unit_id.map(|u| *u.as_uuid()))
        .bind(query.from)
        .bind(query.to)
        .bind(query.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("adjustments", e))?;
        rows.iter().map(decode).collect()
    }

    async fn price_history(
        &self,
        tenant_id: TenantId,
        unit_id: UnitId,
    ) -> Result<Vec<PriceHistoryEntry>, StoreError> {
        let rows = sqlx::query("SELECT data FROM price_history WHERE tenant_id = $1 AND unit_id = $2 ORDER BY seq")
            .bind(tenant_id.as_uuid())
            .bind(unit_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("price_history", e))?;
        rows.iter().map(decode).collect()
    }
}

fn decode<T: serde::de::DeserializeOwned>(row: &sqlx::postgres::PgRow) -> Result<T, StoreError> {
    row.try_get::<Json<T>, _>("data")
        .map(|Json(value)| value)
        .map_err(|e| StoreError::Storage(format!("failed to decode row: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {operation}")),
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
