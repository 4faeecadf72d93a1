//! Postgres-backed profile read model (`profile_projection` table).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use proofing_core::{AggregateId, UserId};
use proofing_events::ProjectionError;
use proofing_profiles::{DeactivationReason, IdvLevel};

use super::ReadModelStore;
use crate::db;
use crate::projections::ProfileReadModel;

/// Postgres store for [`ProfileReadModel`] rows.
///
/// Enum columns hold the same snake_case strings the events serialize to.
#[derive(Debug, Clone)]
pub struct PostgresProfileStore {
    pool: Arc<PgPool>,
}

const SELECT_PROFILES: &str = r#"
    SELECT
        profile_id,
        user_id,
        created_at,
        minted_at,
        idv_level,
        active,
        activated_at,
        verified_at,
        deactivation_reason,
        gpo_verification_pending_at,
        fraud_review_pending_at,
        fraud_rejection_at,
        in_person_verification_pending_at
    FROM profile_projection
"#;

impl PostgresProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn fetch(&self, profile_id: AggregateId) -> Result<Option<ProfileReadModel>, ProjectionError> {
        let row = sqlx::query(&format!("{SELECT_PROFILES} WHERE profile_id = $1"))
            .bind(profile_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(store_error)?;
        row.as_ref().map(decode_row).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_all(&self) -> Result<Vec<ProfileReadModel>, ProjectionError> {
        let rows = sqlx::query(&format!("{SELECT_PROFILES} ORDER BY profile_id ASC"))
            .fetch_all(&*self.pool)
            .await
            .map_err(store_error)?;
        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self, row), fields(profile_id = %row.profile_id), err)]
    pub async fn save(&self, row: &ProfileReadModel) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO profile_projection (
                profile_id,
                user_id,
                created_at,
                minted_at,
                idv_level,
                active,
                activated_at,
                verified_at,
                deactivation_reason,
                gpo_verification_pending_at,
                fraud_review_pending_at,
                fraud_rejection_at,
                in_person_verification_pending_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (profile_id)
            DO UPDATE SET
                user_id = EXCLUDED.user_id,
                created_at = EXCLUDED.created_at,
                minted_at = EXCLUDED.minted_at,
                idv_level = EXCLUDED.idv_level,
                active = EXCLUDED.active,
                activated_at = EXCLUDED.activated_at,
                verified_at = EXCLUDED.verified_at,
                deactivation_reason = EXCLUDED.deactivation_reason,
                gpo_verification_pending_at = EXCLUDED.gpo_verification_pending_at,
                fraud_review_pending_at = EXCLUDED.fraud_review_pending_at,
                fraud_rejection_at = EXCLUDED.fraud_rejection_at,
                in_person_verification_pending_at = EXCLUDED.in_person_verification_pending_at,
                updated_at = NOW()
            "#,
        )
        .bind(row.profile_id.as_uuid())
        .bind(row.user_id.as_uuid())
        .bind(row.created_at)
        .bind(row.minted_at)
        .bind(row.idv_level.map(IdvLevel::as_str))
        .bind(row.active)
        .bind(row.activated_at)
        .bind(row.verified_at)
        .bind(row.deactivation_reason.map(DeactivationReason::as_str))
        .bind(row.gpo_verification_pending_at)
        .bind(row.fraud_review_pending_at)
        .bind(row.fraud_rejection_at)
        .bind(row.in_person_verification_pending_at)
        .execute(&*self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&self, profile_id: AggregateId) -> Result<bool, ProjectionError> {
        let result = sqlx::query("DELETE FROM profile_projection WHERE profile_id = $1")
            .bind(profile_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    pub async fn truncate(&self) -> Result<(), ProjectionError> {
        sqlx::query("DELETE FROM profile_projection")
            .execute(&*self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

fn store_error(err: sqlx::Error) -> ProjectionError {
    ProjectionError::store(format!("profile_projection: {err}"))
}

fn decode_enum<T: serde::de::DeserializeOwned>(column: &str, value: Option<String>) -> Result<Option<T>, ProjectionError> {
    value
        .map(|v| {
            serde_json::from_value(serde_json::Value::String(v))
                .map_err(|e| ProjectionError::store(format!("profile_projection.{column}: {e}")))
        })
        .transpose()
}

fn decode_row(row: &PgRow) -> Result<ProfileReadModel, ProjectionError> {
    let get_err = |e: sqlx::Error| ProjectionError::store(format!("failed to decode profile row: {e}"));

    Ok(ProfileReadModel {
        profile_id: AggregateId::from_uuid(row.try_get("profile_id").map_err(get_err)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(get_err)?),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(get_err)?,
        minted_at: row.try_get("minted_at").map_err(get_err)?,
        idv_level: decode_enum("idv_level", row.try_get("idv_level").map_err(get_err)?)?,
        active: row.try_get("active").map_err(get_err)?,
        activated_at: row.try_get("activated_at").map_err(get_err)?,
        verified_at: row.try_get("verified_at").map_err(get_err)?,
        deactivation_reason: decode_enum("deactivation_reason", row.try_get("deactivation_reason").map_err(get_err)?)?,
        gpo_verification_pending_at: row.try_get("gpo_verification_pending_at").map_err(get_err)?,
        fraud_review_pending_at: row.try_get("fraud_review_pending_at").map_err(get_err)?,
        fraud_rejection_at: row.try_get("fraud_rejection_at").map_err(get_err)?,
        in_person_verification_pending_at: row.try_get("in_person_verification_pending_at").map_err(get_err)?,
    })
}

fn bridge<T>(operation: &str, result: Result<Result<T, ProjectionError>, String>) -> Result<T, ProjectionError> {
    result.map_err(|e| ProjectionError::store(format!("{operation}: {e}")))?
}

impl ReadModelStore<AggregateId, ProfileReadModel> for PostgresProfileStore {
    fn get(&self, key: &AggregateId) -> Result<Option<ProfileReadModel>, ProjectionError> {
        bridge("get", db::block_on("PostgresProfileStore::get", self.fetch(*key)))
    }

    fn upsert(&self, _key: AggregateId, value: ProfileReadModel) -> Result<(), ProjectionError> {
        bridge("upsert", db::block_on("PostgresProfileStore::upsert", self.save(&value)))
    }

    fn remove(&self, key: &AggregateId) -> Result<bool, ProjectionError> {
        bridge("remove", db::block_on("PostgresProfileStore::remove", self.delete(*key)))
    }

    fn list(&self) -> Result<Vec<ProfileReadModel>, ProjectionError> {
        bridge("list", db::block_on("PostgresProfileStore::list", self.fetch_all()))
    }

    fn clear(&self) -> Result<(), ProjectionError> {
        bridge("clear", db::block_on("PostgresProfileStore::clear", self.truncate()))
    }
}
