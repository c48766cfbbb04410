//! Postgres relational store
//!
//! Exact predicate evaluation over the `floats` table through SeaORM.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::records::{applicable, FilterField, FloatRecord, Predicate, StructuredFilters};
use crate::stores::{RelationalStore, StoreKind};
use async_trait::async_trait;
use sea_orm::sea_query::{Expr, Func, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, ConnAcquireErr, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tracing::{debug, instrument};

/// Relational store backed by the `floats` table
#[derive(Clone)]
pub struct FloatRepository {
    pool: DbPool,
    acquire_timeout_ms: u64,
}

impl FloatRepository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool, acquire_timeout_ms: u64) -> Self {
        Self {
            pool,
            acquire_timeout_ms,
        }
    }

    fn conn(&self) -> &DatabaseConnection {
        &self.pool.primary
    }

    fn map_err(&self, err: DbErr) -> AppError {
        map_db_err(err, self.acquire_timeout_ms)
    }
}

/// Pool-acquire timeouts become `StoreTimeout`, everything else `Store`
pub(crate) fn map_db_err(err: DbErr, acquire_timeout_ms: u64) -> AppError {
    match err {
        DbErr::ConnectionAcquire(ConnAcquireErr::Timeout) => AppError::StoreTimeout {
            store: StoreKind::Relational,
            timeout_ms: acquire_timeout_ms,
        },
        other => AppError::Store {
            store: StoreKind::Relational,
            message: other.to_string(),
        },
    }
}

fn column_for(field: FilterField) -> FloatColumn {
    match field {
        FilterField::RecordId => FloatColumn::RecordId,
        FilterField::PlatformNumber => FloatColumn::PlatformNumber,
        FilterField::Region => FloatColumn::Region,
        FilterField::DeployDate => FloatColumn::DeployDate,
        FilterField::Lat => FloatColumn::Lat,
        FilterField::Lon => FloatColumn::Lon,
    }
}

/// Translate applicable predicates into a SeaORM condition
pub(crate) fn build_condition(filters: &StructuredFilters) -> Condition {
    let mut condition = Condition::all();

    for (field, predicate) in applicable(filters) {
        let column = column_for(field);
        condition = match predicate {
            Predicate::Equals { value } => condition.add(column.eq(value)),
            Predicate::Contains { value } => condition.add(
                Expr::expr(Func::lower(Expr::col(column)))
                    .like(format!("%{}%", escape_like(&value.to_lowercase()))),
            ),
            Predicate::Range { min, max } => {
                let mut c = condition;
                if let Some(min) = min {
                    c = c.add(column.gte(min));
                }
                if let Some(max) = max {
                    c = c.add(column.lte(max));
                }
                c
            }
            Predicate::DateRange { from, to } => condition.add(column.between(from, to)),
        };
    }

    condition
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[async_trait]
impl RelationalStore for FloatRepository {
    #[instrument(skip(self, filters), fields(predicates = filters.len()))]
    async fn query(&self, filters: &StructuredFilters, top_k: usize) -> Result<Vec<FloatRecord>> {
        let rows = FloatEntity::find()
            .filter(build_condition(filters))
            .order_by_asc(FloatColumn::DeployDate)
            .order_by_asc(FloatColumn::RecordId)
            .limit(top_k as u64)
            .all(self.conn())
            .await
            .map_err(|e| self.map_err(e))?;

        debug!(rows = rows.len(), "Relational query complete");
        Ok(rows.into_iter().map(FloatRecord::from).collect())
    }

    async fn upsert(&self, record: &FloatRecord) -> Result<()> {
        let now = chrono::Utc::now();

        let model = FloatActiveModel {
            record_id: Set(record.record_id.clone()),
            platform_number: Set(record.platform_number.clone()),
            deploy_date: Set(record.deploy_date),
            region: Set(record.region.clone()),
            description: Set(record.description.clone()),
            notes: Set(record.notes.clone()),
            lat: Set(record.lat),
            lon: Set(record.lon),
            properties: Set(serde_json::Value::Object(record.properties.clone())),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        FloatEntity::insert(model)
            .on_conflict(
                OnConflict::column(FloatColumn::RecordId)
                    .update_columns([
                        FloatColumn::PlatformNumber,
                        FloatColumn::DeployDate,
                        FloatColumn::Region,
                        FloatColumn::Description,
                        FloatColumn::Notes,
                        FloatColumn::Lat,
                        FloatColumn::Lon,
                        FloatColumn::Properties,
                        FloatColumn::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.conn())
            .await
            .map_err(|e| self.map_err(e))?;

        Ok(())
    }

    async fn get(&self, record_id: &str) -> Result<Option<FloatRecord>> {
        FloatEntity::find_by_id(record_id.to_string())
            .one(self.conn())
            .await
            .map(|row| row.map(FloatRecord::from))
            .map_err(|e| self.map_err(e))
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        FloatEntity::find()
            .select_only()
            .column(FloatColumn::RecordId)
            .order_by_asc(FloatColumn::RecordId)
            .into_tuple::<String>()
            .all(self.conn())
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn count(&self) -> Result<u64> {
        FloatEntity::find()
            .count(self.conn())
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sea_orm::{DbBackend, QueryTrait};

    fn sql_for(filters: &StructuredFilters) -> String {
        FloatEntity::find()
            .filter(build_condition(filters))
            .build(DbBackend::Postgres)
            .to_string()
    }

    #[test]
    fn test_condition_for_date_and_region() {
        let mut filters = StructuredFilters::new();
        filters.insert(
            FilterField::DeployDate,
            Predicate::DateRange {
                from: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                to: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
            },
        );
        filters.insert(FilterField::Region, Predicate::Contains { value: "Pacific".into() });

        let sql = sql_for(&filters);
        assert!(sql.contains(r#""deploy_date" BETWEEN '2023-01-01' AND '2023-12-31'"#), "{sql}");
        assert!(sql.contains(r#"LOWER("region") LIKE '%pacific%'"#), "{sql}");
    }

    #[test]
    fn test_condition_skips_inapplicable() {
        let mut filters = StructuredFilters::new();
        filters.insert(FilterField::Lat, Predicate::Equals { value: "x".into() });
        filters.insert(FilterField::Lon, Predicate::Range { min: Some(-20.0), max: None });

        let sql = sql_for(&filters);
        assert!(!sql.contains("'x'"), "{sql}");
        assert!(sql.contains(r#""lon" >= -20"#), "{sql}");
    }

    #[test]
    fn test_acquire_timeout_maps_to_store_timeout() {
        let err = map_db_err(DbErr::ConnectionAcquire(ConnAcquireErr::Timeout), 5000);
        assert!(matches!(
            err,
            AppError::StoreTimeout { store: StoreKind::Relational, timeout_ms: 5000 }
        ));

        let err = map_db_err(DbErr::Custom("boom".into()), 5000);
        assert!(matches!(err, AppError::Store { store: StoreKind::Relational, .. }));
    }
}
