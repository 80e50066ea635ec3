//! Diesel-based geo record repository.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::models::{GeoRecordRecord, NewGeoRecord};
use super::pool::{DbPool, DieselError};
use super::util::{invalid_column, json_error};
use super::parse_datetime;
use crate::models::{generate_serial, GeoRecord, NormalizedRecord, RecordKind, WorkerType};
use crate::schema::geo_records;
use crate::with_conn;

/// Convert a database record to a domain model.
impl TryFrom<GeoRecordRecord> for GeoRecord {
    type Error = DieselError;

    fn try_from(record: GeoRecordRecord) -> Result<Self, Self::Error> {
        Ok(GeoRecord {
            id: record.id,
            kind: RecordKind::from_str(&record.kind)
                .ok_or_else(|| invalid_column("record kind", &record.kind))?,
            external_id: record.external_id,
            serial: record.serial,
            latitude: record.latitude,
            longitude: record.longitude,
            category: record.category,
            name: record.name,
            measure: record.measure,
            attributes: serde_json::from_str(&record.attributes).map_err(json_error)?,
            scraper_type: WorkerType::from_str(&record.scraper_type)
                .ok_or_else(|| invalid_column("scraper_type", &record.scraper_type))?,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        })
    }
}

/// Rows written by one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: i64,
    pub updated: i64,
}

/// Diesel-based geo record repository.
#[derive(Clone)]
pub struct DieselGeoRecordRepository {
    pool: DbPool,
}

impl DieselGeoRecordRepository {
    /// Create a new repository with an existing pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upsert a batch inside one transaction.
    ///
    /// Existing records keyed by `(kind, external_id)` get their mutable
    /// fields overwritten; the serial is never touched. New records get a
    /// fresh serial. Any failure rolls the whole batch back.
    pub async fn upsert_batch(
        &self,
        scraper_type: WorkerType,
        records: &[NormalizedRecord],
    ) -> Result<BatchOutcome, DieselError> {
        let now = Utc::now();
        let timestamp = now.to_rfc3339();
        let prepared = records
            .iter()
            .map(|r| serde_json::to_string(&r.attributes).map(|attrs| (r, attrs)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(json_error)?;

        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let mut outcome = BatchOutcome::default();

                    for (record, attributes) in &prepared {
                        let kind = record.kind.as_str();
                        let existing: Option<i32> = geo_records::table
                            .filter(geo_records::kind.eq(kind))
                            .filter(geo_records::external_id.eq(&record.external_id))
                            .select(geo_records::id)
                            .first(conn)
                            .await
                            .optional()?;

                        match existing {
                            Some(id) => {
                                diesel::update(geo_records::table.find(id))
                                    .set((
                                        geo_records::latitude.eq(record.latitude),
                                        geo_records::longitude.eq(record.longitude),
                                        geo_records::category.eq(&record.category),
                                        geo_records::name.eq(record.name.as_deref()),
                                        geo_records::measure.eq(record.measure),
                                        geo_records::attributes.eq(attributes),
                                        geo_records::scraper_type.eq(scraper_type.as_str()),
                                        geo_records::updated_at.eq(&timestamp),
                                    ))
                                    .execute(conn)
                                    .await?;
                                outcome.updated += 1;
                            }
                            None => {
                                let serial = generate_serial(record.kind, now);
                                diesel::insert_into(geo_records::table)
                                    .values(&NewGeoRecord {
                                        kind,
                                        external_id: &record.external_id,
                                        serial: &serial,
                                        latitude: record.latitude,
                                        longitude: record.longitude,
                                        category: &record.category,
                                        name: record.name.as_deref(),
                                        measure: record.measure,
                                        attributes,
                                        scraper_type: scraper_type.as_str(),
                                        created_at: &timestamp,
                                        updated_at: &timestamp,
                                    })
                                    .execute(conn)
                                    .await?;
                                outcome.inserted += 1;
                            }
                        }
                    }

                    Ok::<_, DieselError>(outcome)
                })
            })
            .await
        })
    }

    /// Get a record by its upsert identity.
    pub async fn get_by_external_id(
        &self,
        kind: RecordKind,
        external_id: &str,
    ) -> Result<Option<GeoRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            geo_records::table
                .filter(geo_records::kind.eq(kind.as_str()))
                .filter(geo_records::external_id.eq(external_id))
                .select(GeoRecordRecord::as_select())
                .first::<GeoRecordRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(GeoRecord::try_from).transpose())
        })
    }

    /// Records of a kind whose position falls inside a bounding box.
    pub async fn within_bounds(
        &self,
        kind: RecordKind,
        south: f64,
        west: f64,
        north: f64,
        east: f64,
    ) -> Result<Vec<GeoRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            geo_records::table
                .filter(geo_records::kind.eq(kind.as_str()))
                .filter(geo_records::latitude.between(south, north))
                .filter(geo_records::longitude.between(west, east))
                .select(GeoRecordRecord::as_select())
                .load::<GeoRecordRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(GeoRecord::try_from).collect())
        })
    }

    /// List records of a kind, newest first.
    pub async fn list(&self, kind: RecordKind, limit: i64) -> Result<Vec<GeoRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            geo_records::table
                .filter(geo_records::kind.eq(kind.as_str()))
                .order(geo_records::id.desc())
                .limit(limit)
                .select(GeoRecordRecord::as_select())
                .load::<GeoRecordRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(GeoRecord::try_from).collect())
        })
    }

    /// Count records of a kind.
    pub async fn count(&self, kind: RecordKind) -> Result<i64, DieselError> {
        with_conn!(self.pool, conn, {
            geo_records::table
                .filter(geo_records::kind.eq(kind.as_str()))
                .count()
                .get_result(&mut conn)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::migrations::run_migrations;
    use tempfile::tempdir;

    async fn setup_test_db() -> (DieselGeoRecordRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db_url = db_path.display().to_string();
        run_migrations(&db_url).await.unwrap();
        (DieselGeoRecordRepository::new(DbPool::new(&db_url)), dir)
    }

    fn crossing(external_id: &str, latitude: f64, category: &str) -> NormalizedRecord {
        NormalizedRecord {
            kind: RecordKind::Crossing,
            external_id: external_id.to_string(),
            latitude,
            longitude: -104.991,
            category: category.to_string(),
            name: None,
            measure: None,
            attributes: serde_json::json!({"railway": "level_crossing"}),
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_serial() {
        let (repo, _dir) = setup_test_db().await;

        let first = repo
            .upsert_batch(WorkerType::Crossings, &[crossing("node/1", 39.739, "gated")])
            .await
            .unwrap();
        assert_eq!(first, BatchOutcome { inserted: 1, updated: 0 });
        let stored = repo
            .get_by_external_id(RecordKind::Crossing, "node/1")
            .await
            .unwrap()
            .unwrap();

        let second = repo
            .upsert_batch(WorkerType::Crossings, &[crossing("node/1", 39.741, "signaled")])
            .await
            .unwrap();
        assert_eq!(second, BatchOutcome { inserted: 0, updated: 1 });

        let updated = repo
            .get_by_external_id(RecordKind::Crossing, "node/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.serial, stored.serial);
        assert_eq!(updated.id, stored.id);
        assert_eq!(updated.category, "signaled");
        assert_eq!(updated.latitude, 39.741);
        assert_eq!(repo.count(RecordKind::Crossing).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_external_ids_are_scoped_by_kind() {
        let (repo, _dir) = setup_test_db().await;
        let mut poi = crossing("node/7", 39.739, "fuel_station");
        poi.kind = RecordKind::Poi;

        repo.upsert_batch(WorkerType::Crossings, &[crossing("node/7", 39.739, "gated")])
            .await
            .unwrap();
        repo.upsert_batch(WorkerType::Poi, &[poi]).await.unwrap();

        assert_eq!(repo.count(RecordKind::Crossing).await.unwrap(), 1);
        assert_eq!(repo.count(RecordKind::Poi).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_within_bounds() {
        let (repo, _dir) = setup_test_db().await;
        repo.upsert_batch(
            WorkerType::Crossings,
            &[crossing("node/1", 39.5, "gated"), crossing("node/2", 41.5, "gated")],
        )
        .await
        .unwrap();

        let found = repo
            .within_bounds(RecordKind::Crossing, 39.0, -105.5, 40.0, -104.5)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].external_id, "node/1");
    }
}
