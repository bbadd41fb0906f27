//! Canonical SQLite store
//!
//! Source of truth for sensor, prediction and maintenance records. Content
//! hashes are unique; inserting the same content twice yields the existing id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, FromRow};
use tracing::{debug, info};

use super::{format_ts, parse_ts, DynamicUpdate, SqlValue};
use crate::domain::{
    ChainState, ChainStatus, ChainStatusUpdate, CommitmentHash, MaintenanceCompletion,
    MaintenanceRecord, NewMaintenanceRecord, NewPredictionRecord, NewSensorRecord,
    PredictionRecord, SensorReading, SensorRecord, StorageStatistics, StoredRecord,
};
use crate::infra::{LedgerError, RecordStore, Result};

const SENSOR_COLUMNS: &str = r#"
    id, data_hash, machine_id, timestamp, air_temperature, process_temperature,
    rotational_speed, torque, tool_wear, machine_type, submitter, chain_status,
    blockchain_proof_id, tx_hash, block_number, last_error, created_at
"#;

const PREDICTION_COLUMNS: &str = r#"
    id, prediction_hash, data_id, data_proof_id, prediction, probability,
    model_version, model_hash, predictor, timestamp, chain_status,
    blockchain_proof_id, tx_hash, block_number, last_error, created_at
"#;

pub(super) const MAINTENANCE_COLUMNS: &str = r#"
    id, task_hash, prediction_id, task_type, priority, task_description,
    assigned_engineer, timestamp, completed_at, completion_notes, is_completed, created_at
"#;

/// SQLite-backed canonical record store
pub struct SqliteCanonicalStore {
    pool: SqlitePool,
}

impl SqliteCanonicalStore {
    /// Create a store over an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database at `path`, creating it if needed
    pub async fn from_path(path: &str) -> Result<Self> {
        let pool = super::connect(path).await?;
        Ok(Self { pool })
    }

    /// Apply schema migrations
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_canonical(&self.pool)
            .await
            .map_err(|e| LedgerError::Configuration(format!("canonical migrations: {}", e)))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn sensor_id_by_hash(&self, hash: &CommitmentHash) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM sensor_data WHERE data_hash = ?")
            .bind(hash.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn prediction_id_by_hash(&self, hash: &CommitmentHash) -> Result<Option<i64>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM prediction_data WHERE prediction_hash = ?")
                .bind(hash.to_hex())
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    async fn maintenance_id_by_hash(&self, hash: &CommitmentHash) -> Result<Option<i64>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM maintenance_data WHERE task_hash = ?")
                .bind(hash.to_hex())
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(n as u64)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Status update shared by both canonical tables.
///
/// A failed attempt never downgrades a confirmed row.
fn status_update(table: &'static str, update: &ChainStatusUpdate) -> DynamicUpdate {
    let mut query = DynamicUpdate::new(table)
        .set("chain_status", update.status().as_str().to_string())
        .set("is_verified", i64::from(update.success))
        .set_some("tx_hash", update.tx_hash.clone())
        .set_some("blockchain_proof_id", update.proof_id.map(|p| p as i64))
        .set_some("block_number", update.block_number.map(|b| b as i64))
        .set("last_error", SqlValue::from(update.error.clone()))
        .set("updated_at", format_ts(Utc::now()))
        .filter("id = ?", vec![SqlValue::Int(update.record_id)]);
    if table == "sensor_data" {
        query = query.set_some("offchain_data_hash", update.commitment.map(|c| c.to_hex()));
    }
    if !update.success {
        query = query.guard("chain_status", "chain_status != 'onchain_success'");
    }
    query
}

#[async_trait]
impl RecordStore for SqliteCanonicalStore {
    fn name(&self) -> &'static str {
        "canonical"
    }

    async fn store_sensor(&self, record: &NewSensorRecord) -> Result<StoredRecord> {
        let r = &record.reading;
        let inserted = sqlx::query(
            r#"
            INSERT INTO sensor_data (
                data_hash, machine_id, timestamp,
                air_temperature, process_temperature, rotational_speed,
                torque, tool_wear, machine_type,
                submitter, chain_status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.commitment.to_hex())
        .bind(r.machine_id as i64)
        .bind(r.timestamp)
        .bind(r.air_temperature)
        .bind(r.process_temperature)
        .bind(i64::from(r.rotational_speed))
        .bind(r.torque)
        .bind(i64::from(r.tool_wear))
        .bind(r.machine_type.code())
        .bind(record.submitter.as_deref())
        .bind(ChainStatus::LocalOnly.as_str())
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(result) => {
                let id = result.last_insert_rowid();
                info!(record_id = id, hash = %record.commitment, "sensor record stored");
                Ok(StoredRecord {
                    id,
                    commitment: record.commitment,
                    created: true,
                })
            }
            Err(e) if is_unique_violation(&e) => {
                let id = self.sensor_id_by_hash(&record.commitment).await?.ok_or_else(|| {
                    LedgerError::Internal("unique violation without existing row".into())
                })?;
                debug!(record_id = id, hash = %record.commitment, "sensor record already stored");
                Ok(StoredRecord {
                    id,
                    commitment: record.commitment,
                    created: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn store_prediction(&self, record: &NewPredictionRecord) -> Result<StoredRecord> {
        let input = &record.input;
        let inserted = sqlx::query(
            r#"
            INSERT INTO prediction_data (
                prediction_hash, data_id, prediction, probability,
                model_version, model_hash, predictor, timestamp,
                chain_status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.content_hash.to_hex())
        .bind(input.sensor_record_id)
        .bind(i64::from(input.label))
        .bind(input.probability)
        .bind(&input.model_version)
        .bind(record.model_hash.to_hex())
        .bind(input.predictor.as_deref())
        .bind(input.timestamp)
        .bind(ChainStatus::LocalOnly.as_str())
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(result) => {
                let id = result.last_insert_rowid();
                info!(prediction_id = id, hash = %record.content_hash, "prediction record stored");
                Ok(StoredRecord {
                    id,
                    commitment: record.content_hash,
                    created: true,
                })
            }
            Err(e) if is_unique_violation(&e) => {
                let id = self
                    .prediction_id_by_hash(&record.content_hash)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::Internal("unique violation without existing row".into())
                    })?;
                Ok(StoredRecord {
                    id,
                    commitment: record.content_hash,
                    created: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_chain_status(&self, update: &ChainStatusUpdate) -> Result<bool> {
        let affected = status_update("sensor_data", update)
            .execute(&self.pool)
            .await?;
        Ok(affected > 0)
    }

    async fn update_prediction_status(&self, update: &ChainStatusUpdate) -> Result<bool> {
        let affected = status_update("prediction_data", update)
            .execute(&self.pool)
            .await?;
        Ok(affected > 0)
    }

    async fn set_prediction_reference(&self, prediction_id: i64, data_proof_id: u64) -> Result<()> {
        sqlx::query("UPDATE prediction_data SET data_proof_id = ?, updated_at = ? WHERE id = ?")
            .bind(data_proof_id as i64)
            .bind(format_ts(Utc::now()))
            .bind(prediction_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sensor_by_id(&self, id: i64) -> Result<Option<SensorRecord>> {
        let sql = format!("SELECT {} FROM sensor_data WHERE id = ?", SENSOR_COLUMNS);
        let row = sqlx::query_as::<_, SensorRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SensorRecord::try_from).transpose()
    }

    async fn sensor_by_hash(&self, hash: &CommitmentHash) -> Result<Option<SensorRecord>> {
        let sql = format!("SELECT {} FROM sensor_data WHERE data_hash = ?", SENSOR_COLUMNS);
        let row = sqlx::query_as::<_, SensorRow>(&sql)
            .bind(hash.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(SensorRecord::try_from).transpose()
    }

    async fn prediction_by_id(&self, id: i64) -> Result<Option<PredictionRecord>> {
        let sql = format!("SELECT {} FROM prediction_data WHERE id = ?", PREDICTION_COLUMNS);
        let row = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PredictionRecord::try_from).transpose()
    }

    async fn recent_sensors(
        &self,
        machine_id: Option<u64>,
        limit: u32,
    ) -> Result<Vec<SensorRecord>> {
        let sql = format!(
            "SELECT {} FROM sensor_data WHERE (?1 IS NULL OR machine_id = ?1) ORDER BY id DESC LIMIT ?2",
            SENSOR_COLUMNS
        );
        let rows = sqlx::query_as::<_, SensorRow>(&sql)
            .bind(machine_id.map(|m| m as i64))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SensorRecord::try_from).collect()
    }

    async fn statistics(&self) -> Result<StorageStatistics> {
        let by_machine_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT machine_type, COUNT(*) FROM sensor_data GROUP BY machine_type ORDER BY machine_type",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(StorageStatistics {
            sensor_records: self.count("SELECT COUNT(*) FROM sensor_data").await?,
            prediction_records: self.count("SELECT COUNT(*) FROM prediction_data").await?,
            confirmed: self
                .count("SELECT COUNT(*) FROM sensor_data WHERE chain_status = 'onchain_success'")
                .await?,
            failed: self
                .count("SELECT COUNT(*) FROM sensor_data WHERE chain_status = 'onchain_failed'")
                .await?,
            local_only: self
                .count("SELECT COUNT(*) FROM sensor_data WHERE chain_status = 'local_only'")
                .await?,
            maintenance_tasks: self.count("SELECT COUNT(*) FROM maintenance_data").await?,
            open_maintenance_tasks: self
                .count("SELECT COUNT(*) FROM maintenance_data WHERE is_completed = 0")
                .await?,
            by_machine_type: by_machine_type
                .into_iter()
                .map(|(t, n)| (t, n as u64))
                .collect(),
        })
    }

    async fn purge_unconfirmed(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff = format_ts(cutoff);
        let mut tx = self.pool.begin().await?;

        let predictions = sqlx::query(
            r#"
            DELETE FROM prediction_data
            WHERE chain_status != 'onchain_success'
              AND created_at < ?
              AND id NOT IN (SELECT prediction_id FROM maintenance_data)
            "#,
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let sensors = sqlx::query(
            r#"
            DELETE FROM sensor_data
            WHERE chain_status != 'onchain_success'
              AND created_at < ?
              AND id NOT IN (SELECT data_id FROM prediction_data)
            "#,
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        info!(predictions, sensors, "purged unconfirmed records");
        Ok(predictions + sensors)
    }

    async fn store_maintenance(&self, record: &NewMaintenanceRecord) -> Result<StoredRecord> {
        let input = &record.input;
        let inserted = sqlx::query(
            r#"
            INSERT INTO maintenance_data (
                task_hash, prediction_id, task_type, priority, task_description,
                assigned_engineer, timestamp, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.task_hash.to_hex())
        .bind(input.prediction_id)
        .bind(input.task_type.as_str())
        .bind(input.priority.as_str())
        .bind(&input.description)
        .bind(&input.assigned_engineer)
        .bind(input.timestamp)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(result) => {
                let id = result.last_insert_rowid();
                info!(task_id = id, hash = %record.task_hash, "maintenance task stored");
                Ok(StoredRecord {
                    id,
                    commitment: record.task_hash,
                    created: true,
                })
            }
            Err(e) if is_unique_violation(&e) => {
                let id = self
                    .maintenance_id_by_hash(&record.task_hash)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::Internal("unique violation without existing row".into())
                    })?;
                debug!(task_id = id, hash = %record.task_hash, "maintenance task already stored");
                Ok(StoredRecord {
                    id,
                    commitment: record.task_hash,
                    created: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn complete_maintenance(&self, completion: &MaintenanceCompletion) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE maintenance_data
            SET is_completed = 1, completed_at = ?, completion_notes = ?, updated_at = ?
            WHERE task_hash = ? AND is_completed = 0
            "#,
        )
        .bind(completion.completed_at)
        .bind(completion.notes.as_deref())
        .bind(format_ts(Utc::now()))
        .bind(completion.task_hash.to_hex())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn maintenance_by_hash(
        &self,
        hash: &CommitmentHash,
    ) -> Result<Option<MaintenanceRecord>> {
        let sql = format!(
            "SELECT {} FROM maintenance_data WHERE task_hash = ?",
            MAINTENANCE_COLUMNS
        );
        let row = sqlx::query_as::<_, MaintenanceRow>(&sql)
            .bind(hash.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(MaintenanceRecord::try_from).transpose()
    }

    async fn maintenance_for_prediction(
        &self,
        prediction_id: i64,
    ) -> Result<Vec<MaintenanceRecord>> {
        let sql = format!(
            "SELECT {} FROM maintenance_data WHERE prediction_id = ? ORDER BY id",
            MAINTENANCE_COLUMNS
        );
        let rows = sqlx::query_as::<_, MaintenanceRow>(&sql)
            .bind(prediction_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(MaintenanceRecord::try_from).collect()
    }
}

/// Raw row from sensor_data
#[derive(Debug, FromRow)]
struct SensorRow {
    id: i64,
    data_hash: String,
    machine_id: i64,
    timestamp: i64,
    air_temperature: f64,
    process_temperature: f64,
    rotational_speed: i64,
    torque: f64,
    tool_wear: i64,
    machine_type: String,
    submitter: Option<String>,
    chain_status: String,
    blockchain_proof_id: Option<i64>,
    tx_hash: Option<String>,
    block_number: Option<i64>,
    last_error: Option<String>,
    created_at: String,
}

impl TryFrom<SensorRow> for SensorRecord {
    type Error = LedgerError;

    fn try_from(row: SensorRow) -> Result<Self> {
        let commitment = row
            .data_hash
            .parse()
            .map_err(|e| LedgerError::Internal(format!("Invalid data_hash: {}", e)))?;
        let machine_type = row.machine_type.parse().map_err(LedgerError::Internal)?;
        let status = row.chain_status.parse().map_err(LedgerError::Internal)?;

        Ok(SensorRecord {
            id: row.id,
            reading: SensorReading {
                machine_id: row.machine_id as u64,
                timestamp: row.timestamp,
                air_temperature: row.air_temperature,
                process_temperature: row.process_temperature,
                rotational_speed: row.rotational_speed as u32,
                torque: row.torque,
                tool_wear: row.tool_wear as u32,
                machine_type,
            },
            commitment,
            submitter: row.submitter,
            chain: ChainState {
                status,
                tx_hash: row.tx_hash,
                proof_id: row.blockchain_proof_id.map(|p| p as u64),
                block_number: row.block_number.map(|b| b as u64),
                last_error: row.last_error,
            },
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

/// Raw row from prediction_data
#[derive(Debug, FromRow)]
struct PredictionRow {
    id: i64,
    prediction_hash: String,
    data_id: i64,
    data_proof_id: Option<i64>,
    prediction: i64,
    probability: f64,
    model_version: String,
    model_hash: String,
    predictor: Option<String>,
    timestamp: i64,
    chain_status: String,
    blockchain_proof_id: Option<i64>,
    tx_hash: Option<String>,
    block_number: Option<i64>,
    last_error: Option<String>,
    created_at: String,
}

impl TryFrom<PredictionRow> for PredictionRecord {
    type Error = LedgerError;

    fn try_from(row: PredictionRow) -> Result<Self> {
        Ok(PredictionRecord {
            id: row.id,
            sensor_record_id: row.data_id,
            data_proof_id: row.data_proof_id.map(|p| p as u64),
            label: row.prediction as u8,
            probability: row.probability,
            model_version: row.model_version,
            model_hash: row
                .model_hash
                .parse()
                .map_err(|e| LedgerError::Internal(format!("Invalid model_hash: {}", e)))?,
            content_hash: row
                .prediction_hash
                .parse()
                .map_err(|e| LedgerError::Internal(format!("Invalid prediction_hash: {}", e)))?,
            predictor: row.predictor,
            timestamp: row.timestamp,
            chain: ChainState {
                status: row.chain_status.parse().map_err(LedgerError::Internal)?,
                tx_hash: row.tx_hash,
                proof_id: row.blockchain_proof_id.map(|p| p as u64),
                block_number: row.block_number.map(|b| b as u64),
                last_error: row.last_error,
            },
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

/// Raw row from maintenance_data, shared with the display mirror
#[derive(Debug, FromRow)]
pub(super) struct MaintenanceRow {
    id: i64,
    task_hash: String,
    prediction_id: Option<i64>,
    task_type: Option<String>,
    priority: Option<String>,
    task_description: Option<String>,
    assigned_engineer: Option<String>,
    timestamp: Option<i64>,
    completed_at: Option<i64>,
    completion_notes: Option<String>,
    is_completed: Option<i64>,
    created_at: Option<String>,
}

impl TryFrom<MaintenanceRow> for MaintenanceRecord {
    type Error = LedgerError;

    fn try_from(row: MaintenanceRow) -> Result<Self> {
        Ok(MaintenanceRecord {
            id: row.id,
            prediction_id: row.prediction_id.unwrap_or_default(),
            task_type: row
                .task_type
                .as_deref()
                .unwrap_or("preventive")
                .parse()
                .map_err(LedgerError::Internal)?,
            priority: row
                .priority
                .as_deref()
                .unwrap_or("medium")
                .parse()
                .map_err(LedgerError::Internal)?,
            description: row.task_description.unwrap_or_default(),
            assigned_engineer: row.assigned_engineer.unwrap_or_default(),
            timestamp: row.timestamp.unwrap_or_default(),
            task_hash: row
                .task_hash
                .parse()
                .map_err(|e| LedgerError::Internal(format!("Invalid task_hash: {}", e)))?,
            completed_at: row.completed_at,
            completion_notes: row.completion_notes,
            is_completed: row.is_completed.unwrap_or_default() != 0,
            created_at: match row.created_at.as_deref() {
                Some(ts) => parse_ts(ts)?,
                None => DateTime::<Utc>::default(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        MachineType, MaintenanceInput, MaintenancePriority, MaintenanceTaskType, PredictionInput,
    };
    use crate::infra::sqlite::memory_pool;

    async fn create_test_store() -> SqliteCanonicalStore {
        let store = SqliteCanonicalStore::new(memory_pool().await);
        store.initialize().await.unwrap();
        store
    }

    fn sensor_record(hash_byte: u8) -> NewSensorRecord {
        NewSensorRecord {
            reading: SensorReading::new(
                7,
                1_700_000_000,
                298.1,
                308.6,
                1551,
                42.8,
                0,
                MachineType::Medium,
            ),
            commitment: CommitmentHash([hash_byte; 32]),
            submitter: Some("0xabc".into()),
        }
    }

    #[tokio::test]
    async fn test_store_sensor_is_idempotent() {
        let store = create_test_store().await;

        let first = store.store_sensor(&sensor_record(1)).await.unwrap();
        let second = store.store_sensor(&sensor_record(1)).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.statistics().await.unwrap().sensor_records, 1);
    }

    #[tokio::test]
    async fn test_lookup_by_id_and_hash() {
        let store = create_test_store().await;
        let stored = store.store_sensor(&sensor_record(2)).await.unwrap();

        let by_id = store.sensor_by_id(stored.id).await.unwrap().unwrap();
        let by_hash = store
            .sensor_by_hash(&CommitmentHash([2; 32]))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(by_id, by_hash);
        assert_eq!(by_id.reading.machine_type, MachineType::Medium);
        assert_eq!(by_id.chain.status, ChainStatus::LocalOnly);
        assert!(store.sensor_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_rows_with_sqlite_timestamps() {
        let store = create_test_store().await;
        sqlx::query(
            r#"
            INSERT INTO sensor_data (
                data_hash, machine_id, timestamp, air_temperature, process_temperature,
                rotational_speed, torque, tool_wear, machine_type, created_at
            ) VALUES (?, 7, 1700000000, 298.1, 308.6, 1551, 42.8, 0, 'M', CURRENT_TIMESTAMP)
            "#,
        )
        .bind(CommitmentHash([4; 32]).to_hex())
        .execute(store.pool())
        .await
        .unwrap();

        let record = store
            .sensor_by_hash(&CommitmentHash([4; 32]))
            .await
            .unwrap()
            .unwrap();
        assert!(Utc::now() - record.created_at < chrono::Duration::minutes(5));
        assert_eq!(store.recent_sensors(Some(7), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_does_not_downgrade_confirmed() {
        let store = create_test_store().await;
        let stored = store.store_sensor(&sensor_record(3)).await.unwrap();

        let confirmed = ChainStatusUpdate {
            record_id: stored.id,
            success: true,
            tx_hash: Some("0xfeed".into()),
            proof_id: Some(12),
            block_number: Some(100),
            commitment: Some(stored.commitment),
            error: None,
        };
        assert!(store.update_chain_status(&confirmed).await.unwrap());

        let failed = ChainStatusUpdate {
            success: false,
            tx_hash: None,
            proof_id: None,
            block_number: None,
            error: Some("data_hash_already_used".into()),
            ..confirmed.clone()
        };
        assert!(!store.update_chain_status(&failed).await.unwrap());

        let record = store.sensor_by_id(stored.id).await.unwrap().unwrap();
        assert_eq!(record.chain.status, ChainStatus::OnchainSuccess);
        assert_eq!(record.chain.confirmed_proof_id(), Some(12));
    }

    #[tokio::test]
    async fn test_update_tolerates_missing_optional_columns() {
        let pool = memory_pool().await;
        sqlx::query(
            r#"
            CREATE TABLE sensor_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data_hash TEXT NOT NULL UNIQUE,
                chain_status TEXT NOT NULL DEFAULT 'local_only',
                tx_hash TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO sensor_data (data_hash) VALUES ('0x01')")
            .execute(&pool)
            .await
            .unwrap();

        let store = SqliteCanonicalStore::new(pool);
        let update = ChainStatusUpdate {
            record_id: 1,
            success: true,
            tx_hash: Some("0xbeef".into()),
            proof_id: Some(3),
            block_number: Some(9),
            commitment: Some(CommitmentHash([1; 32])),
            error: None,
        };
        assert!(store.update_chain_status(&update).await.unwrap());

        let (status, tx): (String, String) =
            sqlx::query_as("SELECT chain_status, tx_hash FROM sensor_data WHERE id = 1")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(status, "onchain_success");
        assert_eq!(tx, "0xbeef");
    }

    #[tokio::test]
    async fn test_prediction_store_and_reference() {
        let store = create_test_store().await;
        let sensor = store.store_sensor(&sensor_record(4)).await.unwrap();

        let record = NewPredictionRecord {
            input: PredictionInput {
                sensor_record_id: sensor.id,
                label: 1,
                probability: 0.91,
                model_version: "rf-v2".into(),
                timestamp: 1_700_000_500,
                predictor: None,
            },
            sensor_commitment: Some(sensor.commitment),
            model_hash: CommitmentHash([5; 32]),
            content_hash: CommitmentHash([6; 32]),
        };
        let first = store.store_prediction(&record).await.unwrap();
        let again = store.store_prediction(&record).await.unwrap();
        assert_eq!(first.id, again.id);
        assert!(!again.created);

        store.set_prediction_reference(first.id, 44).await.unwrap();
        let loaded = store.prediction_by_id(first.id).await.unwrap().unwrap();
        assert_eq!(loaded.data_proof_id, Some(44));
        assert_eq!(loaded.sensor_record_id, sensor.id);
        assert_eq!(loaded.label, 1);
    }

    async fn stored_prediction(store: &SqliteCanonicalStore, byte: u8) -> StoredRecord {
        let sensor = store.store_sensor(&sensor_record(byte)).await.unwrap();
        store
            .store_prediction(&NewPredictionRecord {
                input: PredictionInput {
                    sensor_record_id: sensor.id,
                    label: 1,
                    probability: 0.8,
                    model_version: "rf-v2".into(),
                    timestamp: 1_700_000_500,
                    predictor: None,
                },
                sensor_commitment: Some(sensor.commitment),
                model_hash: CommitmentHash([5; 32]),
                content_hash: CommitmentHash([byte.wrapping_add(100); 32]),
            })
            .await
            .unwrap()
    }

    fn maintenance(prediction_id: i64, hash_byte: u8) -> NewMaintenanceRecord {
        NewMaintenanceRecord {
            input: MaintenanceInput {
                prediction_id,
                task_type: MaintenanceTaskType::Preventive,
                priority: MaintenancePriority::Critical,
                description: "swap cutting tool".into(),
                assigned_engineer: "night shift".into(),
                timestamp: 1_700_000_900,
            },
            task_hash: CommitmentHash([hash_byte; 32]),
        }
    }

    #[tokio::test]
    async fn test_maintenance_store_complete_and_list() {
        let store = create_test_store().await;
        let prediction = stored_prediction(&store, 20).await;

        let first = store.store_maintenance(&maintenance(prediction.id, 30)).await.unwrap();
        let again = store.store_maintenance(&maintenance(prediction.id, 30)).await.unwrap();
        assert!(first.created);
        assert_eq!(first.id, again.id);
        assert!(!again.created);

        let completion = MaintenanceCompletion {
            task_hash: CommitmentHash([30; 32]),
            completed_at: 1_700_001_000,
            notes: Some("tool replaced".into()),
        };
        assert!(store.complete_maintenance(&completion).await.unwrap());
        // an already closed task keeps its first completion
        let late = MaintenanceCompletion {
            completed_at: 1_700_009_999,
            ..completion.clone()
        };
        assert!(!store.complete_maintenance(&late).await.unwrap());

        let tasks = store.maintenance_for_prediction(prediction.id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].is_completed);
        assert_eq!(tasks[0].completed_at, Some(1_700_001_000));
        assert_eq!(tasks[0].priority, MaintenancePriority::Critical);
        assert_eq!(tasks[0].completion_notes.as_deref(), Some("tool replaced"));

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.maintenance_tasks, 1);
        assert_eq!(stats.open_maintenance_tasks, 0);
    }

    #[tokio::test]
    async fn test_purge_keeps_predictions_with_maintenance() {
        let store = create_test_store().await;
        let with_task = stored_prediction(&store, 40).await;
        let without_task = stored_prediction(&store, 41).await;
        store.store_maintenance(&maintenance(with_task.id, 42)).await.unwrap();

        // one prediction plus its sensor row go; the tasked prediction and its sensor stay
        let purged = store
            .purge_unconfirmed(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 2);
        assert!(store.prediction_by_id(with_task.id).await.unwrap().is_some());
        assert!(store.prediction_by_id(without_task.id).await.unwrap().is_none());
        assert_eq!(store.maintenance_for_prediction(with_task.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_keeps_confirmed_and_recent() {
        let store = create_test_store().await;
        let keep = store.store_sensor(&sensor_record(7)).await.unwrap();
        store.store_sensor(&sensor_record(8)).await.unwrap();

        store
            .update_chain_status(&ChainStatusUpdate {
                record_id: keep.id,
                success: true,
                tx_hash: Some("0x1".into()),
                proof_id: Some(1),
                block_number: None,
                commitment: None,
                error: None,
            })
            .await
            .unwrap();

        // nothing is older than an hour ago
        let purged = store
            .purge_unconfirmed(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(purged, 0);

        let purged = store
            .purge_unconfirmed(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.sensor_by_id(keep.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_recent_sensors_filters_by_machine() {
        let store = create_test_store().await;
        store.store_sensor(&sensor_record(9)).await.unwrap();
        let mut other = sensor_record(10);
        other.reading.machine_id = 99;
        store.store_sensor(&other).await.unwrap();

        assert_eq!(store.recent_sensors(None, 10).await.unwrap().len(), 2);
        let only = store.recent_sensors(Some(99), 10).await.unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].reading.machine_id, 99);
    }
}
