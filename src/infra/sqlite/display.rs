//! Display mirror store
//!
//! A flattened, read-optimized copy of sensor rows (with the latest prediction
//! folded in) consumed by dashboards, plus a copy of maintenance tasks. Rows
//! are located by `data_hash` or `task_hash`; ids are local to this database
//! and unrelated to canonical ids.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, FromRow};
use tracing::{debug, warn};

use super::canonical::{MaintenanceRow, MAINTENANCE_COLUMNS};
use super::{format_ts, parse_ts, table_columns, DynamicUpdate, SqlValue};
use crate::domain::{
    ChainState, ChainStatus, ChainStatusUpdate, CommitmentHash, MachineType,
    MaintenanceCompletion, MaintenanceRecord, NewMaintenanceRecord, NewPredictionRecord,
    NewSensorRecord, PredictionRecord, SensorReading, SensorRecord, StorageStatistics,
    StoredRecord,
};
use crate::infra::{LedgerError, RecordStore, Result};

/// Columns added after the first release, with their SQL types
const OPTIONAL_COLUMNS: &[(&str, &str)] = &[
    ("prediction", "INTEGER"),
    ("prediction_probability", "REAL"),
    ("prediction_reason", "TEXT"),
    ("analysis_time", "TEXT"),
    ("data_hash", "TEXT"),
    ("offchain_data_hash", "TEXT"),
    ("tx_hash", "TEXT"),
    ("zk_proof_hash", "TEXT"),
    ("blockchain_success", "INTEGER DEFAULT 0"),
    ("blockchain_tx_hash", "TEXT"),
    ("blockchain_proof_id", "INTEGER"),
    ("blockchain_error", "TEXT"),
    ("prediction_tx_hash", "TEXT"),
    ("prediction_proof_id", "INTEGER"),
    ("created_at", "TEXT"),
];

const DISPLAY_COLUMNS: &str = r#"
    id, machine_id, timestamp, air_temp, process_temp, rotation_speed, torque,
    tool_wear, machine_type, data_hash, blockchain_success, blockchain_tx_hash,
    blockchain_proof_id, blockchain_error, created_at
"#;

/// SQLite-backed display mirror
pub struct SqliteDisplayStore {
    pool: SqlitePool,
}

impl SqliteDisplayStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn from_path(path: &str) -> Result<Self> {
        let pool = super::connect(path).await?;
        Ok(Self { pool })
    }

    /// Apply migrations, then add any optional column a legacy table lacks
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_display(&self.pool)
            .await
            .map_err(|e| LedgerError::Configuration(format!("display migrations: {}", e)))?;
        self.reconcile_columns().await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_display_data_hash ON sensor_data (data_hash)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Add missing optional columns. Individual failures are logged, not raised.
    pub async fn reconcile_columns(&self) -> Result<Vec<&'static str>> {
        let existing = table_columns(&self.pool, "sensor_data").await?;
        let mut added = Vec::new();
        for (column, sql_type) in OPTIONAL_COLUMNS {
            if existing.contains(*column) {
                continue;
            }
            let ddl = format!("ALTER TABLE sensor_data ADD COLUMN {} {}", column, sql_type);
            match sqlx::query(&ddl).execute(&self.pool).await {
                Ok(_) => {
                    debug!(column, "display column added");
                    added.push(*column);
                }
                Err(e) => warn!(column, error = %e, "could not add display column"),
            }
        }
        Ok(added)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn id_by_hash(&self, hash: &CommitmentHash) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM sensor_data WHERE data_hash = ?1 OR offchain_data_hash = ?1 ORDER BY id LIMIT 1",
        )
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

/// Row filter by commitment, using whichever hash columns the table has
async fn hash_filter(pool: &SqlitePool, hash: &CommitmentHash) -> Result<(String, Vec<SqlValue>)> {
    let columns = table_columns(pool, "sensor_data").await?;
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    for column in ["offchain_data_hash", "data_hash"] {
        if columns.contains(column) {
            clauses.push(format!("{} = ?", column));
            values.push(SqlValue::Text(hash.to_hex()));
        }
    }
    if clauses.is_empty() {
        return Err(LedgerError::Internal(
            "display table has no hash column".into(),
        ));
    }
    Ok((format!("({})", clauses.join(" OR ")), values))
}

#[async_trait]
impl RecordStore for SqliteDisplayStore {
    fn name(&self) -> &'static str {
        "display"
    }

    async fn store_sensor(&self, record: &NewSensorRecord) -> Result<StoredRecord> {
        if let Some(id) = self.id_by_hash(&record.commitment).await? {
            return Ok(StoredRecord {
                id,
                commitment: record.commitment,
                created: false,
            });
        }

        let r = &record.reading;
        let result = sqlx::query(
            r#"
            INSERT INTO sensor_data (
                machine_id, timestamp, air_temp, process_temp, rotation_speed,
                torque, tool_wear, machine_type, data_hash, offchain_data_hash,
                blockchain_success, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(r.machine_id as i64)
        .bind(r.timestamp)
        .bind(r.air_temperature)
        .bind(r.process_temperature)
        .bind(i64::from(r.rotational_speed))
        .bind(r.torque)
        .bind(i64::from(r.tool_wear))
        .bind(r.machine_type.code())
        .bind(record.commitment.to_hex())
        .bind(record.commitment.to_hex())
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(StoredRecord {
            id: result.last_insert_rowid(),
            commitment: record.commitment,
            created: true,
        })
    }

    /// Fold the prediction into the referenced sensor row
    async fn store_prediction(&self, record: &NewPredictionRecord) -> Result<StoredRecord> {
        let sensor_hash = record.sensor_commitment.ok_or_else(|| {
            LedgerError::Validation("display mirror needs the sensor commitment".into())
        })?;
        let id = self
            .id_by_hash(&sensor_hash)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("display row for {}", sensor_hash)))?;

        let reason = format!(
            "model {} probability {:.4}",
            record.input.model_version, record.input.probability
        );
        DynamicUpdate::new("sensor_data")
            .set("prediction", i64::from(record.input.label))
            .set("prediction_probability", SqlValue::Real(record.input.probability))
            .set("prediction_reason", reason)
            .set("analysis_time", format_ts(Utc::now()))
            .filter("id = ?", vec![SqlValue::Int(id)])
            .execute(&self.pool)
            .await?;

        Ok(StoredRecord {
            id,
            commitment: record.content_hash,
            created: true,
        })
    }

    async fn update_chain_status(&self, update: &ChainStatusUpdate) -> Result<bool> {
        let Some(hash) = update.commitment else {
            return Ok(false);
        };
        let (clause, values) = hash_filter(&self.pool, &hash).await?;
        let mut query = DynamicUpdate::new("sensor_data")
            .set("blockchain_success", i64::from(update.success))
            .set_some("blockchain_tx_hash", update.tx_hash.clone())
            .set_some("tx_hash", update.tx_hash.clone())
            .set_some("blockchain_proof_id", update.proof_id.map(|p| p as i64))
            .set("offchain_data_hash", hash.to_hex())
            .set("blockchain_error", SqlValue::from(update.error.clone()))
            .filter(clause, values);
        if !update.success {
            query = query.guard(
                "blockchain_success",
                "(blockchain_success IS NULL OR blockchain_success = 0)",
            );
        }
        Ok(query.execute(&self.pool).await? > 0)
    }

    /// Keyed by the sensor commitment of the row the prediction was folded into
    async fn update_prediction_status(&self, update: &ChainStatusUpdate) -> Result<bool> {
        let Some(hash) = update.commitment else {
            return Ok(false);
        };
        if !update.success {
            return Ok(false);
        }
        let (clause, values) = hash_filter(&self.pool, &hash).await?;
        let affected = DynamicUpdate::new("sensor_data")
            .set_some("prediction_tx_hash", update.tx_hash.clone())
            .set_some("prediction_proof_id", update.proof_id.map(|p| p as i64))
            .filter(clause, values)
            .execute(&self.pool)
            .await?;
        Ok(affected > 0)
    }

    /// No-op: the display schema folds predictions into `sensor_data` and keeps
    /// no prediction rows to reference.
    async fn set_prediction_reference(&self, _prediction_id: i64, _data_proof_id: u64) -> Result<()> {
        Ok(())
    }

    async fn sensor_by_id(&self, id: i64) -> Result<Option<SensorRecord>> {
        let sql = format!("SELECT {} FROM sensor_data WHERE id = ?", DISPLAY_COLUMNS);
        let row = sqlx::query_as::<_, DisplayRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SensorRecord::try_from).transpose()
    }

    async fn sensor_by_hash(&self, hash: &CommitmentHash) -> Result<Option<SensorRecord>> {
        let sql = format!(
            "SELECT {} FROM sensor_data WHERE data_hash = ?1 OR offchain_data_hash = ?1 ORDER BY id LIMIT 1",
            DISPLAY_COLUMNS
        );
        let row = sqlx::query_as::<_, DisplayRow>(&sql)
            .bind(hash.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(SensorRecord::try_from).transpose()
    }

    /// Always `None`: predictions are folded into `sensor_data` rows and have no
    /// id of their own here.
    async fn prediction_by_id(&self, _id: i64) -> Result<Option<PredictionRecord>> {
        Ok(None)
    }

    async fn recent_sensors(
        &self,
        machine_id: Option<u64>,
        limit: u32,
    ) -> Result<Vec<SensorRecord>> {
        let sql = format!(
            "SELECT {} FROM sensor_data WHERE (?1 IS NULL OR machine_id = ?1) ORDER BY id DESC LIMIT ?2",
            DISPLAY_COLUMNS
        );
        let rows = sqlx::query_as::<_, DisplayRow>(&sql)
            .bind(machine_id.map(|m| m as i64))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SensorRecord::try_from).collect()
    }

    async fn statistics(&self) -> Result<StorageStatistics> {
        let by_machine_type: Vec<(Option<String>, i64)> = sqlx::query_as(
            "SELECT machine_type, COUNT(*) FROM sensor_data GROUP BY machine_type ORDER BY machine_type",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(StorageStatistics {
            sensor_records: self.count("SELECT COUNT(*) FROM sensor_data").await?,
            prediction_records: self
                .count("SELECT COUNT(*) FROM sensor_data WHERE prediction IS NOT NULL")
                .await?,
            confirmed: self
                .count("SELECT COUNT(*) FROM sensor_data WHERE blockchain_success = 1")
                .await?,
            failed: self
                .count(
                    "SELECT COUNT(*) FROM sensor_data WHERE COALESCE(blockchain_success, 0) = 0 AND blockchain_error IS NOT NULL",
                )
                .await?,
            local_only: self
                .count(
                    "SELECT COUNT(*) FROM sensor_data WHERE COALESCE(blockchain_success, 0) = 0 AND blockchain_error IS NULL",
                )
                .await?,
            maintenance_tasks: self.count("SELECT COUNT(*) FROM maintenance_data").await?,
            open_maintenance_tasks: self
                .count("SELECT COUNT(*) FROM maintenance_data WHERE COALESCE(is_completed, 0) = 0")
                .await?,
            by_machine_type: by_machine_type
                .into_iter()
                .map(|(t, n)| (t.unwrap_or_default(), n as u64))
                .collect(),
        })
    }

    async fn purge_unconfirmed(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM sensor_data WHERE COALESCE(blockchain_success, 0) = 0 AND created_at < ?",
        )
        .bind(format_ts(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn store_maintenance(&self, record: &NewMaintenanceRecord) -> Result<StoredRecord> {
        let input = &record.input;
        let result = sqlx::query(
            r#"
            INSERT INTO maintenance_data (
                task_hash, prediction_id, task_type, priority, task_description,
                assigned_engineer, timestamp, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (task_hash) DO NOTHING
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
        .await?;

        let created = result.rows_affected() > 0;
        let id: i64 = sqlx::query_scalar("SELECT id FROM maintenance_data WHERE task_hash = ?")
            .bind(record.task_hash.to_hex())
            .fetch_one(&self.pool)
            .await?;
        Ok(StoredRecord {
            id,
            commitment: record.task_hash,
            created,
        })
    }

    async fn complete_maintenance(&self, completion: &MaintenanceCompletion) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE maintenance_data
            SET is_completed = 1, completed_at = ?, completion_notes = ?
            WHERE task_hash = ? AND COALESCE(is_completed, 0) = 0
            "#,
        )
        .bind(completion.completed_at)
        .bind(completion.notes.as_deref())
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

/// Raw row from the display table; every column is nullable there
#[derive(Debug, FromRow)]
struct DisplayRow {
    id: i64,
    machine_id: Option<i64>,
    timestamp: Option<i64>,
    air_temp: Option<f64>,
    process_temp: Option<f64>,
    rotation_speed: Option<i64>,
    torque: Option<f64>,
    tool_wear: Option<i64>,
    machine_type: Option<String>,
    data_hash: Option<String>,
    blockchain_success: Option<i64>,
    blockchain_tx_hash: Option<String>,
    blockchain_proof_id: Option<i64>,
    blockchain_error: Option<String>,
    created_at: Option<String>,
}

impl TryFrom<DisplayRow> for SensorRecord {
    type Error = LedgerError;

    fn try_from(row: DisplayRow) -> Result<Self> {
        let commitment = row
            .data_hash
            .as_deref()
            .ok_or_else(|| LedgerError::Internal(format!("display row {} has no data_hash", row.id)))?
            .parse()
            .map_err(|e| LedgerError::Internal(format!("Invalid data_hash: {}", e)))?;
        let machine_type = row
            .machine_type
            .as_deref()
            .unwrap_or("L")
            .parse::<MachineType>()
            .map_err(LedgerError::Internal)?;
        let status = match (row.blockchain_success, &row.blockchain_error) {
            (Some(1), _) => ChainStatus::OnchainSuccess,
            (_, Some(_)) => ChainStatus::OnchainFailed,
            _ => ChainStatus::LocalOnly,
        };
        let created_at = match row.created_at.as_deref() {
            Some(ts) => parse_ts(ts)?,
            None => DateTime::<Utc>::default(),
        };

        Ok(SensorRecord {
            id: row.id,
            reading: SensorReading {
                machine_id: row.machine_id.unwrap_or_default() as u64,
                timestamp: row.timestamp.unwrap_or_default(),
                air_temperature: row.air_temp.unwrap_or_default(),
                process_temperature: row.process_temp.unwrap_or_default(),
                rotational_speed: row.rotation_speed.unwrap_or_default() as u32,
                torque: row.torque.unwrap_or_default(),
                tool_wear: row.tool_wear.unwrap_or_default() as u32,
                machine_type,
            },
            commitment,
            submitter: None,
            chain: ChainState {
                status,
                tx_hash: row.blockchain_tx_hash,
                proof_id: row.blockchain_proof_id.map(|p| p as u64),
                block_number: None,
                last_error: row.blockchain_error,
            },
            created_at,
        })
    }
}
