//! Dual-write storage adapter
//!
//! Canonical writes are authoritative. The mirror, when configured, receives
//! the same writes on a best-effort basis: its failures are logged and never
//! undo or fail the canonical operation. Hash lookups go to the canonical store
//! first and fall back to the mirror when the canonical store has nothing. Id
//! lookups are canonical only: mirror row ids are a separate id space.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::domain::{
    ChainStatusUpdate, CommitmentHash, MaintenanceCompletion, MaintenanceRecord,
    NewMaintenanceRecord, NewPredictionRecord, NewSensorRecord, PredictionRecord, SensorRecord,
    StorageStatistics, StoredRecord,
};
use crate::infra::{RecordStore, Result};

/// Canonical store plus optional display mirror
#[derive(Clone)]
pub struct DualWriteStorage {
    canonical: Arc<dyn RecordStore>,
    mirror: Option<Arc<dyn RecordStore>>,
}

impl DualWriteStorage {
    pub fn new(canonical: Arc<dyn RecordStore>, mirror: Option<Arc<dyn RecordStore>>) -> Self {
        Self { canonical, mirror }
    }

    /// Canonical store only
    pub fn canonical_only(canonical: Arc<dyn RecordStore>) -> Self {
        Self::new(canonical, None)
    }

    pub fn has_mirror(&self) -> bool {
        self.mirror.is_some()
    }

    /// Persist a sensor record, returning its canonical id and commitment.
    ///
    /// Storing identical content again returns the existing id.
    pub async fn store_sensor(&self, record: &NewSensorRecord) -> Result<StoredRecord> {
        let stored = self.canonical.store_sensor(record).await?;
        if stored.created {
            info!(record_id = stored.id, hash = %stored.commitment, "sensor record stored");
        } else {
            debug!(record_id = stored.id, hash = %stored.commitment, "sensor record already stored");
        }

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.store_sensor(record).await {
                warn!(store = mirror.name(), record_id = stored.id, error = %e, "mirror write failed");
            }
        }
        Ok(stored)
    }

    pub async fn store_prediction(&self, record: &NewPredictionRecord) -> Result<StoredRecord> {
        let stored = self.canonical.store_prediction(record).await?;
        info!(
            prediction_id = stored.id,
            hash = %stored.commitment,
            created = stored.created,
            "prediction record stored"
        );

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.store_prediction(record).await {
                warn!(store = mirror.name(), prediction_id = stored.id, error = %e, "mirror write failed");
            }
        }
        Ok(stored)
    }

    /// Write back a sensor submission outcome to both stores.
    ///
    /// Returns whether the canonical row was updated.
    pub async fn update_chain_status(&self, update: &ChainStatusUpdate) -> Result<bool> {
        let updated = self.canonical.update_chain_status(update).await?;
        debug!(
            record_id = update.record_id,
            status = update.status().as_str(),
            updated,
            "canonical chain status written"
        );

        if let Some(mirror) = &self.mirror {
            match mirror.update_chain_status(update).await {
                Ok(false) => debug!(record_id = update.record_id, "no mirror row matched"),
                Ok(true) => {}
                Err(e) => warn!(store = mirror.name(), record_id = update.record_id, error = %e, "mirror status update failed"),
            }
        }
        Ok(updated)
    }

    pub async fn update_prediction_status(&self, update: &ChainStatusUpdate) -> Result<bool> {
        let updated = self.canonical.update_prediction_status(update).await?;

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.update_prediction_status(update).await {
                warn!(store = mirror.name(), prediction_id = update.record_id, error = %e, "mirror prediction update failed");
            }
        }
        Ok(updated)
    }

    pub async fn set_prediction_reference(&self, prediction_id: i64, data_proof_id: u64) -> Result<()> {
        self.canonical
            .set_prediction_reference(prediction_id, data_proof_id)
            .await
    }

    pub async fn sensor_by_id(&self, id: i64) -> Result<Option<SensorRecord>> {
        self.canonical.sensor_by_id(id).await
    }

    pub async fn sensor_by_hash(&self, hash: &CommitmentHash) -> Result<Option<SensorRecord>> {
        if let Some(record) = self.canonical.sensor_by_hash(hash).await? {
            return Ok(Some(record));
        }
        let hash = *hash;
        self.mirror_read(|m| async move { m.sensor_by_hash(&hash).await })
            .await
    }

    pub async fn prediction_by_id(&self, id: i64) -> Result<Option<PredictionRecord>> {
        self.canonical.prediction_by_id(id).await
    }

    /// On-chain proof id of a canonical sensor record, only when its submission is confirmed
    pub async fn confirmed_sensor_proof_id(&self, sensor_id: i64) -> Result<Option<u64>> {
        Ok(self
            .canonical
            .sensor_by_id(sensor_id)
            .await?
            .and_then(|r| r.chain.confirmed_proof_id()))
    }

    pub async fn store_maintenance(&self, record: &NewMaintenanceRecord) -> Result<StoredRecord> {
        let stored = self.canonical.store_maintenance(record).await?;
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.store_maintenance(record).await {
                warn!(store = mirror.name(), task_id = stored.id, error = %e, "mirror write failed");
            }
        }
        Ok(stored)
    }

    /// Returns whether an open canonical task was closed
    pub async fn complete_maintenance(&self, completion: &MaintenanceCompletion) -> Result<bool> {
        let completed = self.canonical.complete_maintenance(completion).await?;
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.complete_maintenance(completion).await {
                warn!(store = mirror.name(), hash = %completion.task_hash, error = %e, "mirror completion failed");
            }
        }
        Ok(completed)
    }

    pub async fn maintenance_by_hash(
        &self,
        hash: &CommitmentHash,
    ) -> Result<Option<MaintenanceRecord>> {
        if let Some(record) = self.canonical.maintenance_by_hash(hash).await? {
            return Ok(Some(record));
        }
        let hash = *hash;
        self.mirror_read(|m| async move { m.maintenance_by_hash(&hash).await })
            .await
    }

    pub async fn maintenance_for_prediction(
        &self,
        prediction_id: i64,
    ) -> Result<Vec<MaintenanceRecord>> {
        self.canonical.maintenance_for_prediction(prediction_id).await
    }

    pub async fn recent_sensors(&self, machine_id: Option<u64>, limit: u32) -> Result<Vec<SensorRecord>> {
        self.canonical.recent_sensors(machine_id, limit).await
    }

    pub async fn statistics(&self) -> Result<StorageStatistics> {
        self.canonical.statistics().await
    }

    /// Delete never-confirmed records older than `older_than` from both stores.
    ///
    /// Returns the number of canonical rows removed.
    pub async fn purge_unconfirmed(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;
        let removed = self.canonical.purge_unconfirmed(cutoff).await?;
        info!(removed, cutoff = %cutoff, "purged unconfirmed records");

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.purge_unconfirmed(cutoff).await {
                warn!(store = mirror.name(), error = %e, "mirror purge failed");
            }
        }
        Ok(removed)
    }

    /// Mirror lookup; mirror errors degrade to "not found"
    async fn mirror_read<T, F, Fut>(&self, read: F) -> Result<Option<T>>
    where
        F: FnOnce(Arc<dyn RecordStore>) -> Fut,
        Fut: std::future::Future<Output = Result<Option<T>>>,
    {
        let Some(mirror) = &self.mirror else {
            return Ok(None);
        };
        match read(Arc::clone(mirror)).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(store = mirror.name(), error = %e, "mirror read failed");
                Ok(None)
            }
        }
    }
}
