//! Dual-write storage against file-backed SQLite databases

mod common;

use std::sync::Arc;

use chrono::Duration;

use common::{open_stores, reference_reading};
use pdm_proof_ledger::domain::{
    ChainStatusUpdate, MaintenanceCompletion, MaintenanceInput, MaintenancePriority,
    MaintenanceTaskType, NewMaintenanceRecord, NewPredictionRecord, NewSensorRecord,
};
use pdm_proof_ledger::infra::{DualWriteStorage, RecordStore};
use pdm_proof_ledger::{ChainStatus, CommitmentHasher, SensorReading};

fn new_record(reading: SensorReading) -> NewSensorRecord {
    let commitment = CommitmentHasher::new().commit_reading(&reading).unwrap();
    NewSensorRecord {
        reading,
        commitment,
        submitter: None,
    }
}

fn confirmed(record_id: i64, record: &NewSensorRecord, proof_id: u64) -> ChainStatusUpdate {
    ChainStatusUpdate {
        record_id,
        success: true,
        tx_hash: Some(format!("0x{:064x}", proof_id)),
        proof_id: Some(proof_id),
        block_number: Some(77),
        commitment: Some(record.commitment),
        error: None,
    }
}

#[tokio::test]
async fn test_same_reading_stored_once_in_both_stores() {
    let dir = tempfile::tempdir().unwrap();
    let (canonical, display) = open_stores(dir.path()).await;
    let storage = DualWriteStorage::new(canonical.clone(), Some(display.clone() as Arc<dyn RecordStore>));

    let record = new_record(reference_reading());
    assert_eq!(record.commitment.to_string().len(), 66);
    assert!(record.commitment.to_string().starts_with("0x"));

    let first = storage.store_sensor(&record).await.unwrap();
    let second = storage.store_sensor(&record).await.unwrap();
    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.id, second.id);
    assert_eq!(first.commitment, record.commitment);

    assert_eq!(canonical.statistics().await.unwrap().sensor_records, 1);
    let mirrored = display.sensor_by_hash(&record.commitment).await.unwrap().unwrap();
    assert_eq!(mirrored.reading.rotational_speed, 1551);
    assert_eq!(mirrored.chain.status, ChainStatus::LocalOnly);
}

#[tokio::test]
async fn test_status_write_back_reaches_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let (canonical, display) = open_stores(dir.path()).await;
    let storage = DualWriteStorage::new(canonical, Some(display.clone() as Arc<dyn RecordStore>));

    let record = new_record(reference_reading());
    let stored = storage.store_sensor(&record).await.unwrap();
    assert!(storage
        .update_chain_status(&confirmed(stored.id, &record, 12))
        .await
        .unwrap());

    assert_eq!(storage.confirmed_sensor_proof_id(stored.id).await.unwrap(), Some(12));
    let loaded = storage.sensor_by_id(stored.id).await.unwrap().unwrap();
    assert_eq!(loaded.chain.status, ChainStatus::OnchainSuccess);
    assert_eq!(loaded.chain.block_number, Some(77));

    let mirrored = display.sensor_by_hash(&record.commitment).await.unwrap().unwrap();
    assert_eq!(mirrored.chain.confirmed_proof_id(), Some(12));
}

#[tokio::test]
async fn test_later_failure_keeps_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let (canonical, display) = open_stores(dir.path()).await;
    let storage = DualWriteStorage::new(canonical, Some(display as Arc<dyn RecordStore>));

    let record = new_record(reference_reading());
    let stored = storage.store_sensor(&record).await.unwrap();
    storage
        .update_chain_status(&confirmed(stored.id, &record, 3))
        .await
        .unwrap();

    let failure = ChainStatusUpdate {
        record_id: stored.id,
        success: false,
        tx_hash: None,
        proof_id: None,
        block_number: None,
        commitment: Some(record.commitment),
        error: Some("data_hash_already_used".into()),
    };
    storage.update_chain_status(&failure).await.unwrap();

    let loaded = storage.sensor_by_id(stored.id).await.unwrap().unwrap();
    assert_eq!(loaded.chain.status, ChainStatus::OnchainSuccess);
    assert_eq!(loaded.chain.confirmed_proof_id(), Some(3));
}

#[tokio::test]
async fn test_mirror_failure_does_not_fail_canonical_write() {
    let dir = tempfile::tempdir().unwrap();
    let (canonical, display) = open_stores(dir.path()).await;
    sqlx::query("DROP TABLE sensor_data")
        .execute(display.pool())
        .await
        .unwrap();
    let storage = DualWriteStorage::new(canonical.clone(), Some(display as Arc<dyn RecordStore>));

    let record = new_record(reference_reading());
    let stored = storage.store_sensor(&record).await.unwrap();
    assert!(stored.created);
    assert!(storage
        .update_chain_status(&confirmed(stored.id, &record, 1))
        .await
        .unwrap());
    assert!(canonical.sensor_by_id(stored.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_hash_lookup_falls_back_to_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let (canonical, display) = open_stores(dir.path()).await;

    // written by another process straight into the mirror
    let record = new_record(reference_reading());
    display.store_sensor(&record).await.unwrap();

    let storage = DualWriteStorage::new(canonical, Some(display as Arc<dyn RecordStore>));
    let found = storage.sensor_by_hash(&record.commitment).await.unwrap();
    assert_eq!(found.map(|r| r.commitment), Some(record.commitment));
}

#[tokio::test]
async fn test_recent_and_purge() {
    let dir = tempfile::tempdir().unwrap();
    let (canonical, display) = open_stores(dir.path()).await;
    let storage = DualWriteStorage::new(canonical, Some(display as Arc<dyn RecordStore>));

    let mut ids = Vec::new();
    for (machine_id, wear) in [(1u64, 10u32), (2, 20), (1, 30)] {
        let mut reading = reference_reading();
        reading.machine_id = machine_id;
        reading.tool_wear = wear;
        let record = new_record(reading);
        ids.push((storage.store_sensor(&record).await.unwrap().id, record));
    }
    let (kept_id, kept) = &ids[0];
    storage
        .update_chain_status(&confirmed(*kept_id, kept, 8))
        .await
        .unwrap();

    let machine_one = storage.recent_sensors(Some(1), 10).await.unwrap();
    assert_eq!(machine_one.len(), 2);
    assert_eq!(machine_one[0].reading.tool_wear, 30);
    assert_eq!(storage.recent_sensors(None, 1).await.unwrap().len(), 1);

    // cutoff in the future: every unconfirmed record qualifies
    let removed = storage.purge_unconfirmed(Duration::seconds(-60)).await.unwrap();
    assert_eq!(removed, 2);

    let remaining = storage.recent_sensors(None, 10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, *kept_id);
    let stats = storage.statistics().await.unwrap();
    assert_eq!(stats.sensor_records, 1);
    assert_eq!(stats.confirmed, 1);
}

#[tokio::test]
async fn test_canonical_id_never_resolves_to_a_mirror_row() {
    let dir = tempfile::tempdir().unwrap();
    let (canonical, display) = open_stores(dir.path()).await;

    // another reading confirmed by a different process, mirror row id 1
    let mut other = reference_reading();
    other.tool_wear = 200;
    let other = new_record(other);
    let mirror_row = display.store_sensor(&other).await.unwrap();
    assert_eq!(mirror_row.id, 1);
    display
        .update_chain_status(&confirmed(mirror_row.id, &other, 99))
        .await
        .unwrap();

    // canonical row id 1 holds a different, unconfirmed reading
    let storage = DualWriteStorage::new(canonical, Some(display as Arc<dyn RecordStore>));
    let record = new_record(reference_reading());
    let stored = storage.store_sensor(&record).await.unwrap();
    assert_eq!(stored.id, 1);

    assert_eq!(storage.confirmed_sensor_proof_id(stored.id).await.unwrap(), None);
    let loaded = storage.sensor_by_id(stored.id).await.unwrap().unwrap();
    assert_eq!(loaded.commitment, record.commitment);
    assert_eq!(loaded.chain.status, ChainStatus::LocalOnly);

    // ids unknown to the canonical store stay unknown
    assert!(storage.sensor_by_id(2).await.unwrap().is_none());
    assert!(storage.prediction_by_id(1).await.unwrap().is_none());

    // the other reading is still reachable through its commitment
    let mirrored = storage.sensor_by_hash(&other.commitment).await.unwrap().unwrap();
    assert_eq!(mirrored.chain.confirmed_proof_id(), Some(99));
}

#[tokio::test]
async fn test_maintenance_task_reaches_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let (canonical, display) = open_stores(dir.path()).await;
    let storage = DualWriteStorage::new(canonical, Some(display.clone() as Arc<dyn RecordStore>));

    let sensor = new_record(reference_reading());
    let stored_sensor = storage.store_sensor(&sensor).await.unwrap();
    let prediction = storage
        .store_prediction(&NewPredictionRecord {
            input: common::prediction_for(stored_sensor.id),
            sensor_commitment: Some(sensor.commitment),
            model_hash: pdm_proof_ledger::crypto::string_to_field("rf-v2.1"),
            content_hash: pdm_proof_ledger::CommitmentHash([3; 32]),
        })
        .await
        .unwrap();

    let input = MaintenanceInput {
        prediction_id: prediction.id,
        task_type: MaintenanceTaskType::Preventive,
        priority: MaintenancePriority::Medium,
        description: "check spindle".into(),
        assigned_engineer: "crew b".into(),
        timestamp: 1_700_000_400,
    };
    let task_hash = CommitmentHasher::new().maintenance_commitment(&input).unwrap();
    let stored = storage
        .store_maintenance(&NewMaintenanceRecord { input, task_hash })
        .await
        .unwrap();
    assert!(stored.created);

    assert!(storage
        .complete_maintenance(&MaintenanceCompletion {
            task_hash,
            completed_at: 1_700_000_500,
            notes: None,
        })
        .await
        .unwrap());

    let mirrored = display.maintenance_by_hash(&task_hash).await.unwrap().unwrap();
    assert!(mirrored.is_completed);
    assert_eq!(mirrored.prediction_id, prediction.id);
    assert_eq!(storage.maintenance_for_prediction(prediction.id).await.unwrap().len(), 1);
}
