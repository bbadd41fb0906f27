use std::collections::VecDeque;

use pdm_proof_ledger::infra::{CancellationFlag, SqliteCanonicalStore, SqliteDisplayStore, StatusReporter};
use pdm_proof_ledger::telemetry::{init_telemetry, TelemetryConfig};
use pdm_proof_ledger::{
    CommitmentHash, HybridLedgerService, LedgerConfig, MachineType, MaintenanceInput,
    MaintenancePriority, MaintenanceTaskType, PredictionInput, SensorLookup, SensorReading,
};

fn print_help() {
    eprintln!(
        "\
pdm-ledger-admin

USAGE:
  pdm-ledger-admin <command> [args]

COMMANDS:
  migrate                         Create or upgrade both databases
  submit-sensor <machine_id> <air_k> <process_k> <rpm> <torque_nm> <wear_min> <L|M|H>
                                  Commit, store, prove and anchor one reading
  submit-prediction <sensor_id> <label> <probability> <model_version>
                                  Prove and anchor a prediction for a confirmed reading
  schedule-maintenance <prediction_id> <preventive|corrective|emergency>
                       <low|medium|high|critical> <engineer> <description...>
                                  Commit and store a maintenance task
  complete-maintenance <0xtask_hash> [notes...]
                                  Close a maintenance task
  tasks <prediction_id>           List maintenance tasks for a prediction
  show <id|0xhash>                Print a stored sensor record
  recent [--machine-id <n>] [--limit <n>]
                                  List the newest sensor records
  verify <id> [<0xhash>]          Recompute a record's commitment
  stats                           Storage statistics
  purge <days>                    Delete unconfirmed records older than <days>
  vk-status                       Compare on-chain and local verifying keys
  vk-ensure                       Upload local verifying keys where they differ
  diagnose                        Check storage, toolchain, ptau, ledger and keys
  help                            Show this message

ENV:
  PDM_DATA_DIR, PDM_CANONICAL_DB, PDM_DISPLAY_DB, PDM_CIRCUIT_DIR, PDM_ARTIFACT_DIR,
  PDM_PTAU_PATH, PDM_CIRCOM_BIN, PDM_SNARKJS_BIN, ZKSYNC_ERA_RPC_URL, PDM_CHAIN_ID,
  PRIVATE_KEY (unset = local-only), PDM_CONTRACT_ADDRESS, VERIFIER_CONTRACT_ADDRESS,
  PDM_DEPLOYMENT_INFO, PDM_GAS_PRICE_FLOOR_GWEI, PDM_TX_TIMEOUT_SECS, LOG_LEVEL, LOG_JSON
"
    );
}

fn next_arg(args: &mut VecDeque<String>, name: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing argument <{name}>"))
}

fn parse_arg<T>(args: &mut VecDeque<String>, name: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = next_arg(args, name)?;
    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid <{name}> {raw}: {e}"))
}

fn no_more_args(args: &VecDeque<String>) -> anyhow::Result<()> {
    match args.front() {
        Some(other) => anyhow::bail!("unexpected argument: {other}"),
        None => Ok(()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Status reporter printing each stage line to stderr
fn progress() -> StatusReporter {
    let (reporter, mut rx) = StatusReporter::channel();
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            eprintln!("  .. {line}");
        }
    });
    reporter
}

/// Cancellation flag set on Ctrl-C; the running stage still finishes
fn cancel_on_ctrl_c() -> CancellationFlag {
    let cancel = CancellationFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling after the current stage");
            flag.cancel();
        }
    });
    cancel
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    init_telemetry(&TelemetryConfig::from_env())?;
    let config = LedgerConfig::from_env()?;

    match command.as_str() {
        "migrate" => {
            no_more_args(&args)?;
            let canonical = config
                .canonical_db
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("non-UTF-8 canonical path"))?;
            SqliteCanonicalStore::from_path(canonical).await?.initialize().await?;
            println!("ok: canonical schema at {}", config.canonical_db.display());

            if let Some(display) = &config.display_db {
                let path = display
                    .to_str()
                    .ok_or_else(|| anyhow::anyhow!("non-UTF-8 display path"))?;
                SqliteDisplayStore::from_path(path).await?.initialize().await?;
                println!("ok: display schema at {}", display.display());
            }
            Ok(())
        }
        "submit-sensor" => {
            let machine_id: u64 = parse_arg(&mut args, "machine_id")?;
            let air: f64 = parse_arg(&mut args, "air_k")?;
            let process: f64 = parse_arg(&mut args, "process_k")?;
            let rpm: u32 = parse_arg(&mut args, "rpm")?;
            let torque: f64 = parse_arg(&mut args, "torque_nm")?;
            let wear: u32 = parse_arg(&mut args, "wear_min")?;
            let machine_type: MachineType = parse_arg(&mut args, "L|M|H")?;
            no_more_args(&args)?;

            let reading = SensorReading::new(
                machine_id,
                unix_now(),
                air,
                process,
                rpm,
                torque,
                wear,
                machine_type,
            );
            let service = HybridLedgerService::from_config(&config).await?;
            let report = service
                .submit_sensor(&reading, &progress(), &cancel_on_ctrl_c())
                .await?;
            print_json(&report)?;
            if report.chain.as_ref().is_some_and(|c| !c.success) {
                std::process::exit(2);
            }
            Ok(())
        }
        "submit-prediction" => {
            let sensor_record_id: i64 = parse_arg(&mut args, "sensor_id")?;
            let label: u8 = parse_arg(&mut args, "label")?;
            let probability: f64 = parse_arg(&mut args, "probability")?;
            let model_version = next_arg(&mut args, "model_version")?;
            no_more_args(&args)?;

            let input = PredictionInput {
                sensor_record_id,
                label,
                probability,
                model_version,
                timestamp: unix_now(),
                predictor: None,
            };
            let service = HybridLedgerService::from_config(&config).await?;
            let report = service
                .submit_prediction(&input, &progress(), &cancel_on_ctrl_c())
                .await?;
            print_json(&report)?;
            if report.chain.is_some() && !report.success() {
                std::process::exit(2);
            }
            Ok(())
        }
        "schedule-maintenance" => {
            let prediction_id: i64 = parse_arg(&mut args, "prediction_id")?;
            let task_type: MaintenanceTaskType = parse_arg(&mut args, "task_type")?;
            let priority: MaintenancePriority = parse_arg(&mut args, "priority")?;
            let assigned_engineer = next_arg(&mut args, "engineer")?;
            let description = args.drain(..).collect::<Vec<_>>().join(" ");

            let input = MaintenanceInput {
                prediction_id,
                task_type,
                priority,
                description,
                assigned_engineer,
                timestamp: unix_now(),
            };
            let service = HybridLedgerService::from_config(&config).await?;
            print_json(&service.schedule_maintenance(&input).await?)
        }
        "complete-maintenance" => {
            let task_hash = next_arg(&mut args, "0xtask_hash")?
                .parse::<CommitmentHash>()
                .map_err(anyhow::Error::msg)?;
            let notes = (!args.is_empty()).then(|| args.drain(..).collect::<Vec<_>>().join(" "));
            let service = HybridLedgerService::from_config(&config).await?;
            print_json(&service.complete_maintenance(task_hash, unix_now(), notes).await?)
        }
        "tasks" => {
            let prediction_id: i64 = parse_arg(&mut args, "prediction_id")?;
            no_more_args(&args)?;
            let service = HybridLedgerService::from_config(&config).await?;
            for task in service.maintenance_for_prediction(prediction_id).await? {
                println!(
                    "{:>6}  {:<10} {:<8} {:<5} {}  {}",
                    task.id,
                    task.task_type.as_str(),
                    task.priority.as_str(),
                    if task.is_completed { "done" } else { "open" },
                    task.task_hash,
                    task.assigned_engineer
                );
            }
            Ok(())
        }
        "show" => {
            let key = next_arg(&mut args, "id|0xhash")?;
            no_more_args(&args)?;
            let lookup = if key.starts_with("0x") {
                SensorLookup::Hash(key.parse::<CommitmentHash>().map_err(anyhow::Error::msg)?)
            } else {
                SensorLookup::Id(key.parse()?)
            };
            let service = HybridLedgerService::from_config(&config).await?;
            match service.retrieve_sensor(lookup).await? {
                Some(record) => print_json(&record),
                None => anyhow::bail!("no sensor record for {key}"),
            }
        }
        "recent" => {
            let mut machine_id: Option<u64> = None;
            let mut limit: u32 = 20;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--machine-id" => machine_id = Some(parse_arg(&mut args, "machine_id")?),
                    "--limit" => limit = parse_arg(&mut args, "limit")?,
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }
            let service = HybridLedgerService::from_config(&config).await?;
            for record in service.recent_sensors(machine_id, limit).await? {
                println!(
                    "{:>6}  machine {:<6} {}  {:<16} {}",
                    record.id,
                    record.reading.machine_id,
                    record.commitment,
                    record.chain.status.as_str(),
                    record.chain.tx_hash.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        "verify" => {
            let id: i64 = parse_arg(&mut args, "id")?;
            let expected = match args.pop_front() {
                Some(raw) => Some(raw.parse::<CommitmentHash>().map_err(anyhow::Error::msg)?),
                None => None,
            };
            no_more_args(&args)?;
            let service = HybridLedgerService::from_config(&config).await?;
            let report = service.verify_integrity(id, expected).await?;
            print_json(&report)?;
            if !report.intact {
                std::process::exit(1);
            }
            Ok(())
        }
        "stats" => {
            no_more_args(&args)?;
            let service = HybridLedgerService::from_config(&config).await?;
            print_json(&service.statistics().await?)?;
            print_json(&service.metrics().snapshot().await)
        }
        "purge" => {
            let days: u32 = parse_arg(&mut args, "days")?;
            no_more_args(&args)?;
            let service = HybridLedgerService::from_config(&config).await?;
            let removed = service.purge_unconfirmed(days).await?;
            println!("ok: removed {removed} unconfirmed records older than {days} days");
            Ok(())
        }
        "vk-status" => {
            no_more_args(&args)?;
            let service = HybridLedgerService::from_config(&config).await?;
            for (circuit, ready) in service.verifying_key_status().await? {
                println!("{circuit:<12} {}", if ready { "ready" } else { "NOT READY" });
            }
            Ok(())
        }
        "vk-ensure" => {
            no_more_args(&args)?;
            let service = HybridLedgerService::from_config(&config).await?;
            service.ensure_verifying_keys().await?;
            println!("ok: verifying keys match");
            Ok(())
        }
        "diagnose" => {
            no_more_args(&args)?;
            let service = HybridLedgerService::from_config(&config).await?;
            let report = service.diagnose().await;
            print_json(&report)?;
            if !report.is_healthy() {
                std::process::exit(1);
            }
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
