//! Maintenance tasks raised from failure predictions

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CommitmentHash;
use crate::infra::{LedgerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceTaskType {
    Preventive,
    Corrective,
    Emergency,
}

impl MaintenanceTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceTaskType::Preventive => "preventive",
            MaintenanceTaskType::Corrective => "corrective",
            MaintenanceTaskType::Emergency => "emergency",
        }
    }

    /// Value absorbed by the task commitment
    pub fn field_value(&self) -> u64 {
        match self {
            MaintenanceTaskType::Preventive => 1,
            MaintenanceTaskType::Corrective => 2,
            MaintenanceTaskType::Emergency => 3,
        }
    }
}

impl fmt::Display for MaintenanceTaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaintenanceTaskType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preventive" | "1" => Ok(MaintenanceTaskType::Preventive),
            "corrective" | "2" => Ok(MaintenanceTaskType::Corrective),
            "emergency" | "3" => Ok(MaintenanceTaskType::Emergency),
            other => Err(format!("unknown maintenance task type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenancePriority {
    Low,
    Medium,
    High,
    Critical,
}

impl MaintenancePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenancePriority::Low => "low",
            MaintenancePriority::Medium => "medium",
            MaintenancePriority::High => "high",
            MaintenancePriority::Critical => "critical",
        }
    }

    pub fn field_value(&self) -> u64 {
        match self {
            MaintenancePriority::Low => 1,
            MaintenancePriority::Medium => 2,
            MaintenancePriority::High => 3,
            MaintenancePriority::Critical => 4,
        }
    }
}

impl fmt::Display for MaintenancePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaintenancePriority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "1" => Ok(MaintenancePriority::Low),
            "medium" | "2" => Ok(MaintenancePriority::Medium),
            "high" | "3" => Ok(MaintenancePriority::High),
            "critical" | "4" => Ok(MaintenancePriority::Critical),
            other => Err(format!("unknown maintenance priority: {}", other)),
        }
    }
}

/// Task scheduled against a stored prediction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceInput {
    /// Canonical prediction id
    pub prediction_id: i64,
    pub task_type: MaintenanceTaskType,
    pub priority: MaintenancePriority,
    pub description: String,
    pub assigned_engineer: String,
    /// Unix seconds
    pub timestamp: i64,
}

impl MaintenanceInput {
    pub fn validate(&self) -> Result<()> {
        if self.prediction_id <= 0 {
            return Err(LedgerError::Validation("prediction_id must be positive".into()));
        }
        if self.description.trim().is_empty() {
            return Err(LedgerError::Validation("task description is empty".into()));
        }
        if self.assigned_engineer.trim().is_empty() {
            return Err(LedgerError::Validation("assigned engineer is empty".into()));
        }
        if self.timestamp <= 0 {
            return Err(LedgerError::Validation("timestamp must be positive".into()));
        }
        Ok(())
    }

    /// `[predictionId, taskType, priority, timestamp]` as committed
    pub fn commitment_fields(&self) -> Result<[u64; 4]> {
        let prediction_id = u64::try_from(self.prediction_id)
            .map_err(|_| LedgerError::Validation("prediction_id must be positive".into()))?;
        let timestamp = u64::try_from(self.timestamp)
            .map_err(|_| LedgerError::Validation("timestamp must be positive".into()))?;
        Ok([
            prediction_id,
            self.task_type.field_value(),
            self.priority.field_value(),
            timestamp,
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMaintenanceRecord {
    pub input: MaintenanceInput,
    pub task_hash: CommitmentHash,
}

/// Completion written back to a scheduled task, located by its hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceCompletion {
    pub task_hash: CommitmentHash,
    /// Unix seconds
    pub completed_at: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub id: i64,
    pub prediction_id: i64,
    pub task_type: MaintenanceTaskType,
    pub priority: MaintenancePriority,
    pub description: String,
    pub assigned_engineer: String,
    pub timestamp: i64,
    pub task_hash: CommitmentHash,
    pub completed_at: Option<i64>,
    pub completion_notes: Option<String>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of scheduling a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub task_id: i64,
    pub task_hash: CommitmentHash,
    pub prediction_id: i64,
    /// False when the same task was already scheduled
    pub created: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> MaintenanceInput {
        MaintenanceInput {
            prediction_id: 3,
            task_type: MaintenanceTaskType::Corrective,
            priority: MaintenancePriority::High,
            description: "replace spindle bearing".into(),
            assigned_engineer: "line-2 crew".into(),
            timestamp: 1_700_000_200,
        }
    }

    #[test]
    fn test_commitment_fields_follow_codes() {
        assert_eq!(input().commitment_fields().unwrap(), [3, 2, 3, 1_700_000_200]);
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        assert!(input().validate().is_ok());

        let mut i = input();
        i.assigned_engineer = "  ".into();
        assert!(matches!(i.validate(), Err(LedgerError::Validation(_))));

        let mut i = input();
        i.prediction_id = 0;
        assert!(i.validate().is_err());
    }

    #[test]
    fn test_parse_names_and_codes() {
        assert_eq!("Emergency".parse::<MaintenanceTaskType>().unwrap(), MaintenanceTaskType::Emergency);
        assert_eq!("4".parse::<MaintenancePriority>().unwrap(), MaintenancePriority::Critical);
        assert!("urgent".parse::<MaintenancePriority>().is_err());
        assert_eq!(
            serde_json::to_string(&MaintenancePriority::Critical).unwrap(),
            "\"critical\""
        );
    }
}
