use crate::domain::ml::HoldoutMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const TRAIN_JOB: &str = "train";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Error,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Ok => write!(f, "ok"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(JobStatus::Ok),
            "error" => Ok(JobStatus::Error),
            _ => anyhow::bail!("Invalid job status: {}", s),
        }
    }
}

/// Row of the job log: what ran, how it ended, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub job_name: String,
    pub status: JobStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Result of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job: String,
    pub status: JobStatus,
    pub samples: Option<usize>,
    pub split_index: Option<usize>,
    pub epochs_ran: Option<usize>,
    pub best_val_loss: Option<f64>,
    pub metrics: Option<HoldoutMetrics>,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn failed(
        job: &str,
        message: String,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job: job.to_string(),
            status: JobStatus::Error,
            samples: None,
            split_index: None,
            epochs_ran: None,
            best_val_loss: None,
            metrics: None,
            message,
            started_at,
            finished_at,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == JobStatus::Ok
    }

    pub fn log_entry(&self) -> JobLogEntry {
        JobLogEntry {
            job_name: self.job.clone(),
            status: self.status,
            message: self.message.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!(JobStatus::from_str("ok").unwrap(), JobStatus::Ok);
        assert_eq!(JobStatus::from_str("error").unwrap(), JobStatus::Error);
        assert!(JobStatus::from_str("OK!").is_err());
    }

    #[test]
    fn test_failed_outcome_log_entry() {
        let now = Utc::now();
        let outcome = JobOutcome::failed(TRAIN_JOB, "boom".into(), now, now);
        let entry = outcome.log_entry();
        assert_eq!(entry.job_name, "train");
        assert_eq!(entry.status, JobStatus::Error);
        assert_eq!(entry.message, "boom");
        assert!(!outcome.is_ok());
    }
}
