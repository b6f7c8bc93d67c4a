//! Per-instance, per-stage outcome accumulation.
//!
//! Concurrent instance tasks push [`StageRecord`]s into a shared
//! [`ResultCollector`]; at the end of the run the records are folded into a
//! [`RunReport`] that carries the exit-code bitmask and the ordered list of
//! failures shown to the operator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::exit_code::ExitFlags;
use crate::instance::InstanceIdentity;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// A stage of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Lock,
    Operate,
    Collect,
    Unlock,
    Cleanup,
}

impl Stage {
    pub fn exit_flag(self) -> ExitFlags {
        match self {
            Stage::Lock => ExitFlags::LOCK,
            Stage::Operate | Stage::Collect => ExitFlags::OPERATION,
            Stage::Unlock => ExitFlags::UNLOCK,
            Stage::Cleanup => ExitFlags::CLEANUP,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Lock => "lock",
            Stage::Operate => "operate",
            Stage::Collect => "collect",
            Stage::Unlock => "unlock",
            Stage::Cleanup => "cleanup",
        }
    }
}

// ---------------------------------------------------------------------------
// StageFailure
// ---------------------------------------------------------------------------

/// One failed stage, with everything the operator needs to judge retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub instance: InstanceIdentity,
    /// Job whose script failed, when the failure is job-specific.
    pub job: Option<String>,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

impl StageFailure {
    pub fn new(stage: Stage, instance: &InstanceIdentity, message: impl Into<String>) -> Self {
        Self {
            stage,
            instance: instance.clone(),
            job: None,
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.job {
            Some(job) => write!(
                f,
                "{} failed for job {job} on {}: {}",
                self.stage.as_str(),
                self.instance,
                self.message
            )?,
            None => write!(
                f,
                "{} failed on {}: {}",
                self.stage.as_str(),
                self.instance,
                self.message
            )?,
        }
        if !self.stdout.trim().is_empty() {
            write!(f, "\n  Stdout: {}", self.stdout.trim_end())?;
        }
        if !self.stderr.trim().is_empty() {
            write!(f, "\n  Stderr: {}", self.stderr.trim_end())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Records and collector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub instance: InstanceIdentity,
    pub stage: Stage,
    pub outcome: Result<(), StageFailure>,
}

/// Thread-safe arena of stage records keyed by instance id.
#[derive(Debug, Default)]
pub struct ResultCollector {
    records: Mutex<HashMap<String, Vec<StageRecord>>>,
    warnings: Mutex<Vec<String>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, instance: &InstanceIdentity, stage: Stage) {
        self.push(StageRecord {
            instance: instance.clone(),
            stage,
            outcome: Ok(()),
        });
    }

    pub fn record_failure(&self, failure: StageFailure) {
        self.push(StageRecord {
            instance: failure.instance.clone(),
            stage: failure.stage,
            outcome: Err(failure),
        });
    }

    /// Record a non-fatal observation that is reported but sets no flag.
    pub fn record_warning(&self, message: impl Into<String>) {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.into());
    }

    /// Whether any instance recorded a failure for `stage`.
    pub fn stage_failed(&self, stage: Stage) -> bool {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .flatten()
            .any(|r| r.stage == stage && r.outcome.is_err())
    }

    /// Whether `instance` recorded a failure for `stage`.
    pub fn instance_failed(&self, instance: &InstanceIdentity, stage: Stage) -> bool {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&instance.id)
            .is_some_and(|records| {
                records
                    .iter()
                    .any(|r| r.stage == stage && r.outcome.is_err())
            })
    }

    /// Fold every record into the final report.
    pub fn into_report(self) -> RunReport {
        let records: Vec<StageRecord> = self
            .records
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .into_values()
            .flatten()
            .collect();
        let warnings = self.warnings.into_inner().unwrap_or_else(|e| e.into_inner());
        RunReport::fold(records, warnings)
    }

    fn push(&self, record: StageRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(record.instance.id.clone())
            .or_default()
            .push(record);
    }
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Final outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub flags: ExitFlags,
    /// Failures ordered by stage, then instance.
    pub failures: Vec<StageFailure>,
    pub warnings: Vec<String>,
}

impl RunReport {
    /// Pure fold over the records of a run.
    pub fn fold(records: Vec<StageRecord>, warnings: Vec<String>) -> Self {
        let mut failures: Vec<StageFailure> = records
            .into_iter()
            .filter_map(|r| r.outcome.err())
            .collect();
        failures.sort_by(|a, b| {
            (a.stage, &a.instance, &a.job).cmp(&(b.stage, &b.instance, &b.job))
        });
        let flags = failures
            .iter()
            .fold(ExitFlags::SUCCESS, |acc, f| acc | f.stage.exit_flag());
        Self {
            flags,
            failures,
            warnings,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.flags.code()
    }

    pub fn is_success(&self) -> bool {
        self.flags.is_success()
    }

    /// Every failure, concatenated in stage order.
    pub fn error_message(&self) -> String {
        self.failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
