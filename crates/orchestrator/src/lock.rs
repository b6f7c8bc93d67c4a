//! Lock/unlock sequencing around the guarded operation.
//!
//! ```text
//! Idle -> Locking -> Locked | LockFailed -> Unlocking -> Done
//! ```
//!
//! Lock scripts run one at a time in `(instance, job)` order and stop at
//! the first failure. Unlock scripts always run, for every job exposing
//! one, in reverse lock order.

use bbr_core::job::Job;
use bbr_core::run_result::{ResultCollector, Stage};
use bbr_core::script::ScriptKind;

use crate::deployment::DeployedInstance;
use crate::runner::ScriptRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPhase {
    Idle,
    Locking,
    Locked,
    LockFailed,
    Unlocking,
    Done,
}

/// The script pair guarding one kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockScripts {
    pub lock: ScriptKind,
    pub unlock: ScriptKind,
}

impl LockScripts {
    pub const BACKUP: LockScripts = LockScripts {
        lock: ScriptKind::PreBackupLock,
        unlock: ScriptKind::PostBackupUnlock,
    };

    pub const RESTORE: LockScripts = LockScripts {
        lock: ScriptKind::PreRestoreLock,
        unlock: ScriptKind::PostRestoreUnlock,
    };
}

pub struct LockCoordinator<'a> {
    runner: &'a ScriptRunner,
    scripts: LockScripts,
    phase: LockPhase,
}

impl<'a> LockCoordinator<'a> {
    pub fn new(runner: &'a ScriptRunner, scripts: LockScripts) -> Self {
        Self {
            runner,
            scripts,
            phase: LockPhase::Idle,
        }
    }

    pub fn phase(&self) -> LockPhase {
        self.phase
    }

    /// Run every lock script. Returns `true` when all of them succeeded.
    pub async fn lock(&mut self, instances: &[DeployedInstance], results: &ResultCollector) -> bool {
        self.phase = LockPhase::Locking;

        for (instance, job) in ordered(instances, self.scripts.lock) {
            if let Err(err) = self
                .runner
                .run(instance.session.as_ref(), job, self.scripts.lock)
                .await
            {
                results.record_failure(err.into_stage_failure(Stage::Lock, job));
                self.phase = LockPhase::LockFailed;
                return false;
            }
        }

        for instance in instances {
            results.record_success(&instance.identity, Stage::Lock);
        }
        self.phase = LockPhase::Locked;
        true
    }

    /// Run every unlock script exactly once, whatever happened before.
    pub async fn unlock(&mut self, instances: &[DeployedInstance], results: &ResultCollector) {
        self.phase = LockPhase::Unlocking;

        let mut pending = ordered(instances, self.scripts.unlock);
        pending.reverse();
        for (instance, job) in pending {
            match self
                .runner
                .run(instance.session.as_ref(), job, self.scripts.unlock)
                .await
            {
                Ok(_) => results.record_success(&instance.identity, Stage::Unlock),
                Err(err) => results.record_failure(err.into_stage_failure(Stage::Unlock, job)),
            }
        }

        self.phase = LockPhase::Done;
    }
}

/// `(instance, job)` pairs exposing `kind`, in deterministic order.
fn ordered(instances: &[DeployedInstance], kind: ScriptKind) -> Vec<(&DeployedInstance, &Job)> {
    instances
        .iter()
        .flat_map(|instance| instance.jobs_with(kind).map(move |job| (instance, job)))
        .collect()
}
