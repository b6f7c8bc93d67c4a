//! A deployment as seen by one run: its instances, one open session per
//! instance, and the jobs discovered on each.

use std::sync::Arc;

use bbr_core::instance::InstanceIdentity;
use bbr_core::job::Job;
use bbr_core::script::ScriptKind;
use bbr_remote::director::DirectorClient;
use bbr_remote::session::{RemoteSession, SessionProvider};
use futures::stream::{self, StreamExt};

use crate::error::OrchestratorError;
use crate::locator::locate_jobs;
use crate::runner::ScriptRunner;

/// One instance with its session and discovered jobs.
pub struct DeployedInstance {
    pub identity: InstanceIdentity,
    pub session: Arc<dyn RemoteSession>,
    /// Relevant jobs ordered by name.
    pub jobs: Vec<Job>,
}

impl DeployedInstance {
    pub fn jobs_with(&self, kind: ScriptKind) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(move |job| job.has(kind))
    }
}

/// Instances of a deployment, ordered by `(group, index)`.
pub struct Deployment {
    pub name: String,
    pub instances: Vec<DeployedInstance>,
}

impl Deployment {
    /// Resolve instances, open a session to each and discover their jobs.
    ///
    /// Sessions opened before a failure are closed before returning.
    pub async fn connect(
        name: &str,
        director: &dyn DirectorClient,
        sessions: &dyn SessionProvider,
        runner: &ScriptRunner,
        parallelism: usize,
    ) -> Result<Self, OrchestratorError> {
        let mut identities = director.list_instances(name).await?;
        identities.sort();
        tracing::info!(deployment = name, instance_count = identities.len(), "Found instances");

        let opened: Vec<_> = stream::iter(identities)
            .map(|identity| async move {
                let result = sessions.open(&identity).await;
                (identity, result)
            })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let mut connected = Vec::with_capacity(opened.len());
        let mut first_error = None;
        for (identity, result) in opened {
            match result {
                Ok(session) => connected.push((identity, session)),
                Err(source) => {
                    tracing::error!(instance = %identity, error = %source, "Failed to open session");
                    if first_error.is_none() {
                        first_error = Some(OrchestratorError::Session {
                            instance: identity.to_string(),
                            source,
                        });
                    }
                }
            }
        }
        if let Some(err) = first_error {
            close_all(connected.iter().map(|(_, s)| s), parallelism).await;
            return Err(err);
        }

        let located: Vec<_> = stream::iter(connected)
            .map(|(identity, session)| async move {
                let jobs = locate_jobs(session.as_ref(), runner).await;
                (identity, session, jobs)
            })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let mut instances = Vec::with_capacity(located.len());
        let mut sessions_seen = Vec::with_capacity(located.len());
        let mut first_error = None;
        for (identity, session, jobs) in located {
            sessions_seen.push(Arc::clone(&session));
            match jobs {
                Ok(jobs) => instances.push(DeployedInstance {
                    identity,
                    session,
                    jobs,
                }),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_error {
            close_all(sessions_seen.iter(), parallelism).await;
            return Err(err);
        }

        instances.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(Self {
            name: name.to_string(),
            instances,
        })
    }

    /// Every job of every instance, in `(instance, job)` order.
    pub fn jobs(&self) -> Vec<Job> {
        self.instances
            .iter()
            .flat_map(|instance| instance.jobs.iter().cloned())
            .collect()
    }

    pub fn has_script(&self, kind: ScriptKind) -> bool {
        self.instances
            .iter()
            .any(|instance| instance.jobs_with(kind).next().is_some())
    }

    /// Release every session. Failures are logged and otherwise ignored.
    pub async fn close(self, parallelism: usize) {
        close_all(self.instances.iter().map(|i| &i.session), parallelism).await;
    }
}

async fn close_all<'a>(
    sessions: impl Iterator<Item = &'a Arc<dyn RemoteSession>>,
    parallelism: usize,
) {
    stream::iter(sessions)
        .for_each_concurrent(parallelism, |session| async move {
            if let Err(err) = session.close().await {
                tracing::warn!(instance = %session.instance(), error = %err, "Failed to close session");
            }
        })
        .await;
}
