//! Background training jobs.
//!
//! Jobs run off the request path: `submit` records the job, spawns it, and
//! returns immediately. The adapter runtime is bootstrapped lazily through
//! the registry, so the first training request on a cold process loads the
//! base model itself.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, RuntimeError};
use crate::runtime::{RuntimeRegistry, Slot};

use super::{TrainingParams, TrainingReport};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed { report: TrainingReport },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    #[serde(flatten)]
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct TrainingDriver {
    registry: Arc<RuntimeRegistry>,
    jobs: Arc<RwLock<HashMap<Uuid, JobSnapshot>>>,
}

impl TrainingDriver {
    pub fn new(registry: Arc<RuntimeRegistry>) -> Self {
        Self {
            registry,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Queue a training job. Fails fast when the process has no adapter
    /// slot configured or the request carries no data; everything else is
    /// reported through the job's status.
    pub fn submit(&self, params: TrainingParams) -> Result<Uuid> {
        if !self.registry.supports_training() {
            return Err(RuntimeError::TrainingUnsupported);
        }
        if params.examples.is_empty() {
            return Err(RuntimeError::Training(anyhow::anyhow!(
                "training request contains no examples"
            )));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        self.jobs.write().insert(
            id,
            JobSnapshot {
                id,
                status: JobStatus::Queued,
                submitted_at: now,
                updated_at: now,
            },
        );
        info!(job = %id, examples = params.examples.len(), "training job queued");

        let jobs = Arc::clone(&self.jobs);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            set_status(&jobs, id, JobStatus::Running);
            let outcome = tokio::task::spawn_blocking(move || {
                let runtime = registry.acquire(Slot::Adapter)?;
                runtime.train(&params)
            })
            .await;

            let status = match outcome {
                Ok(Ok(report)) => {
                    info!(job = %id, steps = report.steps, final_loss = report.final_loss, "training job completed");
                    JobStatus::Completed { report }
                }
                Ok(Err(e)) => {
                    warn!(job = %id, error = %e, "training job failed");
                    JobStatus::Failed {
                        error: e.to_string(),
                    }
                }
                Err(e) => {
                    warn!(job = %id, error = %e, "training task panicked");
                    JobStatus::Failed {
                        error: format!("training task aborted: {e}"),
                    }
                }
            };
            set_status(&jobs, id, status);
        });

        Ok(id)
    }

    pub fn status(&self, id: Uuid) -> Option<JobSnapshot> {
        self.jobs.read().get(&id).cloned()
    }

    /// Latest training outcome per job, most recently updated first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<_> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs
    }
}

fn set_status(jobs: &RwLock<HashMap<Uuid, JobSnapshot>>, id: Uuid, status: JobStatus) {
    if let Some(job) = jobs.write().get_mut(&id) {
        job.status = status;
        job.updated_at = Utc::now();
    }
}
