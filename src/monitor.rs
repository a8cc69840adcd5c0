//! Job monitor: the orchestrating control loop.
//!
//! One [`JobMonitor`] instance watches one training job. It seeds the
//! overall-status key, polls every learner's status sequence, folds new
//! events into the overall status through the transition table, keeps the
//! trainer informed, and tears the job down once it reaches a terminal
//! status.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::backoff::retry_notify;
use crate::cluster::{ClusterConnector, ComputeCluster, DeploymentHealth};
use crate::codec::{self, decode_status, StatusUpdate};
use crate::config::{MonitorConfig, MonitorTuning};
use crate::coordination::{
    learner_status_path, overall_status_path, CoordinationStore, StoreConnector,
};
use crate::error::{MonitorError, Result};
use crate::lifecycle::{JobKillRequest, JobTerminator, LifecycleConnector};
use crate::metrics::MonitorMetrics;
use crate::status::{is_transition_allowed, TrainingStatus};
use crate::trainer::{StatusReporter, TrainerConnector, UpdateStatusRequest};

/// Identity of one monitored training job. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct JobIdentity {
    pub training_id: String,
    pub user_id: String,
    pub job_name: String,
    pub num_learners: u32,
    /// Whether the compute layer itself manages distributed coordination,
    /// and with it the learners' lifecycle.
    pub native_distribution: bool,
}

impl JobIdentity {
    fn validate(&self) -> Result<()> {
        if self.training_id.is_empty() {
            return Err(MonitorError::InvalidIdentity {
                reason: "training_id is empty".to_string(),
            });
        }
        if self.job_name.is_empty() {
            return Err(MonitorError::InvalidIdentity {
                reason: "job_name is empty".to_string(),
            });
        }
        if self.num_learners == 0 {
            return Err(MonitorError::InvalidIdentity {
                reason: "a job needs at least one learner".to_string(),
            });
        }
        Ok(())
    }

    fn kill_request(&self) -> JobKillRequest {
        JobKillRequest {
            name: self.job_name.clone(),
            training_id: self.training_id.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

/// External collaborators handed to the monitor at construction.
pub struct MonitorDeps {
    pub cluster: Arc<dyn ClusterConnector>,
    pub store: Arc<dyn StoreConnector>,
    pub trainer: Arc<dyn TrainerConnector>,
    pub lifecycle: Arc<dyn LifecycleConnector>,
    pub metrics: Arc<MonitorMetrics>,
}

pub struct JobMonitor {
    identity: JobIdentity,
    tuning: MonitorTuning,
    store: Arc<dyn CoordinationStore>,
    cluster: Arc<dyn ComputeCluster>,
    reporter: StatusReporter,
    terminator: JobTerminator,
    metrics: Arc<MonitorMetrics>,
    terminal_learners: AtomicU64,
}

impl JobMonitor {
    /// Verifies the configuration, establishes every collaborator connection
    /// and returns a ready monitor.
    ///
    /// On an unrecoverable connection failure the job is reported FAILED to
    /// the trainer (with a distinct error code per failure type) and torn
    /// down before the error is returned; a monitor never starts
    /// half-initialized.
    pub async fn connect(
        identity: JobIdentity,
        config: MonitorConfig,
        deps: MonitorDeps,
    ) -> Result<Arc<Self>> {
        info!(training_id = %identity.training_id, "starting job monitor");
        config.validate()?;
        identity.validate()?;

        let reporter = StatusReporter::new(Arc::clone(&deps.trainer), Arc::clone(&deps.metrics))
            .with_policy(config.tuning.remote_call_backoff.clone());
        let terminator =
            JobTerminator::new(Arc::clone(&deps.lifecycle), Arc::clone(&deps.metrics))
                .with_policy(config.tuning.remote_call_backoff.clone())
                .with_teardown_delay(config.tuning.teardown_delay);

        let cluster = match deps.cluster.connect().await {
            Ok(cluster) => cluster,
            Err(err) => {
                deps.metrics.record_cluster_connectivity_failure();
                error!(
                    training_id = %identity.training_id,
                    error = %err,
                    "failed to connect to the compute cluster"
                );
                fail_and_teardown(&identity, &reporter, &terminator, codec::ERR_CLUSTER_CONNECTION)
                    .await;
                return Err(MonitorError::ClusterConnection(err));
            }
        };

        let store_result = retry_notify(
            &config.tuning.store_connect_backoff,
            || {
                let connector = Arc::clone(&deps.store);
                let coordination = config.coordination.clone();
                async move { connector.connect(&coordination).await }
            },
            |err, wait| {
                error!(
                    training_id = %identity.training_id,
                    error = %err,
                    retry_in = ?wait,
                    "failed to establish connection with the coordination store"
                );
            },
        )
        .await;

        let store = match store_result {
            Ok(store) => store,
            Err(err) => {
                deps.metrics.record_store_connectivity_failure();
                error!(
                    training_id = %identity.training_id,
                    error = %err,
                    "could not reach the coordination store; shutting the job down"
                );
                fail_and_teardown(&identity, &reporter, &terminator, codec::ERR_STORE_CONNECTION)
                    .await;
                return Err(MonitorError::StoreConnection(err));
            }
        };

        Ok(Arc::new(Self {
            identity,
            tuning: config.tuning,
            store,
            cluster,
            reporter,
            terminator,
            metrics: deps.metrics,
            terminal_learners: AtomicU64::new(0),
        }))
    }

    /// Launches the job-started probe and the status-aggregation loop as
    /// independent tasks and returns immediately.
    pub fn start(self: &Arc<Self>) {
        let probe = Arc::clone(self);
        tokio::spawn(async move { probe.check_job_started().await });
        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.monitor_job().await });
    }

    /// Number of learners observed in a terminal status so far.
    pub fn terminal_learner_count(&self) -> u64 {
        self.terminal_learners.load(Ordering::SeqCst)
    }

    /// Runs the status-aggregation loop. Returns once the overall job status
    /// is terminal and teardown has been issued; otherwise polls until the
    /// process is torn down.
    pub async fn monitor_job(&self) {
        self.bootstrap_overall_status().await;

        let mut processed: HashMap<u32, usize> = HashMap::new();
        for learner in 1..=self.identity.num_learners {
            processed.insert(learner, 0);
        }

        let mut ticker = tokio::time::interval(self.tuning.poll_interval);
        loop {
            ticker.tick().await;

            for learner in 1..=self.identity.num_learners {
                let path = learner_status_path(&self.identity.training_id, learner);
                let events = match self.store.list_sequence(&path).await {
                    Ok(events) => events,
                    Err(err) => {
                        self.metrics.record_store_connectivity_failure();
                        error!(
                            training_id = %self.identity.training_id,
                            learner,
                            error = %err,
                            "could not fetch the learner status sequence from the coordination store"
                        );
                        continue;
                    }
                };

                let offset = processed.entry(learner).or_insert(0);
                while *offset < events.len() {
                    let raw = &events[*offset];
                    let monitoring_complete =
                        match self.process_learner_event(learner, raw).await {
                            Ok(monitoring_complete) => monitoring_complete,
                            Err(err) => {
                                warn!(
                                    training_id = %self.identity.training_id,
                                    learner,
                                    error = %err,
                                    "learner status event was not applied"
                                );
                                false
                            }
                        };
                    *offset += 1;

                    if monitoring_complete {
                        info!(
                            training_id = %self.identity.training_id,
                            "job reached a terminal status; monitoring complete"
                        );
                        return;
                    }
                }
            }
        }
    }

    /// Seeds the default overall status. An already-present key means the
    /// monitor restarted, which is normal.
    async fn bootstrap_overall_status(&self) {
        let key = overall_status_path(&self.identity.training_id);
        let default_status = TrainingStatus::NotStarted.to_string();

        let seeded = retry_notify(
            &self.tuning.bootstrap_backoff,
            || {
                let store = Arc::clone(&self.store);
                let key = key.clone();
                let value = default_status.clone();
                async move { store.put_if_absent(&key, &value).await }
            },
            |_err, _wait| {
                self.metrics.record_store_connectivity_failure();
            },
        )
        .await;

        match seeded {
            Ok(true) => debug!(
                training_id = %self.identity.training_id,
                key = %key,
                "seeded the default overall job status"
            ),
            Ok(false) => warn!(
                training_id = %self.identity.training_id,
                key = %key,
                "overall job status already present; the monitor probably restarted"
            ),
            Err(err) => warn!(
                training_id = %self.identity.training_id,
                key = %key,
                error = %err,
                "could not seed the default overall job status"
            ),
        }
    }

    /// Folds one learner status event into the overall job status. Returns
    /// true once the overall status went terminal and teardown ran.
    async fn process_learner_event(&self, learner: u32, raw: &str) -> Result<bool> {
        let event = decode_status(raw)?;
        let learner_status = event.status;
        debug!(
            training_id = %self.identity.training_id,
            learner,
            status = %learner_status,
            "processing learner status event"
        );

        let status_key = overall_status_path(&self.identity.training_id);
        let current_raw = self
            .store
            .get(&status_key)
            .await?
            .filter(|value| !value.is_empty())
            .ok_or_else(|| MonitorError::EmptyOverallStatus {
                key: status_key.clone(),
            })?;
        let current = decode_status(&current_raw)?.status;

        let mut monitoring_complete = false;
        if is_transition_allowed(current, learner_status) {
            info!(
                training_id = %self.identity.training_id,
                from = %current,
                to = %learner_status,
                "transition allowed; updating the overall job status"
            );
            match self
                .store
                .compare_and_swap(&status_key, raw, &current_raw)
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!(
                    training_id = %self.identity.training_id,
                    from = %current,
                    to = %learner_status,
                    "overall status changed concurrently; conditional write rejected"
                ),
                Err(err) => {
                    self.metrics.record_store_connectivity_failure();
                    error!(
                        training_id = %self.identity.training_id,
                        error = %err,
                        "conditional write of the overall job status failed"
                    );
                }
            }
            monitoring_complete = self.handle_overall_status(&event).await;
        } else {
            warn!(
                training_id = %self.identity.training_id,
                from = %current,
                to = %learner_status,
                "transition not allowed; ignoring learner status event"
            );
        }

        // Counted after the termination decision: the learner whose event
        // drove the job terminal has not yet cleaned itself up.
        if learner_status.is_terminal() {
            self.terminal_learners.fetch_add(1, Ordering::SeqCst);
        }

        Ok(monitoring_complete)
    }

    /// Pushes the new overall status to the trainer and, if it is terminal,
    /// decides when to tear the job down. Returns true when the job needs no
    /// further monitoring.
    async fn handle_overall_status(&self, update: &StatusUpdate) -> bool {
        let status = update.status;
        let request = UpdateStatusRequest {
            training_id: self.identity.training_id.clone(),
            user_id: self.identity.user_id.clone(),
            status,
            timestamp: update.timestamp,
            status_message: update.status_message.clone(),
            error_code: update.error_code.clone(),
        };
        if let Err(err) = self.reporter.report(&request).await {
            error!(
                training_id = %self.identity.training_id,
                status = %status,
                error = %err,
                "failed to record the new job status with the trainer"
            );
        }

        if !status.is_terminal() {
            return false;
        }

        info!(
            training_id = %self.identity.training_id,
            status = %status,
            native_distribution = self.identity.native_distribution,
            "overall job status is terminal"
        );

        if self.identity.native_distribution {
            debug!(
                training_id = %self.identity.training_id,
                "learner lifecycle is owned by the compute layer; tearing the job down immediately"
            );
            self.kill_deployed_job().await;
            return true;
        }

        let total = u64::from(self.identity.num_learners);
        if self.terminal_learners.load(Ordering::SeqCst) < total {
            debug!(
                training_id = %self.identity.training_id,
                grace = ?self.tuning.learner_grace_period,
                "waiting once for the remaining learners to finish cleaning up"
            );
            sleep(self.tuning.learner_grace_period).await;
        }
        if self.terminal_learners.load(Ordering::SeqCst) < total {
            debug!(
                training_id = %self.identity.training_id,
                "tearing down learners that did not report a terminal status"
            );
        } else {
            debug!(
                training_id = %self.identity.training_id,
                "all learners reported a terminal status; the job can be torn down safely"
            );
        }
        self.kill_deployed_job().await;
        true
    }

    async fn kill_deployed_job(&self) {
        if let Err(err) = self.terminator.kill(&self.identity.kill_request()).await {
            error!(
                training_id = %self.identity.training_id,
                error = %err,
                "failed to tear down the deployed job"
            );
        }
    }

    /// Watches the deployment while the job is expected to come up. Returns
    /// as soon as the overall status leaves NOT_STARTED; fails and tears the
    /// job down when the image cannot be pulled, when the cluster keeps
    /// lacking resources, or when the job never starts within the attempt
    /// budget.
    pub async fn check_job_started(&self) {
        let status_key = overall_status_path(&self.identity.training_id);
        let mut insufficient_resources_seen = 0u32;

        for _ in 0..self.tuning.startup_probe_attempts {
            sleep(self.tuning.startup_probe_interval).await;

            match self.store.get(&status_key).await {
                Ok(Some(raw)) => {
                    if let Ok(update) = decode_status(&raw) {
                        if update.status != TrainingStatus::NotStarted {
                            debug!(
                                training_id = %self.identity.training_id,
                                status = %update.status,
                                "job left NOT_STARTED; startup probe done"
                            );
                            return;
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    self.metrics.record_store_connectivity_failure();
                    warn!(
                        training_id = %self.identity.training_id,
                        error = %err,
                        "startup probe could not read the overall job status"
                    );
                }
            }

            match self.cluster.deployment_health(&self.identity.job_name).await {
                Ok(DeploymentHealth::Starting) | Ok(DeploymentHealth::Running) => {}
                Ok(DeploymentHealth::ImagePullFailed) => {
                    self.metrics.record_image_pull_failure();
                    error!(
                        training_id = %self.identity.training_id,
                        "deployment cannot pull its image; failing the job"
                    );
                    self.fail_job_at_startup(codec::ERR_IMAGE_PULL).await;
                    return;
                }
                Ok(DeploymentHealth::InsufficientResources) => {
                    self.metrics.record_insufficient_resources_failure();
                    insufficient_resources_seen += 1;
                    if insufficient_resources_seen >= self.tuning.insufficient_resources_budget {
                        error!(
                            training_id = %self.identity.training_id,
                            observations = insufficient_resources_seen,
                            "cluster cannot schedule the job; failing it"
                        );
                        self.fail_job_at_startup(codec::ERR_INSUFFICIENT_RESOURCES)
                            .await;
                        return;
                    }
                    warn!(
                        training_id = %self.identity.training_id,
                        observations = insufficient_resources_seen,
                        "deployment is waiting on cluster resources"
                    );
                }
                Err(err) => {
                    self.metrics.record_cluster_connectivity_failure();
                    warn!(
                        training_id = %self.identity.training_id,
                        error = %err,
                        "startup probe could not read the deployment health"
                    );
                }
            }
        }

        error!(
            training_id = %self.identity.training_id,
            attempts = self.tuning.startup_probe_attempts,
            "job never started; failing it"
        );
        self.fail_job_at_startup(codec::ERR_JOB_NOT_STARTED).await;
    }

    async fn fail_job_at_startup(&self, error_code: &str) {
        let key = overall_status_path(&self.identity.training_id);
        let failed = StatusUpdate::with_error(
            TrainingStatus::Failed,
            error_code,
            codec::MSG_INTERNAL_ERROR,
        );
        let expected = TrainingStatus::NotStarted.to_string();
        match self
            .store
            .compare_and_swap(&key, &failed.to_store_value(), &expected)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(
                training_id = %self.identity.training_id,
                "overall status moved while failing the job at startup"
            ),
            Err(err) => {
                self.metrics.record_store_connectivity_failure();
                warn!(
                    training_id = %self.identity.training_id,
                    error = %err,
                    "could not record the startup failure in the coordination store"
                );
            }
        }
        fail_and_teardown(&self.identity, &self.reporter, &self.terminator, error_code).await;
    }
}

/// Reports FAILED with the given error code, then tears the job down. Both
/// failures are only logged; there is no further fallback on this path.
async fn fail_and_teardown(
    identity: &JobIdentity,
    reporter: &StatusReporter,
    terminator: &JobTerminator,
    error_code: &str,
) {
    let update = UpdateStatusRequest {
        training_id: identity.training_id.clone(),
        user_id: identity.user_id.clone(),
        status: TrainingStatus::Failed,
        timestamp: Utc::now(),
        status_message: Some(codec::MSG_INTERNAL_ERROR.to_string()),
        error_code: Some(error_code.to_string()),
    };
    if let Err(err) = reporter.report(&update).await {
        error!(
            training_id = %identity.training_id,
            error = %err,
            "failed to record the FAILED status with the trainer"
        );
    }
    if let Err(err) = terminator.kill(&identity.kill_request()).await {
        error!(
            training_id = %identity.training_id,
            error = %err,
            "failed to tear down the deployed job"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(num_learners: u32) -> JobIdentity {
        JobIdentity {
            training_id: "training-abc123".to_string(),
            user_id: "user-1".to_string(),
            job_name: "learner-job-abc123".to_string(),
            num_learners,
            native_distribution: false,
        }
    }

    #[test]
    fn identity_requires_at_least_one_learner() {
        let err = identity(0).validate().unwrap_err();
        assert!(matches!(err, MonitorError::InvalidIdentity { .. }));
        identity(3).validate().unwrap();
    }

    #[test]
    fn identity_requires_a_training_id_and_job_name() {
        let mut blank = identity(1);
        blank.training_id.clear();
        assert!(blank.validate().is_err());

        let mut blank = identity(1);
        blank.job_name.clear();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn kill_request_carries_the_job_coordinates() {
        let request = identity(2).kill_request();
        assert_eq!(request.training_id, "training-abc123");
        assert_eq!(request.name, "learner-job-abc123");
        assert_eq!(request.user_id, "user-1");
    }
}
