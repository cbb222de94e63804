// Installation runner
//
// A job runs the install steps in order on a background task. Every status change becomes an
// `InstallEvent` with a strictly increasing sequence number; the event log is kept so that a
// late subscriber first receives a replay and then the live tail, with nothing lost between.
// Cancellation is a flag checked between steps.

pub mod env_file;
pub mod files;
pub mod plan;
pub mod steps;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

use crate::models::wizard::MissingStep;
use steps::{InstallContext, InstallStep};

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("installation data incomplete: {} step missing", .0.step.id())]
    MissingStep(MissingStep),
    #[error("an installation is already running")]
    AlreadyRunning,
    #[error("no installation is running")]
    NotRunning,
    #[error("stored secret could not be opened")]
    Secret(#[source] anyhow::Error),
}

// =============================================================================
// Steps and events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStepName {
    Env,
    Migrate,
    Seed,
    Roles,
    Admin,
    Settings,
    Storage,
    Complete,
}

impl InstallStepName {
    pub const ALL: [InstallStepName; 8] = [
        InstallStepName::Env,
        InstallStepName::Migrate,
        InstallStepName::Seed,
        InstallStepName::Roles,
        InstallStepName::Admin,
        InstallStepName::Settings,
        InstallStepName::Storage,
        InstallStepName::Complete,
    ];

    pub fn id(self) -> &'static str {
        match self {
            InstallStepName::Env => "env",
            InstallStepName::Migrate => "migrate",
            InstallStepName::Seed => "seed",
            InstallStepName::Roles => "roles",
            InstallStepName::Admin => "admin",
            InstallStepName::Settings => "settings",
            InstallStepName::Storage => "storage",
            InstallStepName::Complete => "complete",
        }
    }

    /// DOM id of the step's row on the install page.
    pub fn element_id(self) -> String {
        format!("step-{}", self.id())
    }

    pub fn label_key(self) -> String {
        format!("installation.step_{}", self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl StepStatus {
    pub fn label_key(self) -> &'static str {
        match self {
            StepStatus::Pending => "installation.status_pending",
            StepStatus::Running => "installation.status_running",
            StepStatus::Success => "installation.status_success",
            StepStatus::Failed => "installation.status_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InstallEvent {
    Step {
        job_id: String,
        sequence: u64,
        step: InstallStepName,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Finished {
        job_id: String,
        sequence: u64,
        success: bool,
        cancelled: bool,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        redirect: Option<String>,
    },
}

impl InstallEvent {
    pub fn sequence(&self) -> u64 {
        match self {
            InstallEvent::Step { sequence, .. } | InstallEvent::Finished { sequence, .. } => {
                *sequence
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallEvent::Finished { .. })
    }

    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            InstallEvent::Step { .. } => "step",
            InstallEvent::Finished { .. } => "finished",
        }
    }
}

/// What the completion page shows as actually persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallSummary {
    pub admin_name: String,
    pub admin_email: String,
    pub site_name: String,
    pub installed_at: DateTime<Utc>,
}

/// Terminal messages in the wizard's locale.
#[derive(Debug, Clone)]
pub struct RunMessages {
    pub completed: String,
    pub failed: String,
    pub cancelled: String,
    pub redirect_on_success: String,
}

// =============================================================================
// Job
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub step: InstallStepName,
    pub element_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub running: bool,
    pub cancel_requested: bool,
    pub last_sequence: u64,
    pub steps: Vec<StepSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<InstallEvent>,
}

struct JobLog {
    events: Vec<InstallEvent>,
    steps: Vec<StepSnapshot>,
    finished: Option<InstallEvent>,
    finished_at: Option<Instant>,
    summary: Option<InstallSummary>,
}

pub struct InstallJob {
    id: String,
    cancel: AtomicBool,
    log: Mutex<JobLog>,
    tx: broadcast::Sender<InstallEvent>,
}

impl InstallJob {
    fn new(step_names: &[InstallStepName]) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            id: Uuid::new_v4().to_string(),
            cancel: AtomicBool::new(false),
            log: Mutex::new(JobLog {
                events: Vec::new(),
                steps: step_names
                    .iter()
                    .map(|s| StepSnapshot {
                        step: *s,
                        element_id: s.element_id(),
                        status: StepStatus::Pending,
                        message: None,
                    })
                    .collect(),
                finished: None,
                finished_at: None,
                summary: None,
            }),
            tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JobLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.lock().finished.is_none()
    }

    /// Still running, or finished less than `grace` ago.
    pub fn is_observable(&self, grace: Duration) -> bool {
        match self.lock().finished_at {
            None => true,
            Some(at) => at.elapsed() < grace,
        }
    }

    pub fn summary(&self) -> Option<InstallSummary> {
        self.lock().summary.clone()
    }

    pub fn events(&self) -> Vec<InstallEvent> {
        self.lock().events.clone()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let log = self.lock();
        JobSnapshot {
            job_id: self.id.clone(),
            running: log.finished.is_none(),
            cancel_requested: self.is_cancel_requested(),
            last_sequence: log.events.len() as u64,
            steps: log.steps.clone(),
            finished: log.finished.clone(),
        }
    }

    /// Replay of everything published so far plus a receiver for what follows.
    ///
    /// Publishing happens under the same lock, so the replay and the receiver neither
    /// overlap nor leave a gap.
    pub fn subscribe(&self) -> (Vec<InstallEvent>, broadcast::Receiver<InstallEvent>) {
        let log = self.lock();
        (log.events.clone(), self.tx.subscribe())
    }

    fn publish_step(&self, step: InstallStepName, status: StepStatus, message: Option<String>) {
        let mut log = self.lock();
        let sequence = log.events.len() as u64 + 1;
        if let Some(snapshot) = log.steps.iter_mut().find(|s| s.step == step) {
            snapshot.status = status;
            snapshot.message = message.clone();
        }
        let event = InstallEvent::Step {
            job_id: self.id.clone(),
            sequence,
            step,
            status,
            message,
        };
        log.events.push(event.clone());
        let _ = self.tx.send(event);
    }

    fn finish(
        &self,
        success: bool,
        cancelled: bool,
        message: String,
        redirect: Option<String>,
        summary: Option<InstallSummary>,
    ) {
        let mut log = self.lock();
        let event = InstallEvent::Finished {
            job_id: self.id.clone(),
            sequence: log.events.len() as u64 + 1,
            success,
            cancelled,
            message,
            redirect,
        };
        log.events.push(event.clone());
        log.finished = Some(event.clone());
        log.finished_at = Some(Instant::now());
        log.summary = summary;
        let _ = self.tx.send(event);
    }
}

/// Run `steps` in order, stopping at the first failure or at a cancel request.
pub async fn run_job(
    job: Arc<InstallJob>,
    steps: Vec<Box<dyn InstallStep>>,
    mut ctx: InstallContext,
    messages: RunMessages,
) {
    info!(
        "[PHASE: install] [STEP: start] job {} started ({} steps)",
        job.id(),
        steps.len()
    );

    for step in &steps {
        if job.is_cancel_requested() {
            warn!(
                "[PHASE: install] [STEP: cancel] job {} cancelled before {}",
                job.id(),
                step.name().id()
            );
            ctx.close().await;
            job.finish(false, true, messages.cancelled.clone(), None, None);
            return;
        }

        job.publish_step(step.name(), StepStatus::Running, None);
        match step.run(&mut ctx).await {
            Ok(detail) => {
                info!(
                    "[PHASE: install] [STEP: {}] success",
                    step.name().id()
                );
                job.publish_step(step.name(), StepStatus::Success, detail);
            }
            Err(e) => {
                error!(
                    "[PHASE: install] [STEP: {}] failed: {:#}",
                    step.name().id(),
                    e
                );
                let message = format!("{}: {}", messages.failed, e);
                job.publish_step(step.name(), StepStatus::Failed, Some(e.to_string()));
                ctx.close().await;
                job.finish(false, false, message, None, None);
                return;
            }
        }
    }

    ctx.close().await;
    let summary = ctx.summary();
    info!(
        "[PHASE: install] [STEP: complete] job {} finished successfully",
        job.id()
    );
    job.finish(
        true,
        false,
        messages.completed.clone(),
        Some(messages.redirect_on_success.clone()),
        Some(summary),
    );
}

// =============================================================================
// Engine + manager
// =============================================================================

/// Supplies the ordered steps of an installation.
pub trait InstallEngine: Send + Sync {
    fn steps(&self) -> Vec<Box<dyn InstallStep>>;
}

/// How long a finished job stays observable unless configured otherwise.
pub const FINISHED_JOB_GRACE: Duration = Duration::from_secs(600);

/// Owns the current job; at most one runs at a time.
///
/// The last job is kept for the completion page. Its status and event feed stay
/// observable only while it runs and for `finished_grace` afterwards.
pub struct InstallManager {
    current: tokio::sync::Mutex<Option<Arc<InstallJob>>>,
    finished_grace: Duration,
}

impl Default for InstallManager {
    fn default() -> Self {
        Self::with_grace(FINISHED_JOB_GRACE)
    }
}

impl InstallManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grace(finished_grace: Duration) -> Self {
        Self {
            current: tokio::sync::Mutex::new(None),
            finished_grace,
        }
    }

    /// Spawn a job for `engine`'s steps.
    pub async fn start(
        &self,
        engine: &dyn InstallEngine,
        ctx: InstallContext,
        messages: RunMessages,
    ) -> Result<Arc<InstallJob>, InstallError> {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|job| job.is_running()) {
            return Err(InstallError::AlreadyRunning);
        }

        let steps = engine.steps();
        let names: Vec<InstallStepName> = steps.iter().map(|s| s.name()).collect();
        let job = Arc::new(InstallJob::new(&names));
        *current = Some(job.clone());
        drop(current);

        let span = tracing::info_span!("install_job", job_id = %job.id());
        tokio::spawn(run_job(job.clone(), steps, ctx, messages).instrument(span));
        Ok(job)
    }

    pub async fn cancel(&self) -> Result<Arc<InstallJob>, InstallError> {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(job) if job.is_running() => {
                info!("[PHASE: install] [STEP: cancel] cancel requested for job {}", job.id());
                job.request_cancel();
                Ok(job.clone())
            }
            _ => Err(InstallError::NotRunning),
        }
    }

    pub async fn current(&self) -> Option<Arc<InstallJob>> {
        self.current.lock().await.clone()
    }

    /// The current job while its status and events may still be served.
    pub async fn observable(&self) -> Option<Arc<InstallJob>> {
        self.current
            .lock()
            .await
            .as_ref()
            .filter(|job| job.is_observable(self.finished_grace))
            .cloned()
    }

    /// Summary of the last successful job, if any.
    pub async fn last_summary(&self) -> Option<InstallSummary> {
        self.current.lock().await.as_ref().and_then(|job| job.summary())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, PathsConfig};
    use crate::security::secret_protector::SecretProtector;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Step with a scripted outcome; optionally parks until released.
    pub(crate) struct ScriptedStep {
        pub name: InstallStepName,
        pub fail_with: Option<&'static str>,
        pub gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl InstallStep for ScriptedStep {
        fn name(&self) -> InstallStepName {
            self.name
        }

        async fn run(&self, _ctx: &mut InstallContext) -> anyhow::Result<Option<String>> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match self.fail_with {
                Some(msg) => Err(anyhow::anyhow!(msg)),
                None => Ok(None),
            }
        }
    }

    pub(crate) struct ScriptedEngine {
        pub fail_at: Option<InstallStepName>,
        pub gate_at: Option<(InstallStepName, Arc<Notify>)>,
    }

    impl InstallEngine for ScriptedEngine {
        fn steps(&self) -> Vec<Box<dyn InstallStep>> {
            InstallStepName::ALL
                .iter()
                .map(|name| {
                    Box::new(ScriptedStep {
                        name: *name,
                        fail_with: (self.fail_at == Some(*name)).then_some("boom"),
                        gate: self
                            .gate_at
                            .as_ref()
                            .filter(|(n, _)| n == name)
                            .map(|(_, g)| g.clone()),
                    }) as Box<dyn InstallStep>
                })
                .collect()
        }
    }

    pub(crate) fn messages() -> RunMessages {
        RunMessages {
            completed: "Installation completed successfully!".to_string(),
            failed: "Installation failed".to_string(),
            cancelled: "Installation cancelled".to_string(),
            redirect_on_success: "/login".to_string(),
        }
    }

    pub(crate) async fn context() -> InstallContext {
        let secrets = SecretProtector::ephemeral();
        let state = plan::tests::full_state(&secrets).await;
        let plan = plan::InstallPlan::from_state(&state, &secrets, "http://localhost".to_string())
            .await
            .unwrap();
        InstallContext::new(plan, PathsConfig::default(), DatabaseConfig::default())
    }

    pub(crate) async fn wait_finished(job: &InstallJob) -> InstallEvent {
        for _ in 0..200 {
            if let Some(done) = job.snapshot().finished {
                return done;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not finish");
    }

    async fn wait_running(job: &InstallJob, name: InstallStepName) {
        for _ in 0..200 {
            if job
                .snapshot()
                .steps
                .iter()
                .any(|s| s.step == name && s.status == StepStatus::Running)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("step {} never started", name.id());
    }

    fn step_events(events: &[InstallEvent]) -> Vec<(InstallStepName, StepStatus)> {
        events
            .iter()
            .filter_map(|e| match e {
                InstallEvent::Step { step, status, .. } => Some((*step, *status)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn element_ids_are_prefixed() {
        let ids: Vec<String> = InstallStepName::ALL.iter().map(|s| s.element_id()).collect();
        assert_eq!(ids[0], "step-env");
        assert_eq!(ids[7], "step-complete");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = InstallEvent::Step {
            job_id: "j".to_string(),
            sequence: 3,
            step: InstallStepName::Migrate,
            status: StepStatus::Running,
            message: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step");
        assert_eq!(json["step"], "migrate");
        assert_eq!(json["status"], "running");
        assert!(json.get("message").is_none());
    }

    #[tokio::test]
    async fn successful_run_emits_ordered_events() {
        let manager = InstallManager::new();
        let engine = ScriptedEngine {
            fail_at: None,
            gate_at: None,
        };
        let job = manager.start(&engine, context().await, messages()).await.unwrap();

        let done = wait_finished(&job).await;
        match done {
            InstallEvent::Finished {
                success,
                cancelled,
                ref message,
                ref redirect,
                ..
            } => {
                assert!(success);
                assert!(!cancelled);
                assert_eq!(message, "Installation completed successfully!");
                assert_eq!(redirect.as_deref(), Some("/login"));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let events = job.events();
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence()).collect();
        assert_eq!(sequences, (1..=17).collect::<Vec<u64>>());

        let expected: Vec<(InstallStepName, StepStatus)> = InstallStepName::ALL
            .iter()
            .flat_map(|s| [(*s, StepStatus::Running), (*s, StepStatus::Success)])
            .collect();
        assert_eq!(step_events(&events), expected);

        let summary = manager.last_summary().await.unwrap();
        assert_eq!(summary.admin_email, "jane@example.com");
        assert_eq!(summary.site_name, "Acme");
    }

    #[tokio::test]
    async fn finished_job_stops_being_observable_after_the_grace_period() {
        let engine = ScriptedEngine {
            fail_at: None,
            gate_at: None,
        };

        let lingering = InstallManager::with_grace(Duration::from_secs(600));
        let job = lingering.start(&engine, context().await, messages()).await.unwrap();
        wait_finished(&job).await;
        assert!(lingering.observable().await.is_some());

        let expired = InstallManager::with_grace(Duration::ZERO);
        let gate = Arc::new(Notify::new());
        let gated = ScriptedEngine {
            fail_at: None,
            gate_at: Some((InstallStepName::Env, gate.clone())),
        };
        let job = expired.start(&gated, context().await, messages()).await.unwrap();
        assert!(expired.observable().await.is_some());
        gate.notify_one();
        wait_finished(&job).await;

        assert!(expired.observable().await.is_none());
        // The completion page still reads the kept job.
        assert!(expired.current().await.is_some());
        assert_eq!(expired.last_summary().await.unwrap().site_name, "Acme");
    }

    #[tokio::test]
    async fn failure_stops_the_run_and_leaves_later_steps_pending() {
        let manager = InstallManager::new();
        let engine = ScriptedEngine {
            fail_at: Some(InstallStepName::Seed),
            gate_at: None,
        };
        let job = manager.start(&engine, context().await, messages()).await.unwrap();

        match wait_finished(&job).await {
            InstallEvent::Finished {
                success, message, ..
            } => {
                assert!(!success);
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let snapshot = job.snapshot();
        let status_of = |name| {
            snapshot
                .steps
                .iter()
                .find(|s| s.step == name)
                .map(|s| s.status)
                .unwrap()
        };
        assert_eq!(status_of(InstallStepName::Migrate), StepStatus::Success);
        assert_eq!(status_of(InstallStepName::Seed), StepStatus::Failed);
        assert_eq!(status_of(InstallStepName::Roles), StepStatus::Pending);
        assert_eq!(status_of(InstallStepName::Complete), StepStatus::Pending);
        assert!(manager.last_summary().await.is_none());
    }

    #[tokio::test]
    async fn cancel_takes_effect_before_the_next_step() {
        let manager = InstallManager::new();
        let gate = Arc::new(Notify::new());
        let engine = ScriptedEngine {
            fail_at: None,
            gate_at: Some((InstallStepName::Migrate, gate.clone())),
        };
        let job = manager.start(&engine, context().await, messages()).await.unwrap();

        wait_running(&job, InstallStepName::Migrate).await;

        // A second start while the first is parked is refused.
        assert!(matches!(
            manager.start(&engine, context().await, messages()).await,
            Err(InstallError::AlreadyRunning)
        ));

        manager.cancel().await.unwrap();
        gate.notify_one();

        match wait_finished(&job).await {
            InstallEvent::Finished {
                success, cancelled, ..
            } => {
                assert!(!success);
                assert!(cancelled);
            }
            other => panic!("unexpected: {:?}", other),
        }
        let started: Vec<InstallStepName> = step_events(&job.events())
            .into_iter()
            .filter(|(_, st)| *st == StepStatus::Running)
            .map(|(s, _)| s)
            .collect();
        assert_eq!(started, vec![InstallStepName::Env, InstallStepName::Migrate]);
        assert!(matches!(manager.cancel().await, Err(InstallError::NotRunning)));
    }

    #[tokio::test]
    async fn late_subscriber_gets_replay_then_live_events() {
        let manager = InstallManager::new();
        let gate = Arc::new(Notify::new());
        let engine = ScriptedEngine {
            fail_at: None,
            gate_at: Some((InstallStepName::Roles, gate.clone())),
        };
        let job = manager.start(&engine, context().await, messages()).await.unwrap();

        wait_running(&job, InstallStepName::Roles).await;

        let (replay, mut rx) = job.subscribe();
        assert!(!replay.is_empty());
        gate.notify_one();

        let mut seen: Vec<u64> = replay.iter().map(|e| e.sequence()).collect();
        loop {
            let event = rx.recv().await.unwrap();
            seen.push(event.sequence());
            if event.is_terminal() {
                break;
            }
        }
        let expected: Vec<u64> = (1..=seen.len() as u64).collect();
        assert_eq!(seen, expected);
    }
}
