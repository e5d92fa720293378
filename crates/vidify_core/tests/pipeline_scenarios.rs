//! End-to-end pipeline runs against a scripted compute backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use vidify_core::dispatch::{StageCompute, StageRequest};
use vidify_core::jobs::{AttemptStatus, JobId, JobState};
use vidify_core::models::{
    standard_definition, standard_variants, HookPoint, PipelineCatalog, StageOverride, Variant,
};
use vidify_core::orchestrator::{
    CatalogEntry, CatalogPublisher, ChannelNotifier, CompletionNotification, ComputeResult,
    HookDecision, HookError, HookResult, LifecycleObserver, Outcome, PipelineEvent,
    PipelineOrchestrator, PipelineOrchestratorBuilder, PublishError, RetryPolicy, StageError,
    SubmitError, SubmitRequest,
};

#[derive(Debug, Clone, Copy)]
enum Step {
    Succeed,
    Fail,
    FailPermanently,
    /// Never finishes within the stage timeout.
    Hang,
    /// Succeeds after the given number of seconds.
    Delay(u64),
}

#[derive(Debug, Clone)]
struct Call {
    job_id: JobId,
    stage: String,
    attempt: u32,
    function: String,
    configuration: Map<String, Value>,
    prior: Vec<String>,
    at: Instant,
}

/// Compute backend following a per-stage script indexed by attempt.
#[derive(Default)]
struct ScriptedCompute {
    plans: HashMap<String, Vec<Step>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedCompute {
    fn new() -> Self {
        Self::default()
    }

    fn plan(mut self, stage: &str, steps: Vec<Step>) -> Self {
        self.plans.insert(stage.to_string(), steps);
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn calls_for(&self, stage: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.stage == stage).collect()
    }
}

#[async_trait]
impl StageCompute for ScriptedCompute {
    async fn invoke(&self, request: StageRequest) -> ComputeResult<Value> {
        let step = self
            .plans
            .get(&request.stage)
            .and_then(|plan| plan.get(request.attempt as usize - 1))
            .copied()
            .unwrap_or(Step::Succeed);

        self.calls.lock().push(Call {
            job_id: request.job_id,
            stage: request.stage.clone(),
            attempt: request.attempt,
            function: request.function.clone(),
            configuration: request.configuration.clone(),
            prior: request.prior_outputs.keys().cloned().collect(),
            at: Instant::now(),
        });

        let output = json!({ "stage": request.stage, "attempt": request.attempt });
        match step {
            Step::Succeed => Ok(output),
            Step::Fail => Err(StageError::failure(format!("{} broke", request.stage))),
            Step::FailPermanently => {
                Err(StageError::failure(format!("{} rejected input", request.stage)).permanent())
            }
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(output)
            }
            Step::Delay(secs) => {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                Ok(output)
            }
        }
    }
}

fn builder(compute: &Arc<ScriptedCompute>) -> PipelineOrchestratorBuilder {
    PipelineOrchestrator::builder()
        .compute_arc(compute.clone())
        .stage_timeout(Duration::from_secs(30))
}

fn resolutions(config: &Map<String, Value>) -> Vec<(String, String)> {
    config["resolutions"]
        .as_array()
        .map(|ladder| {
            ladder
                .iter()
                .map(|r| {
                    (
                        r["name"].as_str().unwrap_or_default().to_string(),
                        r["bitrate"].as_str().unwrap_or_default().to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<(String, PipelineEvent)>) -> Vec<(String, PipelineEvent)> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn quick_preview_runs_single_rung_without_enhancement() {
    let compute = Arc::new(ScriptedCompute::new());
    let orchestrator = builder(&compute).build().unwrap();

    let effective = orchestrator.effective_config(Some("quick-preview")).unwrap();
    let transcoding = effective.stage("transcoding").unwrap();
    assert_eq!(
        resolutions(&transcoding.configuration),
        vec![("360p".to_string(), "800k".to_string())]
    );
    assert!(!effective.is_enabled("enhancement"));

    let id = orchestrator
        .submit(SubmitRequest::new("videos/preview.mp4").variant("quick-preview"))
        .unwrap();
    let job = orchestrator.wait(id).await.unwrap();

    assert_eq!(job.state, JobState::Succeeded);
    assert!(!job.stages.iter().any(|s| s == "enhancement"));
    let dispatched = compute.calls_for("transcoding");
    assert_eq!(dispatched.len(), 1);
    assert_eq!(resolutions(&dispatched[0].configuration).len(), 1);
    assert!(compute.calls_for("enhancement").is_empty());
}

#[tokio::test(start_paused = true)]
async fn premium_adds_4k_and_enhancement() {
    let compute = Arc::new(ScriptedCompute::new());
    let orchestrator = builder(&compute).build().unwrap();

    let effective = orchestrator.effective_config(Some("premium")).unwrap();
    let ladder = resolutions(&effective.stage("transcoding").unwrap().configuration);
    assert!(ladder.contains(&("4K".to_string(), "15000k".to_string())));

    let enhancement = effective.stage("enhancement").unwrap();
    assert!(enhancement.enabled);
    for flag in ["denoising", "stabilization", "color_correction", "audio_normalization"] {
        assert_eq!(enhancement.configuration[flag], json!(true), "{flag}");
    }

    let id = orchestrator
        .submit(SubmitRequest::new("videos/feature.mov").variant("premium"))
        .unwrap();
    let job = orchestrator.wait(id).await.unwrap();

    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(compute.calls_for("enhancement").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn validation_failure_is_never_retried() {
    let compute = Arc::new(ScriptedCompute::new().plan("validation", vec![Step::Fail, Step::Succeed]));
    let orchestrator = builder(&compute).build().unwrap();

    let id = orchestrator.submit(SubmitRequest::new("videos/corrupt.mp4")).unwrap();
    let job = orchestrator.wait(id).await.unwrap();

    match &job.state {
        JobState::Failed { stage, reason } => {
            assert_eq!(stage, "validation");
            assert!(reason.contains("validation broke"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    let record = job.stage_result("validation").unwrap();
    assert_eq!(record.attempts, 1);
    assert_eq!(record.retries(), 0);
    assert_eq!(compute.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transcoding_succeeds_on_third_attempt_after_timeouts() {
    let compute = Arc::new(
        ScriptedCompute::new().plan("transcoding", vec![Step::Hang, Step::Hang, Step::Succeed]),
    );
    let orchestrator = builder(&compute).build().unwrap();

    let id = orchestrator.submit(SubmitRequest::new("videos/long.mp4")).unwrap();
    let job = orchestrator.wait(id).await.unwrap();

    assert_eq!(job.state, JobState::Succeeded);
    let record = job.stage_result("transcoding").unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(record.status, AttemptStatus::Succeeded);
    assert_eq!(record.output.as_ref().unwrap()["attempt"], json!(3));
    assert!(compute.calls_for("distribution").len() == 1);
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test]
async fn unknown_variant_creates_no_job() {
    let compute = Arc::new(ScriptedCompute::new());
    let orchestrator = builder(&compute).build().unwrap();

    let err = orchestrator
        .submit(SubmitRequest::new("videos/x.mp4").variant("ultra-hd"))
        .unwrap_err();

    assert_eq!(err, SubmitError::UnknownVariant("ultra-hd".into()));
    assert!(orchestrator.active_jobs().is_empty());
    assert!(compute.calls().is_empty());
}

#[tokio::test]
async fn disabled_dependency_is_rejected_at_submission() {
    let variants = standard_variants().with_variant(
        "skip-validation",
        Variant::new("Trust uploads").with_override("validation", StageOverride::enabled(false)),
    );
    let catalog = PipelineCatalog::new(standard_definition(), variants).unwrap();
    let compute = Arc::new(ScriptedCompute::new());
    let orchestrator = builder(&compute).catalog(catalog).build().unwrap();

    let err = orchestrator
        .submit(SubmitRequest::new("videos/x.mp4").variant("skip-validation"))
        .unwrap_err();

    assert!(matches!(
        err,
        SubmitError::DependencyViolation { ref dependency, .. } if dependency == "validation"
    ));
    assert!(orchestrator.active_jobs().is_empty());
}

#[test]
fn submit_outside_runtime_fails() {
    let compute = Arc::new(ScriptedCompute::new());
    let orchestrator = builder(&compute).build().unwrap();

    assert_eq!(
        orchestrator.submit(SubmitRequest::new("videos/x.mp4")),
        Err(SubmitError::NoRuntime)
    );
}

#[tokio::test(start_paused = true)]
async fn stages_run_strictly_in_order() {
    let compute = Arc::new(ScriptedCompute::new().plan("analysis", vec![Step::Fail, Step::Delay(3)]));
    let orchestrator = builder(&compute).build().unwrap();

    let id = orchestrator.submit(SubmitRequest::new("videos/ordered.mp4")).unwrap();
    let job = orchestrator.wait(id).await.unwrap();
    assert_eq!(job.state, JobState::Succeeded);

    // Each dispatch sees exactly the outputs of the stages before it.
    for call in compute.calls() {
        let index = job.stages.iter().position(|s| *s == call.stage).unwrap();
        let mut expected: Vec<String> = job.stages[..index].to_vec();
        expected.sort();
        assert_eq!(call.prior, expected, "{} attempt {}", call.stage, call.attempt);
    }

    let first_calls: Vec<String> = compute
        .calls()
        .into_iter()
        .filter(|c| c.attempt == 1)
        .map(|c| c.stage)
        .collect();
    assert_eq!(first_calls, job.stages);
}

#[tokio::test(start_paused = true)]
async fn in_flight_never_exceeds_ceiling() {
    let compute = Arc::new(
        ScriptedCompute::new()
            .plan("validation", vec![Step::Delay(5)])
            .plan("transcoding", vec![Step::Delay(20)]),
    );
    let orchestrator = builder(&compute).max_concurrency(3).build().unwrap();

    let ids: Vec<JobId> = (0..10)
        .map(|i| {
            orchestrator
                .submit(SubmitRequest::new(format!("videos/batch-{i}.mp4")))
                .unwrap()
        })
        .collect();

    for id in ids {
        let job = orchestrator.wait(id).await.unwrap();
        assert_eq!(job.state, JobState::Succeeded);
    }

    assert!(orchestrator.peak_in_flight() <= 3);
    assert_eq!(orchestrator.peak_in_flight(), 3);
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn every_terminal_job_notifies_exactly_once() {
    let compute = Arc::new(ScriptedCompute::new().plan("extraction", vec![Step::Delay(120)]));
    let (notifier, mut rx) = ChannelNotifier::new();
    let orchestrator = builder(&compute)
        .notifier(Arc::new(notifier))
        .build()
        .unwrap();

    let ok = orchestrator.submit(SubmitRequest::new("videos/a.mp4")).unwrap();
    let cancelled = orchestrator.submit(SubmitRequest::new("videos/b.mp4")).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(orchestrator.cancel(cancelled));

    orchestrator.wait(ok).await.unwrap();
    orchestrator.wait(cancelled).await.unwrap();

    let events = drain(&mut rx);
    for id in [ok, cancelled] {
        let completions: Vec<&CompletionNotification> = events
            .iter()
            .filter_map(|(_, e)| match e {
                PipelineEvent::Completed(n) if n.job_id == id => Some(n),
                _ => None,
            })
            .collect();
        assert_eq!(completions.len(), 1);
    }

    let started = events
        .iter()
        .filter(|(topic, e)| {
            topic == "vidify-processing-started" && matches!(e, PipelineEvent::Started { .. })
        })
        .count();
    assert_eq!(started, 2);
    assert!(events
        .iter()
        .all(|(topic, _)| topic != "vidify-processing-failed"));
}

#[tokio::test(start_paused = true)]
async fn failure_is_published_on_failed_topic() {
    let compute = Arc::new(ScriptedCompute::new().plan("thumbnail", vec![Step::FailPermanently]));
    let (notifier, mut rx) = ChannelNotifier::new();
    let orchestrator = builder(&compute)
        .notifier(Arc::new(notifier))
        .build()
        .unwrap();

    let id = orchestrator.submit(SubmitRequest::new("videos/c.mp4")).unwrap();
    let job = orchestrator.wait(id).await.unwrap();

    assert_eq!(job.stage_result("thumbnail").unwrap().attempts, 1);
    let (topic, event) = drain(&mut rx).pop().unwrap();
    assert_eq!(topic, "vidify-processing-failed");
    match event {
        PipelineEvent::Completed(n) => {
            assert_eq!(n.outcome, Outcome::Failed);
            assert_eq!(n.failed_stage.as_deref(), Some("thumbnail"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn retries_are_exhausted_after_two() {
    let compute = Arc::new(
        ScriptedCompute::new().plan("analysis", vec![Step::Fail, Step::Fail, Step::Fail, Step::Succeed]),
    );
    let orchestrator = builder(&compute).build().unwrap();

    let id = orchestrator.submit(SubmitRequest::new("videos/d.mp4")).unwrap();
    let job = orchestrator.wait(id).await.unwrap();

    assert!(matches!(&job.state, JobState::Failed { stage, .. } if stage == "analysis"));
    assert_eq!(job.stage_result("analysis").unwrap().attempts, 3);
    assert!(compute.calls_for("transcoding").is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_discards_in_flight_result() {
    let compute = Arc::new(ScriptedCompute::new().plan("validation", vec![Step::Delay(60)]));
    let orchestrator = builder(&compute).build().unwrap();

    let id = orchestrator.submit(SubmitRequest::new("videos/e.mp4")).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(orchestrator.in_flight(), 1);

    assert!(orchestrator.cancel(id));
    assert!(!orchestrator.cancel(id));

    let job = orchestrator.wait(id).await.unwrap();
    assert_eq!(job.state, JobState::Cancelled { reason: None });

    // Let the abandoned call finish; its result must not land.
    tokio::time::sleep(Duration::from_secs(120)).await;
    let job = orchestrator.status(id).unwrap();
    let record = job.stage_result("validation").unwrap();
    assert_eq!(record.status, AttemptStatus::Failed);
    assert!(record.output.is_none());
    assert_eq!(compute.calls().len(), 1);
    assert_eq!(orchestrator.in_flight(), 0);

    assert!(!orchestrator.cancel(id));
    assert!(!orchestrator.cancel(JobId::new()));
}

struct Gatekeeper;

#[async_trait]
impl LifecycleObserver for Gatekeeper {
    async fn before_processing(&self, job: &vidify_core::jobs::Job) -> HookResult<HookDecision> {
        if job.video_ref.ends_with(".exe") {
            return Ok(HookDecision::Abort("not a video".into()));
        }
        Ok(HookDecision::Continue)
    }
}

#[tokio::test]
async fn before_processing_abort_cancels_job() {
    let compute = Arc::new(ScriptedCompute::new());
    let orchestrator = builder(&compute).build().unwrap();

    let id = orchestrator
        .submit(SubmitRequest::new("uploads/setup.exe").observer(Arc::new(Gatekeeper)))
        .unwrap();
    let job = orchestrator.wait(id).await.unwrap();

    assert_eq!(
        job.state,
        JobState::Cancelled {
            reason: Some("not a video".into())
        }
    );
    assert!(compute.calls().is_empty());
}

/// Rejects the first analysis result it sees.
#[derive(Default)]
struct SecondLook {
    reviews: AtomicU32,
}

#[async_trait]
impl LifecycleObserver for SecondLook {
    async fn after_analysis(&self, _job: &vidify_core::jobs::Job, _output: &Value) -> HookResult<()> {
        if self.reviews.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(HookError::rejected("needs a second look"));
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn hook_failure_retries_the_stage_it_follows() {
    let compute = Arc::new(ScriptedCompute::new());
    let reviewer = Arc::new(SecondLook::default());
    let orchestrator = builder(&compute)
        .hook_handler("moderation", reviewer.clone())
        .build()
        .unwrap();

    let id = orchestrator
        .submit(SubmitRequest::new("videos/f.mp4").hook(HookPoint::AfterAnalysis, "moderation"))
        .unwrap();
    let job = orchestrator.wait(id).await.unwrap();

    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.stage_result("analysis").unwrap().attempts, 2);
    assert_eq!(reviewer.reviews.load(Ordering::SeqCst), 2);
    // Transcoding only starts once the hook accepted analysis.
    assert_eq!(compute.calls_for("transcoding").len(), 1);
}

#[tokio::test]
async fn unknown_hook_handler_is_rejected() {
    let compute = Arc::new(ScriptedCompute::new());
    let orchestrator = builder(&compute).build().unwrap();

    let err = orchestrator
        .submit(SubmitRequest::new("videos/g.mp4").hook(HookPoint::AfterCompletion, "missing"))
        .unwrap_err();

    assert_eq!(
        err,
        SubmitError::UnknownHookHandler {
            hook: HookPoint::AfterCompletion,
            handler: "missing".into()
        }
    );
}

#[derive(Default)]
struct Recorder {
    completions: Mutex<Vec<Outcome>>,
    entries: Mutex<Vec<CatalogEntry>>,
}

#[async_trait]
impl LifecycleObserver for Recorder {
    async fn after_completion(
        &self,
        _job: &vidify_core::jobs::Job,
        notification: &CompletionNotification,
    ) -> HookResult<()> {
        self.completions.lock().push(notification.outcome);
        Ok(())
    }
}

#[async_trait]
impl CatalogPublisher for Recorder {
    async fn publish(&self, entry: &CatalogEntry) -> Result<(), PublishError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn success_reaches_catalog_and_after_completion() {
    let compute = Arc::new(ScriptedCompute::new());
    let recorder = Arc::new(Recorder::default());
    let orchestrator = builder(&compute)
        .publisher(recorder.clone())
        .build()
        .unwrap();

    let id = orchestrator
        .submit(SubmitRequest::new("videos/h.mp4").observer(recorder.clone()))
        .unwrap();
    orchestrator.wait(id).await.unwrap();

    assert_eq!(*recorder.completions.lock(), vec![Outcome::Succeeded]);
    let entries = recorder.entries.lock();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].job_id, id);
    assert!(entries[0].outputs.contains_key("distribution"));
}

#[tokio::test(start_paused = true)]
async fn stages_are_routed_to_their_functions() {
    let compute = Arc::new(ScriptedCompute::new());
    let orchestrator = builder(&compute).build().unwrap();

    let id = orchestrator.submit(SubmitRequest::new("videos/i.mp4")).unwrap();
    orchestrator.wait(id).await.unwrap();

    let function = |stage: &str| compute.calls_for(stage)[0].function.clone();
    assert_eq!(function("validation"), "vidify-video-validator");
    assert_eq!(function("transcoding"), "vidify-video-transcoder");
    assert_eq!(function("distribution"), "vidify-processing-coordinator");
    assert!(compute.calls().iter().all(|c| c.job_id == id));
}

#[tokio::test(start_paused = true)]
async fn finished_jobs_are_archived_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("jobs.json");
    let compute = Arc::new(ScriptedCompute::new());
    let orchestrator = builder(&compute).archive_file(&archive).build().unwrap();

    let id = orchestrator.submit(SubmitRequest::new("videos/j.mp4")).unwrap();
    orchestrator.wait(id).await.unwrap();

    assert!(orchestrator.active_jobs().is_empty());
    let content = std::fs::read_to_string(&archive).unwrap();
    assert!(content.contains(&id.to_string()));

    let status = orchestrator.status_view(id).unwrap();
    assert_eq!(status.overall_state, JobState::Succeeded);
    assert_eq!(status.current_stage, None);
}

/// Observer whose hooks block until the job is cancelled.
struct Stall {
    point: HookPoint,
}

impl Stall {
    async fn block(&self, point: HookPoint) {
        if point == self.point {
            tokio::time::sleep(Duration::from_secs(10_000_000)).await;
        }
    }
}

#[async_trait]
impl LifecycleObserver for Stall {
    async fn before_processing(&self, _job: &vidify_core::jobs::Job) -> HookResult<HookDecision> {
        self.block(HookPoint::BeforeProcessing).await;
        Ok(HookDecision::Continue)
    }

    async fn after_analysis(&self, _job: &vidify_core::jobs::Job, _output: &Value) -> HookResult<()> {
        self.block(HookPoint::AfterAnalysis).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_blocking_before_processing_hook() {
    let compute = Arc::new(ScriptedCompute::new());
    let orchestrator = builder(&compute).build().unwrap();

    let id = orchestrator
        .submit(SubmitRequest::new("videos/k.mp4").observer(Arc::new(Stall {
            point: HookPoint::BeforeProcessing,
        })))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(orchestrator.status(id).unwrap().state, JobState::Pending);

    assert!(orchestrator.cancel(id));
    let job = tokio::time::timeout(Duration::from_secs(3600), orchestrator.wait(id))
        .await
        .expect("cancelled job should finish")
        .unwrap();

    assert_eq!(job.state, JobState::Cancelled { reason: None });
    assert!(compute.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_blocking_after_analysis_hook() {
    let compute = Arc::new(ScriptedCompute::new());
    let (notifier, mut rx) = ChannelNotifier::new();
    let orchestrator = builder(&compute)
        .notifier(Arc::new(notifier))
        .build()
        .unwrap();

    let id = orchestrator
        .submit(SubmitRequest::new("videos/l.mp4").observer(Arc::new(Stall {
            point: HookPoint::AfterAnalysis,
        })))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(compute.calls_for("analysis").len(), 1);

    assert!(orchestrator.cancel(id));
    let job = tokio::time::timeout(Duration::from_secs(3600), orchestrator.wait(id))
        .await
        .expect("cancelled job should finish")
        .unwrap();

    assert_eq!(job.state, JobState::Cancelled { reason: None });
    assert!(job.stage_result("analysis").unwrap().output.is_none());
    assert!(compute.calls_for("transcoding").is_empty());

    let completions = drain(&mut rx)
        .into_iter()
        .filter(|(_, e)| matches!(e, PipelineEvent::Completed(_)))
        .count();
    assert_eq!(completions, 1);
}

/// Observer that panics after validation and again after completion.
struct Faulty;

#[async_trait]
impl LifecycleObserver for Faulty {
    async fn after_validation(&self, _job: &vidify_core::jobs::Job, _output: &Value) -> HookResult<()> {
        panic!("observer bug");
    }

    async fn after_completion(
        &self,
        _job: &vidify_core::jobs::Job,
        _notification: &CompletionNotification,
    ) -> HookResult<()> {
        panic!("observer bug");
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_hook_fails_the_stage_and_still_notifies() {
    let compute = Arc::new(ScriptedCompute::new());
    let (notifier, mut rx) = ChannelNotifier::new();
    let orchestrator = builder(&compute)
        .notifier(Arc::new(notifier))
        .build()
        .unwrap();

    let id = orchestrator
        .submit(SubmitRequest::new("videos/m.mp4").observer(Arc::new(Faulty)))
        .unwrap();
    let job = orchestrator.wait(id).await.unwrap();

    match &job.state {
        JobState::Failed { stage, reason } => {
            assert_eq!(stage, "validation");
            assert!(reason.contains("after-validation"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(orchestrator.active_jobs().is_empty());

    let completions: Vec<CompletionNotification> = drain(&mut rx)
        .into_iter()
        .filter_map(|(_, e)| match e {
            PipelineEvent::Completed(n) => Some(n),
            _ => None,
        })
        .collect();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].outcome, Outcome::Failed);
}

#[tokio::test(start_paused = true)]
async fn retries_wait_out_exponential_backoff() {
    let compute = Arc::new(
        ScriptedCompute::new().plan("analysis", vec![Step::Fail, Step::Fail, Step::Succeed]),
    );
    let orchestrator = builder(&compute).build().unwrap();

    let id = orchestrator.submit(SubmitRequest::new("videos/n.mp4")).unwrap();
    let job = orchestrator.wait(id).await.unwrap();
    assert_eq!(job.state, JobState::Succeeded);

    let calls = compute.calls_for("analysis");
    assert_eq!(calls.len(), 3);
    let first_gap = calls[1].at - calls[0].at;
    let second_gap = calls[2].at - calls[1].at;
    assert!(first_gap >= Duration::from_secs(1) && first_gap < Duration::from_millis(1100), "{first_gap:?}");
    assert!(second_gap >= Duration::from_secs(2) && second_gap < Duration::from_millis(2100), "{second_gap:?}");
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_skips_the_retry() {
    let compute = Arc::new(ScriptedCompute::new().plan("analysis", vec![Step::Fail, Step::Succeed]));
    let orchestrator = builder(&compute)
        .retry_policy(RetryPolicy::new(
            2,
            Duration::from_secs(60),
            2,
            Duration::from_secs(600),
        ))
        .build()
        .unwrap();

    let started = Instant::now();
    let id = orchestrator.submit(SubmitRequest::new("videos/o.mp4")).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(compute.calls_for("analysis").len(), 1);

    assert!(orchestrator.cancel(id));
    let job = orchestrator.wait(id).await.unwrap();

    assert_eq!(job.state, JobState::Cancelled { reason: None });
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(compute.calls_for("analysis").len(), 1);
    assert!(compute.calls_for("transcoding").is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_while_waiting_for_a_slot() {
    let compute = Arc::new(ScriptedCompute::new().plan("validation", vec![Step::Delay(100)]));
    let orchestrator = builder(&compute).max_concurrency(1).build().unwrap();

    let started = Instant::now();
    let holder = orchestrator.submit(SubmitRequest::new("videos/p.mp4")).unwrap();
    let queued = orchestrator.submit(SubmitRequest::new("videos/q.mp4")).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(orchestrator.in_flight(), 1);
    assert!(compute.calls().iter().all(|c| c.job_id == holder));

    assert!(orchestrator.cancel(queued));
    let job = orchestrator.wait(queued).await.unwrap();
    assert_eq!(job.state, JobState::Cancelled { reason: None });
    assert!(started.elapsed() < Duration::from_secs(100));

    let job = orchestrator.wait(holder).await.unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    assert!(compute.calls().iter().all(|c| c.job_id == holder));
}

#[tokio::test(start_paused = true)]
async fn stage_retry_override_applies() {
    let compute = Arc::new(ScriptedCompute::new().plan("analysis", vec![Step::Fail, Step::Succeed]));
    let orchestrator = builder(&compute)
        .retry_policy(RetryPolicy::default().with_stage_retries("analysis", 0))
        .build()
        .unwrap();

    let id = orchestrator.submit(SubmitRequest::new("videos/r.mp4")).unwrap();
    let job = orchestrator.wait(id).await.unwrap();

    assert!(matches!(&job.state, JobState::Failed { stage, .. } if stage == "analysis"));
    assert_eq!(job.stage_result("analysis").unwrap().attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn archive_keeps_only_the_newest_jobs() {
    let compute = Arc::new(ScriptedCompute::new());
    let orchestrator = builder(&compute).archive_limit(1).build().unwrap();

    let first = orchestrator.submit(SubmitRequest::new("videos/s.mp4")).unwrap();
    orchestrator.wait(first).await.unwrap();
    let second = orchestrator.submit(SubmitRequest::new("videos/t.mp4")).unwrap();
    let job = orchestrator.wait(second).await.unwrap();

    assert_eq!(job.state, JobState::Succeeded);
    assert!(orchestrator.status(first).is_none());
    assert!(orchestrator.status(second).is_some());
}

#[tokio::test(start_paused = true)]
async fn job_log_file_is_written_per_job() {
    let dir = tempfile::tempdir().unwrap();
    let compute = Arc::new(ScriptedCompute::new());
    let orchestrator = builder(&compute).job_logs(dir.path()).build().unwrap();

    let id = orchestrator.submit(SubmitRequest::new("videos/u.mp4")).unwrap();
    orchestrator.wait(id).await.unwrap();

    let log = dir.path().join(format!("{id}.log"));
    let content = std::fs::read_to_string(&log).unwrap();
    assert!(content.contains("=== validation ==="));
    assert!(content.contains("Job completed successfully"));
}
