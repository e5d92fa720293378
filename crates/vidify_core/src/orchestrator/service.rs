//! The orchestrator: job submission, status, and cancellation.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::collaborators::{AllowAll, CatalogPublisher, DiscardPublisher, SubmissionAuthorizer};
use super::driver::{JobDriver, Shared};
use super::errors::{BuildError, SubmitError, SubmitResult};
use super::hooks::{HookRegistry, JobHooks, LifecycleObserver};
use super::notify::{NotificationTopics, Notifier, TracingNotifier};
use super::registry::StageRegistry;
use super::retry::RetryPolicy;
use crate::config::Settings;
use crate::dispatch::{DispatchLimiter, FunctionRouter, StageCompute};
use crate::jobs::{Job, JobId, JobStatus, JobStore, DEFAULT_ARCHIVE_LIMIT};
use crate::logging::LogConfig;
use crate::models::{
    standard_catalog, EffectiveConfig, HookPoint, HookRefs, PipelineCatalog, PipelineDefinition,
    VariantRegistry,
};
use crate::resolver::{ConfigResolver, ResolveResult};

/// A job submission: video, optional variant, and hooks.
#[derive(Clone, Default)]
pub struct SubmitRequest {
    pub video_ref: String,
    pub variant: Option<String>,
    /// Handler references added to the definition's own.
    pub hooks: HookRefs,
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl SubmitRequest {
    pub fn new(video_ref: impl Into<String>) -> Self {
        Self {
            video_ref: video_ref.into(),
            ..Default::default()
        }
    }

    pub fn variant(mut self, name: impl Into<String>) -> Self {
        self.variant = Some(name.into());
        self
    }

    /// Reference a registered handler at one lifecycle point.
    pub fn hook(mut self, point: HookPoint, handler: impl Into<String>) -> Self {
        self.hooks.set(point, handler);
        self
    }

    /// Attach an observer that sees every lifecycle point of this job.
    pub fn observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl fmt::Debug for SubmitRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitRequest")
            .field("video_ref", &self.video_ref)
            .field("variant", &self.variant)
            .field("hooks", &self.hooks)
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Runs jobs through the pipeline.
///
/// Cheap to clone; clones share the job store and the dispatch limiter.
/// Each submitted job is driven by its own task on the current Tokio
/// runtime.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    definition: PipelineDefinition,
    resolver: ConfigResolver,
    registry: StageRegistry,
    handlers: HookRegistry,
    authorizer: Arc<dyn SubmissionAuthorizer>,
    shared: Arc<Shared>,
}

impl PipelineOrchestrator {
    pub fn builder() -> PipelineOrchestratorBuilder {
        PipelineOrchestratorBuilder::new()
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.inner.definition
    }

    pub fn variants(&self) -> &VariantRegistry {
        self.inner.resolver.variants()
    }

    pub fn limiter(&self) -> &DispatchLimiter {
        &self.inner.shared.limiter
    }

    /// Resolve the effective configuration a job with `variant` would get.
    pub fn effective_config(&self, variant: Option<&str>) -> ResolveResult<EffectiveConfig> {
        self.inner.resolver.resolve(&self.inner.definition, variant)
    }

    /// Submit a job.
    ///
    /// Resolution, stage ordering, and hook binding happen synchronously;
    /// any error is returned here and no job is created. On success the job
    /// is spawned onto the current runtime and its id returned.
    pub fn submit(&self, request: SubmitRequest) -> SubmitResult<JobId> {
        let runtime = Handle::try_current().map_err(|_| SubmitError::NoRuntime)?;
        let inner = &self.inner;

        inner
            .authorizer
            .authorize(&request.video_ref, request.variant.as_deref())
            .map_err(SubmitError::Unauthorized)?;

        let effective = inner
            .resolver
            .resolve(&inner.definition, request.variant.as_deref())?;
        let stages = inner.registry.ordered_stages(&effective)?;
        let hooks = self.bind_hooks(&effective, &request)?;

        let stage_names = stages.into_iter().map(|s| s.name).collect();
        let job = Job::new(request.video_ref, Arc::new(effective), stage_names);
        let job_id = job.id;

        let (snapshots, receiver) = watch::channel(job.clone());
        let cancel = CancellationToken::new();
        inner.shared.store.lock().insert_active(job_id, receiver);
        inner.shared.cancel_tokens.lock().insert(job_id, cancel.clone());

        tracing::info!(
            %job_id,
            video = %job.video_ref,
            variant = job.variant.as_deref().unwrap_or("none"),
            stages = job.stages.len(),
            "Job submitted"
        );

        let driver = JobDriver::new(job, snapshots, cancel, hooks, Arc::clone(&inner.shared));
        runtime.spawn(driver.run());
        Ok(job_id)
    }

    /// Definition hooks first, then the submission's references, then its
    /// observers.
    fn bind_hooks(
        &self,
        effective: &EffectiveConfig,
        request: &SubmitRequest,
    ) -> SubmitResult<JobHooks> {
        let mut hooks = JobHooks::new();
        for (point, handler) in effective.hooks().iter().chain(request.hooks.iter()) {
            let observer =
                self.inner
                    .handlers
                    .get(handler)
                    .ok_or_else(|| SubmitError::UnknownHookHandler {
                        hook: point,
                        handler: handler.to_string(),
                    })?;
            hooks.bind(point, observer);
        }
        for observer in &request.observers {
            hooks.observe(Arc::clone(observer));
        }
        Ok(hooks)
    }

    /// Current snapshot of an active or archived job.
    pub fn status(&self, job_id: JobId) -> Option<Job> {
        self.inner.shared.store.lock().get(&job_id)
    }

    /// Status view: `{jobId, overallState, currentStage, stageResults}`.
    pub fn status_view(&self, job_id: JobId) -> Option<JobStatus> {
        self.status(job_id).map(|job| job.status())
    }

    /// Request cooperative cancellation.
    ///
    /// Returns false for unknown or terminal jobs and for repeated requests.
    /// An in-flight stage call is left to finish; its result is discarded.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let shared = &self.inner.shared;
        let Some(token) = shared.cancel_tokens.lock().get(&job_id).cloned() else {
            return false;
        };
        let running = shared
            .store
            .lock()
            .get(&job_id)
            .is_some_and(|job| !job.is_terminal());
        if !running || token.is_cancelled() {
            return false;
        }

        token.cancel();
        tracing::info!(%job_id, "Cancellation requested");
        true
    }

    /// Wait until the job is terminal and archived; returns its final
    /// snapshot.
    pub async fn wait(&self, job_id: JobId) -> Option<Job> {
        let receiver = {
            let store = self.inner.shared.store.lock();
            if let Some(job) = store.archived(&job_id) {
                return Some(job.clone());
            }
            store.subscribe(&job_id)?
        };

        // The driver drops its sender after archiving the job.
        let mut receiver = receiver;
        while receiver.changed().await.is_ok() {}

        let job = receiver.borrow().clone();
        Some(job)
    }

    /// Ids of jobs that have not been archived yet.
    pub fn active_jobs(&self) -> Vec<JobId> {
        self.inner.shared.store.lock().active_ids()
    }

    /// Stage invocations currently holding a dispatch slot.
    pub fn in_flight(&self) -> usize {
        self.inner.shared.limiter.in_flight()
    }

    /// Highest number of simultaneous stage invocations observed.
    pub fn peak_in_flight(&self) -> usize {
        self.inner.shared.limiter.peak_in_flight()
    }
}

impl fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("version", &self.inner.definition.version)
            .field("stages", &self.inner.registry.stage_names())
            .field("handlers", &self.inner.handlers)
            .field("max_concurrency", &self.inner.shared.limiter.max_concurrency())
            .finish()
    }
}

/// Builder for [`PipelineOrchestrator`].
///
/// Only the compute backend is required. Everything else defaults to the
/// standard catalog and [`Settings::default`].
pub struct PipelineOrchestratorBuilder {
    catalog: PipelineCatalog,
    compute: Option<Arc<dyn StageCompute>>,
    limiter: Option<DispatchLimiter>,
    max_concurrency: usize,
    stage_timeout: Duration,
    retry: RetryPolicy,
    router: FunctionRouter,
    notifier: Arc<dyn Notifier>,
    topics: NotificationTopics,
    publisher: Arc<dyn CatalogPublisher>,
    authorizer: Arc<dyn SubmissionAuthorizer>,
    handlers: HookRegistry,
    archive_file: Option<PathBuf>,
    archive_limit: usize,
    job_logs: Option<PathBuf>,
    log_config: LogConfig,
}

impl Default for PipelineOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOrchestratorBuilder {
    pub fn new() -> Self {
        let settings = Settings::default();
        Self {
            catalog: standard_catalog(),
            compute: None,
            limiter: None,
            max_concurrency: settings.dispatch.max_concurrency,
            stage_timeout: settings.dispatch.stage_timeout(),
            retry: settings.retry.policy(),
            router: settings.dispatch.router(),
            notifier: Arc::new(TracingNotifier),
            topics: settings.notifications.topics(),
            publisher: Arc::new(DiscardPublisher),
            authorizer: Arc::new(AllowAll),
            handlers: HookRegistry::new(),
            archive_file: None,
            archive_limit: DEFAULT_ARCHIVE_LIMIT,
            job_logs: None,
            log_config: settings.logging.job_log_config(),
        }
    }

    /// Apply dispatch, retry, notification, path, and logging settings.
    pub fn settings(mut self, settings: &Settings) -> Self {
        self.max_concurrency = settings.dispatch.max_concurrency;
        self.stage_timeout = settings.dispatch.stage_timeout();
        self.retry = settings.retry.policy();
        self.router = settings.dispatch.router();
        self.topics = settings.notifications.topics();
        self.archive_file = settings.paths.archive_file();
        self.log_config = settings.logging.job_log_config();
        self.job_logs = settings
            .logging
            .job_log_files
            .then(|| settings.paths.job_logs_folder());
        self
    }

    pub fn catalog(mut self, catalog: PipelineCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn compute(mut self, compute: impl StageCompute + 'static) -> Self {
        self.compute = Some(Arc::new(compute));
        self
    }

    pub fn compute_arc(mut self, compute: Arc<dyn StageCompute>) -> Self {
        self.compute = Some(compute);
        self
    }

    /// Share an existing limiter instead of creating one.
    pub fn limiter(mut self, limiter: DispatchLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn router(mut self, router: FunctionRouter) -> Self {
        self.router = router;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn topics(mut self, topics: NotificationTopics) -> Self {
        self.topics = topics;
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn CatalogPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn SubmissionAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Register a named handler for definition hook references.
    pub fn hook_handler(
        mut self,
        name: impl Into<String>,
        observer: Arc<dyn LifecycleObserver>,
    ) -> Self {
        self.handlers.register(name, observer);
        self
    }

    pub fn archive_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.archive_file = Some(path.into());
        self
    }

    /// Cap on archived jobs kept in memory and on disk.
    pub fn archive_limit(mut self, limit: usize) -> Self {
        self.archive_limit = limit;
        self
    }

    pub fn job_logs(mut self, dir: impl Into<PathBuf>) -> Self {
        self.job_logs = Some(dir.into());
        self
    }

    pub fn log_config(mut self, config: LogConfig) -> Self {
        self.log_config = config;
        self
    }

    /// Validate the catalog and assemble the orchestrator.
    ///
    /// Every variant is resolved once so a broken override fails here
    /// rather than on first use.
    pub fn build(self) -> Result<PipelineOrchestrator, BuildError> {
        let compute = self.compute.ok_or(BuildError::MissingCompute)?;
        let (definition, variants) = self.catalog.into_parts();

        let registry = StageRegistry::new(&definition)?;
        let resolver = ConfigResolver::new(variants);
        for name in resolver.variants().names() {
            resolver
                .resolve(&definition, Some(name))
                .map_err(|source| BuildError::Variant {
                    variant: name.to_string(),
                    source,
                })?;
        }

        let limiter = self
            .limiter
            .unwrap_or_else(|| DispatchLimiter::new(self.max_concurrency, self.stage_timeout));
        let store = match &self.archive_file {
            Some(path) => JobStore::new(path),
            None => JobStore::in_memory(),
        }
        .with_limit(self.archive_limit);

        tracing::debug!(
            version = %definition.version,
            stages = definition.stages.len(),
            variants = resolver.variants().len(),
            max_concurrency = limiter.max_concurrency(),
            "Orchestrator ready"
        );

        let shared = Arc::new(Shared {
            compute,
            limiter,
            retry: self.retry,
            router: self.router,
            notifier: self.notifier,
            topics: self.topics,
            publisher: self.publisher,
            store: Mutex::new(store),
            cancel_tokens: Mutex::new(HashMap::new()),
            job_logs: self.job_logs,
            log_config: self.log_config,
        });

        Ok(PipelineOrchestrator {
            inner: Arc::new(Inner {
                definition,
                resolver,
                registry,
                handlers: self.handlers,
                authorizer: self.authorizer,
                shared,
            }),
        })
    }
}
