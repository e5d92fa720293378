//! Pipeline orchestrator for coordinating job execution.
//!
//! Jobs are submitted with a video reference, an optional variant, and
//! hooks. Submission resolves the effective configuration and the ordered
//! stage list; a driver task then walks the stages one at a time, each
//! dispatched through the shared limiter.
//!
//! # Architecture
//!
//! ```text
//! PipelineOrchestrator::submit
//!     ├── ConfigResolver    (base + variant → EffectiveConfig)
//!     ├── StageRegistry     (enabled stages by order, dependency check)
//!     └── JobDriver task
//!             ├── before-processing hook
//!             ├── stage → DispatchLimiter → StageCompute
//!             ├── after-<stage> hook
//!             ├── retry with backoff
//!             └── after-completion hook + notification + archive
//! ```
//!
//! # Example
//!
//! ```ignore
//! use vidify_core::orchestrator::{PipelineOrchestrator, SubmitRequest};
//!
//! let orchestrator = PipelineOrchestrator::builder()
//!     .settings(&settings)
//!     .compute(backend)
//!     .build()?;
//!
//! let job_id = orchestrator.submit(SubmitRequest::new("s3://bucket/video.mp4").variant("premium"))?;
//! let job = orchestrator.wait(job_id).await;
//! ```

mod collaborators;
mod driver;
mod errors;
mod hooks;
mod notify;
mod registry;
mod retry;
mod service;

pub use collaborators::{
    AllowAll, CatalogEntry, CatalogPublisher, DiscardPublisher, PublishError, SubmissionAuthorizer,
};
pub use errors::{
    BuildError, ComputeResult, HookError, HookResult, StageError, SubmitError, SubmitResult,
};
pub use hooks::{
    ApprovalGate, ApprovalPolicy, HookDecision, HookRegistry, JobHooks, LifecycleObserver,
    LoggingObserver, NoopObserver,
};
pub use notify::{
    ChannelNotifier, CompletionNotification, NotificationTopics, Notifier, NotifyError, Outcome,
    PipelineEvent, TracingNotifier,
};
pub use registry::{RegistryError, RegistryResult, StageRegistry};
pub use retry::{RetryPolicy, NEVER_RETRY_STAGES};
pub use service::{PipelineOrchestrator, PipelineOrchestratorBuilder, SubmitRequest};
