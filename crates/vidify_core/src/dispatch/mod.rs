//! Bounded dispatch of stage invocations to external compute.

mod compute;
mod limiter;

pub use compute::{FunctionRouter, StageCompute, StageRequest};
pub use limiter::{DispatchError, DispatchLimiter, DispatchResult, DispatchSlot};
