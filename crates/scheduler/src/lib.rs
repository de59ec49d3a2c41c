//! Podium render scheduler
//!
//! Decides which pages to rasterize first and renders them on a bounded pool
//! of worker threads without blocking navigation.
//!
//! - [`priority_order`] orders pending pages around the focus page in three
//!   tiers (immediate, near, remainder).
//! - [`WorkerPool`] splits an ordered list into one contiguous batch per
//!   worker and renders each batch in order, checking the render cache first.
//! - [`Generation`] tags submitted work so results from a replaced document or
//!   scale are dropped instead of published.
//! - [`RenderScheduler`] ties these together with the rendered-set and
//!   in-flight bookkeeping and reports results to a [`RenderListener`].
//!
//! # Example
//!
//! ```
//! use podium_scheduler::{priority_order, split_batches};
//!
//! let order = priority_order(10, 20, |_| false);
//! let batches = split_batches(&order, 4);
//!
//! assert_eq!(batches.len(), 4);
//! assert_eq!(batches[0], vec![10, 11, 7, 8, 9]);
//! ```

mod generation;
mod priority;
mod scheduler;
mod worker;

pub use generation::Generation;
pub use priority::{ascending_order, priority_order, PriorityTier};
pub use scheduler::{
    RenderListener, RenderPlan, RenderProgress, RenderScheduler, RenderTracker, SchedulerStats,
};
pub use worker::{
    split_batches, ErrorCallback, FinishedCallback, PageRenderError, PoolStats, RenderJob,
    RenderTarget, WorkerPool, WorkerPoolConfig,
};
