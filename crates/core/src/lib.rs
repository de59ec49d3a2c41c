//! Podium Core Library
//!
//! Presentation session, shared navigation state and configuration for the
//! presenter.

pub mod config;
pub mod session;
pub mod state;
pub mod views;

pub use config::{ConfigError, ViewerConfig};
pub use session::{PresentationSession, SessionError, SessionResult};
pub use state::{
    EventKind, NavigationState, Observer, SharedState, StateEvent, SubscriptionId, ViewMode,
};
pub use views::{OverviewView, PresenterView, ProjectorView, ViewHandle};

pub use podium_cache::{Artifact, CacheKey, RenderScale};
pub use podium_scheduler::{RenderProgress, SchedulerStats};
