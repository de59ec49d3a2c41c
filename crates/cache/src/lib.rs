//! Podium Render Cache Library
//!
//! Durable page-artifact store keyed by (page index, render scale), one
//! namespace per document so a restart re-opening the same file reuses prior
//! renders.

pub mod disk;
pub mod key;
pub mod namespace;

pub use disk::{Artifact, CacheError, CacheStats, EntryState, RenderCache};
pub use key::{CacheKey, RenderScale};
pub use namespace::{document_namespace, namespace_of_bytes};
