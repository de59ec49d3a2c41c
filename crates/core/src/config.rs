//! Viewer configuration.
//!
//! Configuration can be created programmatically, loaded from a TOML file,
//! or overridden from environment variables. Callers normally finish with
//! [`ViewerConfig::validated`], which clamps the render scale and rejects a
//! zero worker count.

use podium_cache::RenderScale;
use podium_scheduler::WorkerPoolConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const ENV_RENDER_SCALE: &str = "PODIUM_RENDER_SCALE";
pub const ENV_WORKER_THREADS: &str = "PODIUM_WORKER_THREADS";
pub const ENV_CACHE_DIR: &str = "PODIUM_CACHE_DIR";
pub const ENV_MAX_MEMORY_PAGES: &str = "PODIUM_MAX_MEMORY_PAGES";

/// Settings for rendering and caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Render scale factor, clamped to 0.5..=4.0
    pub render_scale: f32,
    /// Number of render worker threads
    pub worker_threads: usize,
    /// Root directory for the on-disk render cache
    pub cache_dir: PathBuf,
    /// Upper bound on pages held in memory. Carried for front-ends that keep
    /// decoded images around; nothing in the core evicts by it.
    pub max_memory_pages: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            render_scale: RenderScale::DEFAULT,
            worker_threads: 4,
            cache_dir: Self::default_cache_dir(),
            max_memory_pages: 50,
        }
    }
}

impl ViewerConfig {
    pub fn with_render_scale(mut self, scale: f32) -> Self {
        self.render_scale = scale;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_cache_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cache_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn with_max_memory_pages(mut self, pages: usize) -> Self {
        self.max_memory_pages = pages;
        self
    }

    /// Returns the default cache directory for the current platform.
    ///
    /// - macOS: ~/Library/Caches/podium/page_cache
    /// - Linux: ~/.cache/podium/page_cache
    /// - Windows: %LOCALAPPDATA%\podium\page_cache
    pub fn default_cache_dir() -> PathBuf {
        if let Some(cache_dir) = dirs::cache_dir() {
            cache_dir.join("podium").join("page_cache")
        } else {
            PathBuf::from("cache/page_cache")
        }
    }

    /// Loads the defaults, then applies environment overrides.
    ///
    /// Environment variables:
    /// - `PODIUM_RENDER_SCALE`: render scale (default: 2.0)
    /// - `PODIUM_WORKER_THREADS`: worker thread count (default: 4)
    /// - `PODIUM_CACHE_DIR`: cache root directory
    /// - `PODIUM_MAX_MEMORY_PAGES`: in-memory page bound (default: 50)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Overrides fields from whichever environment variables are set.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_var(ENV_RENDER_SCALE) {
            self.render_scale = parse(ENV_RENDER_SCALE, &value)?;
        }
        if let Some(value) = env_var(ENV_WORKER_THREADS) {
            self.worker_threads = parse(ENV_WORKER_THREADS, &value)?;
        }
        if let Some(value) = env_var(ENV_CACHE_DIR) {
            self.cache_dir = PathBuf::from(value);
        }
        if let Some(value) = env_var(ENV_MAX_MEMORY_PAGES) {
            self.max_memory_pages = parse(ENV_MAX_MEMORY_PAGES, &value)?;
        }
        Ok(self)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Missing keys take their defaults and unknown keys are ignored:
    /// ```toml
    /// render_scale = 1.5
    /// worker_threads = 2
    /// cache_dir = "/path/to/cache"
    /// max_memory_pages = 50
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Clamps the render scale into range and rejects a zero worker count.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "worker_threads".to_owned(),
                value: "0".to_owned(),
            });
        }
        self.render_scale = RenderScale::new(self.render_scale).get();
        Ok(self)
    }

    pub fn render_scale(&self) -> RenderScale {
        RenderScale::new(self.render_scale)
    }

    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.worker_threads)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
    #[error("config I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
