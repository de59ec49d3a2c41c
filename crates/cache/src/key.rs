//! Cache keys and the render scale they are derived from.

use std::fmt;

/// Render scale factor, clamped to [`RenderScale::MIN`]..=[`RenderScale::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct RenderScale(f32);

impl RenderScale {
    pub const MIN: f32 = 0.5;
    pub const MAX: f32 = 4.0;
    pub const DEFAULT: f32 = 2.0;

    /// Clamps `scale` into range. Non-finite input falls back to the default.
    pub fn new(scale: f32) -> Self {
        if !scale.is_finite() {
            return Self(Self::DEFAULT);
        }
        Self(scale.clamp(Self::MIN, Self::MAX))
    }

    pub fn get(self) -> f32 {
        self.0
    }

    /// Scale in integer thousandths, the form used for keying.
    pub fn millis(self) -> u32 {
        (self.0 * 1000.0).round() as u32
    }
}

impl Default for RenderScale {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl fmt::Display for RenderScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

/// Deterministic identifier for one rendered page artifact.
///
/// Two requests with equal page index and equal scale millis always produce
/// the same key, and so the same file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub page_index: u32,
    pub scale_millis: u32,
}

impl CacheKey {
    const PREFIX: &'static str = "page_";
    const EXTENSION: &'static str = "png";

    pub fn new(page_index: u32, scale: RenderScale) -> Self {
        Self { page_index, scale_millis: scale.millis() }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}{:06}_x{}.{}",
            Self::PREFIX,
            self.page_index,
            self.scale_millis,
            Self::EXTENSION
        )
    }

    /// Parses a name produced by [`CacheKey::file_name`].
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".png")?.strip_prefix(Self::PREFIX)?;
        let (page, scale) = stem.split_once("_x")?;

        Some(Self { page_index: page.parse().ok()?, scale_millis: scale.parse().ok()? })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} @ x{}", self.page_index, self.scale_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_is_clamped() {
        assert_eq!(RenderScale::new(0.1).get(), 0.5);
        assert_eq!(RenderScale::new(9.0).get(), 4.0);
        assert_eq!(RenderScale::new(1.25).get(), 1.25);
        assert_eq!(RenderScale::new(f32::NAN).get(), RenderScale::DEFAULT);
    }

    #[test]
    fn equal_requests_share_a_key() {
        let a = CacheKey::new(7, RenderScale::new(2.0));
        let b = CacheKey::new(7, RenderScale::new(2.0));
        let c = CacheKey::new(7, RenderScale::new(1.5));

        assert_eq!(a, b);
        assert_eq!(a.file_name(), b.file_name());
        assert_ne!(a, c);
    }

    #[test]
    fn file_name_parses_back() {
        let key = CacheKey::new(42, RenderScale::new(1.5));
        assert_eq!(key.file_name(), "page_000042_x1500.png");
        assert_eq!(CacheKey::from_file_name(&key.file_name()), Some(key));
    }

    #[test]
    fn foreign_file_names_are_rejected() {
        assert_eq!(CacheKey::from_file_name("notes.txt"), None);
        assert_eq!(CacheKey::from_file_name("page_abc_x100.png"), None);
        assert_eq!(CacheKey::from_file_name(".tmpA1b2C3"), None);
    }
}
