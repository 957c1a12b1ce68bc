//! Local document cache.
//!
//! Downloads live under a fixed directory convention; this module
//! resolves filing ids against it and builds conventional paths.

pub mod index;
pub mod path;

pub use index::{CacheEntry, CacheIndex, CacheStats};
pub use path::{build_download_path, period_to_yyyymm, sanitize_component};
