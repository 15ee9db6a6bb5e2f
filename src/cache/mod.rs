//! Checksum cache for plugin idempotence
//!
//! Plugins use the cache to skip side-effecting work whose inputs have not
//! changed since the last run, for example re-rendering a service template
//! whose content checksum is already stored.
//!
//! ```rust,ignore
//! let checksum = checksum_file(&template)?;
//! if !cache.is_fresh("template:app.service", &checksum)? {
//!     render(&template)?;
//!     cache.set("template:app.service", &checksum)?;
//! }
//! ```

pub mod checksum;
mod store;

pub use checksum::{checksum_bytes, checksum_file, checksum_paths};
pub use store::{Cache, CacheEntry};
