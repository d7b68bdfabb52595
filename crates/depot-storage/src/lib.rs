//! # depot-storage
//!
//! Content store abstraction for the Depot proxy.
//!
//! The proxy layer treats storage as a key/value store of [`CachedContent`]
//! with a single mutable attribute, the entry's cache info. The main trait is
//! [`ContentStore`]; [`InMemoryContentStore`] is a `DashMap`-backed
//! implementation used by the server's default wiring and by tests.
//!
//! ## Example
//!
//! ```ignore
//! use depot_core::{CachedContent, ContentKey};
//! use depot_storage::{ContentStore, InMemoryContentStore};
//!
//! let store = InMemoryContentStore::new();
//! let key = ContentKey::new("maven-central", "org/acme/acme.pom")?;
//! store.store(&key, CachedContent::new("<project/>")).await?;
//! assert!(store.load(&key).await?.is_some());
//! ```
//!
//! [`CachedContent`]: depot_core::CachedContent

pub mod memory;
pub mod traits;

pub use memory::InMemoryContentStore;
pub use traits::{ContentStore, DynContentStore};
