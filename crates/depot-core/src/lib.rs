pub mod cache;
pub mod content;
pub mod error;
pub mod key;
pub mod time;

pub use cache::{CacheController, CacheControllerHolder, CacheInfo, ContentClass, Validator};
pub use content::{Attributes, CachedContent};
pub use error::{ErrorCategory, ProxyError, Result, StoreFailure};
pub use key::ContentKey;
pub use time::now_utc;
