//! Cached payloads and their attributes.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::cache::CacheInfo;

/// Attributes attached to a piece of content.
///
/// `cache_info` is the one attribute the orchestration layer reads and
/// writes; everything else is opaque to it and kept for format-specific
/// collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub cache_info: Option<CacheInfo>,
    pub extra: BTreeMap<String, String>,
}

impl Attributes {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.extra.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.extra.insert(name.into(), value.into());
    }
}

/// Content retrieved from, or about to be written to, a content store.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedContent {
    payload: Bytes,
    content_type: Option<String>,
    attributes: Attributes,
}

impl CachedContent {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            content_type: None,
            attributes: Attributes::default(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_cache_info(mut self, info: CacheInfo) -> Self {
        self.attributes.cache_info = Some(info);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.set(name, value);
        self
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn cache_info(&self) -> Option<&CacheInfo> {
        self.attributes.cache_info.as_ref()
    }

    pub fn set_cache_info(&mut self, info: CacheInfo) {
        self.attributes.cache_info = Some(info);
    }
}
