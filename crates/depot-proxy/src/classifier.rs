//! Maps content keys to the cache policy class that governs them.

use depot_core::{ContentClass, ContentKey};

pub trait ContentClassifier: Send + Sync {
    fn classify(&self, key: &ContentKey) -> ContentClass;
}

/// Treats everything as [`ContentClass::Content`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl ContentClassifier for DefaultClassifier {
    fn classify(&self, _key: &ContentKey) -> ContentClass {
        ContentClass::Content
    }
}

/// Classifies paths ending in one of the configured suffixes as metadata.
#[derive(Debug, Clone, Default)]
pub struct SuffixClassifier {
    suffixes: Vec<String>,
}

impl SuffixClassifier {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }
}

impl ContentClassifier for SuffixClassifier {
    fn classify(&self, key: &ContentKey) -> ContentClass {
        if self.suffixes.iter().any(|s| key.path().ends_with(s.as_str())) {
            ContentClass::Metadata
        } else {
            ContentClass::Content
        }
    }
}
