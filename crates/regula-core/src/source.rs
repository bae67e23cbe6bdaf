//! Citation resolution.
//!
//! The core never fetches documents itself. Callers that can resolve a
//! citation to its legal text implement [`SourceLookup`]; Tier 0 uses it to
//! confirm that a citation points at something real, and the orchestrator
//! uses it to obtain source text when none is supplied.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::ConfigError;
use crate::rule::SourceCitation;

/// Resolves a citation to the passage it cites.
pub trait SourceLookup: Send + Sync {
    fn resolve(&self, citation: &SourceCitation) -> Option<String>;
}

impl<F> SourceLookup for F
where
    F: Fn(&SourceCitation) -> Option<String> + Send + Sync,
{
    fn resolve(&self, citation: &SourceCitation) -> Option<String> {
        self(citation)
    }
}

/// In-memory passages keyed by document and article.
///
/// Keys are `document_id:article` for a single article, or a bare
/// `document_id` as a fallback covering every article of that document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceLibrary {
    passages: BTreeMap<String, String>,
}

impl SourceLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the text of one article.
    pub fn with_article(
        mut self,
        document_id: impl AsRef<str>,
        article: impl AsRef<str>,
        text: impl Into<String>,
    ) -> Self {
        self.passages.insert(
            format!("{}:{}", document_id.as_ref(), article.as_ref()),
            text.into(),
        );
        self
    }

    /// Add text standing for a whole document.
    pub fn with_document(
        mut self,
        document_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.passages.insert(document_id.into(), text.into());
        self
    }

    /// Load a YAML or JSON mapping of keys to passages.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

impl SourceLookup for SourceLibrary {
    fn resolve(&self, citation: &SourceCitation) -> Option<String> {
        let key = format!("{}:{}", citation.document_id, citation.article);
        self.passages
            .get(&key)
            .or_else(|| self.passages.get(&citation.document_id))
            .cloned()
    }
}
