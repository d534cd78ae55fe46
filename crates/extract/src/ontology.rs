use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::error::OntologyLoadError;

/// Project-specific schema limiting the labels and relationship types an
/// extractor may produce. An absent or empty field leaves that dimension
/// unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ontology {
    #[serde(default)]
    pub allowed_labels: Option<Vec<String>>,
    #[serde(default)]
    pub labels_descriptions: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub allowed_relations: Option<Vec<String>>,
}

/// What to do when the ontology file cannot be loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OntologyFallback {
    /// Log the failure and extract without constraints.
    Unconstrained,
    /// Surface the failure to the caller.
    #[default]
    Fail,
}

impl Ontology {
    pub fn new(
        allowed_labels: impl IntoIterator<Item = impl Into<String>>,
        allowed_relations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            allowed_labels: Some(allowed_labels.into_iter().map(Into::into).collect()),
            labels_descriptions: None,
            allowed_relations: Some(allowed_relations.into_iter().map(Into::into).collect()),
        }
    }

    pub fn with_descriptions(mut self, descriptions: BTreeMap<String, String>) -> Self {
        self.labels_descriptions = Some(descriptions);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, OntologyLoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| OntologyLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&content).map_err(|source| OntologyLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load an ontology, applying `fallback` when the file is missing or
    /// malformed. `Ok(None)` means extraction runs unconstrained.
    pub fn load(
        path: &Path,
        fallback: OntologyFallback,
    ) -> Result<Option<Self>, OntologyLoadError> {
        match Self::from_file(path) {
            Ok(ontology) => {
                info!(
                    path = %path.display(),
                    labels = ontology.labels().len(),
                    relations = ontology.relations().len(),
                    "Loaded ontology"
                );
                Ok(Some(ontology))
            }
            Err(e) if fallback == OntologyFallback::Unconstrained => {
                warn!(error = %e, "Ontology unavailable, extraction will be unconstrained");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn labels(&self) -> &[String] {
        self.allowed_labels.as_deref().unwrap_or_default()
    }

    pub fn relations(&self) -> &[String] {
        self.allowed_relations.as_deref().unwrap_or_default()
    }

    pub fn constrains_labels(&self) -> bool {
        !self.labels().is_empty()
    }

    pub fn constrains_relations(&self) -> bool {
        !self.relations().is_empty()
    }

    pub fn is_unconstrained(&self) -> bool {
        !self.constrains_labels()
            && !self.constrains_relations()
            && self.labels_descriptions.as_ref().is_none_or(|d| d.is_empty())
    }

    /// Allowed label matching `label`, ignoring case. Always `Some` when
    /// labels are unconstrained.
    pub fn resolve_label<'a>(&'a self, label: &'a str) -> Option<&'a str> {
        resolve(self.labels(), label)
    }

    pub fn resolve_relation<'a>(&'a self, rel_type: &'a str) -> Option<&'a str> {
        resolve(self.relations(), rel_type)
    }
}

fn resolve<'a>(allowed: &'a [String], candidate: &'a str) -> Option<&'a str> {
    if allowed.is_empty() {
        return Some(candidate);
    }
    allowed
        .iter()
        .find(|a| a.as_str() == candidate)
        .or_else(|| allowed.iter().find(|a| a.eq_ignore_ascii_case(candidate)))
        .map(String::as_str)
}
