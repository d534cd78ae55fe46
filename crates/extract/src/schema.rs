use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

pub type Properties = BTreeMap<String, String>;

/// Node as emitted by the language model, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, deserialize_with = "loose_properties")]
    pub properties: Option<Properties>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRelationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default, deserialize_with = "loose_properties")]
    pub properties: Option<Properties>,
}

/// Output of one extraction call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGraph {
    pub nodes: Vec<RawNode>,
    pub relationships: Vec<RawRelationship>,
}

impl RawGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRelationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub properties: Properties,
}

impl CanonicalRelationship {
    /// Identity of a relationship inside a graph document.
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.source, &self.target, &self.rel_type)
    }

    /// Stable textual id, used where the store has no native id to offer.
    pub fn relationship_id(&self) -> String {
        format!("{}-[{}]->{}", self.source, self.rel_type, self.target)
    }
}

/// Models hand back properties either as an object or as a list of
/// `{key, value}` pairs, and values are not always strings.
fn loose_properties<'de, D>(deserializer: D) -> Result<Option<Properties>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Pair {
        key: String,
        value: serde_json::Value,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Map(BTreeMap<String, serde_json::Value>),
        Pairs(Vec<Pair>),
    }

    let loose = Option::<Loose>::deserialize(deserializer)?;
    let entries: Vec<(String, serde_json::Value)> = match loose {
        None => return Ok(None),
        Some(Loose::Map(map)) => map.into_iter().collect(),
        Some(Loose::Pairs(pairs)) => pairs.into_iter().map(|p| (p.key, p.value)).collect(),
    };

    let properties = entries
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect();

    Ok(Some(properties))
}
