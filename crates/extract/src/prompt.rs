use crate::ontology::Ontology;

pub const SYSTEM_PROMPT: &str = "You are a top-tier algorithm designed for extracting information in structured formats to build a Knowledge Graph.";

/// The four values bound into an extraction request. Ontology fields are
/// rendered verbatim as JSON; an absent field renders empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPromptVars {
    pub allowed_labels: String,
    pub labels_descriptions: String,
    pub allowed_relationships: String,
    pub input_text: String,
}

impl ExtractionPromptVars {
    pub fn new(ontology: Option<&Ontology>, input_text: &str) -> Self {
        let render = |value: Option<String>| value.unwrap_or_default();

        Self {
            allowed_labels: render(
                ontology
                    .filter(|o| o.constrains_labels())
                    .and_then(|o| serde_json::to_string(o.labels()).ok()),
            ),
            labels_descriptions: render(
                ontology
                    .and_then(|o| o.labels_descriptions.as_ref())
                    .filter(|d| !d.is_empty())
                    .and_then(|d| serde_json::to_string(d).ok()),
            ),
            allowed_relationships: render(
                ontology
                    .filter(|o| o.constrains_relations())
                    .and_then(|o| serde_json::to_string(o.relations()).ok()),
            ),
            input_text: input_text.to_string(),
        }
    }
}

pub fn build_extraction_prompt(vars: &ExtractionPromptVars) -> String {
    format!(
        r#"{system}

Your task is to extract information in the form of Nodes and Relationships from an INPUT TEXT.

- NODES represent entities and concepts.
- RELATIONSHIPS represent the connections between nodes.
- PROPERTIES characterize nodes or relationships.

RULES:
1. Output ONLY a JSON object with this exact schema, no markdown, no explanations:
{{
  "nodes": [
    {{"id": "unique human readable identifier", "type": "node label", "properties": {{"key": "value"}}}}
  ],
  "relationships": [
    {{"source": "id of source node", "target": "id of target node", "type": "relationship type", "properties": {{"key": "value"}}}}
  ]
}}
2. Every relationship source and target MUST be the id of a node in "nodes".
3. If allowed labels and relationship types are provided you MUST use only those.
   If they are empty you may use any label and relationship type you see fit.
4. Use the most complete name of an entity as its id, consistently.
5. Attach numbers and dates as properties of nodes, never as separate nodes.
   Use camelCase property keys.

ALLOWED NODE LABELS: {allowed_labels}
LABELS DESCRIPTIONS: {labels_descriptions}
ALLOWED RELATIONSHIPS TYPES: {allowed_relationships}

## Begin Extraction!
INPUT TEXT: {input_text}

JSON OUTPUT:"#,
        system = SYSTEM_PROMPT,
        allowed_labels = vars.allowed_labels,
        labels_descriptions = vars.labels_descriptions,
        allowed_relationships = vars.allowed_relationships,
        input_text = vars.input_text,
    )
}

pub fn build_ontology_prompt(domain_description: Option<&str>, texts: &[&str]) -> String {
    let mut context = String::new();
    for (i, text) in texts.iter().enumerate() {
        context.push_str(&format!("[{}] {}\n", i + 1, text.trim()));
    }

    format!(
        r#"{system}

You will be given a description of a domain and a list of texts from that domain.
Use them as context to create an Ontology: the allowed node labels (with a short
description of each) and the allowed relationship types.

Output ONLY a JSON object with this exact schema:
{{
  "allowed_labels": ["Label"],
  "labels_descriptions": {{"Label": "what the label represents"}},
  "allowed_relations": ["RELATIONSHIP_TYPE"]
}}

If the domain description is empty, infer the Ontology from the texts alone.

### BEGIN!
DOMAIN DESCRIPTION: {domain}
CONTEXT TEXTS:
{context}"#,
        system = SYSTEM_PROMPT,
        domain = domain_description.unwrap_or_default(),
        context = context,
    )
}
