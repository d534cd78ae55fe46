use extract::LanguageModel;
use index::EmbeddingClient;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::model::{Community, CommunityReport};

const SYSTEM_PROMPT: &str = "You summarize communities of a knowledge graph. \
Only use the entities, relationships and excerpts you are given.";

const MAX_PROMPT_ENTITIES: usize = 30;
const MAX_PROMPT_RELATIONSHIPS: usize = 30;
const MAX_PROMPT_CHUNKS: usize = 5;
const MAX_CHUNK_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("summary generation failed for community {community_id}: {message}")]
    Generation { community_id: usize, message: String },

    #[error("empty summary for community {0}")]
    Empty(usize),

    #[error("summary of community {community_id} names entities outside it: {names:?}")]
    Unfaithful {
        community_id: usize,
        names: Vec<String>,
    },
}

/// Entity names a summary is checked against, with their match patterns
/// compiled once per run.
#[derive(Debug, Default)]
pub struct Vocabulary {
    entries: Vec<VocabularyEntry>,
}

#[derive(Debug)]
struct VocabularyEntry {
    name: String,
    lowercase: String,
    pattern: Option<Regex>,
}

impl Vocabulary {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        let names: BTreeSet<String> = names.into_iter().filter(|n| !n.is_empty()).collect();
        let entries = names
            .into_iter()
            .map(|name| {
                let lowercase = name.to_lowercase();
                // \b cannot anchor names that start or end in punctuation ("C++")
                let pattern = Regex::new(&format!(r"(?:^|\W){}(?:\W|$)", regex::escape(&lowercase)))
                    .map_err(|e| warn!(name = %name, error = %e, "Falling back to plain scan for entity name"))
                    .ok();
                VocabularyEntry {
                    name,
                    lowercase,
                    pattern,
                }
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl VocabularyEntry {
    fn mentioned_in(&self, text: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.is_match(text),
            None => bounded_matches(text, &self.lowercase).next().is_some(),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Byte ranges where `name` occurs in `text` with no word character directly
/// on either side.
fn bounded_matches<'a>(
    text: &'a str,
    name: &'a str,
) -> impl Iterator<Item = std::ops::Range<usize>> + 'a {
    text.match_indices(name).filter_map(move |(start, m)| {
        let end = start + m.len();
        let open = text[..start].chars().next_back().is_none_or(|c| !is_word_char(c));
        let close = text[end..].chars().next().is_none_or(|c| !is_word_char(c));
        (open && close).then_some(start..end)
    })
}

fn erase_bounded(text: &str, name: &str) -> String {
    let mut erased = String::with_capacity(text.len());
    let mut last = 0;
    for range in bounded_matches(text, name) {
        erased.push_str(&text[last..range.start]);
        erased.push(' ');
        last = range.end;
    }
    erased.push_str(&text[last..]);
    erased
}

/// Vocabulary entries that `summary` mentions although they are not among
/// `entity_names`. Matching is case-insensitive and bounded by non-word
/// characters or the ends of the text; mentions that are part of a
/// community entity's own name do not count.
pub fn check_faithfulness(
    summary: &str,
    entity_names: &[String],
    vocabulary: &Vocabulary,
) -> Result<(), Vec<String>> {
    let own: BTreeSet<String> = entity_names.iter().map(|n| n.to_lowercase()).collect();

    let mut remaining = summary.to_lowercase();
    let mut by_length: Vec<&String> = own.iter().filter(|n| !n.is_empty()).collect();
    by_length.sort_by_key(|n| std::cmp::Reverse(n.len()));
    for name in by_length {
        remaining = erase_bounded(&remaining, name);
    }

    let foreign: Vec<String> = vocabulary
        .entries
        .iter()
        .filter(|entry| !own.contains(&entry.lowercase))
        .filter(|entry| entry.mentioned_in(&remaining))
        .map(|entry| entry.name.clone())
        .collect();

    if foreign.is_empty() { Ok(()) } else { Err(foreign) }
}

/// Generates community reports. Every summarizer belongs to one
/// generation run; [`CommunitySummarizer::for_run`] starts a new one.
#[derive(Clone)]
pub struct CommunitySummarizer {
    model: Arc<dyn LanguageModel>,
    embeddings: Option<EmbeddingClient>,
    run_id: Uuid,
    vocabulary: Arc<Vocabulary>,
}

impl CommunitySummarizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            embeddings: None,
            run_id: Uuid::new_v4(),
            vocabulary: Arc::new(Vocabulary::default()),
        }
    }

    pub fn with_embeddings(mut self, embeddings: EmbeddingClient) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    /// A summarizer for a fresh run, checking summaries against `vocabulary`.
    pub fn for_run(&self, vocabulary: impl IntoIterator<Item = String>) -> Self {
        Self {
            model: Arc::clone(&self.model),
            embeddings: self.embeddings.clone(),
            run_id: Uuid::new_v4(),
            vocabulary: Arc::new(Vocabulary::new(vocabulary)),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Generate a report for one community
    pub async fn summarize(&self, community: &Community) -> Result<CommunityReport, ReportError> {
        let prompt = build_summary_prompt(community);

        let summary = self
            .model
            .generate(SYSTEM_PROMPT, &prompt, false)
            .await
            .map_err(|e| ReportError::Generation {
                community_id: community.community_id,
                message: format!("{e:#}"),
            })?
            .trim()
            .to_string();

        if summary.is_empty() {
            return Err(ReportError::Empty(community.community_id));
        }

        check_faithfulness(&summary, &community.entity_names, &self.vocabulary).map_err(
            |names| ReportError::Unfaithful {
                community_id: community.community_id,
                names,
            },
        )?;

        let summary_embeddings = match &self.embeddings {
            Some(client) => match client.embed(&summary).await {
                Ok(embedding) => Some(embedding),
                Err(e) => {
                    warn!(community_id = community.community_id, error = %e, "Failed to embed community summary");
                    None
                }
            },
            None => None,
        };

        Ok(CommunityReport {
            community_type: community.community_type.clone(),
            community_id: community.community_id,
            run_id: self.run_id,
            summary,
            rank: community.rank(),
            community_size: community.community_size,
            attributes: community.attributes.clone(),
            summary_embeddings,
        })
    }
}

fn build_summary_prompt(community: &Community) -> String {
    let mut prompt = String::from(
        "You are analyzing a community of related entities from a knowledge graph.\n\n",
    );

    prompt.push_str("ENTITIES IN THIS COMMUNITY:\n");
    for name in community.entity_names.iter().take(MAX_PROMPT_ENTITIES) {
        prompt.push_str(&format!("- {name}\n"));
    }

    if let Some(rows) = community.table_repr.as_ref().filter(|rows| !rows.is_empty()) {
        prompt.push_str("\nRELATIONSHIPS (source, relationship, target):\n");
        for row in rows.iter().take(MAX_PROMPT_RELATIONSHIPS) {
            prompt.push_str(&format!(
                "- {}, {}, {}\n",
                row.source, row.relationship, row.target
            ));
        }
    }

    if !community.chunks.is_empty() {
        prompt.push_str("\nSOURCE EXCERPTS:\n");
        for chunk in community.chunks.iter().take(MAX_PROMPT_CHUNKS) {
            let excerpt: String = chunk.text.chars().take(MAX_CHUNK_CHARS).collect();
            prompt.push_str(&format!("---\n{excerpt}\n"));
        }
    }

    prompt.push_str(
        "\nTASK: Write a short summary of what connects these entities.\n\
        Mention only the entities listed above. Do NOT use markdown formatting.\n\n\
        SUMMARY:",
    );

    prompt
}
