use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[.,;:!?@#$%^&*()\-_\[\]{}<>/\\'"~\s]+"#).expect("punctuation pattern is valid")
});

/// Replace punctuation and whitespace runs with a single space and trim.
///
/// This is the only identity-merging step applied to extracted ids: surface
/// forms that differ by punctuation collapse together, synonyms,
/// abbreviations and pronouns do not.
pub fn normalize_id(id: &str) -> String {
    PUNCTUATION.replace_all(id, " ").trim().to_string()
}

/// Uppercase the first letter of every alphabetic run and lowercase the rest
/// (`"marco rossi"` -> `"Marco Rossi"`, `"3m company"` -> `"3M Company"`).
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Uppercase the first character, keep the rest as written so CamelCase
/// labels survive.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `"Birth Date"` -> `"birthDate"`. Keys without whitespace are kept.
pub fn format_property_key(key: &str) -> String {
    let mut words = key.split_whitespace();
    let Some(first) = words.next() else {
        return key.to_string();
    };

    let mut formatted = first.to_lowercase();
    for word in words {
        let mut chars = word.chars();
        if let Some(c) = chars.next() {
            formatted.extend(c.to_uppercase());
            formatted.push_str(&chars.as_str().to_lowercase());
        }
    }
    formatted
}

/// Maps a normalized id to the id it should be stored under.
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, normalized_id: &str) -> String;
}

/// Keeps normalized ids as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl EntityResolver for IdentityResolver {
    fn resolve(&self, normalized_id: &str) -> String {
        normalized_id.to_string()
    }
}

/// Explicit alias table, e.g. `"ai" -> "artificial intelligence"`.
/// Lookups are case-insensitive on the normalized form.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    /// Maps lowercased normalized alias -> canonical name
    aliases: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alias: &str, canonical: &str) {
        self.aliases
            .insert(normalize_id(alias).to_lowercase(), normalize_id(canonical));
    }

    pub fn with_alias(mut self, alias: &str, canonical: &str) -> Self {
        self.insert(alias, canonical);
        self
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

impl EntityResolver for AliasTable {
    fn resolve(&self, normalized_id: &str) -> String {
        self.aliases
            .get(&normalized_id.to_lowercase())
            .cloned()
            .unwrap_or_else(|| normalized_id.to_string())
    }
}
