//! Translation of the user-facing query syntax into FTS5 `MATCH` expressions.
//!
//! Supported syntax: bare words (auto prefix-wildcarded from four characters),
//! explicit `word*`, `"quoted phrases"`, `field:word`, `field:"quoted value"`,
//! the `from:` / `to:` aliases for the email author and recipient columns, and
//! the binary operators `AND`, `OR`, `NOT` between terms.

use std::sync::OnceLock;

use regex::Regex;

use crate::Collection;

const OPERATORS: [&str; 3] = ["AND", "OR", "NOT"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Word(String),
    Phrase { field: Option<String>, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Term(String),
    Operator(&'static str),
}

/// Builds the FTS5 match expression for `query` against `collection`.
///
/// Returns an empty string when nothing searchable remains.
pub fn build_match_expression(query: &str, collection: Collection) -> String {
    let translated = translate_aliases(query.trim(), collection);
    let schema = collection.schema();

    let mut items = Vec::new();
    for piece in lex(&translated) {
        match piece {
            Piece::Phrase { field, text } => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                let term = match field {
                    Some(field) if schema.has_column(&field) => format!("{field}:{}", quote(text)),
                    Some(field) => quote(&format!("{field} {text}")),
                    None => quote(text),
                };
                items.push(Item::Term(term));
            }
            Piece::Word(word) => {
                if let Some(operator) = OPERATORS.iter().find(|operator| **operator == word) {
                    items.push(Item::Operator(*operator));
                    continue;
                }
                let (field, value) = match split_field(&word) {
                    Some((field, value)) if schema.has_column(field) => (Some(field), value),
                    _ => (None, word.as_str()),
                };
                if let Some(term) = render_word(value) {
                    items.push(Item::Term(match field {
                        Some(field) => format!("{field}:{term}"),
                        None => term,
                    }));
                }
            }
        }
    }

    join_items(items)
}

/// Query terms used to detect exact matches on short identifying fields.
///
/// Values written as `field:value` against a known column are kept apart as
/// qualifiers; they only count when that column holds the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTerms {
    terms: Vec<String>,
    qualified: Vec<(String, String)>,
}

impl QueryTerms {
    pub fn parse(query: &str, collection: Collection) -> Self {
        let translated = translate_aliases(query.trim(), collection);
        let schema = collection.schema();
        let mut parsed = Self::default();
        for piece in lex(&translated) {
            let (field, raw) = match piece {
                Piece::Phrase { field, text } => (field, text),
                Piece::Word(word) if OPERATORS.contains(&word.as_str()) => continue,
                Piece::Word(word) => match split_field(&word) {
                    Some((field, value)) => (Some(field.to_string()), value.to_string()),
                    None => (None, word),
                },
            };
            let normalized = normalize_token(&raw.replace(['\'', '’'], ""));
            if normalized.is_empty() {
                continue;
            }
            match field {
                Some(field) if schema.has_column(&field) => {
                    let qualifier = (field, normalized);
                    if !parsed.qualified.contains(&qualifier) {
                        parsed.qualified.push(qualifier);
                    }
                }
                _ => {
                    if !parsed.terms.contains(&normalized) {
                        parsed.terms.push(normalized);
                    }
                }
            }
        }
        parsed
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.qualified.is_empty()
    }

    /// `(column, lowercased value)` pairs from `field:value` pieces.
    pub fn qualified(&self) -> &[(String, String)] {
        &self.qualified
    }

    /// True when any unqualified query term equals a whole token of `field`.
    pub fn matches_field(&self, field: &str) -> bool {
        if self.terms.is_empty() || field.trim().is_empty() {
            return false;
        }
        let tokens = field_tokens(field);
        self.terms
            .iter()
            .any(|term| tokens.iter().any(|token| token == term))
    }

    /// True when `column_text` looks up a qualified column whose text contains
    /// the qualifier's value.
    pub fn matches_qualified<E>(
        &self,
        mut column_text: impl FnMut(&str) -> Result<Option<String>, E>,
    ) -> Result<bool, E> {
        for (column, value) in &self.qualified {
            if let Some(text) = column_text(column)? {
                if text.to_lowercase().contains(value.as_str()) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn translate_aliases(query: &str, collection: Collection) -> String {
    static ALIASES: OnceLock<Option<Regex>> = OnceLock::new();
    if collection != Collection::Email {
        return query.to_string();
    }
    match ALIASES.get_or_init(|| Regex::new(r"(?i)\b(from|to)\s*:\s*").ok()) {
        Some(aliases) => aliases
            .replace_all(query, |captures: &regex::Captures<'_>| {
                format!("{}_:", captures[1].to_ascii_lowercase())
            })
            .into_owned(),
        None => query.to_string(),
    }
}

/// Splits into whitespace-separated words and double-quoted phrases. A word
/// ending in `:` directly followed by a quote becomes a field-qualified phrase.
fn lex(input: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut chars = input.chars().peekable();
    loop {
        while chars.next_if(|character| character.is_whitespace()).is_some() {}
        let Some(&next) = chars.peek() else {
            break;
        };
        if next == '"' {
            chars.next();
            pieces.push(Piece::Phrase {
                field: None,
                text: read_phrase(&mut chars),
            });
            continue;
        }

        let mut word = String::new();
        while let Some(character) = chars.next_if(|character| !character.is_whitespace() && *character != '"') {
            word.push(character);
        }
        if chars.peek() == Some(&'"') && word.ends_with(':') && word.len() > 1 {
            chars.next();
            word.pop();
            pieces.push(Piece::Phrase {
                field: Some(word),
                text: read_phrase(&mut chars),
            });
        } else {
            pieces.push(Piece::Word(word));
        }
    }
    pieces
}

fn read_phrase(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut text = String::new();
    for character in chars.by_ref() {
        if character == '"' {
            break;
        }
        text.push(character);
    }
    text
}

fn split_field(word: &str) -> Option<(&str, &str)> {
    let (field, value) = word.split_once(':')?;
    let mut field_chars = field.chars();
    let starts_ok = field_chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    let rest_ok = field_chars.all(|character| character.is_ascii_alphanumeric() || character == '_');
    (starts_ok && rest_ok).then_some((field, value))
}

fn render_word(value: &str) -> Option<String> {
    let has_wildcard = value.ends_with('*');
    let core = value.trim_end_matches('*').trim_end_matches(['?', '/']);
    let core = core.replace(['\'', '’'], "");
    if !core.chars().any(|character| character.is_alphanumeric()) {
        return None;
    }

    if needs_quotes(&core) {
        let quoted = quote(&core);
        return Some(if has_wildcard { format!("{quoted}*") } else { quoted });
    }
    if has_wildcard || core.chars().count() >= 4 {
        Some(format!("{core}*"))
    } else {
        Some(core)
    }
}

fn needs_quotes(token: &str) -> bool {
    token
        .chars()
        .any(|character| !(character.is_alphanumeric() || character == '_'))
        || matches!(token, "NEAR")
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// Drops operators that do not sit between two terms.
fn join_items(items: Vec<Item>) -> String {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    let mut pending_operator: Option<&'static str> = None;
    for item in items {
        match item {
            Item::Operator(operator) => {
                if !out.is_empty() && pending_operator.is_none() {
                    pending_operator = Some(operator);
                }
            }
            Item::Term(term) => {
                if let Some(operator) = pending_operator.take() {
                    out.push(operator.to_string());
                }
                out.push(term);
            }
        }
    }
    out.join(" ")
}

fn normalize_token(raw: &str) -> String {
    raw.trim_matches(|character: char| !character.is_alphanumeric())
        .to_lowercase()
}

fn field_tokens(field: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for chunk in field.split(|character: char| character.is_whitespace() || "<>,;()[]\"'".contains(character)) {
        let whole = normalize_token(chunk);
        if whole.is_empty() {
            continue;
        }
        for part in whole.split(|character: char| !character.is_alphanumeric()) {
            if !part.is_empty() && part != whole {
                tokens.push(part.to_string());
            }
        }
        tokens.push(whole);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(query: &str) -> String {
        build_match_expression(query, Collection::Email)
    }

    #[test]
    fn unit_short_words_stay_exact_and_long_words_get_prefix_wildcard() {
        assert_eq!(email("tax invoice"), "tax invoice*");
        assert_eq!(email("inv*"), "inv*");
    }

    #[test]
    fn unit_from_and_to_aliases_map_to_columns() {
        assert_eq!(email("from:alice"), "from_:alice*");
        assert_eq!(email("FROM : bob"), "from_:bob");
        assert_eq!(email("to:\"Team Lead\""), "to_:\"Team Lead\"");
    }

    #[test]
    fn unit_special_characters_are_quoted() {
        assert_eq!(email("alice@example.com"), "\"alice@example.com\"");
        assert_eq!(email("from:alice@example.com"), "from_:\"alice@example.com\"");
        assert_eq!(email("re-org"), "\"re-org\"");
    }

    #[test]
    fn unit_phrases_and_punctuation_are_handled() {
        assert_eq!(email("\"quarterly report\" budget?"), "\"quarterly report\" budget*");
        assert_eq!(email("what's up / ?"), "whats* up");
        assert_eq!(email("   "), "");
        assert_eq!(email("!!! ..."), "");
    }

    #[test]
    fn unit_operators_only_survive_between_terms() {
        assert_eq!(email("alice OR bob"), "alice* OR bob");
        assert_eq!(email("OR alice AND"), "alice*");
        assert_eq!(email("cat AND OR dog"), "cat AND dog");
        assert_eq!(email("cats and dogs"), "cats* and dogs*");
    }

    #[test]
    fn regression_unknown_field_qualifier_is_treated_as_text() {
        assert_eq!(email("foo:bar"), "\"foo:bar\"");
        assert_eq!(email("foo:\"two words\""), "\"foo two words\"");
        assert_eq!(
            build_match_expression("from:alice", Collection::Memory),
            "\"from:alice\""
        );
        assert_eq!(
            build_match_expression("role:user", Collection::Memory),
            "role:user*"
        );
    }

    #[test]
    fn unit_query_terms_match_whole_field_tokens() {
        let terms = QueryTerms::parse("Alice invoice*", Collection::Email);
        assert!(terms.matches_field("Alice Smith <alice@example.com>"));
        assert!(terms.matches_field("Re: Invoice #42"));
        assert!(!terms.matches_field("Alicia Keys"));

        let address = QueryTerms::parse("from:alice@example.com", Collection::Email);
        assert!(!address.matches_field("Alice <alice@example.com>"));
        assert_eq!(address.qualified(), [("from_".to_string(), "alice@example.com".to_string())]);
    }

    #[test]
    fn regression_qualifier_only_matches_its_own_column() {
        let terms = QueryTerms::parse("to:dave", Collection::Email);
        assert!(!terms.is_empty());
        assert!(!terms.matches_field("Dave <dave@example.com>"));

        let columns = [("from_", "Dave <dave@example.com>"), ("to_", "erin@example.com")];
        let lookup = |column: &str| -> Result<Option<String>, ()> {
            Ok(columns
                .iter()
                .find(|(name, _)| *name == column)
                .map(|(_, text)| text.to_string()))
        };
        assert_eq!(terms.matches_qualified(lookup), Ok(false));

        let sent_to_dave = |column: &str| -> Result<Option<String>, ()> {
            Ok((column == "to_").then(|| "Dave Jones <dave@example.com>".to_string()))
        };
        assert_eq!(terms.matches_qualified(sent_to_dave), Ok(true));

        let unknown = QueryTerms::parse("foo:bar", Collection::Email);
        assert!(unknown.qualified().is_empty());
        assert!(unknown.matches_field("bar none"));
    }
}
