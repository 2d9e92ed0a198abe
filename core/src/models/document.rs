use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serialized documents (and their chunks) must stay under this size so a
/// single chunk's content fits comfortably in one LLM call.
pub const MAX_CHUNK_CHARS: usize = 50_000;

const CONVERSATION_SEPARATOR: &str = "|||";
const PRIMARY_USER_LITERAL: &str = "primaryUser";

/// A single turn in a conversation. `speaker` is compared against the
/// owning document's `primary_user` when serializing — see
/// [`ConversationDocument::content`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub speaker: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextDocument {
    pub id: String,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDocument {
    pub id: String,
    pub messages: Vec<ConversationMessage>,
    /// Every speaker that appears in the conversation, in first-seen order.
    #[serde(default)]
    pub people: Vec<String>,
    /// The speaker name that gets normalized to `primaryUser` in serialized content.
    pub primary_user: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A polymorphic source document. Dispatch on the tag rather than modeling
/// an inheritance hierarchy — there are exactly two shapes the core cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Document {
    Text(TextDocument),
    Conversation(ConversationDocument),
}

impl Document {
    pub fn id(&self) -> &str {
        match self {
            Document::Text(d) => &d.id,
            Document::Conversation(d) => &d.id,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Document::Text(d) => d.timestamp,
            Document::Conversation(d) => d.timestamp,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Document::Text(d) => &d.source,
            Document::Conversation(d) => &d.source,
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            Document::Text(d) => &d.tags,
            Document::Conversation(d) => &d.tags,
        }
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        match self {
            Document::Text(d) => &d.metadata,
            Document::Conversation(d) => &d.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut HashMap<String, String> {
        match self {
            Document::Text(d) => &mut d.metadata,
            Document::Conversation(d) => &mut d.metadata,
        }
    }

    /// Deterministic textual content of this document. For conversations this
    /// is the canonical serialized form (see module docs), not the raw turns.
    pub fn content(&self) -> String {
        match self {
            Document::Text(d) => d.text.clone(),
            Document::Conversation(d) => serialize_conversation(d),
        }
    }

    /// Split into one-or-more Documents whose union reproduces this
    /// document's semantic content, each serializing to at most
    /// `MAX_CHUNK_CHARS` characters.
    pub fn chunk(&self) -> Vec<Document> {
        if self.content().chars().count() <= MAX_CHUNK_CHARS {
            return vec![self.clone()];
        }

        match self {
            Document::Text(d) => chunk_text_document(d),
            Document::Conversation(d) => chunk_conversation_document(d),
        }
    }
}

fn stamp_chunk_metadata(doc: &mut Document, chunk_number: usize, original_id: &str, chunk_type: &str) {
    let metadata = doc.metadata_mut();
    metadata.insert("_chunk_number".to_string(), chunk_number.to_string());
    metadata.insert("_original_document_id".to_string(), original_id.to_string());
    metadata.insert("_chunk_type".to_string(), chunk_type.to_string());
}

// ---------------------------------------------------------------------------
// TextDocument chunking: paragraph -> sentence -> word boundary cascade.
// ---------------------------------------------------------------------------

fn chunk_text_document(doc: &TextDocument) -> Vec<Document> {
    let paragraphs: Vec<&str> = split_preserving(&doc.text, "\n\n");
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        let candidate_len = if current.is_empty() {
            paragraph.chars().count()
        } else {
            current.chars().count() + 2 + paragraph.chars().count()
        };

        if candidate_len <= MAX_CHUNK_CHARS {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
            continue;
        }

        if !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if paragraph.chars().count() <= MAX_CHUNK_CHARS {
            current = paragraph.to_string();
        } else {
            pieces.extend(split_oversized_paragraph(paragraph));
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let mut chunk = Document::Text(TextDocument {
                id: format!("{}#chunk{}", doc.id, index + 1),
                text,
                timestamp: doc.timestamp,
                source: doc.source.clone(),
                tags: doc.tags.clone(),
                metadata: doc.metadata.clone(),
            });
            stamp_chunk_metadata(&mut chunk, index + 1, &doc.id, "text");
            let _ = total;
            chunk
        })
        .collect()
}

fn split_oversized_paragraph(paragraph: &str) -> Vec<String> {
    let sentences = split_preserving(paragraph, |c: char| matches!(c, '.' | '!' | '?'));
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        let candidate_len = if current.is_empty() {
            sentence.chars().count()
        } else {
            current.chars().count() + 1 + sentence.chars().count()
        };

        if candidate_len <= MAX_CHUNK_CHARS {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
            continue;
        }

        if !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if sentence.chars().count() <= MAX_CHUNK_CHARS {
            current = sentence.to_string();
        } else {
            pieces.extend(split_by_word_boundary(sentence, MAX_CHUNK_CHARS));
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

/// Splits `text` into pieces of at most `limit` chars, breaking only at
/// whitespace so words are never torn in half (unless a single word itself
/// exceeds `limit`, in which case it is cut hard).
fn split_by_word_boundary(text: &str, limit: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return chunk_by_char_count(text, limit);
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in words {
        let candidate_len = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };

        if candidate_len <= limit {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            continue;
        }

        if !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if word.chars().count() <= limit {
            current = word.to_string();
        } else {
            pieces.extend(chunk_by_char_count(word, limit));
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

fn chunk_by_char_count(text: &str, limit: usize) -> Vec<String> {
    text.chars()
        .collect::<Vec<char>>()
        .chunks(limit.max(1))
        .map(|chars| chars.iter().collect())
        .collect()
}

trait PatternSplit {
    fn split_text<'a>(&self, text: &'a str) -> Vec<&'a str>;
}

impl PatternSplit for &str {
    fn split_text<'a>(&self, text: &'a str) -> Vec<&'a str> {
        text.split(*self).filter(|s| !s.trim().is_empty()).collect()
    }
}

impl<F: Fn(char) -> bool> PatternSplit for F {
    fn split_text<'a>(&self, text: &'a str) -> Vec<&'a str> {
        // Keep the delimiter attached to the sentence it terminates by
        // splitting on boundaries immediately after matching characters.
        let mut result = Vec::new();
        let mut start = 0;
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        for (i, (byte_idx, ch)) in chars.iter().enumerate() {
            if self(*ch) {
                let next_is_boundary = chars
                    .get(i + 1)
                    .map(|(_, c)| c.is_whitespace())
                    .unwrap_or(true);
                if next_is_boundary {
                    let end = byte_idx + ch.len_utf8();
                    let piece = text[start..end].trim();
                    if !piece.is_empty() {
                        result.push(piece);
                    }
                    start = end;
                }
            }
        }
        let tail = text[start..].trim();
        if !tail.is_empty() {
            result.push(tail);
        }
        result
    }
}

fn split_preserving<'a, P: PatternSplit>(text: &'a str, pattern: P) -> Vec<&'a str> {
    pattern.split_text(text)
}

// ---------------------------------------------------------------------------
// ConversationDocument serialization and chunking.
// ---------------------------------------------------------------------------

fn normalized_speaker<'a>(speaker: &'a str, primary_user: &str) -> &'a str {
    if speaker == primary_user {
        PRIMARY_USER_LITERAL
    } else {
        speaker
    }
}

fn serialize_conversation(doc: &ConversationDocument) -> String {
    let mut lines = Vec::new();
    lines.push(format!("CONVO|{}|{}", doc.id, doc.source));
    lines.push(format!("PEOPLE|{}", doc.people.join(",")));
    lines.push(format!("PRIMARY|{PRIMARY_USER_LITERAL}"));
    lines.push(CONVERSATION_SEPARATOR.to_string());

    for message in &doc.messages {
        if message.content.trim().is_empty() {
            continue;
        }
        let speaker = normalized_speaker(&message.speaker, &doc.primary_user);
        lines.push(format!(
            "{}{}{}{}{}",
            speaker,
            CONVERSATION_SEPARATOR,
            message.timestamp.to_rfc3339(),
            CONVERSATION_SEPARATOR,
            message.content
        ));
    }

    lines.push(CONVERSATION_SEPARATOR.to_string());

    if !doc.tags.is_empty() {
        lines.push(format!("TAGS|{}", doc.tags.join(",")));
    }

    lines.join("\n")
}

/// Splits a single oversized message's content into `[Part N]`-prefixed
/// pieces at word boundaries. Every non-final piece carries a trailing
/// `[continued...]` marker so a reader can tell the turn was split.
fn split_oversized_message(message: &ConversationMessage, limit: usize) -> Vec<ConversationMessage> {
    // Reserve room for the longest plausible "[Part N] " / " [continued...]" decoration.
    let decoration_budget = 32;
    let body_limit = limit.saturating_sub(decoration_budget).max(1);
    let bodies = split_by_word_boundary(&message.content, body_limit);
    let total = bodies.len();

    bodies
        .into_iter()
        .enumerate()
        .map(|(index, body)| {
            let mut content = format!("[Part {}] {}", index + 1, body);
            if index + 1 < total {
                content.push_str(" [continued...]");
            }
            ConversationMessage {
                speaker: message.speaker.clone(),
                timestamp: message.timestamp,
                content,
            }
        })
        .collect()
}

fn chunk_conversation_document(doc: &ConversationDocument) -> Vec<Document> {
    // First, expand any single message whose own content already exceeds the
    // ceiling into multiple parts; the packer below then treats parts like
    // any other message.
    let mut expanded: Vec<ConversationMessage> = Vec::new();
    for message in &doc.messages {
        if message.content.chars().count() > MAX_CHUNK_CHARS {
            expanded.extend(split_oversized_message(message, MAX_CHUNK_CHARS));
        } else {
            expanded.push(message.clone());
        }
    }

    let header_overhead = format!(
        "CONVO|{}|{}\nPEOPLE|{}\nPRIMARY|{PRIMARY_USER_LITERAL}\n{CONVERSATION_SEPARATOR}\n{CONVERSATION_SEPARATOR}",
        doc.id,
        doc.source,
        doc.people.join(",")
    )
    .chars()
    .count();

    let mut groups: Vec<Vec<ConversationMessage>> = Vec::new();
    let mut current: Vec<ConversationMessage> = Vec::new();
    let mut current_len = header_overhead;

    for message in expanded {
        if message.content.trim().is_empty() {
            continue;
        }
        let line_len = message.speaker.chars().count()
            + message.timestamp.to_rfc3339().chars().count()
            + message.content.chars().count()
            + 2 * CONVERSATION_SEPARATOR.chars().count()
            + 1;

        if !current.is_empty() && current_len + line_len > MAX_CHUNK_CHARS {
            groups.push(std::mem::take(&mut current));
            current_len = header_overhead;
        }

        current_len += line_len;
        current.push(message);
    }

    if !current.is_empty() {
        groups.push(current);
    }

    let total = groups.len();
    groups
        .into_iter()
        .enumerate()
        .map(|(index, messages)| {
            let mut chunk = Document::Conversation(ConversationDocument {
                id: format!("{}#chunk{}", doc.id, index + 1),
                messages,
                people: doc.people.clone(),
                primary_user: doc.primary_user.clone(),
                timestamp: doc.timestamp,
                source: doc.source.clone(),
                tags: doc.tags.clone(),
                metadata: doc.metadata.clone(),
            });
            stamp_chunk_metadata(&mut chunk, index + 1, &doc.id, "conversation");
            let _ = total;
            chunk
        })
        .collect()
}
