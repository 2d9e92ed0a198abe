use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse classification a fact falls under. The Consolidator and query
/// ranking both branch on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    ProfileStable,
    Preference,
    GoalPlan,
    Event,
    Relation,
    Other,
}

impl std::fmt::Display for FactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FactCategory::ProfileStable => "profile_stable",
            FactCategory::Preference => "preference",
            FactCategory::GoalPlan => "goal_plan",
            FactCategory::Event => "event",
            FactCategory::Relation => "relation",
            FactCategory::Other => "other",
        };
        f.write_str(s)
    }
}

/// A reference from a MemoryFact back to the source document (and, when
/// available, the specific chunk) it was extracted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReference {
    pub document_id: String,
    pub chunk_id: Option<String>,
}

/// An atomic, independently retrievable unit of extracted knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFact {
    pub id: Uuid,
    pub content: String,
    pub subject: String,
    pub category: FactCategory,
    pub attribute: Option<String>,
    /// 1 (low) through 3 (high).
    pub importance: u8,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub document_references: Vec<DocumentReference>,
}

impl MemoryFact {
    pub fn new(
        content: impl Into<String>,
        subject: impl Into<String>,
        category: FactCategory,
        importance: u8,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            subject: subject.into(),
            category,
            attribute: None,
            importance: importance.clamp(1, 3),
            timestamp: Utc::now(),
            source: source.into(),
            metadata: HashMap::new(),
            embedding: Vec::new(),
            document_references: Vec::new(),
        }
    }
}

/// A boolean expression over a fact's tag set. A leaf matches when the fact
/// carries every literal it names (an implicit AND within the leaf);
/// `And`/`Or` combine sub-expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TagExpr {
    Literals(Vec<String>),
    And(Vec<TagExpr>),
    Or(Vec<TagExpr>),
}

impl TagExpr {
    pub fn matches(&self, tags: &[String]) -> bool {
        match self {
            TagExpr::Literals(literals) => literals.iter().all(|l| tags.contains(l)),
            TagExpr::And(exprs) => exprs.iter().all(|e| e.matches(tags)),
            TagExpr::Or(exprs) => exprs.iter().any(|e| e.matches(tags)),
        }
    }
}

/// Filter criteria applied by the Vector Index Port when running a query.
/// All `Some` fields are conjunctive; omitted fields impose no constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    pub source: Option<String>,
    pub subject: Option<String>,
    pub category: Option<FactCategory>,
    pub attribute: Option<String>,
    pub tags: Option<TagExpr>,
    pub importance: Option<u8>,
    pub importance_min: Option<u8>,
    pub importance_max: Option<u8>,
    pub timestamp_after: Option<DateTime<Utc>>,
    pub timestamp_before: Option<DateTime<Utc>>,
    pub document_references: Vec<String>,
    /// Maximum cosine distance a result may have; `None`/`0.0` imposes no
    /// threshold. Applied by the Vector Index Port after scoring, not by
    /// `matches` (which only sees the fact, not its distance).
    pub max_distance: Option<f32>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn matches(&self, fact: &MemoryFact) -> bool {
        if let Some(source) = &self.source {
            if &fact.source != source {
                return false;
            }
        }
        if let Some(subject) = &self.subject {
            if &fact.subject != subject {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &fact.category != category {
                return false;
            }
        }
        if let Some(attribute) = &self.attribute {
            if fact.attribute.as_deref() != Some(attribute.as_str()) {
                return false;
            }
        }
        if let Some(importance) = self.importance {
            if fact.importance != importance {
                return false;
            }
        }
        if let Some(min) = self.importance_min {
            if fact.importance < min {
                return false;
            }
        }
        if let Some(max) = self.importance_max {
            if fact.importance > max {
                return false;
            }
        }
        if let Some(after) = self.timestamp_after {
            if fact.timestamp <= after {
                return false;
            }
        }
        if let Some(before) = self.timestamp_before {
            if fact.timestamp >= before {
                return false;
            }
        }
        if let Some(expr) = &self.tags {
            let fact_tags: Vec<String> = fact
                .metadata
                .get("tags")
                .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            if !expr.matches(&fact_tags) {
                return false;
            }
        }
        if !self.document_references.is_empty() {
            let has_match = fact
                .document_references
                .iter()
                .any(|r| self.document_references.contains(&r.document_id));
            if !has_match {
                return false;
            }
        }
        true
    }
}

/// A fact annotated with its cosine distance from a query embedding. Lower
/// is closer. Query results are ordered by ascending distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredFact {
    pub fact: MemoryFact,
    pub distance: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub facts: Vec<ScoredFact>,
}

/// Immutable archival copy of a document, addressed by content hash so
/// identical re-ingested content is deduplicated at storage time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl StoredDocument {
    pub fn content_hash_of(content: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A chunk of a stored document, embedded independently so evidence citation
/// can point at the smallest unit that actually supports a claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub position: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_requires_every_set_field() {
        let mut fact = MemoryFact::new("likes tea", "user", FactCategory::Preference, 2, "doc-1");
        fact.attribute = Some("beverage".to_string());

        let filter = Filter {
            subject: Some("user".to_string()),
            category: Some(FactCategory::Preference),
            importance_min: Some(1),
            ..Default::default()
        };
        assert!(filter.matches(&fact));

        let filter = Filter {
            subject: Some("other".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&fact));
    }

    #[test]
    fn tag_expr_literals_requires_all_named_tags() {
        let expr = TagExpr::Literals(vec!["work".to_string(), "urgent".to_string()]);
        assert!(expr.matches(&["work".to_string(), "urgent".to_string(), "extra".to_string()]));
        assert!(!expr.matches(&["work".to_string()]));
    }

    #[test]
    fn tag_expr_or_matches_any_branch() {
        let expr = TagExpr::Or(vec![
            TagExpr::Literals(vec!["work".to_string()]),
            TagExpr::Literals(vec!["home".to_string()]),
        ]);
        assert!(expr.matches(&["home".to_string()]));
        assert!(!expr.matches(&["other".to_string()]));
    }

    #[test]
    fn content_hash_is_stable() {
        let a = StoredDocument::content_hash_of("hello");
        let b = StoredDocument::content_hash_of("hello");
        let c = StoredDocument::content_hash_of("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
