use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// A stored document. Field order is not significant.
pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Books,
    Loans,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Books => "books",
            Collection::Loans => "loans",
        }
    }

    /// Field holding the unique key of every document in the collection.
    pub fn key_field(&self) -> &'static str {
        match self {
            Collection::Books => "book_id",
            Collection::Loans => "loan_id",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conjunction of field equalities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().and_eq(field, value)
    }

    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| document.get(field) == Some(expected))
    }

    /// The value the filter pins for `field`, if any.
    pub fn value_of(&self, field: &str) -> Option<&Value> {
        self.conditions
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// `$inc`: add to an integer field.
    Inc { field: String, by: i64 },
    /// `$set`: overwrite a field.
    Set { field: String, value: Value },
}

impl Update {
    pub fn inc(field: impl Into<String>, by: i64) -> Self {
        Update::Inc {
            field: field.into(),
            by,
        }
    }

    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Update::Set {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertResult {
    pub inserted_key: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadConcern {
    Local,
    Majority,
    #[default]
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acknowledgment {
    Nodes(u32),
    #[default]
    Majority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteConcern {
    pub w: Acknowledgment,
    pub timeout: Duration,
}

impl WriteConcern {
    pub fn majority(timeout: Duration) -> Self {
        Self {
            w: Acknowledgment::Majority,
            timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    #[default]
    Primary,
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    pub read_concern: ReadConcern,
    pub write_concern: WriteConcern,
    pub read_preference: ReadPreference,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            read_concern: ReadConcern::Snapshot,
            write_concern: WriteConcern::majority(Duration::from_millis(5000)),
            read_preference: ReadPreference::Primary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

/// Opaque position in a change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResumeToken(pub(crate) u64);

impl ResumeToken {
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: ResumeToken,
    pub operation: OperationType,
    pub collection: Collection,
    pub document_key: Document,
    pub full_document: Option<Document>,
    pub updated_fields: Option<Document>,
    pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Keep only the projected fields in the document payloads.
    pub fn project(mut self, fields: &[String]) -> Self {
        let keep = |doc: Document| -> Document {
            doc.into_iter()
                .filter(|(name, _)| fields.iter().any(|f| f == name))
                .collect()
        };
        self.full_document = self.full_document.map(keep);
        self.updated_fields = self.updated_fields.map(keep);
        self
    }
}

/// What a change feed subscriber wants to see.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub collection: Collection,
    pub operations: Vec<OperationType>,
    pub projection: Option<Vec<String>>,
    pub resume_after: Option<ResumeToken>,
}

impl Subscription {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            operations: Vec::new(),
            projection: None,
            resume_after: None,
        }
    }

    pub fn with_operation(mut self, operation: OperationType) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn with_projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn resume_after(mut self, token: Option<ResumeToken>) -> Self {
        self.resume_after = token;
        self
    }

    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        event.collection == self.collection
            && (self.operations.is_empty() || self.operations.contains(&event.operation))
    }

    /// Filter and project an event for this subscriber.
    pub fn shape(&self, event: &ChangeEvent) -> Option<ChangeEvent> {
        if !self.accepts(event) {
            return None;
        }
        let event = event.clone();
        Some(match &self.projection {
            Some(fields) => event.project(fields),
            None => event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn update_event(updated: Value) -> ChangeEvent {
        ChangeEvent {
            id: ResumeToken(7),
            operation: OperationType::Update,
            collection: Collection::Books,
            document_key: doc(json!({"book_id": "b1"})),
            full_document: Some(doc(json!({"book_id": "b1", "title": "Dune", "stock": 1}))),
            updated_fields: Some(doc(updated)),
            committed_at: Utc::now(),
        }
    }

    #[test]
    fn test_filter_matches_all_conditions() {
        let document = doc(json!({"book_id": "b1", "stock": 3}));
        assert!(Filter::eq("book_id", "b1").matches(&document));
        assert!(Filter::eq("book_id", "b1").and_eq("stock", 3).matches(&document));
        assert!(!Filter::eq("book_id", "b1").and_eq("stock", 4).matches(&document));
        assert!(!Filter::eq("title", "Dune").matches(&document));
        assert!(Filter::new().matches(&document));
    }

    #[test]
    fn test_subscription_filters_operation_and_projects() {
        let subscription = Subscription::new(Collection::Books)
            .with_operation(OperationType::Update)
            .with_projection(["stock"]);

        let shaped = subscription
            .shape(&update_event(json!({"stock": 1, "title": "Dune II"})))
            .unwrap();
        let full = shaped.full_document.unwrap();
        assert_eq!(full.len(), 1);
        assert_eq!(full.get("stock"), Some(&json!(1)));
        let updated = shaped.updated_fields.unwrap();
        assert_eq!(updated.len(), 1);
        assert!(updated.get("title").is_none());
        // Document key is never projected away.
        assert_eq!(shaped.document_key.get("book_id"), Some(&json!("b1")));

        let mut insert = update_event(json!({}));
        insert.operation = OperationType::Insert;
        assert!(subscription.shape(&insert).is_none());

        let mut other_collection = update_event(json!({"stock": 1}));
        other_collection.collection = Collection::Loans;
        assert!(subscription.shape(&other_collection).is_none());
    }
}
