//! Data model shared by the retriever, prompt assembler and streamer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{DocentError, Result};

// ─── Query ───────────────────────────────────────────────────────────────────

/// Unvalidated query input as handed over by the request layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RawQuery {
    /// No query field at all.
    Missing,
    /// A textual value (may still be blank).
    Text(String),
    /// A non-textual value; carries the JSON type name for the rejection message.
    NonText(&'static str),
}

impl From<&str> for RawQuery {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RawQuery {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Option<&str>> for RawQuery {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Self::Missing, Self::from)
    }
}

impl From<Option<String>> for RawQuery {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Missing, Self::Text)
    }
}

impl From<&serde_json::Value> for RawQuery {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Missing,
            Value::String(s) => Self::Text(s.clone()),
            Value::Bool(_) => Self::NonText("boolean"),
            Value::Number(_) => Self::NonText("number"),
            Value::Array(_) => Self::NonText("array"),
            Value::Object(_) => Self::NonText("object"),
        }
    }
}

/// A validated user query: textual and non-empty after trimming.
///
/// The original text is kept verbatim; trimming is only used for the check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    pub fn parse(raw: impl Into<RawQuery>) -> Result<Self> {
        match raw.into() {
            RawQuery::Missing => Err(DocentError::InvalidInput("query is missing".into())),
            RawQuery::NonText(kind) => Err(DocentError::InvalidInput(format!(
                "query must be a string, got {kind}"
            ))),
            RawQuery::Text(text) if text.trim().is_empty() => {
                Err(DocentError::InvalidInput("query is empty".into()))
            }
            RawQuery::Text(text) => Ok(Self(text)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Vectors & passages ──────────────────────────────────────────────────────

/// Fixed-length embedding produced by an embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Reject vectors whose dimensionality differs from what the index expects.
    pub fn ensure_dimensions(&self, expected: usize) -> Result<()> {
        if self.dimensions() == expected {
            Ok(())
        } else {
            Err(DocentError::DimensionMismatch {
                expected,
                actual: self.dimensions(),
            })
        }
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Scalar metadata value attached to a stored passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl MetadataValue {
    /// Convert a JSON value, dropping anything that is not a scalar.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// One stored unit of the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageRecord {
    pub vector: EmbeddingVector,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl PassageRecord {
    pub fn new(vector: impl Into<EmbeddingVector>, text: impl Into<String>) -> Self {
        Self {
            vector: vector.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A search hit: passage text plus its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPassage {
    pub text: String,
    pub score: f32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl ScoredPassage {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
            metadata: Metadata::new(),
        }
    }
}

/// Similarity metric the index was populated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Dot,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
        }
    }

    /// Similarity of two equal-length vectors; higher is closer.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            Self::Dot => dot,
            Self::Cosine => {
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    dot / (norm_a * norm_b)
                }
            }
        }
    }
}

impl FromStr for Metric {
    type Err = DocentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" | "dotproduct" | "dot_product" => Ok(Self::Dot),
            other => Err(DocentError::Config(format!(
                "unknown similarity metric '{other}' (expected cosine or dot)"
            ))),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Retrieval ───────────────────────────────────────────────────────────────

/// Which collaborator failed during retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStage {
    Embedding,
    Search,
    Deadline,
}

/// Degraded-mode signal: retrieval failed and the result is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalFailure {
    pub stage: RetrievalStage,
    pub message: String,
}

/// Passages ordered by non-increasing similarity, at most `k` of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub passages: Vec<ScoredPassage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RetrievalFailure>,
}

impl RetrievalResult {
    pub fn found(passages: Vec<ScoredPassage>) -> Self {
        Self {
            passages,
            failure: None,
        }
    }

    pub fn failed(stage: RetrievalStage, message: impl Into<String>) -> Self {
        Self {
            passages: Vec::new(),
            failure: Some(RetrievalFailure {
                stage,
                message: message.into(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// True when retrieval failed and the pipeline runs without grounding.
    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }
}

/// Separator placed between numbered passages in the rendered bundle.
pub const PASSAGE_SEPARATOR: &str = "\n\n---\n\n";

/// Retrieved passage texts in descending-similarity order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextBundle {
    passages: Vec<String>,
}

impl ContextBundle {
    pub fn new(passages: Vec<String>) -> Self {
        Self { passages }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_result(result: &RetrievalResult) -> Self {
        Self::new(result.passages.iter().map(|p| p.text.clone()).collect())
    }

    pub fn passages(&self) -> &[String] {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Render passages with numbered headers so boundaries stay unambiguous
    /// even when a passage itself contains the separator.
    pub fn render(&self) -> String {
        self.passages
            .iter()
            .enumerate()
            .map(|(i, text)| format!("[passage {}]\n{}", i + 1, text))
            .collect::<Vec<_>>()
            .join(PASSAGE_SEPARATOR)
    }

    /// Character count of [`render`](Self::render).
    pub fn rendered_chars(&self) -> usize {
        self.render().chars().count()
    }

    /// Drop passages from the end (lowest similarity first) until the rendered
    /// bundle fits in `max_chars`. Passages are never cut in the middle.
    pub fn fit_to(mut self, max_chars: usize) -> Self {
        while !self.passages.is_empty() && self.rendered_chars() > max_chars {
            self.passages.pop();
        }
        self
    }
}

// ─── Prompt ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Role-tagged messages ready to send to a chat provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedPrompt {
    pub messages: Vec<Message>,
}

impl RenderedPrompt {
    /// Flatten into a single transcript, mostly for logging and tests.
    pub fn to_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ─── Generation ──────────────────────────────────────────────────────────────

/// Per-call generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateOptions {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerateOptions {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(DocentError::Config("model identifier is empty".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(DocentError::Config(format!(
                "temperature {} outside [0, 2]",
                self.temperature
            )));
        }
        if self.max_output_tokens == 0 {
            return Err(DocentError::Config("max_output_tokens must be positive".into()));
        }
        Ok(())
    }
}

/// One incremental piece of generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamFragment {
    pub index: usize,
    pub text: String,
}

/// What a generation stream yields to its consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Fragment(StreamFragment),
    /// End of stream; `text` is the concatenation of every fragment.
    Done { text: String },
    /// Generation stopped early. Fragments already delivered stay valid.
    Interrupted { partial: String, reason: String },
}

/// Model descriptor returned by `list_models`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub context_length: u32,
    pub max_output_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_validation() {
        assert!(Query::parse("").is_err());
        assert!(Query::parse("   \n\t").is_err());
        assert!(Query::parse(None::<&str>).is_err());
        assert!(Query::parse(&serde_json::json!(42)).is_err());
        assert!(Query::parse(&serde_json::json!(null)).is_err());

        let q = Query::parse(&serde_json::json!("  What is RAG? ")).unwrap();
        assert_eq!(q.as_str(), "  What is RAG? ");
    }

    #[test]
    fn test_non_text_message_names_type() {
        let err = Query::parse(&serde_json::json!(["a"])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_metric_scores() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert!(Metric::Cosine.score(&a, &a) > 0.999);
        assert!(Metric::Cosine.score(&a, &b).abs() < 1e-6);
        assert_eq!(Metric::Dot.score(&[2.0, 3.0], &[4.0, 5.0]), 23.0);
        assert_eq!(Metric::Cosine.score(&[0.0, 0.0], &a), 0.0);
        assert_eq!("DOT".parse::<Metric>().unwrap(), Metric::Dot);
        assert!("euclid".parse::<Metric>().is_err());
    }

    #[test]
    fn test_dimension_check() {
        let v = EmbeddingVector::new(vec![0.1, 0.2, 0.3]);
        assert!(v.ensure_dimensions(3).is_ok());
        assert!(matches!(
            v.ensure_dimensions(4),
            Err(DocentError::DimensionMismatch { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_bundle_render_and_fit() {
        let bundle = ContextBundle::new(vec!["alpha".into(), "beta".into(), "gamma".into()]);
        let rendered = bundle.render();
        assert!(rendered.starts_with("[passage 1]\nalpha"));
        assert!(rendered.contains(PASSAGE_SEPARATOR));
        assert!(rendered.find("alpha") < rendered.find("gamma"));

        let budget = ContextBundle::new(vec!["alpha".into(), "beta".into()]).rendered_chars();
        let fitted = bundle.clone().fit_to(budget);
        assert_eq!(fitted.passages(), &["alpha".to_string(), "beta".to_string()]);

        assert!(bundle.fit_to(3).is_empty());
    }

    #[test]
    fn test_metadata_from_json() {
        assert_eq!(
            MetadataValue::from_json(&serde_json::json!("nba")),
            Some(MetadataValue::Text("nba".into()))
        );
        assert_eq!(MetadataValue::from_json(&serde_json::json!({"a": 1})), None);
    }

    #[test]
    fn test_generate_options_validation() {
        let mut opts = GenerateOptions {
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_output_tokens: 1024,
        };
        assert!(opts.validate().is_ok());
        opts.temperature = 2.5;
        assert!(opts.validate().is_err());
        opts.temperature = 0.0;
        opts.max_output_tokens = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_stream_event_serialization() {
        let event = StreamEvent::Done { text: "Paris".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["text"], "Paris");
    }
}
