//! Cross-document contradiction detection: prompt construction, response
//! decoding and presentation.
//!
//! The network call itself is made by the application (which applies a
//! timeout); everything here is pure. Detection is an optional
//! enrichment, so every malformed response decodes to
//! [`ContradictionResult::none`] instead of an error.

use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::FullDocument;

/// Characters of each document included in the prompt.
pub const MAX_DOC_CHARS: usize = 3_000;

/// How involved a query is; gates whether detection runs at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
    Simple,
    Medium,
    Complex,
}

impl FromStr for QueryComplexity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(QueryComplexity::Simple),
            "medium" => Ok(QueryComplexity::Medium),
            "complex" => Ok(QueryComplexity::Complex),
            other => bail!("unknown complexity '{}': use simple, medium or complex", other),
        }
    }
}

/// Severity of a single contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    fn tag(&self) -> &'static str {
        match self {
            Severity::High => "[HIGH]",
            Severity::Medium => "[MEDIUM]",
            Severity::Low => "[LOW]",
        }
    }
}

/// Severity across all contradictions of one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallSeverity {
    None,
    Low,
    Medium,
    High,
}

impl From<Severity> for OverallSeverity {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Low => OverallSeverity::Low,
            Severity::Medium => OverallSeverity::Medium,
            Severity::High => OverallSeverity::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contradiction {
    /// Names of the documents in conflict.
    pub documents: Vec<String>,
    pub conflicting_claims: Vec<String>,
    pub severity: Severity,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContradictionResult {
    pub has_contradictions: bool,
    pub contradictions: Vec<Contradiction>,
    pub overall_severity: OverallSeverity,
}

impl ContradictionResult {
    /// The "nothing found" result, also used for every fallback path.
    pub fn none() -> Self {
        Self {
            has_contradictions: false,
            contradictions: Vec::new(),
            overall_severity: OverallSeverity::None,
        }
    }
}

/// Whether detection is worth a model call for this query.
pub fn should_detect(complexity: QueryComplexity, document_count: usize) -> bool {
    if document_count < 2 {
        return false;
    }
    match complexity {
        QueryComplexity::Complex => true,
        QueryComplexity::Medium => document_count >= 3,
        QueryComplexity::Simple => false,
    }
}

/// Build the single detection prompt for `documents`.
pub fn build_prompt(documents: &[FullDocument], query: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You compare documents for factual contradictions relevant to a user's question.\n\n",
    );
    let _ = writeln!(prompt, "Question: {}\n", query);

    for (i, doc) in documents.iter().enumerate() {
        let total = doc.content.chars().count();
        let excerpt: String = doc.content.chars().take(MAX_DOC_CHARS).collect();
        let _ = writeln!(prompt, "Document {}: {}", i + 1, doc.filename);
        prompt.push_str("---\n");
        prompt.push_str(&excerpt);
        if total > MAX_DOC_CHARS {
            let _ = write!(
                prompt,
                "\n[truncated: showing {} of {} characters]",
                MAX_DOC_CHARS, total
            );
        }
        prompt.push_str("\n---\n\n");
    }

    prompt.push_str(
        "List only claims that directly conflict between two or more documents. \
         Differences in scope or wording are not contradictions.\n\
         Rate each contradiction: high if it changes the answer to the question, \
         medium if it affects details of the answer, low otherwise.\n\n\
         Respond with a single JSON object and nothing else, in exactly this shape:\n\
         {\"hasContradictions\": true or false, \
         \"contradictions\": [{\"documents\": [\"<document name>\", \"<document name>\"], \
         \"conflictingClaims\": [\"<claim>\", \"<claim>\"], \
         \"severity\": \"high\" | \"medium\" | \"low\", \
         \"explanation\": \"<why these conflict>\"}], \
         \"overallSeverity\": \"high\" | \"medium\" | \"low\" | \"none\"}\n",
    );
    prompt
}

/// Locate the first balanced `{...}` in `text`, respecting JSON strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    balanced_object(&text[start..])
}

/// Every balanced `{...}` that starts at some `{` in `text`, in order of
/// its opening brace.
pub fn json_object_candidates(text: &str) -> impl Iterator<Item = &str> {
    text.match_indices('{')
        .filter_map(move |(start, _)| balanced_object(&text[start..]))
}

/// The balanced object at the start of `text`, which begins with `{`.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResult {
    #[serde(default)]
    has_contradictions: Option<bool>,
    #[serde(default)]
    contradictions: Vec<Contradiction>,
    #[serde(default)]
    overall_severity: Option<OverallSeverity>,
}

/// Decode a model response, falling back to [`ContradictionResult::none`].
///
/// The result is made self-consistent: `has_contradictions` mirrors the
/// list, and a non-empty list never reports an overall severity of
/// `none`.
pub fn parse_response(text: &str) -> ContradictionResult {
    let mut candidates = json_object_candidates(text).peekable();
    if candidates.peek().is_none() {
        warn!(
            response_len = text.len(),
            "no JSON object in contradiction response"
        );
        return ContradictionResult::none();
    }

    // Prose may contain braces of its own; take the first object that decodes.
    let mut last_error = None;
    let decoded = candidates.find_map(|json| match serde_json::from_str::<RawResult>(json) {
        Ok(raw) => Some(raw),
        Err(e) => {
            last_error = Some(e);
            None
        }
    });
    let Some(raw) = decoded else {
        if let Some(e) = last_error {
            warn!(error = %e, "malformed contradiction response");
        }
        return ContradictionResult::none();
    };

    if raw.contradictions.is_empty() {
        if raw.has_contradictions == Some(true) {
            warn!("model reported contradictions without listing any");
        }
        return ContradictionResult::none();
    }

    let highest = raw
        .contradictions
        .iter()
        .map(|c| OverallSeverity::from(c.severity))
        .max()
        .unwrap_or(OverallSeverity::None);
    let overall_severity = match raw.overall_severity {
        Some(OverallSeverity::None) | None => highest,
        Some(s) => s,
    };

    ContradictionResult {
        has_contradictions: true,
        contradictions: raw.contradictions,
        overall_severity,
    }
}

/// Render a result for the end user; empty when nothing was found.
pub fn format_for_user(result: &ContradictionResult) -> String {
    if !result.has_contradictions {
        return String::new();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Potential contradictions found across your documents ({} total):\n",
        result.contradictions.len()
    );

    for (i, c) in result.contradictions.iter().enumerate() {
        let _ = writeln!(out, "{}. {} {}", i + 1, c.severity.tag(), c.documents.join(" vs "));
        for claim in &c.conflicting_claims {
            let _ = writeln!(out, "   - {}", claim);
        }
        if !c.explanation.is_empty() {
            let _ = writeln!(out, "   Why: {}", c.explanation);
        }
        out.push('\n');
    }

    out.push_str(
        "Recommendation: check these points against the original documents before relying on the answer.",
    );
    out
}
