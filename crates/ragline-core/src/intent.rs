//! Pattern-based query intent classification.
//!
//! Runs before retrieval to decide its scope. Rules are evaluated in a
//! fixed priority order and the first match wins:
//!
//! 1. [`QueryIntent::FolderList`]: "what's in folder X", "files in X", …
//! 2. [`QueryIntent::FolderSearch`]: "find Y in folder X", "search in folder X for Y"
//! 3. [`QueryIntent::FolderSummary`]: "summarize folder X", "overview of the X folder"
//! 4. [`QueryIntent::GeneralSearch`]: fallback, no entities
//!
//! Phrasings overlap ("show me the X folder" reads as both a listing and
//! a request for content); the order above is what resolves them.
//!
//! Matching is case-insensitive; captured names keep the query's casing.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Intent vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryIntent {
    FolderList,
    FolderSearch,
    FolderSummary,
    /// Reserved; no rule produces it yet.
    DocumentQuery,
    GeneralSearch,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::FolderList => "FOLDER_LIST",
            QueryIntent::FolderSearch => "FOLDER_SEARCH",
            QueryIntent::FolderSummary => "FOLDER_SUMMARY",
            QueryIntent::DocumentQuery => "DOCUMENT_QUERY",
            QueryIntent::GeneralSearch => "GENERAL_SEARCH",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "FOLDER_LIST" => Some(QueryIntent::FolderList),
            "FOLDER_SEARCH" => Some(QueryIntent::FolderSearch),
            "FOLDER_SUMMARY" => Some(QueryIntent::FolderSummary),
            "DOCUMENT_QUERY" => Some(QueryIntent::DocumentQuery),
            "GENERAL_SEARCH" => Some(QueryIntent::GeneralSearch),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The classified form of one incoming query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedQuery {
    pub intent: QueryIntent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_name: Option<String>,
    pub original_query: String,
}

impl ParsedQuery {
    fn general(query: &str) -> Self {
        Self {
            intent: QueryIntent::GeneralSearch,
            folder_name: None,
            search_term: None,
            document_name: None,
            original_query: query.to_string(),
        }
    }

    /// Where retrieval should look for this query.
    pub fn scope(&self) -> RetrievalScope {
        match (self.intent, self.folder_name.clone()) {
            (QueryIntent::FolderList, Some(folder)) => RetrievalScope::FolderListing { folder },
            (QueryIntent::FolderSearch, Some(folder)) => RetrievalScope::Folder {
                folder,
                search_term: self.search_term.clone(),
            },
            (QueryIntent::FolderSummary, Some(folder)) => RetrievalScope::FolderSummary { folder },
            _ => RetrievalScope::Corpus,
        }
    }
}

/// Retrieval scope derived from a [`ParsedQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalScope {
    /// Rank across the user's whole corpus.
    Corpus,
    /// List a folder's documents; nothing is ranked.
    FolderListing { folder: String },
    /// Rank only documents inside `folder`.
    Folder {
        folder: String,
        search_term: Option<String>,
    },
    /// Rank inside `folder` for a summary answer.
    FolderSummary { folder: String },
}

impl RetrievalScope {
    pub fn folder(&self) -> Option<&str> {
        match self {
            RetrievalScope::Corpus => None,
            RetrievalScope::FolderListing { folder }
            | RetrievalScope::Folder { folder, .. }
            | RetrievalScope::FolderSummary { folder } => Some(folder),
        }
    }

    /// Text to rank with: the extracted search term when there is one.
    pub fn ranking_query<'a>(&'a self, original: &'a str) -> &'a str {
        match self {
            RetrievalScope::Folder {
                search_term: Some(term),
                ..
            } => term,
            _ => original,
        }
    }
}

/// A captured folder name, optionally quoted.
const NAME: &str = r#"["']?(?P<folder>[^"'?]+?)["']?"#;
/// Optional article/possessive before a name.
const DET: &str = r"(?:the\s+|my\s+)?";
/// Trailing punctuation up to end of input.
const END: &str = r"\s*[?.!]*\s*$";

/// One entry in the priority table.
#[derive(Debug)]
pub struct IntentRule {
    pub intent: QueryIntent,
    pattern: Regex,
}

impl IntentRule {
    fn new(intent: QueryIntent, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(&format!("(?i){}", pattern))
            .with_context(|| format!("invalid intent pattern for {}: {}", intent, pattern))?;
        Ok(Self { intent, pattern })
    }

    fn apply(&self, query: &str) -> Option<ParsedQuery> {
        let caps = self.pattern.captures(query)?;
        let grab = |name: &str| {
            caps.name(name)
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Some(ParsedQuery {
            intent: self.intent,
            folder_name: grab("folder"),
            search_term: grab("term"),
            document_name: None,
            original_query: query.to_string(),
        })
    }
}

/// Ordered rule table plus the folder-mention heuristic.
#[derive(Debug)]
pub struct IntentParser {
    rules: Vec<IntentRule>,
    in_word: Regex,
}

impl IntentParser {
    pub fn new() -> Result<Self> {
        use QueryIntent::*;

        let table: Vec<(QueryIntent, String)> = vec![
            // Listing.
            (
                FolderList,
                format!(r"\b(?:what(?:'|’)?s|what\s+is)\s+in\s+{DET}folder\s+{NAME}{END}"),
            ),
            (
                FolderList,
                format!(r"\b(?:what(?:'|’)?s|what\s+is)\s+in\s+{DET}{NAME}\s+folder{END}"),
            ),
            (
                FolderList,
                format!(r"\b(?:show|list|display)\b.*?\b(?:in|inside|within)\s+{DET}folder\s+{NAME}{END}"),
            ),
            (
                FolderList,
                format!(r"\b(?:show|list|display)\b.*?\b(?:in|inside|within)\s+{DET}{NAME}\s+folder{END}"),
            ),
            (
                FolderList,
                format!(r"\bcontents?\s+of\s+{DET}(?:folder\s+)?{NAME}(?:\s+folder)?{END}"),
            ),
            (
                FolderList,
                format!(r"\b(?:files|documents|docs)\s+in\s+{DET}(?:folder\s+)?{NAME}(?:\s+folder)?{END}"),
            ),
            (
                FolderList,
                format!(r"\bfolder\s+{NAME}\s+(?:contains?|has|have|includes?)\b"),
            ),
            (FolderList, format!(r"\bshow\s+me\s+{DET}{NAME}\s+folder{END}")),
            // Search within a folder.
            (
                FolderSearch,
                format!(
                    r#"\b(?:find|search(?:\s+for)?|look\s+for)\s+["']?(?P<term>.+?)["']?\s+(?:in|within|inside)\s+{DET}folder\s+{NAME}{END}"#
                ),
            ),
            (
                FolderSearch,
                format!(
                    r#"\b(?:find|search(?:\s+for)?|look\s+for)\s+["']?(?P<term>.+?)["']?\s+(?:in|within|inside)\s+{DET}{NAME}\s+folder{END}"#
                ),
            ),
            (
                FolderSearch,
                format!(
                    r#"\b(?:search|look)\s+in\s+{DET}folder\s+{NAME}\s+for\s+["']?(?P<term>[^"'?]+?)["']?{END}"#
                ),
            ),
            (
                FolderSearch,
                format!(
                    r#"\b(?:search|look)\s+in\s+{DET}{NAME}\s+folder\s+for\s+["']?(?P<term>[^"'?]+?)["']?{END}"#
                ),
            ),
            // Summaries.
            (
                FolderSummary,
                format!(r"\b(?:summari[sz]e|overview\s+of|summary\s+of)\s+{DET}folder\s+{NAME}{END}"),
            ),
            (
                FolderSummary,
                format!(r"\b(?:summari[sz]e|overview\s+of|summary\s+of)\s+{DET}{NAME}\s+folder{END}"),
            ),
        ];

        let rules = table
            .iter()
            .map(|(intent, pattern)| IntentRule::new(*intent, pattern))
            .collect::<Result<Vec<_>>>()?;

        let in_word = Regex::new(r"\bin\s+\w+").context("invalid folder-mention pattern")?;

        Ok(Self { rules, in_word })
    }

    /// Rule intents in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = QueryIntent> + '_ {
        self.rules.iter().map(|r| r.intent)
    }

    /// Classify `query`; the first matching rule wins.
    pub fn parse(&self, query: &str) -> ParsedQuery {
        let trimmed = query.trim();
        self.rules
            .iter()
            .find_map(|rule| rule.apply(trimmed))
            .map(|mut parsed| {
                parsed.original_query = query.to_string();
                parsed
            })
            .unwrap_or_else(|| ParsedQuery::general(query))
    }

    /// Cheap check for folder-ish wording, independent of [`parse`](Self::parse).
    pub fn mentions_folder(&self, query: &str) -> bool {
        let lower = query.to_lowercase();
        lower.contains("folder") || lower.contains("directory") || self.in_word.is_match(&lower)
    }
}
