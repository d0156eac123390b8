use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use common::conversation::ConversationContext;
use common::utils::text::extract_keywords;

/// Intent categories recognized by the pattern classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Definition,
    Procedure,
    Comparison,
    List,
    Example,
    Troubleshooting,
    #[default]
    General,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueryType::Definition => "definition",
            QueryType::Procedure => "procedure",
            QueryType::Comparison => "comparison",
            QueryType::List => "list",
            QueryType::Example => "example",
            QueryType::Troubleshooting => "troubleshooting",
            QueryType::General => "general",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    #[default]
    Simple,
    Moderate,
    Complex,
}

/// Derived, ephemeral view of a query; recomputed per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query_type: QueryType,
    pub complexity: Complexity,
    /// Every intent whose pattern family matched, in priority order.
    pub intents: Vec<QueryType>,
    pub keywords: Vec<String>,
    pub entities: Vec<String>,
    pub word_count: usize,
    pub has_history: bool,
    pub prior_turns: usize,
}

impl QueryAnalysis {
    /// Best-effort default for queries matching nothing.
    pub fn general(word_count: usize) -> Self {
        Self {
            query_type: QueryType::General,
            complexity: Complexity::Simple,
            intents: Vec::new(),
            keywords: Vec::new(),
            entities: Vec::new(),
            word_count,
            has_history: false,
            prior_turns: 0,
        }
    }

    pub fn wants_detail(&self, query: &str) -> bool {
        let lower = query.to_ascii_lowercase();
        lower.contains("detailed")
            || lower.contains("step by step")
            || lower.contains("step-by-step")
            || lower.contains("comprehensive")
    }
}

/// Classification seam: the regex heuristic below can be swapped for a
/// trained model without touching pipeline callers.
pub trait QueryClassifier: Send + Sync {
    fn analyze(&self, query: &str, context: &ConversationContext) -> QueryAnalysis;
}

/// Domain terms matched as entities when the caller does not supply a list.
const DEFAULT_DOMAIN_TERMS: &[&str] = &[
    "fund",
    "portfolio",
    "account",
    "invoice",
    "compliance",
    "onboarding",
    "workflow",
    "report",
    "statement",
    "transaction",
    "policy",
    "audit",
];

pub struct RegexQueryClassifier {
    patterns: Vec<(QueryType, Regex)>,
    domain_terms: Vec<String>,
}

impl RegexQueryClassifier {
    pub fn new(domain_terms: Option<Vec<String>>) -> Self {
        // Pattern order doubles as intent priority; the first match wins the
        // query_type slot.
        let raw_patterns = [
            (
                QueryType::Procedure,
                r"(?i)\bhow\s+(?:do|to|can|should)\b|\bsteps?\s+(?:to|for)\b|\bprocess\s+for\b|\bprocedure\b|\bguide\s+to\b",
            ),
            (
                QueryType::Definition,
                r"(?i)\bwhat\s+is\b|\bwhat\s+does\s+\w+\s+mean\b|\bdefine\b|\bdefinition\s+of\b|\bmeaning\s+of\b",
            ),
            (
                QueryType::Comparison,
                r"(?i)\bcompare\b|\bcomparison\b|\bdifference\s+between\b|\bversus\b|\bvs\.?\b|\bwhich\s+is\s+better\b",
            ),
            (
                QueryType::List,
                r"(?i)\blist\b|\btypes\s+of\b|\bkinds\s+of\b|\bwhat\s+are\s+the\b|\boptions\s+for\b",
            ),
            (
                QueryType::Example,
                r"(?i)\bexamples?\s+of\b|\bsample\b|\bshow\s+me\b|\bdemonstrat(?:e|ion)\b|\billustrat(?:e|ion)\b",
            ),
            (
                QueryType::Troubleshooting,
                r"(?i)\berror\b|\bfail(?:s|ed|ure)?\b|\bnot\s+working\b|\bissue\b|\bproblem\b|\btroubleshoot(?:ing)?\b|\bbroken\b|\bwrong\b",
            ),
        ];

        let patterns = raw_patterns
            .into_iter()
            .filter_map(|(query_type, pattern)| {
                Regex::new(pattern).ok().map(|regex| (query_type, regex))
            })
            .collect();

        let domain_terms = domain_terms.unwrap_or_else(|| {
            DEFAULT_DOMAIN_TERMS
                .iter()
                .map(|term| (*term).to_string())
                .collect()
        });

        Self {
            patterns,
            domain_terms,
        }
    }
}

impl Default for RegexQueryClassifier {
    fn default() -> Self {
        Self::new(None)
    }
}

impl QueryClassifier for RegexQueryClassifier {
    fn analyze(&self, query: &str, context: &ConversationContext) -> QueryAnalysis {
        let word_count = query.split_whitespace().count();

        let intents: Vec<QueryType> = self
            .patterns
            .iter()
            .filter(|(_, regex)| regex.is_match(query))
            .map(|(query_type, _)| *query_type)
            .collect();

        let query_type = intents.first().copied().unwrap_or(QueryType::General);

        let complexity = if word_count > 15 || intents.len() > 2 {
            Complexity::Complex
        } else if word_count > 8 || intents.len() > 1 {
            Complexity::Moderate
        } else {
            Complexity::Simple
        };

        let keywords = extract_keywords(query);

        let lower = query.to_ascii_lowercase();
        let entities: Vec<String> = self
            .domain_terms
            .iter()
            .filter(|term| lower.contains(term.as_str()))
            .cloned()
            .collect();

        debug!(
            %query_type,
            ?complexity,
            intents = intents.len(),
            keywords = keywords.len(),
            entities = entities.len(),
            "classified query"
        );

        QueryAnalysis {
            query_type,
            complexity,
            intents,
            keywords,
            entities,
            word_count,
            has_history: !context.history.is_empty(),
            prior_turns: context.turn_count(),
        }
    }
}

/// Health-check style phrasings that must never reach the chunk store.
pub fn is_system_probe(query: &str) -> bool {
    let normalized = query.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "health check" | "healthcheck" | "ping" | "status" | "status check" | "test" | "smoke test"
    ) || normalized == "are you alive"
        || normalized == "are you up"
        || normalized == "are you working"
}
