use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Prompt template families, one per recognized answer shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    Definition,
    Procedure,
    Comparison,
    List,
    Example,
    Troubleshooting,
    /// Follow-up answers inside an ongoing conversation; never chosen by
    /// phrasing alone, only when the retrieved chunks came in via the
    /// contextual strategy.
    Contextual,
    #[default]
    General,
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TemplateType::Definition => "definition",
            TemplateType::Procedure => "procedure",
            TemplateType::Comparison => "comparison",
            TemplateType::List => "list",
            TemplateType::Example => "example",
            TemplateType::Troubleshooting => "troubleshooting",
            TemplateType::Contextual => "contextual",
            TemplateType::General => "general",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for TemplateType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "definition" => Ok(Self::Definition),
            "procedure" => Ok(Self::Procedure),
            "comparison" => Ok(Self::Comparison),
            "list" => Ok(Self::List),
            "example" => Ok(Self::Example),
            "troubleshooting" => Ok(Self::Troubleshooting),
            "contextual" => Ok(Self::Contextual),
            "general" => Ok(Self::General),
            other => Err(format!("unknown template type '{other}'")),
        }
    }
}

impl TemplateType {
    /// Detects the template from the query phrasing. Pattern order is the
    /// priority order; the first match wins.
    pub fn detect(query: &str) -> Self {
        let patterns: [(TemplateType, &str); 6] = [
            (
                TemplateType::Procedure,
                r"(?i)\bhow\s+(?:do|to|can|should)\b|\bsteps?\s+(?:to|for)\b|\bprocedure\b|\bguide\s+to\b",
            ),
            (
                TemplateType::Definition,
                r"(?i)\bwhat\s+is\b|\bdefine\b|\bdefinition\s+of\b|\bmeaning\s+of\b",
            ),
            (
                TemplateType::Comparison,
                r"(?i)\bcompare\b|\bdifference\s+between\b|\bversus\b|\bvs\.?\b",
            ),
            (
                TemplateType::List,
                r"(?i)\blist\b|\btypes\s+of\b|\bkinds\s+of\b|\bwhat\s+are\s+the\b",
            ),
            (
                TemplateType::Example,
                r"(?i)\bexamples?\s+of\b|\bsample\b|\bshow\s+me\b",
            ),
            (
                TemplateType::Troubleshooting,
                r"(?i)\berror\b|\bfail(?:s|ed|ure)?\b|\bnot\s+working\b|\bissue\b|\bproblem\b|\btroubleshoot(?:ing)?\b",
            ),
        ];

        for (template, pattern) in patterns {
            if Regex::new(pattern).is_ok_and(|regex| regex.is_match(query)) {
                return template;
            }
        }
        TemplateType::General
    }

    /// Answer-shaping instructions injected into the system prompt.
    pub fn instructions(self) -> &'static str {
        match self {
            TemplateType::Definition => {
                "Give a clear definition first, then add context from the provided \
                 material. Keep the definition to one or two sentences."
            }
            TemplateType::Procedure => {
                "Answer with numbered steps in the order they must be performed. \
                 Only include steps supported by the provided material."
            }
            TemplateType::Comparison => {
                "Compare the items point by point, covering each side fairly. \
                 Close with a short summary of when each applies."
            }
            TemplateType::List => {
                "Answer as a bulleted list. Add a one-line description per item \
                 where the material provides one."
            }
            TemplateType::Example => {
                "Lead with a concrete example from the provided material, then \
                 explain what it demonstrates."
            }
            TemplateType::Troubleshooting => {
                "Identify the likely cause first, then give resolution steps in \
                 order of likelihood. Mention preconditions where relevant."
            }
            TemplateType::Contextual => {
                "This continues an ongoing conversation. Answer the follow-up in \
                 the context of the discussion so far, without repeating what was \
                 already established."
            }
            TemplateType::General => {
                "Answer directly using only the provided material. Say so plainly \
                 if the material does not cover the question."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_priority() {
        assert_eq!(
            TemplateType::detect("How do I create a fund?"),
            TemplateType::Procedure
        );
        assert_eq!(
            TemplateType::detect("What is a custody account?"),
            TemplateType::Definition
        );
        assert_eq!(
            TemplateType::detect("difference between ETF and mutual fund"),
            TemplateType::Comparison
        );
        assert_eq!(
            TemplateType::detect("quarterly figures"),
            TemplateType::General
        );
    }

    #[test]
    fn test_round_trip_names() {
        for template in [
            TemplateType::Definition,
            TemplateType::Procedure,
            TemplateType::Comparison,
            TemplateType::List,
            TemplateType::Example,
            TemplateType::Troubleshooting,
            TemplateType::Contextual,
            TemplateType::General,
        ] {
            let parsed: TemplateType = template.to_string().parse().expect("parse template name");
            assert_eq!(parsed, template);
        }
    }
}
