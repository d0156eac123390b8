use std::fmt;

use serde::{Deserialize, Serialize};

use common::chunk::Chunk;

/// How source attributions are rendered into the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CitationFormat {
    #[default]
    Inline,
    Detailed,
    Academic,
    Numbered,
}

impl fmt::Display for CitationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CitationFormat::Inline => "inline",
            CitationFormat::Detailed => "detailed",
            CitationFormat::Academic => "academic",
            CitationFormat::Numbered => "numbered",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for CitationFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "detailed" => Ok(Self::Detailed),
            "academic" => Ok(Self::Academic),
            "numbered" => Ok(Self::Numbered),
            other => Err(format!("unknown citation format '{other}'")),
        }
    }
}

/// One attribution entry, paired with a context chunk by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    /// 1-based position within the assembled context.
    pub index: usize,
    /// Id of the chunk this citation traces back to.
    pub chunk_id: String,
    pub source: String,
    pub heading: Option<String>,
    pub page_number: Option<u32>,
}

impl Citation {
    pub fn for_chunk(index: usize, chunk: &Chunk) -> Self {
        Self {
            index,
            chunk_id: chunk.id.clone(),
            source: normalize_source(&chunk.source_id),
            heading: chunk.heading.clone(),
            page_number: chunk.page_number,
        }
    }

    /// Renders the attribution in the requested format.
    pub fn render(&self, format: CitationFormat) -> String {
        match format {
            CitationFormat::Inline => match self.page_number {
                Some(page) => format!("(Guide {}, p.{page})", self.source),
                None => format!("(Guide {})", self.source),
            },
            CitationFormat::Detailed => {
                let mut rendered = format!("Source: {}", self.source);
                if let Some(heading) = &self.heading {
                    rendered.push_str(&format!(", section \"{heading}\""));
                }
                if let Some(page) = self.page_number {
                    rendered.push_str(&format!(", page {page}"));
                }
                rendered
            }
            CitationFormat::Academic => match self.page_number {
                Some(page) => format!("[{}, p. {page}]", self.source),
                None => format!("[{}]", self.source),
            },
            CitationFormat::Numbered => format!("[{}]", self.index),
        }
    }
}

/// Turns a raw source id into a readable title: the extension goes, camelCase
/// and separators become spaces, and each word is capitalized.
pub fn normalize_source(source_id: &str) -> String {
    let stem = source_id
        .rsplit('/')
        .next()
        .unwrap_or(source_id);
    let stem = match stem.rfind('.') {
        Some(position) if position > 0 => &stem[..position],
        _ => stem,
    };

    let mut spaced = String::with_capacity(stem.len() + 8);
    let mut previous_lower = false;
    for character in stem.chars() {
        if character == '_' || character == '-' {
            spaced.push(' ');
            previous_lower = false;
            continue;
        }
        if character.is_ascii_uppercase() && previous_lower {
            spaced.push(' ');
        }
        previous_lower = character.is_ascii_lowercase() || character.is_ascii_digit();
        spaced.push(character);
    }

    spaced
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
