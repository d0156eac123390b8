use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Granularity of a chunk within its source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkScale {
    Document,
    Section,
    #[default]
    Paragraph,
}

/// Classification of chunk content assigned by the ingestion collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    Table,
    List,
    Procedure,
    Instruction,
    Definition,
    TableOfContents,
    Heading,
    Summary,
    Example,
}

impl ContentType {
    pub const fn is_instructional(self) -> bool {
        matches!(self, Self::Instruction | Self::Procedure)
    }

    pub const fn is_table_of_contents(self) -> bool {
        matches!(self, Self::TableOfContents)
    }
}

/// A retrievable unit of document content with its own embedding and metadata.
///
/// Chunks are produced and owned by the ingestion pipeline; this core only
/// reads them. Parent/child/sibling ids are weak references resolved through
/// the chunk store, never ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source_id: String,
    pub version: u32,
    pub chunk_index: u32,
    pub content: String,
    pub heading: Option<String>,
    pub subheading: Option<String>,
    pub page_number: Option<u32>,
    pub token_count: usize,
    pub character_count: usize,
    pub quality_score: f32,
    pub embedding: Vec<f32>,
    pub parent_chunk_id: Option<String>,
    pub child_chunk_ids: Vec<String>,
    pub sibling_chunk_ids: Vec<String>,
    pub scale: ChunkScale,
    pub hierarchy_path: Option<String>,
    pub content_type: ContentType,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(source_id: String, chunk_index: u32, content: String) -> Self {
        let character_count = content.chars().count();
        Self {
            id: Uuid::new_v4().to_string(),
            source_id,
            version: 1,
            chunk_index,
            content,
            heading: None,
            subheading: None,
            page_number: None,
            token_count: character_count.div_ceil(4),
            character_count,
            quality_score: 0.5,
            embedding: Vec::new(),
            parent_chunk_id: None,
            child_chunk_ids: Vec::new(),
            sibling_chunk_ids: Vec::new(),
            scale: ChunkScale::default(),
            hierarchy_path: None,
            content_type: ContentType::default(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_quality(mut self, quality_score: f32) -> Self {
        self.quality_score = quality_score.clamp(0.0, 1.0);
        self
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = Some(heading.into());
        self
    }

    pub fn with_page(mut self, page_number: u32) -> Self {
        self.page_number = Some(page_number);
        self
    }

    pub fn with_hierarchy_path(mut self, path: impl Into<String>) -> Self {
        self.hierarchy_path = Some(path.into());
        self
    }

    /// Age of the chunk in whole days, used for recency boosts.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_creation_defaults() {
        let chunk = Chunk::new("source_1".into(), 0, "A body of text.".into());

        assert!(!chunk.id.is_empty());
        assert_eq!(chunk.source_id, "source_1");
        assert_eq!(chunk.character_count, 15);
        assert_eq!(chunk.token_count, 4);
        assert_eq!(chunk.content_type, ContentType::Text);
        assert!(chunk.parent_chunk_id.is_none());
    }

    #[test]
    fn test_content_type_flags() {
        assert!(ContentType::Instruction.is_instructional());
        assert!(ContentType::Procedure.is_instructional());
        assert!(!ContentType::Definition.is_instructional());
        assert!(ContentType::TableOfContents.is_table_of_contents());
    }

    #[test]
    fn test_quality_is_clamped() {
        let chunk = Chunk::new("s".into(), 0, "x".into()).with_quality(1.7);
        assert!((chunk.quality_score - 1.0).abs() < f32::EPSILON);
    }
}
