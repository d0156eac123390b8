//! Prompt assembly: turns a retrieval result into a model-ready prompt with
//! answer-shaping instructions, attributed context, conversation history,
//! and a token budget that the output is guaranteed to respect whenever the
//! material can be shrunk far enough.

pub mod budget;
pub mod citations;
pub mod templates;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::conversation::ConversationContext;
use retrieval_pipeline::ordering::mitigate_lost_in_middle;
use retrieval_pipeline::{RetrievalOutput, ScoredChunk};

use budget::{chunk_char_cap, estimate, truncate_at_sentence, TokenBudget, TokenValidation};
use citations::{Citation, CitationFormat};
use templates::TemplateType;

/// Smallest per-chunk cap the shrink loop will go down to, in tokens.
const MIN_CHUNK_TOKENS: usize = 100;

/// Knobs for prompt assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyTuning {
    #[serde(default = "default_context_window_size")]
    pub context_window_size: usize,
    #[serde(default = "default_reserved_for_response")]
    pub reserved_for_response: usize,
    /// Hard cap on the instruction portion of the system prompt, in
    /// characters; the context and history sections are governed by the
    /// token budget instead.
    #[serde(default = "default_system_prompt_max_length")]
    pub system_prompt_max_length: usize,
    #[serde(default = "default_max_tokens_per_chunk")]
    pub max_tokens_per_chunk: usize,
    #[serde(default)]
    pub citation_format: CitationFormat,
    /// Overrides template detection when set.
    #[serde(default)]
    pub template_type: Option<TemplateType>,
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
    /// Per-message character cap when rendering history.
    #[serde(default = "default_history_char_limit")]
    pub history_char_limit: usize,
}

impl Default for AssemblyTuning {
    fn default() -> Self {
        Self {
            context_window_size: default_context_window_size(),
            reserved_for_response: default_reserved_for_response(),
            system_prompt_max_length: default_system_prompt_max_length(),
            max_tokens_per_chunk: default_max_tokens_per_chunk(),
            citation_format: CitationFormat::default(),
            template_type: None,
            max_history_messages: default_max_history_messages(),
            history_char_limit: default_history_char_limit(),
        }
    }
}

const fn default_context_window_size() -> usize {
    8192
}

const fn default_reserved_for_response() -> usize {
    1024
}

const fn default_system_prompt_max_length() -> usize {
    1500
}

const fn default_max_tokens_per_chunk() -> usize {
    500
}

const fn default_max_history_messages() -> usize {
    6
}

const fn default_history_char_limit() -> usize {
    200
}

/// The finished prompt plus everything a caller needs to audit it.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledPrompt {
    /// Instructions, reference material, and conversation history.
    pub system_prompt: String,
    /// Instructional wrapper around the raw query.
    pub user_prompt: String,
    pub template: TemplateType,
    pub citations: Vec<Citation>,
    pub validation: TokenValidation,
}

impl AssembledPrompt {
    /// Both halves joined, for callers that send a single string.
    pub fn combined(&self) -> String {
        format!("{}\n\n{}", self.system_prompt, self.user_prompt)
    }
}

pub struct PromptAssembler {
    tuning: AssemblyTuning,
}

impl PromptAssembler {
    pub fn new(tuning: AssemblyTuning) -> Self {
        Self { tuning }
    }

    /// Assembles the prompt, shrinking until it fits the token budget.
    ///
    /// Shrinking order: drop the least relevant chunk (always keeping one),
    /// then tighten the per-chunk cap, then drop history oldest-first. If
    /// the budget still cannot be met the prompt is returned with
    /// `validation.within_budget == false`.
    pub fn assemble(
        &self,
        retrieval: &RetrievalOutput,
        context: &ConversationContext,
    ) -> AssembledPrompt {
        let template = self
            .tuning
            .template_type
            .unwrap_or_else(|| select_template(retrieval));

        let budget = TokenBudget::new(
            self.tuning.context_window_size,
            self.tuning.reserved_for_response,
        );

        // Strong chunks go to the edges of the context block.
        let mut chunks = mitigate_lost_in_middle(retrieval.chunks.clone());
        let mut per_chunk_cap = self.tuning.max_tokens_per_chunk;
        let mut history_count = self.tuning.max_history_messages.min(context.history.len());

        let mut chunks_dropped = 0usize;
        let mut history_dropped = 0usize;

        let user_prompt = render_user_prompt(&retrieval.query);
        let user_tokens = estimate(&user_prompt);

        let (system_prompt, citations, chunks_truncated, estimated) = loop {
            let instructions = self.render_instructions(template);
            let (context_block, citations, chunks_truncated) =
                self.render_context(&chunks, per_chunk_cap);
            let history_block = self.render_history(context, history_count);

            let mut system_prompt = instructions;
            if !context_block.is_empty() {
                system_prompt.push_str("\n\n");
                system_prompt.push_str(&context_block);
            }
            if !history_block.is_empty() {
                system_prompt.push_str("\n\n");
                system_prompt.push_str(&history_block);
            }

            let estimated = estimate(&system_prompt) + user_tokens;
            if estimated <= budget.available {
                break (system_prompt, citations, chunks_truncated, estimated);
            }

            if chunks.len() > 1 {
                drop_least_relevant(&mut chunks);
                chunks_dropped += 1;
            } else if per_chunk_cap > MIN_CHUNK_TOKENS {
                per_chunk_cap = (per_chunk_cap / 2).max(MIN_CHUNK_TOKENS);
            } else if history_count > 0 {
                history_count -= 1;
                history_dropped += 1;
            } else {
                warn!(
                    estimated,
                    available = budget.available,
                    "prompt cannot be shrunk to fit the token budget"
                );
                break (system_prompt, citations, chunks_truncated, estimated);
            }
        };

        let within_budget = estimated <= budget.available;
        debug!(
            %template,
            chunks = chunks.len(),
            chunks_dropped,
            history_dropped,
            estimated,
            within_budget,
            "prompt assembled"
        );

        AssembledPrompt {
            system_prompt,
            user_prompt,
            template,
            citations,
            validation: TokenValidation {
                estimated_tokens: estimated,
                budget,
                within_budget,
                chunks_dropped,
                chunks_truncated,
                history_dropped,
            },
        }
    }

    fn render_instructions(&self, template: TemplateType) -> String {
        let prompt = format!(
            "You are an assistant answering questions from internal documentation. \
             Base every statement on the reference material below and cite the \
             source you used. {}",
            template.instructions()
        );
        truncate_at_sentence(&prompt, self.tuning.system_prompt_max_length)
    }

    fn render_context(
        &self,
        chunks: &[ScoredChunk],
        per_chunk_cap: usize,
    ) -> (String, Vec<Citation>, usize) {
        if chunks.is_empty() {
            return (String::new(), Vec::new(), 0);
        }

        let char_cap = chunk_char_cap(per_chunk_cap);
        let mut block = String::from("## Reference material\n");
        let mut citations = Vec::with_capacity(chunks.len());
        let mut truncated_count = 0usize;

        for (position, scored) in chunks.iter().enumerate() {
            let index = position + 1;
            let citation = Citation::for_chunk(index, &scored.chunk);

            let content = truncate_at_sentence(&scored.chunk.content, char_cap);
            if content.len() < scored.chunk.content.len() {
                truncated_count += 1;
            }

            block.push('\n');
            if let Some(heading) = &scored.chunk.heading {
                block.push_str(&format!("### {heading}\n"));
            }
            block.push_str(&citation.render(self.tuning.citation_format));
            block.push('\n');
            block.push_str(&content);
            block.push('\n');

            citations.push(citation);
        }

        if self.tuning.citation_format == CitationFormat::Numbered {
            block.push_str("\nSources:\n");
            for citation in &citations {
                block.push_str(&format!(
                    "[{}] {}\n",
                    citation.index,
                    citation.render(CitationFormat::Detailed)
                ));
            }
        }

        (block, citations, truncated_count)
    }

    fn render_history(&self, context: &ConversationContext, history_count: usize) -> String {
        if history_count == 0 || context.history.is_empty() {
            return String::new();
        }

        let start = context.history.len().saturating_sub(history_count);
        let mut block = String::from("## Conversation so far\n");
        for message in &context.history[start..] {
            let content = truncate_at_sentence(&message.content, self.tuning.history_char_limit);
            block.push_str(&format!("{}: {content}\n", message.role));
        }
        block
    }
}

/// Convenience entry point with default tuning.
pub fn assemble_rag_prompt(
    retrieval: &RetrievalOutput,
    context: &ConversationContext,
) -> AssembledPrompt {
    PromptAssembler::new(AssemblyTuning::default()).assemble(retrieval, context)
}

/// Phrasing-based detection, except that chunks surfaced by the contextual
/// strategy force the conversational template.
fn select_template(retrieval: &RetrievalOutput) -> TemplateType {
    let conversational = retrieval
        .chunks
        .iter()
        .any(|scored| scored.found_by.iter().any(|tag| tag == "contextual"));
    if conversational {
        return TemplateType::Contextual;
    }
    TemplateType::detect(&retrieval.query)
}

fn render_user_prompt(query: &str) -> String {
    format!(
        "Answer the following question using the reference material provided \
         above.\n\nQuestion: {query}"
    )
}

fn drop_least_relevant(chunks: &mut Vec<ScoredChunk>) {
    if chunks.is_empty() {
        return;
    }
    let mut weakest = 0;
    for (index, chunk) in chunks.iter().enumerate() {
        if chunk.relevance < chunks[weakest].relevance {
            weakest = index;
        }
    }
    chunks.remove(weakest);
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::chunk::Chunk;
    use common::conversation::Message;
    use retrieval_pipeline::RetrievalMetadata;

    fn scored(id: &str, content: &str, relevance: f32, page: Option<u32>) -> ScoredChunk {
        let mut chunk = Chunk::new("fundAdminGuide.pdf".into(), 0, content.into());
        chunk.id = id.to_string();
        chunk.page_number = page;
        ScoredChunk::new(chunk).with_relevance(relevance)
    }

    fn retrieval_with(chunks: Vec<ScoredChunk>, query: &str) -> RetrievalOutput {
        RetrievalOutput {
            query: query.to_string(),
            strategy: "hybrid".to_string(),
            reranking_model: Some("similarity_based".to_string()),
            chunks,
            metadata: RetrievalMetadata::default(),
        }
    }

    #[test]
    fn test_template_detection_and_override() {
        let retrieval = retrieval_with(
            vec![scored("a", "Step 1: open the panel.", 0.9, Some(3))],
            "How do I create a fund?",
        );

        let detected = PromptAssembler::new(AssemblyTuning::default())
            .assemble(&retrieval, &ConversationContext::default());
        assert_eq!(detected.template, TemplateType::Procedure);

        let mut tuning = AssemblyTuning::default();
        tuning.template_type = Some(TemplateType::General);
        let overridden =
            PromptAssembler::new(tuning).assemble(&retrieval, &ConversationContext::default());
        assert_eq!(overridden.template, TemplateType::General);
    }

    #[test]
    fn test_contextual_chunks_force_conversational_template() {
        let mut chunk = scored("a", "Onboarding continues with document checks.", 0.9, None);
        chunk.found_by.push("contextual".to_string());
        let retrieval = retrieval_with(vec![chunk], "How do I continue?");

        let assembled = assemble_rag_prompt(&retrieval, &ConversationContext::default());
        assert_eq!(assembled.template, TemplateType::Contextual);
    }

    #[test]
    fn test_inline_citations_appear_in_system_prompt() {
        let retrieval = retrieval_with(
            vec![scored("a", "Funds are created in the admin panel.", 0.9, Some(12))],
            "fund creation",
        );
        let assembled = PromptAssembler::new(AssemblyTuning::default())
            .assemble(&retrieval, &ConversationContext::default());

        assert!(assembled
            .system_prompt
            .contains("(Guide Fund Admin Guide, p.12)"));
        assert_eq!(assembled.citations.len(), 1);
        assert_eq!(assembled.citations[0].index, 1);
    }

    #[test]
    fn test_user_prompt_wraps_the_raw_query() {
        let retrieval = retrieval_with(
            vec![scored("a", "Chunk content.", 0.9, None)],
            "fund creation",
        );
        let assembled = PromptAssembler::new(AssemblyTuning::default())
            .assemble(&retrieval, &ConversationContext::default());

        assert!(assembled.user_prompt.contains("Question: fund creation"));
        assert!(!assembled.user_prompt.contains("Reference material"));
    }

    #[test]
    fn test_numbered_citations_include_source_list() {
        let retrieval = retrieval_with(
            vec![
                scored("a", "First chunk content.", 0.9, Some(1)),
                scored("b", "Second chunk content.", 0.8, Some(2)),
            ],
            "fund creation",
        );
        let mut tuning = AssemblyTuning::default();
        tuning.citation_format = CitationFormat::Numbered;
        let assembled =
            PromptAssembler::new(tuning).assemble(&retrieval, &ConversationContext::default());

        assert!(assembled.system_prompt.contains("Sources:"));
        assert!(assembled.system_prompt.contains("[1]"));
        assert!(assembled.system_prompt.contains("[2]"));
    }

    #[test]
    fn test_over_budget_drops_weakest_chunks_first() {
        let long = "A sentence of filler content. ".repeat(200);
        let retrieval = retrieval_with(
            vec![
                scored("strong", &long, 0.9, None),
                scored("weak", &long, 0.2, None),
            ],
            "fund creation",
        );
        let mut tuning = AssemblyTuning::default();
        tuning.context_window_size = 1200;
        tuning.reserved_for_response = 200;
        let assembled =
            PromptAssembler::new(tuning).assemble(&retrieval, &ConversationContext::default());

        assert!(assembled.validation.within_budget);
        assert!(assembled.validation.chunks_dropped >= 1);
        assert!(
            assembled.validation.estimated_tokens <= assembled.validation.budget.available
        );
    }

    #[test]
    fn test_unfittable_prompt_is_flagged_not_dropped() {
        let huge = "word ".repeat(5000);
        let retrieval = retrieval_with(vec![scored("only", &huge, 0.9, None)], "anything");
        let mut tuning = AssemblyTuning::default();
        tuning.context_window_size = 200;
        tuning.reserved_for_response = 100;
        let assembled =
            PromptAssembler::new(tuning).assemble(&retrieval, &ConversationContext::default());

        assert!(!assembled.validation.within_budget);
        assert_eq!(assembled.citations.len(), 1);
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let retrieval = retrieval_with(
            vec![
                scored("a", "First chunk about funds.", 0.9, Some(1)),
                scored("b", "Second chunk about reports.", 0.7, Some(2)),
            ],
            "fund reporting",
        );
        let assembler = PromptAssembler::new(AssemblyTuning::default());
        let first = assembler.assemble(&retrieval, &ConversationContext::default());
        let second = assembler.assemble(&retrieval, &ConversationContext::default());
        assert_eq!(first.combined(), second.combined());
        assert_eq!(
            first.validation.estimated_tokens,
            second.validation.estimated_tokens
        );
    }

    #[test]
    fn test_history_is_rendered_and_capped() {
        let retrieval = retrieval_with(
            vec![scored("a", "Chunk content.", 0.9, None)],
            "follow-up question",
        );
        let mut context = ConversationContext::default();
        for index in 0..10 {
            context.history.push(Message::user(format!("question {index}")));
        }

        let assembled = PromptAssembler::new(AssemblyTuning::default())
            .assemble(&retrieval, &context);

        assert!(assembled.system_prompt.contains("Conversation so far"));
        assert!(assembled.system_prompt.contains("question 9"));
        // Default cap keeps the last six messages.
        assert!(!assembled.system_prompt.contains("question 3"));
        assert!(assembled.system_prompt.contains("question 4"));
    }

    #[test]
    fn test_empty_retrieval_still_produces_a_prompt() {
        let retrieval = retrieval_with(Vec::new(), "anything at all");
        let assembled = PromptAssembler::new(AssemblyTuning::default())
            .assemble(&retrieval, &ConversationContext::default());

        assert!(assembled.user_prompt.contains("Question: anything at all"));
        assert!(assembled.citations.is_empty());
        assert!(assembled.validation.within_budget);
    }
}
