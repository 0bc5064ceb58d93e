//! Retrieval-augmented question answering.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::llm::LanguageModel;
use crate::models::{QueryOutcome, SourceRef};
use crate::store::VectorStore;

/// Default prompt used when answering from retrieved context. Placeholders
/// are `{context_str}` and `{query_str}`.
pub const DEFAULT_QA_TEMPLATE: &str = "Context information is below.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
If the context does not contain the answer, say so.\n\
Query: {query_str}\n\
Answer: ";

/// Fill a prompt template. Unknown placeholders are left as-is.
pub fn render_template(template: &str, context: &str, query: &str) -> String {
    template
        .replace("{context_str}", context)
        .replace("{query_str}", query)
}

/// Join retrieved chunks into the context block, most relevant first.
pub fn build_context(sources: &[SourceRef]) -> String {
    sources
        .iter()
        .map(|s| s.excerpt.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct QueryEngine {
    store: VectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    top_k: usize,
    template: String,
}

impl QueryEngine {
    pub fn new(
        store: VectorStore,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            top_k,
            template: DEFAULT_QA_TEMPLATE.to_string(),
        }
    }

    /// Use a custom QA template in place of [`DEFAULT_QA_TEMPLATE`].
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Fetch the chunks most similar to `query`, without generation.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<Vec<SourceRef>> {
        let vector = self.embedder.embed_query(query).await?;
        self.store
            .query(&vector, top_k.unwrap_or(self.top_k))
            .await
    }

    /// One-shot answer: retrieve, build the QA prompt, generate.
    pub async fn query(&self, query: &str, top_k: Option<usize>) -> Result<QueryOutcome> {
        let sources = self.retrieve(query, top_k).await?;
        let context = build_context(&sources);
        let prompt = render_template(&self.template, &context, query);
        let response = self.llm.generate(&prompt).await?;
        Ok(QueryOutcome { response, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(path: &str, excerpt: &str, score: f32) -> SourceRef {
        SourceRef {
            path: path.to_string(),
            chunk_index: 0,
            score,
            excerpt: excerpt.to_string(),
        }
    }

    #[test]
    fn test_render_template_substitutes_both_placeholders() {
        let out = render_template(DEFAULT_QA_TEMPLATE, "CTX", "What?");
        assert!(out.contains("CTX"));
        assert!(out.contains("Query: What?"));
        assert!(!out.contains("{context_str}"));
        assert!(!out.contains("{query_str}"));
    }

    #[test]
    fn test_render_template_leaves_unknown_placeholders() {
        let out = render_template("a {context_str} b {other}", "X", "q");
        assert_eq!(out, "a X b {other}");
    }

    #[test]
    fn test_build_context_joins_excerpts_in_order() {
        let sources = vec![source("/a", "first", 0.9), source("/b", "second", 0.5)];
        assert_eq!(build_context(&sources), "first\n\nsecond");
    }

    #[test]
    fn test_build_context_empty() {
        assert_eq!(build_context(&[]), "");
    }
}
