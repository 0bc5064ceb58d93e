//! Conversational sessions over the index.
//!
//! A [`ChatSession`] keeps a transcript of prior turns and answers each new
//! query with retrieved context plus that transcript. Answers can be taken
//! one-shot or as a token stream; at most one stream may be live per session,
//! and a stream that is dropped before completion leaves the transcript
//! exactly as it was.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_stream::try_stream;
use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::llm::LanguageModel;
use crate::models::{ChatTurn, QueryOutcome};
use crate::query::{build_context, render_template};
use crate::store::VectorStore;

/// Prompt used for conversational turns. Placeholders are `{history_str}`,
/// `{context_str}`, and `{query_str}`.
pub const DEFAULT_CHAT_TEMPLATE: &str = "You are a helpful assistant answering from the provided context.\n\
Conversation so far:\n\
{history_str}\n\
Context information is below.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
Given the context information and the conversation, answer the query.\n\
If the context does not contain the answer, say so.\n\
Query: {query_str}\n\
Answer: ";

/// Event emitted by a chat stream: incremental tokens, then one final
/// [`ChatEvent::Done`] carrying the assembled answer and its sources.
#[derive(Debug)]
pub enum ChatEvent {
    Token(String),
    Done(QueryOutcome),
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

/// Releases the session's streaming slot when the stream is dropped,
/// whether it completed, errored, or was abandoned mid-flight.
struct StreamSlot {
    flag: Arc<AtomicBool>,
}

impl StreamSlot {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::ConcurrentStream);
        }
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct ChatSession {
    store: VectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    top_k: usize,
    template: String,
    history: Arc<Mutex<Vec<ChatTurn>>>,
    streaming: Arc<AtomicBool>,
}

impl ChatSession {
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
            template: DEFAULT_CHAT_TEMPLATE.to_string(),
            history: Arc::new(Mutex::new(Vec::new())),
            streaming: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use a custom chat template in place of [`DEFAULT_CHAT_TEMPLATE`].
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Answer one turn and append it to the transcript.
    pub async fn chat(&self, query: &str) -> Result<QueryOutcome> {
        let slot = StreamSlot::acquire(&self.streaming)?;
        let template = self.history_template().await;
        let vector = self.embedder.embed_query(query).await?;
        let sources = self.store.query(&vector, self.top_k).await?;
        let prompt = render_template(&template, &build_context(&sources), query);
        let response = self.llm.generate(&prompt).await?;
        let outcome = QueryOutcome { response, sources };
        self.commit_turn(query, &outcome).await;
        drop(slot);
        Ok(outcome)
    }

    /// Answer one turn as a token stream. Tokens arrive as
    /// [`ChatEvent::Token`]; the final [`ChatEvent::Done`] carries the full
    /// answer and sources, and only then is the turn committed to the
    /// transcript. Dropping the stream before `Done` commits nothing.
    pub async fn chat_stream(&self, query: &str) -> Result<ChatStream> {
        let slot = StreamSlot::acquire(&self.streaming)?;

        let query = query.to_string();
        let embedder = self.embedder.clone();
        let llm = self.llm.clone();
        let store = self.store.clone();
        let history = self.history.clone();
        let top_k = self.top_k;
        let template = self.history_template().await;

        let stream = try_stream! {
            // The slot lives inside the generator: dropping the stream
            // drops it and reopens the session.
            let _slot = slot;

            let vector = embedder.embed_query(&query).await?;
            let sources = store.query(&vector, top_k).await?;
            let prompt = render_template(&template, &build_context(&sources), &query);

            let mut tokens = llm.generate_stream(&prompt).await?;
            let mut response = String::new();
            while let Some(token) = tokens.next().await {
                let token = token?;
                response.push_str(&token);
                yield ChatEvent::Token(token);
            }

            let outcome = QueryOutcome { response, sources };
            history.lock().await.push(ChatTurn {
                query: query.clone(),
                response: outcome.response.clone(),
                sources: outcome.sources.clone(),
                at: Utc::now(),
            });
            yield ChatEvent::Done(outcome);
        };

        Ok(Box::pin(stream))
    }

    pub async fn history(&self) -> Vec<ChatTurn> {
        self.history.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    async fn history_template(&self) -> String {
        let transcript = Self::transcript(&*self.history.lock().await);
        self.template.replace("{history_str}", &transcript)
    }

    async fn commit_turn(&self, query: &str, outcome: &QueryOutcome) {
        self.history.lock().await.push(ChatTurn {
            query: query.to_string(),
            response: outcome.response.clone(),
            sources: outcome.sources.clone(),
            at: Utc::now(),
        });
    }

    fn transcript(turns: &[ChatTurn]) -> String {
        if turns.is_empty() {
            return "(none)".to_string();
        }
        turns
            .iter()
            .map(|t| format!("User: {}\nAssistant: {}", t.query, t.response))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::llm::TokenStream;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FakeEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Replies with the fixed answer, split into word tokens when streamed.
    struct FakeLlm {
        answer: String,
    }

    impl FakeLlm {
        fn new(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.to_string(),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for FakeLlm {
        fn model_name(&self) -> &str {
            "fake"
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.answer.clone())
        }

        async fn generate_stream(&self, _prompt: &str) -> Result<TokenStream> {
            let words: Vec<String> = self
                .answer
                .split_inclusive(' ')
                .map(|w| w.to_string())
                .collect();
            Ok(Box::pin(futures::stream::iter(words.into_iter().map(Ok))))
        }
    }

    async fn session(tmp: &TempDir, answer: &str) -> ChatSession {
        let storage = StorageConfig {
            data_dir: tmp.path().join("data"),
            collection: "test".to_string(),
        };
        let store = VectorStore::open(&storage).await.unwrap();
        ChatSession::new(store, Arc::new(FakeEmbedder), FakeLlm::new(answer), 3)
    }

    #[tokio::test]
    async fn test_chat_appends_to_history() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, "the answer").await;

        let outcome = s.chat("question one").await.unwrap();
        assert_eq!(outcome.response, "the answer");

        let history = s.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].query, "question one");
        assert_eq!(history[0].response, "the answer");
    }

    #[tokio::test]
    async fn test_stream_tokens_assemble_into_done() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, "streamed words here").await;

        let mut stream = s.chat_stream("q").await.unwrap();
        let mut assembled = String::new();
        let mut done = None;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                ChatEvent::Token(t) => assembled.push_str(&t),
                ChatEvent::Done(outcome) => done = Some(outcome),
            }
        }

        let done = done.expect("stream ended without a final result");
        assert_eq!(assembled, "streamed words here");
        assert_eq!(done.response, assembled);
        assert_eq!(s.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_second_stream_rejected_while_first_is_live() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, "a").await;

        let first = s.chat_stream("q1").await.unwrap();
        let second = s.chat_stream("q2").await;
        assert!(matches!(second, Err(Error::ConcurrentStream)));

        // Finishing the first stream reopens the session.
        drop(first);
        assert!(s.chat_stream("q3").await.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_stream_leaves_history_untouched() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, "one two three").await;

        let mut stream = s.chat_stream("q").await.unwrap();
        // Take a single token, then walk away.
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, ChatEvent::Token(_)));
        drop(stream);

        assert!(s.history().await.is_empty());
        // The session is usable again and history only records the
        // completed turn.
        s.chat("q2").await.unwrap();
        let history = s.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].query, "q2");
    }

    #[tokio::test]
    async fn test_clear_history() {
        let tmp = TempDir::new().unwrap();
        let s = session(&tmp, "a").await;
        s.chat("q").await.unwrap();
        s.clear_history().await;
        assert!(s.history().await.is_empty());
    }
}
