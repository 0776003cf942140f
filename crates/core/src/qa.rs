use crate::index::VectorIndex;
use crate::llm::ChatModel;
use crate::models::{QaResponse, Turn};
use crate::QaError;
use std::sync::Arc;
use tracing::debug;

pub fn qa_prompt(context: &str, question: &str) -> String {
    format!(
        "\nYou are a knowledgeable assistant. Use the following context to answer the user's question.\n\
         Whenever possible cite the context in your final answer. If the answer is not in the context, \n\
         please say you don't know.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question:\n\
         {question}\n\
         \n\
         Answer:\n"
    )
}

pub fn condense_question_prompt(chat_history: &str, question: &str) -> String {
    format!(
        "Given the following conversation and a follow up question, rephrase the follow up question \
         to be a standalone question, in its original language.\n\
         \n\
         Chat History:\n\
         {chat_history}\n\
         Follow Up Input: {question}\n\
         Standalone question:"
    )
}

/// Append-only log of the exchanges seen by one QA adapter.
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
}

impl ConversationMemory {
    pub fn record(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push(Turn {
            question: question.into(),
            answer: answer.into(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|turn| format!("Human: {}\nAssistant: {}", turn.question, turn.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Retrieval-augmented question answering with conversational memory.
///
/// Follow-up questions are first rewritten into standalone questions using
/// the accumulated history, then answered from the top-`k` retrieved chunks.
pub struct ConversationalQa {
    index: Arc<VectorIndex>,
    chat: Arc<dyn ChatModel>,
    top_k: usize,
    memory: ConversationMemory,
}

impl ConversationalQa {
    pub fn new(index: Arc<VectorIndex>, chat: Arc<dyn ChatModel>, top_k: usize) -> Self {
        Self {
            index,
            chat,
            top_k,
            memory: ConversationMemory::default(),
        }
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub async fn ask(&mut self, question: &str) -> Result<QaResponse, QaError> {
        let standalone = if self.memory.is_empty() {
            question.to_string()
        } else {
            let prompt = condense_question_prompt(&self.memory.render(), question);
            let rewritten = self.chat.generate(&prompt).await?;
            debug!(question, standalone = %rewritten.trim(), "condensed follow-up question");
            rewritten.trim().to_string()
        };

        let source_documents = self
            .index
            .similarity_search_with_score(&standalone, self.top_k)
            .await?;
        let context = source_documents
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let answer = self.chat.generate(&qa_prompt(&context, &standalone)).await?;
        self.memory.record(question, answer.clone());

        Ok(QaResponse {
            answer,
            source_documents,
        })
    }
}
