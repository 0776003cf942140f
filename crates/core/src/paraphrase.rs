use crate::llm::{ChatModel, OllamaChat, OllamaSettings};
use crate::ChatError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Returned in place of a paraphrase whenever the model call fails.
pub const PARAPHRASE_FAILURE: &str = "An error occurred during the QA process.";

pub fn paraphrase_prompt(context: &str) -> String {
    format!(
        "\nRewrite the context given in a new answer. Make the answer a statement, \n\
         not a thinking process or opinion.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Answer:\n"
    )
}

enum Backend {
    /// A new client per call, built from these settings.
    Ollama { settings: OllamaSettings, model: String },
    Model(Arc<dyn ChatModel>),
}

/// Rewrites answers into declarative prose. Never fails: any error degrades
/// to [`PARAPHRASE_FAILURE`].
pub struct Paraphraser {
    backend: Backend,
}

impl Paraphraser {
    pub fn ollama(settings: OllamaSettings, model: impl Into<String>) -> Self {
        Self {
            backend: Backend::Ollama {
                settings,
                model: model.into(),
            },
        }
    }

    pub fn with_model(chat: Arc<dyn ChatModel>) -> Self {
        Self {
            backend: Backend::Model(chat),
        }
    }

    pub fn model_name(&self) -> &str {
        match &self.backend {
            Backend::Ollama { model, .. } => model,
            Backend::Model(chat) => chat.model_name(),
        }
    }

    pub async fn paraphrase(&self, context: &str) -> String {
        let outcome = match &self.backend {
            Backend::Ollama { settings, model } => match OllamaChat::new(settings, model.clone()) {
                Ok(chat) => generate(&chat, context).await,
                Err(error) => Err(error),
            },
            Backend::Model(chat) => generate(chat.as_ref(), context).await,
        };

        match outcome {
            Ok(paraphrased) => paraphrased,
            Err(error) => {
                warn!(model = self.model_name(), %error, "paraphrase failed");
                PARAPHRASE_FAILURE.to_string()
            }
        }
    }
}

async fn generate(chat: &dyn ChatModel, context: &str) -> Result<String, ChatError> {
    let prompt = paraphrase_prompt(context);
    let response = chat.generate(&prompt).await?;
    debug!(model = chat.model_name(), chars = response.len(), "paraphrased answer");
    Ok(response)
}

/// One-shot paraphrase with a freshly initialised Ollama model.
pub async fn paraphrase(context: &str, model_name: &str, settings: &OllamaSettings) -> String {
    Paraphraser::ollama(settings.clone(), model_name)
        .paraphrase(context)
        .await
}
