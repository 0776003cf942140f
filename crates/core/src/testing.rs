use crate::extractor::{PageText, PdfExtractor};
use crate::llm::ChatModel;
use crate::{ChatError, IngestError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers every prompt with `reply(prompt)` and records what it was asked.
pub struct FakeChat {
    name: String,
    reply: Box<dyn Fn(&str) -> Result<String, ChatError> + Send + Sync>,
    prompts: Mutex<Vec<String>>,
}

impl FakeChat {
    pub fn new<F>(name: &str, reply: F) -> Self
    where
        F: Fn(&str) -> Result<String, ChatError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            reply: Box::new(reply),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn echoing(name: &str, answer: &str) -> Self {
        let answer = answer.to_string();
        Self::new(name, move |_| Ok(answer.clone()))
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name, |_| {
            Err(ChatError::BackendResponse {
                backend: "fake".to_string(),
                details: "connection refused".to_string(),
            })
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for FakeChat {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<String, ChatError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        (self.reply)(prompt)
    }
}

/// Returns the same page text for every file, after an optional delay. Clones
/// share the text, so a test can change what the next extraction sees.
#[derive(Clone)]
pub struct FakeExtractor {
    text: Arc<Mutex<String>>,
    delay: Duration,
}

impl FakeExtractor {
    pub fn new(text: &str) -> Self {
        Self {
            text: Arc::new(Mutex::new(text.to_string())),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_text(&self, text: &str) {
        if let Ok(mut current) = self.text.lock() {
            *current = text.to_string();
        }
    }
}

impl PdfExtractor for FakeExtractor {
    fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
        std::thread::sleep(self.delay);
        let text = self
            .text
            .lock()
            .map(|text| text.clone())
            .map_err(|error| IngestError::Task(error.to_string()))?;
        Ok(vec![PageText { number: 1, text }])
    }
}
