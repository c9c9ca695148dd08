//! Testing utilities including mock implementations.
//!
//! These are useful for testing code built on the pipeline without real
//! LLM or OCR calls. Responses are scripted and every call is recorded for
//! assertions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use crate::traits::llm::{CallOptions, LlmClient, LlmError, LlmResponse};
use crate::traits::ocr::{OcrEngine, OcrError};

/// A scripted LLM client.
///
/// Responses resolve in two layers: an explicit FIFO queue of one-shot
/// results, then substring rules matched against the prompt in insertion
/// order. A prompt nothing matches is a provider error, which exercises
/// the pipeline's fallback paths.
#[derive(Default)]
pub struct MockLlm {
    rules: RwLock<Vec<(String, String)>>,
    queue: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any prompt containing `needle` with `response`.
    pub fn with_rule(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.write().unwrap().push((needle.into(), response.into()));
        self
    }

    /// Queue a one-shot response consumed before any rule.
    pub fn push_response(&self, response: impl Into<String>) {
        self.queue.lock().unwrap().push_back(Ok(response.into()));
    }

    /// Queue a one-shot error.
    pub fn push_error(&self, error: LlmError) {
        self.queue.lock().unwrap().push_back(Err(error));
    }

    /// Prompts seen so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn call(&self, prompt: &str, _opts: &CallOptions) -> Result<LlmResponse, LlmError> {
        self.calls.lock().unwrap().push(prompt.to_string());

        if let Some(next) = self.queue.lock().unwrap().pop_front() {
            return next.map(|output_text| LlmResponse { output_text, reasoning: None });
        }

        for (needle, response) in self.rules.read().unwrap().iter() {
            if prompt.contains(needle.as_str()) {
                return Ok(LlmResponse { output_text: response.clone(), reasoning: None });
            }
        }
        Err(LlmError::Provider("no scripted response for prompt".to_string()))
    }
}

/// A scripted OCR engine.
///
/// By default normalization passes the bytes through and recognition
/// returns the image bytes as lossy UTF-8, so seeded raw content doubles
/// as the expected text. Failure rules match on byte content.
#[derive(Default)]
pub struct MockOcr {
    texts: RwLock<Vec<(Vec<u8>, String)>>,
    recognize_failures: RwLock<Vec<(Vec<u8>, String)>>,
    normalize_failures: RwLock<Vec<(Vec<u8>, String)>>,
    recognize_calls: AtomicUsize,
}

impl MockOcr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recognize images containing `needle` as `text`.
    pub fn with_text(self, needle: impl AsRef<[u8]>, text: impl Into<String>) -> Self {
        self.texts
            .write()
            .unwrap()
            .push((needle.as_ref().to_vec(), text.into()));
        self
    }

    /// Fail recognition (transient) for images containing `needle`.
    pub fn fail_recognize_when(self, needle: impl AsRef<[u8]>, message: impl Into<String>) -> Self {
        self.recognize_failures
            .write()
            .unwrap()
            .push((needle.as_ref().to_vec(), message.into()));
        self
    }

    /// Fail normalization (invalid image) for inputs containing `needle`.
    pub fn fail_normalize_when(self, needle: impl AsRef<[u8]>, message: impl Into<String>) -> Self {
        self.normalize_failures
            .write()
            .unwrap()
            .push((needle.as_ref().to_vec(), message.into()));
        self
    }

    /// Number of recognition attempts made, retries included.
    pub fn recognize_calls(&self) -> usize {
        self.recognize_calls.load(Ordering::SeqCst)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

#[async_trait]
impl OcrEngine for MockOcr {
    async fn normalize(&self, raw: &[u8], _extension: &str) -> Result<Vec<u8>, OcrError> {
        for (needle, message) in self.normalize_failures.read().unwrap().iter() {
            if contains(raw, needle) {
                return Err(OcrError::InvalidImage(message.clone()));
            }
        }
        Ok(raw.to_vec())
    }

    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        self.recognize_calls.fetch_add(1, Ordering::SeqCst);
        for (needle, message) in self.recognize_failures.read().unwrap().iter() {
            if contains(image, needle) {
                return Err(OcrError::Transient(message.clone()));
            }
        }
        for (needle, text) in self.texts.read().unwrap().iter() {
            if contains(image, needle) {
                return Ok(text.clone());
            }
        }
        Ok(String::from_utf8_lossy(image).into_owned())
    }
}
