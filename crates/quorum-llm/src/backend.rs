use std::collections::HashMap;

use async_trait::async_trait;

use quorum_core::Result;

/// Always present in the params map, as a decimal string.
pub const PARAM_MAX_TOKENS: &str = "max_tokens";
/// Always present in the params map, as a decimal string.
pub const PARAM_TEMPERATURE: &str = "temperature";

/// The `(prompt, params) → text` contract between the kernel and whatever
/// produces completions. Implementations may fail; the runtime converts
/// failures into `inference_error` responses.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn infer(&self, prompt: &str, params: &HashMap<String, String>) -> Result<String>;
}

/// Adapts a plain closure to the backend contract.
pub struct FnBackend<F>
where
    F: Fn(&str, &HashMap<String, String>) -> Result<String> + Send + Sync,
{
    f: F,
}

impl<F> FnBackend<F>
where
    F: Fn(&str, &HashMap<String, String>) -> Result<String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> InferenceBackend for FnBackend<F>
where
    F: Fn(&str, &HashMap<String, String>) -> Result<String> + Send + Sync,
{
    async fn infer(&self, prompt: &str, params: &HashMap<String, String>) -> Result<String> {
        (self.f)(prompt, params)
    }
}
