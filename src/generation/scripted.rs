use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{GenerationError, GenerationInputs, ImageGenerator};

/// Answers from a queue and records the inputs it was called with.
/// An empty queue yields `EmptyResult`.
#[derive(Default)]
pub struct ScriptedGenerator {
    results: Mutex<VecDeque<Result<String, GenerationError>>>,
    calls: Mutex<Vec<GenerationInputs>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returning(reference: &str) -> Self {
        let generator = Self::new();
        generator.push(Ok(reference.to_string()));
        generator
    }

    pub fn failing(error: GenerationError) -> Self {
        let generator = Self::new();
        generator.push(Err(error));
        generator
    }

    pub fn push(&self, result: Result<String, GenerationError>) {
        self.results.lock().push_back(result);
    }

    pub fn calls(&self) -> Vec<GenerationInputs> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ImageGenerator for ScriptedGenerator {
    async fn generate(&self, inputs: &GenerationInputs) -> Result<String, GenerationError> {
        self.calls.lock().push(inputs.clone());
        let next = self.results.lock().pop_front();
        next.unwrap_or(Err(GenerationError::EmptyResult))
    }
}
