//! Scripted LLM Provider
//!
//! Replays a fixed sequence of model outputs. Used by tests and for running
//! the server without a model backend.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{Completion, GenerationOptions, LlmProvider};

const MODEL: &str = "scripted";

type ErrorFn = Box<dyn Fn() -> AgentError + Send + Sync>;

/// One scripted model response
pub enum Scripted {
    Reply(Completion),
    Delayed(Duration, Completion),
    Error(ErrorFn),
}

impl Scripted {
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply(Completion::text(text, MODEL))
    }

    pub fn delayed(delay: Duration, text: impl Into<String>) -> Self {
        Self::Delayed(delay, Completion::text(text, MODEL))
    }

    pub fn error<F>(make: F) -> Self
    where
        F: Fn() -> AgentError + Send + Sync + 'static,
    {
        Self::Error(Box::new(make))
    }
}

/// Mock provider returning scripted responses in order
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    repeat: Option<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    /// Plain text replies, one per call
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_steps(replies.into_iter().map(Scripted::reply))
    }

    pub fn from_steps<I>(steps: I) -> Self
    where
        I: IntoIterator<Item = Scripted>,
    {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            repeat: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Same reply on every call, forever
    pub fn repeating(text: impl Into<String>) -> Self {
        let mut provider = Self::from_steps(std::iter::empty());
        provider.repeat = Some(text.into());
        provider
    }

    /// Number of `complete` calls received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages received by each call, oldest first
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn next_step(&self) -> Option<Scripted> {
        let next = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        next.or_else(|| self.repeat.as_ref().map(|text| Scripted::reply(text.clone())))
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        MODEL
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, messages: &[Message], _options: &GenerationOptions) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());

        match self.next_step() {
            Some(Scripted::Reply(completion)) => Ok(completion),
            Some(Scripted::Delayed(delay, completion)) => {
                tokio::time::sleep(delay).await;
                Ok(completion)
            }
            Some(Scripted::Error(make)) => Err(make()),
            None => Err(AgentError::Provider("script exhausted".into())),
        }
    }
}
