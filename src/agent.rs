//! Reply generation
//!
//! Routes a transcribed utterance to the configured chat backend,
//! drives the bounded tool-call loop, and folds the exchange into the
//! conversation context. The router owns prompt assembly; backends stay
//! pure transport.

use crate::config::{ApiKeys, LlmConfig};
use crate::context::ConversationContext;
use crate::llm::{
    AnthropicBackend, ChatBackend, ChatMessage, ChatRequest, ChatResponse, OpenAiBackend,
};
use crate::tools::{ToolExecutor, ToolRegistry};
use crate::{Error, Result};

/// At most this many completion rounds per utterance; the final round
/// offers no tools so the model must answer
const MAX_ROUNDS: usize = 2;

/// Dispatches utterances to a chat backend and runs the tool loop
pub struct AiRouter {
    backend: Box<dyn ChatBackend>,
    model: String,
    max_tokens: u32,
    base_prompt: String,
}

impl AiRouter {
    /// Build a router for the configured provider
    ///
    /// # Errors
    ///
    /// Returns error for an unknown provider or a missing API key
    pub fn new(config: &LlmConfig, keys: &ApiKeys) -> Result<Self> {
        let backend: Box<dyn ChatBackend> = match config.provider.as_str() {
            "openai" => {
                let key = keys
                    .openai
                    .clone()
                    .ok_or_else(|| Error::Config("OPENAI_API_KEY not set".to_string()))?;
                Box::new(OpenAiBackend::new(key))
            }
            "anthropic" => {
                let key = keys
                    .anthropic
                    .clone()
                    .ok_or_else(|| Error::Config("ANTHROPIC_API_KEY not set".to_string()))?;
                Box::new(AnthropicBackend::new(key))
            }
            other => {
                return Err(Error::Config(format!("unknown LLM provider: {other}")));
            }
        };

        Ok(Self::with_backend(backend, config))
    }

    /// Build a router around an arbitrary backend
    #[must_use]
    pub fn with_backend(backend: Box<dyn ChatBackend>, config: &LlmConfig) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            base_prompt: config.base_prompt.clone(),
        }
    }

    /// Produce a spoken reply for one utterance
    ///
    /// Runs at most [`MAX_ROUNDS`] completion rounds; tool calls from
    /// earlier rounds are executed and fed back. On success the exchange
    /// is recorded into `context`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails or never produces text
    pub async fn respond(
        &self,
        transcript: &str,
        context: &mut ConversationContext,
        registry: &ToolRegistry,
        executor: &ToolExecutor,
    ) -> Result<String> {
        let mut messages = vec![ChatMessage::system(self.system_prompt(transcript))];
        messages.extend_from_slice(context.messages());
        messages.push(ChatMessage::user(transcript));

        let specs = registry.specs();

        let mut round = 1;
        loop {
            let final_round = round == MAX_ROUNDS;
            let request = ChatRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                // No tools on the final round: the model has to answer
                tools: if final_round { Vec::new() } else { specs.clone() },
                max_tokens: self.max_tokens,
            };

            let response = self.backend.chat(&request).await?;

            if response.tool_calls.is_empty() || final_round {
                return self.finish(transcript, context, response);
            }

            tracing::debug!(round, calls = response.tool_calls.len(), "executing tool calls");
            messages.push(ChatMessage {
                role: "assistant".to_string(),
                content: response.content.clone(),
                tool_calls: response.tool_calls.clone(),
                tool_call_id: None,
            });
            for call in &response.tool_calls {
                let outcome = executor.execute(registry, call).await;
                messages.push(ChatMessage::tool_result(&call.id, outcome.text));
            }
            round += 1;
        }
    }

    fn finish(
        &self,
        transcript: &str,
        context: &mut ConversationContext,
        response: ChatResponse,
    ) -> Result<String> {
        let reply = response
            .content
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| Error::Agent("model returned an empty reply".to_string()))?;

        context.record_exchange(transcript, &reply);
        Ok(reply)
    }

    /// Base prompt + per-backend addendum + situational hints
    fn system_prompt(&self, transcript: &str) -> String {
        let mut prompt = self.base_prompt.clone();
        prompt.push('\n');
        prompt.push_str(backend_addendum(self.backend.name()));
        if let Some(hint) = intent_hint(transcript) {
            prompt.push('\n');
            prompt.push_str(hint);
        }
        prompt
    }

    /// Backend name, for logging
    #[must_use]
    pub fn provider(&self) -> &'static str {
        self.backend.name()
    }
}

/// Formatting guidance tuned to each backend's habits
///
/// Anthropic models reach for markdown lists and preambles more readily,
/// so their addendum bans them outright; the default phrasing suffices
/// elsewhere.
fn backend_addendum(provider: &str) -> &'static str {
    match provider {
        "anthropic" => {
            "Your replies are spoken aloud. Answer directly in short plain sentences; \
             never use markdown, lists, or preambles."
        }
        _ => "Your replies are spoken aloud: keep them short, plain, and free of markup.",
    }
}

/// Cheap keyword nudge toward the right tool for common intents
fn intent_hint(transcript: &str) -> Option<&'static str> {
    let lowered = transcript.to_lowercase();
    if ["what time", "what day", "what date", "today's date"]
        .iter()
        .any(|phrase| lowered.contains(phrase))
    {
        return Some("The user is asking about the date or time; use the get_current_time tool.");
    }
    if ["turn on", "turn off", "switch on", "switch off", "dim the"]
        .iter()
        .any(|phrase| lowered.contains(phrase))
    {
        return Some("The user wants to control a device; prefer a matching device tool.");
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::llm::ToolCall;
    use crate::tools::{CurrentTimeTool, LocalTool};

    /// Replays a fixed script of responses and logs every request
    struct ScriptedBackend {
        script: Mutex<Vec<ChatResponse>>,
        requests: Arc<Mutex<Vec<ChatRequest>>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<ChatResponse>) -> (Self, Arc<Mutex<Vec<ChatRequest>>>) {
            let requests = Arc::new(Mutex::new(Vec::new()));
            let backend = Self {
                script: Mutex::new(script),
                requests: Arc::clone(&requests),
            };
            (backend, requests)
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(Error::Agent("script exhausted".to_string()));
            }
            Ok(script.remove(0))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn tool_call(name: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: json!({}),
        }
    }

    fn text(reply: &str) -> ChatResponse {
        ChatResponse {
            content: Some(reply.to_string()),
            tool_calls: Vec::new(),
        }
    }

    fn wants_tool(name: &str) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: vec![tool_call(name)],
        }
    }

    fn fixtures() -> (ConversationContext, ToolRegistry, ToolExecutor) {
        let locals: Vec<Box<dyn LocalTool>> = vec![Box::new(CurrentTimeTool)];
        let registry = ToolRegistry::with_builtins(&locals);
        let executor = ToolExecutor::new(vec![Box::new(CurrentTimeTool)], None);
        (ConversationContext::new(300), registry, executor)
    }

    async fn run(
        script: Vec<ChatResponse>,
        transcript: &str,
    ) -> (Result<String>, Vec<ChatRequest>, ConversationContext) {
        let (backend, requests) = ScriptedBackend::new(script);
        let router = AiRouter::with_backend(Box::new(backend), &LlmConfig::default());
        let (mut context, registry, executor) = fixtures();
        let result = router
            .respond(transcript, &mut context, &registry, &executor)
            .await;
        let log = requests.lock().unwrap().clone();
        (result, log, context)
    }

    #[tokio::test]
    async fn plain_answer_takes_one_round() {
        let (result, requests, context) = run(vec![text("It is noon.")], "hello there").await;
        assert_eq!(result.unwrap(), "It is noon.");
        assert_eq!(requests.len(), 1);
        assert_eq!(context.len(), 2);
    }

    #[tokio::test]
    async fn tool_round_feeds_result_back() {
        let script = vec![wants_tool("get_current_time"), text("It is currently noon.")];
        let (result, requests, _) = run(script, "what time is it").await;
        assert_eq!(result.unwrap(), "It is currently noon.");

        // Second round carries the assistant tool call and its result
        let followup = &requests[1];
        let roles: Vec<&str> = followup.messages.iter().map(|m| m.role.as_str()).collect();
        assert!(roles.contains(&"tool"));
    }

    #[tokio::test]
    async fn final_round_offers_no_tools() {
        let script = vec![wants_tool("get_current_time"), text("Noon.")];
        let (_, requests, _) = run(script, "what time is it").await;

        assert_eq!(requests.len(), 2);
        assert!(!requests[0].tools.is_empty());
        assert!(requests[1].tools.is_empty(), "final round must not offer tools");
    }

    #[tokio::test]
    async fn rounds_are_capped() {
        // The model asks for a tool every round; the second response is
        // final even though it still carries a tool call
        let script = vec![
            wants_tool("get_current_time"),
            ChatResponse {
                content: Some("Half past.".to_string()),
                tool_calls: vec![tool_call("get_current_time")],
            },
            text("should never be reached"),
        ];
        let (result, requests, _) = run(script, "what time is it").await;
        assert_eq!(result.unwrap(), "Half past.");
        assert_eq!(requests.len(), 2);
    }

    #[tokio::test]
    async fn backend_error_propagates() {
        let (result, _, context) = run(vec![], "hello").await;
        assert!(result.is_err());
        assert!(context.is_empty(), "failed turns must not pollute context");
    }

    #[tokio::test]
    async fn context_rides_along_on_later_turns() {
        let (backend, requests) = ScriptedBackend::new(vec![text("Hi."), text("Still here.")]);
        let router = AiRouter::with_backend(Box::new(backend), &LlmConfig::default());
        let (mut context, registry, executor) = fixtures();

        router
            .respond("hello", &mut context, &registry, &executor)
            .await
            .unwrap();
        router
            .respond("you there", &mut context, &registry, &executor)
            .await
            .unwrap();

        let log = requests.lock().unwrap();
        // system + prior user/assistant + new user
        assert_eq!(log[1].messages.len(), 4);
    }

    #[test]
    fn backend_addenda_differ_by_provider() {
        assert_ne!(backend_addendum("openai"), backend_addendum("anthropic"));
        assert!(!backend_addendum("scripted").is_empty());
    }

    #[tokio::test]
    async fn system_prompt_carries_the_backend_addendum() {
        let (_, requests, _) = run(vec![text("Hi.")], "hello").await;
        let system = requests[0].messages[0].content.as_deref().unwrap();
        assert!(system.contains(backend_addendum("scripted")));
    }

    #[test]
    fn intent_hints_match_keywords() {
        assert!(intent_hint("what time is it").is_some());
        assert!(intent_hint("please turn off the lamp").is_some());
        assert!(intent_hint("tell me a joke").is_none());
    }
}
