//! The invocation loop: history + new input in, finished reply out.
//!
//! `BUILD_MESSAGES -> CALL_MODEL -> (EXECUTE_TOOLS -> CALL_MODEL)* -> DONE`.
//! The loop holds no session state: history is passed in, the messages to
//! append are handed back, and storage stays with the caller.

use serde_json::Value;
use tracing::{debug, info, warn};

use lenda_core::agent::Agent;
use lenda_core::config::{ModelsConfig, Purpose};
use lenda_core::errors::InvocationError;
use lenda_core::message::{ContentPart, Message, Role};
use lenda_core::registry::{self, ModelConfig};
use lenda_core::tool::{filter_tools, ToolDefinition};

use crate::caller::{CallOptions, ModelCaller, ModelResponse, ToolChoice};
use crate::executor::{ToolExecutor, ToolOutcome};
use crate::truncate::truncate_payload;

/// Hard ceiling on tool rounds per turn. Exceeding it means a misbehaving
/// model or tool, not a transient fault, and is fatal for the turn.
pub const MAX_TOOL_ROUNDS: u32 = 20;

const NEW_SESSION_DIRECTIVE: &str =
    "This is the start of a new session. Greet the member warmly before helping.";
const CONTINUE_SESSION_DIRECTIVE: &str =
    "This is a continuing session. Do not greet again; respond directly.";

/// Sent in place of empty user input; several providers reject empty turns.
const FALLBACK_GREETING: &str = "Hello";

/// Markers callers use to mean "no image attached".
const IMAGE_PLACEHOLDERS: &[&str] = &["", "none", "null"];

/// One turn's worth of input. History excludes the system message; the loop
/// constructs its own from the session directive and the agent prompt.
#[derive(Debug)]
pub struct InvocationRequest<'a> {
    pub history: &'a [Message],
    pub text: Option<&'a str>,
    pub image: Option<&'a str>,
    pub context: Value,
    pub new_session: bool,
}

/// Final reply plus the messages the caller should append to its history
/// (the user turn and the assistant's final reply; intermediate tool
/// plumbing is not persisted).
#[derive(Clone, Debug)]
pub struct InvocationOutcome {
    pub reply: String,
    pub appended: Vec<Message>,
}

/// Drives one conversation turn for an agent against abstract model and
/// tool capabilities.
pub struct Invoker<'a> {
    agent: &'a Agent,
    catalog: &'a [ToolDefinition],
    models: &'a ModelsConfig,
    caller: &'a dyn ModelCaller,
    executor: &'a dyn ToolExecutor,
}

fn image_present(image: Option<&str>) -> bool {
    image.is_some_and(|reference| {
        !IMAGE_PLACEHOLDERS.contains(&reference.trim().to_ascii_lowercase().as_str())
    })
}

impl<'a> Invoker<'a> {
    pub fn new(
        agent: &'a Agent,
        catalog: &'a [ToolDefinition],
        models: &'a ModelsConfig,
        caller: &'a dyn ModelCaller,
        executor: &'a dyn ToolExecutor,
    ) -> Self {
        Self { agent, catalog, models, caller, executor }
    }

    pub async fn run(
        &self,
        request: InvocationRequest<'_>,
    ) -> Result<InvocationOutcome, InvocationError> {
        let model = self.select_model(&request)?;
        let tools = self.bound_tools();

        let user_message = build_user_message(&request);
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(Message::system(self.system_prompt(request.new_session)));
        messages.extend(
            request.history.iter().filter(|entry| entry.role != Role::System).cloned(),
        );
        messages.push(user_message.clone());

        info!(
            event_name = "agent.invoke.start",
            agent = %self.agent.name,
            model = %model.model,
            vendor = %model.vendor,
            tool_count = tools.len(),
            "invoking model"
        );

        let options =
            CallOptions { temperature: self.agent.temperature, max_tokens: self.agent.max_tokens };
        let mut response = self.call_model(&model, &messages, &tools, &options).await?;

        let mut rounds: u32 = 0;
        while response.has_tool_calls() {
            rounds += 1;
            if rounds > MAX_TOOL_ROUNDS {
                warn!(
                    event_name = "agent.invoke.tool_loop_exceeded",
                    agent = %self.agent.name,
                    rounds = MAX_TOOL_ROUNDS,
                    "model kept requesting tools past the round ceiling"
                );
                return Err(InvocationError::ToolLoopExceeded { rounds: MAX_TOOL_ROUNDS });
            }

            let proposal = Message::assistant_tool_calls(
                response.content.clone().unwrap_or_default(),
                response.tool_calls.clone(),
            );
            messages.push(proposal);

            // Sequential on purpose: later calls may depend on earlier side
            // effects.
            for call in &response.tool_calls {
                let outcome = match self
                    .executor
                    .execute(&call.name, &call.arguments, &request.context)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(error) => {
                        warn!(
                            event_name = "agent.invoke.tool_failed",
                            agent = %self.agent.name,
                            tool = %call.name,
                            error = %error,
                            "tool executor failed; folding failure into conversation"
                        );
                        ToolOutcome::failure(error.to_string())
                    }
                };
                let payload = truncate_payload(outcome.to_payload());
                messages.push(Message::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    payload.to_string(),
                ));
            }

            debug!(
                event_name = "agent.invoke.tool_round",
                agent = %self.agent.name,
                round = rounds,
                calls = response.tool_calls.len(),
                "tool round complete, re-invoking model"
            );
            response = self.call_model(&model, &messages, &tools, &options).await?;
        }

        let reply = response.content.unwrap_or_default();
        if reply.is_empty() {
            return Err(InvocationError::EmptyResponse);
        }

        info!(
            event_name = "agent.invoke.done",
            agent = %self.agent.name,
            tool_rounds = rounds,
            "invocation finished"
        );

        Ok(InvocationOutcome {
            appended: vec![user_message, Message::assistant(reply.clone())],
            reply,
        })
    }

    /// Picks the (vendor, model) pair for this turn and fails before any
    /// external call when the configuration cannot serve it.
    fn select_model(
        &self,
        request: &InvocationRequest<'_>,
    ) -> Result<ModelConfig, InvocationError> {
        let has_image = image_present(request.image);
        let purpose = if has_image { Purpose::Vision } else { Purpose::Text };

        let mut model = self.models.for_purpose(purpose).clone();
        if let Some(override_name) = &self.agent.model_override {
            model.model = override_name.clone();
        }

        registry::validate(&model, false)?;
        if has_image && !registry::is_vision_model(model.vendor, &model.model) {
            return Err(InvocationError::CapabilityMismatch { model: model.model });
        }
        Ok(model)
    }

    fn bound_tools(&self) -> Vec<ToolDefinition> {
        let tools = filter_tools(self.catalog, &self.agent.allowed_tools);
        if tools.len() < self.agent.allowed_tools.len() {
            let known: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
            let unknown: Vec<&str> = self
                .agent
                .allowed_tools
                .iter()
                .map(String::as_str)
                .filter(|name| !known.contains(name))
                .collect();
            warn!(
                event_name = "agent.invoke.unknown_tools",
                agent = %self.agent.name,
                unknown = ?unknown,
                "agent allow-list references tools missing from the catalog"
            );
        }
        tools
    }

    fn system_prompt(&self, new_session: bool) -> String {
        let directive =
            if new_session { NEW_SESSION_DIRECTIVE } else { CONTINUE_SESSION_DIRECTIVE };
        format!("{directive}\n\n{}", self.agent.prompt)
    }

    async fn call_model(
        &self,
        model: &ModelConfig,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &CallOptions,
    ) -> Result<ModelResponse, InvocationError> {
        self.caller
            .invoke(model, messages, tools, ToolChoice::Auto, options)
            .await
            .map_err(InvocationError::ModelCall)
    }
}

fn build_user_message(request: &InvocationRequest<'_>) -> Message {
    let text = request.text.map(str::trim).filter(|text| !text.is_empty());
    let image = request.image.filter(|_| image_present(request.image));

    match (text, image) {
        (Some(text), Some(url)) => Message::user_parts(vec![
            ContentPart::Text { text: text.to_string() },
            ContentPart::Image { url: url.to_string() },
        ]),
        (None, Some(url)) => {
            Message::user_parts(vec![ContentPart::Image { url: url.to_string() }])
        }
        (Some(text), None) => Message::user(text),
        (None, None) => Message::user(FALLBACK_GREETING),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use lenda_core::agent::Agent;
    use lenda_core::config::ModelsConfig;
    use lenda_core::errors::InvocationError;
    use lenda_core::message::{tool_links_consistent, Content, Message, Role, ToolCall};
    use lenda_core::registry::{ModelConfig, Vendor};
    use lenda_core::tool::{ParameterSchema, ToolDefinition};

    use super::{InvocationRequest, Invoker, MAX_TOOL_ROUNDS};
    use crate::caller::{CallOptions, ModelCaller, ModelResponse, ToolChoice};
    use crate::executor::{ToolExecutor, ToolOutcome};

    struct ScriptedCaller {
        responses: Mutex<Vec<ModelResponse>>,
        captured: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedCaller {
        fn new(responses: Vec<ModelResponse>) -> Self {
            Self { responses: Mutex::new(responses), captured: Mutex::new(Vec::new()) }
        }

        fn call_count(&self) -> usize {
            self.captured.lock().unwrap().len()
        }

        fn captured(&self) -> Vec<Vec<Message>> {
            self.captured.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelCaller for ScriptedCaller {
        async fn invoke(
            &self,
            _model: &ModelConfig,
            messages: &[Message],
            _tools: &[ToolDefinition],
            _tool_choice: ToolChoice,
            _options: &CallOptions,
        ) -> Result<ModelResponse> {
            self.captured.lock().unwrap().push(messages.to_vec());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(ModelResponse { content: Some("Done.".to_string()), tool_calls: Vec::new() })
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    /// Caller that proposes a fresh tool call on every invocation.
    struct PathologicalCaller {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelCaller for PathologicalCaller {
        async fn invoke(
            &self,
            _model: &ModelConfig,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _tool_choice: ToolChoice,
            _options: &CallOptions,
        ) -> Result<ModelResponse> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ModelResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: format!("call-{index}"),
                    name: "listLoans".to_string(),
                    arguments: json!({ "page": index }),
                }],
            })
        }
    }

    struct CountingExecutor {
        calls: AtomicU32,
        outcome: fn() -> Result<ToolOutcome>,
    }

    impl CountingExecutor {
        fn ok() -> Self {
            Self { calls: AtomicU32::new(0), outcome: || Ok(ToolOutcome::ok("done")) }
        }

        fn erroring() -> Self {
            Self {
                calls: AtomicU32::new(0),
                outcome: || Err(anyhow::anyhow!("loan service unreachable")),
            }
        }
    }

    #[async_trait]
    impl ToolExecutor for CountingExecutor {
        async fn execute(&self, _name: &str, _args: &Value, _context: &Value) -> Result<ToolOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn agent() -> Agent {
        Agent {
            name: "loan-assistant".to_string(),
            prompt: "You help members manage their loans.".to_string(),
            allowed_tools: vec!["listLoans".to_string()],
            temperature: 0.2,
            max_tokens: 512,
            model_override: None,
            eval: None,
        }
    }

    fn catalog() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "listLoans".to_string(),
            description: "List the member's loans".to_string(),
            parameters: ParameterSchema::default(),
        }]
    }

    fn models() -> ModelsConfig {
        ModelsConfig {
            text: ModelConfig::new(Vendor::OpenAi, "gpt-4o-mini"),
            vision: ModelConfig::new(Vendor::OpenAi, "gpt-4o"),
            evals: ModelConfig::new(Vendor::OpenAi, "gpt-4o-mini"),
        }
    }

    fn request(text: Option<&'static str>) -> InvocationRequest<'static> {
        InvocationRequest {
            history: &[],
            text,
            image: None,
            context: json!({}),
            new_session: true,
        }
    }

    #[tokio::test]
    async fn plain_reply_without_tool_calls() {
        let caller = ScriptedCaller::new(vec![ModelResponse {
            content: Some("You have one active loan.".to_string()),
            tool_calls: Vec::new(),
        }]);
        let executor = CountingExecutor::ok();
        let agent = agent();
        let catalog = catalog();
        let models = models();
        let invoker = Invoker::new(&agent, &catalog, &models, &caller, &executor);

        let outcome = invoker.run(request(Some("what loans do I have?"))).await.unwrap();
        assert_eq!(outcome.reply, "You have one active loan.");
        assert_eq!(outcome.appended.len(), 2);
        assert_eq!(outcome.appended[0].role, Role::User);
        assert_eq!(outcome.appended[1].role, Role::Assistant);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tool_round_feeds_result_back_and_returns_final_text() {
        let caller = ScriptedCaller::new(vec![
            ModelResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call-1".to_string(),
                    name: "listLoans".to_string(),
                    arguments: json!({ "memberId": 42 }),
                }],
            },
            ModelResponse {
                content: Some("You owe 1200 on loan 10000.".to_string()),
                tool_calls: Vec::new(),
            },
        ]);
        let executor = CountingExecutor::ok();
        let agent = agent();
        let catalog = catalog();
        let models = models();
        let invoker = Invoker::new(&agent, &catalog, &models, &caller, &executor);

        let outcome = invoker.run(request(Some("loan status"))).await.unwrap();
        assert_eq!(outcome.reply, "You owe 1200 on loan 10000.");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        // The second model call must see the proposal and the tool result,
        // with the tool-link invariant intact.
        let second_call = &caller.captured()[1];
        assert!(tool_links_consistent(second_call));
        let tool_message = second_call.iter().find(|entry| entry.role == Role::Tool).unwrap();
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call-1"));
    }

    #[tokio::test]
    async fn pathological_model_fails_at_the_twenty_first_call() {
        let caller = PathologicalCaller { calls: AtomicU32::new(0) };
        let executor = CountingExecutor::ok();
        let agent = agent();
        let catalog = catalog();
        let models = models();
        let invoker = Invoker::new(&agent, &catalog, &models, &caller, &executor);

        let error = invoker.run(request(Some("loop forever"))).await.unwrap_err();
        assert!(matches!(
            error,
            InvocationError::ToolLoopExceeded { rounds: MAX_TOOL_ROUNDS }
        ));
        assert_eq!(caller.calls.load(Ordering::SeqCst), 21);
        assert_eq!(executor.calls.load(Ordering::SeqCst), MAX_TOOL_ROUNDS);
    }

    #[tokio::test]
    async fn executor_error_is_folded_into_the_conversation() {
        let caller = ScriptedCaller::new(vec![
            ModelResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call-1".to_string(),
                    name: "listLoans".to_string(),
                    arguments: json!({}),
                }],
            },
            ModelResponse {
                content: Some("Sorry, I could not reach the loan service.".to_string()),
                tool_calls: Vec::new(),
            },
        ]);
        let executor = CountingExecutor::erroring();
        let agent = agent();
        let catalog = catalog();
        let models = models();
        let invoker = Invoker::new(&agent, &catalog, &models, &caller, &executor);

        let outcome = invoker.run(request(Some("loan status"))).await.unwrap();
        assert!(outcome.reply.contains("could not reach"));

        let second_call = &caller.captured()[1];
        let tool_message = second_call.iter().find(|entry| entry.role == Role::Tool).unwrap();
        assert!(tool_message.text().contains("loan service unreachable"));
        assert!(tool_message.text().contains("\"success\":false"));
    }

    #[tokio::test]
    async fn image_with_text_model_fails_before_any_model_call() {
        let caller = ScriptedCaller::new(Vec::new());
        let executor = CountingExecutor::ok();
        let agent = agent();
        let catalog = catalog();
        // Vision purpose deliberately misconfigured with a text-only model.
        let models = ModelsConfig {
            text: ModelConfig::new(Vendor::OpenAi, "gpt-4o-mini"),
            vision: ModelConfig::new(Vendor::OpenAi, "o3-mini"),
            evals: ModelConfig::new(Vendor::OpenAi, "gpt-4o-mini"),
        };
        let invoker = Invoker::new(&agent, &catalog, &models, &caller, &executor);

        let error = invoker
            .run(InvocationRequest {
                history: &[],
                text: Some("what is on this receipt?"),
                image: Some("https://img.example/receipt.png"),
                context: json!({}),
                new_session: false,
            })
            .await
            .unwrap_err();

        assert!(matches!(error, InvocationError::CapabilityMismatch { .. }));
        assert_eq!(caller.call_count(), 0);
    }

    #[tokio::test]
    async fn placeholder_image_marker_stays_on_the_text_model() {
        let caller = ScriptedCaller::new(Vec::new());
        let executor = CountingExecutor::ok();
        let agent = agent();
        let catalog = catalog();
        let models = ModelsConfig {
            text: ModelConfig::new(Vendor::OpenAi, "gpt-4o-mini"),
            vision: ModelConfig::new(Vendor::OpenAi, "o3-mini"),
            evals: ModelConfig::new(Vendor::OpenAi, "gpt-4o-mini"),
        };
        let invoker = Invoker::new(&agent, &catalog, &models, &caller, &executor);

        // "none" is a placeholder, so the text model serves this turn and
        // the misconfigured vision slot is never consulted.
        let outcome = invoker
            .run(InvocationRequest {
                history: &[],
                text: Some("hello"),
                image: Some("none"),
                context: json!({}),
                new_session: true,
            })
            .await
            .unwrap();
        assert_eq!(outcome.reply, "Done.");
    }

    #[tokio::test]
    async fn empty_input_substitutes_a_greeting() {
        let caller = ScriptedCaller::new(Vec::new());
        let executor = CountingExecutor::ok();
        let agent = agent();
        let catalog = catalog();
        let models = models();
        let invoker = Invoker::new(&agent, &catalog, &models, &caller, &executor);

        let outcome = invoker.run(request(None)).await.unwrap();
        assert_eq!(outcome.appended[0].content, Content::Text("Hello".to_string()));
        assert_eq!(outcome.reply, "Done.");
    }

    #[tokio::test]
    async fn session_flag_selects_the_system_directive() {
        let caller = ScriptedCaller::new(Vec::new());
        let executor = CountingExecutor::ok();
        let agent = agent();
        let catalog = catalog();
        let models = models();
        let invoker = Invoker::new(&agent, &catalog, &models, &caller, &executor);

        invoker.run(request(Some("hi"))).await.unwrap();
        let system = caller.captured()[0][0].text();
        assert!(system.contains("new session"));
        assert!(system.contains("You help members manage their loans."));

        invoker
            .run(InvocationRequest {
                history: &[],
                text: Some("hi again"),
                image: None,
                context: json!({}),
                new_session: false,
            })
            .await
            .unwrap();
        let system = caller.captured()[1][0].text();
        assert!(system.contains("continuing session"));
    }

    #[tokio::test]
    async fn history_is_forwarded_between_directive_and_new_input() {
        let caller = ScriptedCaller::new(Vec::new());
        let executor = CountingExecutor::ok();
        let agent = agent();
        let catalog = catalog();
        let models = models();
        let invoker = Invoker::new(&agent, &catalog, &models, &caller, &executor);

        let history =
            vec![Message::user("first question"), Message::assistant("first answer")];
        invoker
            .run(InvocationRequest {
                history: &history,
                text: Some("follow-up"),
                image: None,
                context: json!({}),
                new_session: false,
            })
            .await
            .unwrap();

        let sent = &caller.captured()[0];
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent[1].text(), "first question");
        assert_eq!(sent[2].text(), "first answer");
        assert_eq!(sent[3].text(), "follow-up");
    }

    #[tokio::test]
    async fn empty_model_response_is_an_error() {
        let caller = ScriptedCaller::new(vec![ModelResponse {
            content: Some(String::new()),
            tool_calls: Vec::new(),
        }]);
        let executor = CountingExecutor::ok();
        let agent = agent();
        let catalog = catalog();
        let models = models();
        let invoker = Invoker::new(&agent, &catalog, &models, &caller, &executor);

        let error = invoker.run(request(Some("hi"))).await.unwrap_err();
        assert!(matches!(error, InvocationError::EmptyResponse));
    }
}
