use crate::config::Config;
use crate::provider::{CompletionProvider, ProviderError, ProviderEvent, ProviderStream};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionResponseStream, CreateChatCompletionRequestArgs,
        CreateChatCompletionStreamResponse,
    },
    Client,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use murmur_shared::{ConversationRequest, ConversationTurn, Role};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Hosted chat-completion provider backed by the OpenAI API.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    system_prompt: Option<String>,
    max_duration: Duration,
}

impl OpenAiProvider {
    pub fn new(config: &Config) -> Self {
        info!("Initializing OpenAI provider with model: {}", config.model);
        let mut openai = OpenAIConfig::new().with_api_key(config.api_key.clone());
        if let Some(base_url) = &config.base_url {
            info!("Using OpenAI base URL: {}", base_url);
            openai = openai.with_api_base(base_url.clone());
        }
        Self {
            client: Client::with_config(openai),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_duration: config.max_duration,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn convert_messages(
        &self,
        request: &ConversationRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages = Vec::with_capacity(1 + request.len());
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(prompt.clone())
                    .build()?,
            ));
        }
        for turn in &request.messages {
            messages.push(convert_turn(turn)?);
        }
        Ok(messages)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn start(&self, request: &ConversationRequest) -> Result<ProviderStream, ProviderError> {
        let deadline = Instant::now() + self.max_duration;

        let messages = self
            .convert_messages(request)
            .map_err(|e| classify(&e, false))?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .stream(true)
            .build()
            .map_err(|e| classify(&e, false))?;

        if let Ok(payload) = serde_json::to_string(&request) {
            debug!("OpenAI request payload: {}", payload);
        }

        let opened = tokio::time::timeout_at(deadline, self.client.chat().create_stream(request))
            .await
            .map_err(|_| ProviderError::Timeout)?;
        let inner = match opened {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to create OpenAI stream: {:?}", e);
                return Err(classify(&e, false));
            }
        };

        let upstream = Upstream {
            inner,
            deadline,
            pending: VecDeque::new(),
            received: false,
            done: false,
        };
        Ok(futures_util::stream::unfold(upstream, |mut upstream| async move {
            let item = upstream.next_event().await?;
            Some((item, upstream))
        })
        .boxed())
    }
}

struct Upstream {
    inner: ChatCompletionResponseStream,
    deadline: Instant,
    pending: VecDeque<ProviderEvent>,
    received: bool,
    done: bool,
}

impl Upstream {
    async fn next_event(&mut self) -> Option<Result<ProviderEvent, ProviderError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }

            match tokio::time::timeout_at(self.deadline, self.inner.next()).await {
                Err(_) => {
                    self.done = true;
                    return Some(Err(ProviderError::Timeout));
                }
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Ok(Some(Err(e))) => {
                    error!("OpenAI stream error: {:?}", e);
                    self.done = true;
                    return Some(Err(classify(&e, self.received)));
                }
                Ok(Some(Ok(chunk))) => {
                    self.received = true;
                    let (events, finished) = chunk_events(&chunk);
                    self.pending.extend(events);
                    self.done = finished;
                }
            }
        }
    }
}

/// Events carried by one streamed chunk, and whether it ends the completion.
fn chunk_events(chunk: &CreateChatCompletionStreamResponse) -> (Vec<ProviderEvent>, bool) {
    let mut events = Vec::new();
    let Some(choice) = chunk.choices.first() else {
        return (events, false);
    };

    if let Some(delta) = &choice.delta.content {
        if !delta.is_empty() {
            events.push(ProviderEvent::Text(delta.clone()));
        }
    }
    if let Some(reason) = &choice.finish_reason {
        debug!("OpenAI finished with reason {:?}", reason);
        events.push(ProviderEvent::Finished);
        return (events, true);
    }
    (events, false)
}

fn convert_turn(turn: &ConversationTurn) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let content = turn.joined_text();
    let message = match turn.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()?,
        ),
        Role::Assistant => ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(content)
                .build()?,
        ),
    };
    Ok(message)
}

/// Maps SDK errors onto the relay's failure classes. Anything that fails
/// before the first chunk counts as a rejection.
fn classify(error: &OpenAIError, received: bool) -> ProviderError {
    match error {
        OpenAIError::Reqwest(e) if e.is_timeout() => ProviderError::Timeout,
        OpenAIError::ApiError(api_err) => ProviderError::Rejected(format!(
            "OpenAI API Error: {} (Code: {:?}, Type: {:?})",
            api_err.message, api_err.code, api_err.r#type
        )),
        OpenAIError::InvalidArgument(message) => ProviderError::Rejected(message.clone()),
        other if !received => ProviderError::Rejected(other.to_string()),
        other => ProviderError::Interrupted(other.to_string()),
    }
}
