use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::request::{ChatCompletionRequest, ConnectionProbe};
use crate::sse::SseDecoder;
use crate::state::ChatMessage;

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Chat-completion client for Azure OpenAI style deployments.
#[derive(Clone, Default)]
pub struct ChatClient {
    client: Client,
}

impl ChatClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Sends one streaming request. A non-2xx status is returned as
    /// [`ChatError::Request`] before any delta is produced.
    pub async fn stream_chat(&self, config: &Config, messages: &[ChatMessage]) -> Result<DeltaStream> {
        config.validate()?;

        let body = ChatCompletionRequest {
            messages,
            max_tokens: config.max_tokens,
            stream: true,
        };

        info!(
            deployment = %config.deployment,
            messages = messages.len(),
            "sending chat completion request"
        );
        let response = self.post(config).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Request { status, body });
        }

        Ok(DeltaStream::new(Box::pin(response.bytes_stream())))
    }

    /// Minimal non-streaming request to check endpoint, key and deployment.
    pub async fn test_connection(&self, config: &Config) -> Result<()> {
        config.validate()?;

        let messages = [ChatMessage::user("Hello")];
        let body = ConnectionProbe {
            messages: &messages,
            max_completion_tokens: 5,
        };

        let response = self.post(config).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Request { status, body });
        }

        Ok(())
    }

    fn post(&self, config: &Config) -> RequestBuilder {
        let mut request = self
            .client
            .post(config.chat_completions_url())
            .header("Content-Type", "application/json")
            .header("api-key", &config.api_key);

        if let Some(timeout) = config.request_timeout() {
            request = request.timeout(timeout);
        }
        request
    }
}

/// Content deltas of one response, in arrival order.
///
/// Finite and not restartable; dropping it releases the connection.
pub struct DeltaStream {
    body: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

impl DeltaStream {
    fn new(body: ByteStream) -> Self {
        Self {
            body,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// The next delta, or `None` once the body has ended.
    pub async fn next_delta(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(delta) = self.pending.pop_front() {
                return Some(Ok(delta));
            }
            if self.finished {
                return None;
            }

            match self.body.next().await {
                Some(Ok(chunk)) => {
                    self.pending.extend(self.decoder.push(&chunk));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(ChatError::Transport(e)));
                }
                None => {
                    self.finished = true;
                    self.pending.extend(self.decoder.finish());
                    debug!(
                        saw_done = self.decoder.saw_done(),
                        skipped_frames = self.decoder.skipped_frames(),
                        "response body ended"
                    );
                }
            }
        }
    }

    pub fn skipped_frames(&self) -> usize {
        self.decoder.skipped_frames()
    }
}
