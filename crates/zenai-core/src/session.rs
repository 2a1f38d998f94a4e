//! The streaming chat session manager.
//!
//! A [`Session`] owns the config snapshot, page context and transcript for one
//! conversation. Turns move through `Idle -> Sending -> Streaming -> Idle`;
//! only one turn is in flight at a time.

use std::future::Future;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::ChatClient;
use crate::config::{Config, ConfigStore};
use crate::error::{ChatError, ConfigError};
use crate::page::{load_page_context, PageContext, PageContextProvider};
use crate::request::{TurnRequest, HISTORY_LIMIT, SYSTEM_PROMPT};
use crate::sink::{MessageHandle, PresentationSink, StatusKind};
use crate::state::{ChatMessage, ChatRole};
use crate::transcript::Transcript;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Sending,
    Streaming,
}

/// What happens to streamed text when a turn fails or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialReplyPolicy {
    /// Keep what arrived as a finalized assistant message.
    #[default]
    Keep,
    /// Withdraw it from the sink and the transcript.
    Discard,
}

#[derive(Debug)]
pub enum SessionCommand {
    Submit(String),
    Cancel,
    ConfigChanged(Config),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    EmptyInput,
    Busy,
    Configuration(ConfigError),
}

#[derive(Debug)]
pub enum TurnOutcome {
    Finalized { content: String },
    /// The stream ended without any content.
    Empty,
    /// `partial` is the text kept in the transcript, if any.
    Failed { error: ChatError, partial: Option<String> },
    Cancelled { partial: Option<String> },
    Rejected(RejectReason),
}

/// Per-turn accumulation; discarded once the turn ends.
#[derive(Debug, Default)]
struct StreamState {
    accumulated_text: String,
    active: bool,
}

pub struct Session {
    config: Config,
    page_context: Option<PageContext>,
    transcript: Transcript,
    phase: TurnPhase,
    client: ChatClient,
    system_prompt: String,
    partial_policy: PartialReplyPolicy,
}

impl Session {
    pub fn new(config: Config, page_context: Option<PageContext>, client: ChatClient) -> Self {
        Self {
            config,
            page_context,
            transcript: Transcript::new(),
            phase: TurnPhase::Idle,
            client,
            system_prompt: SYSTEM_PROMPT.to_string(),
            partial_policy: PartialReplyPolicy::default(),
        }
    }

    /// Loads config and page context once. A missing page is not an error.
    pub async fn start(
        store: &dyn ConfigStore,
        provider: Option<&dyn PageContextProvider>,
        client: ChatClient,
    ) -> anyhow::Result<Self> {
        let config = store.get()?.with_env_overrides();
        let page_context = load_page_context(provider).await;
        Ok(Self::new(config, page_context, client))
    }

    pub fn with_partial_policy(mut self, policy: PartialReplyPolicy) -> Self {
        self.partial_policy = policy;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn page_context(&self) -> Option<&PageContext> {
        self.page_context.as_ref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn is_streaming(&self) -> bool {
        self.phase != TurnPhase::Idle
    }

    /// Takes effect from the next turn; a turn in flight keeps its snapshot.
    pub fn on_config_changed(&mut self, config: Config) {
        info!(deployment = %config.deployment, "configuration updated");
        self.config = config;
    }

    /// Runs one turn to completion without a command channel.
    pub async fn submit<S>(&mut self, text: &str, sink: &mut S) -> TurnOutcome
    where
        S: PresentationSink + ?Sized,
    {
        self.run_turn(text, sink, None).await
    }

    /// Processes commands until the channel closes, then hands the session back.
    pub async fn run<S>(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>, mut sink: S) -> Self
    where
        S: PresentationSink,
    {
        while let Some(command) = commands.recv().await {
            match command {
                SessionCommand::Submit(text) => {
                    let outcome = self.run_turn(&text, &mut sink, Some(&mut commands)).await;
                    debug!(?outcome, "turn ended");
                }
                SessionCommand::Cancel => debug!("cancel with no turn in flight"),
                SessionCommand::ConfigChanged(config) => self.on_config_changed(config),
            }
        }
        self
    }

    async fn run_turn<S>(
        &mut self,
        text: &str,
        sink: &mut S,
        mut commands: Option<&mut mpsc::UnboundedReceiver<SessionCommand>>,
    ) -> TurnOutcome
    where
        S: PresentationSink + ?Sized,
    {
        let input = text.trim();
        if input.is_empty() {
            return TurnOutcome::Rejected(RejectReason::EmptyInput);
        }
        if self.phase != TurnPhase::Idle {
            debug!("turn in flight, rejecting submit");
            return TurnOutcome::Rejected(RejectReason::Busy);
        }
        if let Err(e) = self.config.validate() {
            warn!(error = %e, "refusing to send with incomplete configuration");
            sink.set_status(&e.to_string(), StatusKind::Error);
            return TurnOutcome::Rejected(RejectReason::Configuration(e));
        }

        let config = self.config.clone();
        self.phase = TurnPhase::Sending;
        sink.set_busy(true);
        sink.clear_status();

        let history = self.transcript.trim_history_view(HISTORY_LIMIT).to_vec();
        self.transcript.append(ChatMessage::user(input));
        sink.append_message(ChatRole::User, input);
        let mut typing = Some(sink.append_pending(ChatRole::Assistant, ""));

        let request = TurnRequest::build(
            &self.system_prompt,
            self.page_context.as_ref(),
            &history,
            input,
        );
        info!(
            history = history.len(),
            with_context = self.page_context.is_some(),
            "starting turn"
        );

        let client = self.client.clone();
        let mut state = StreamState::default();
        let mut pending: Option<MessageHandle> = None;

        let result = match self
            .next_or_command(client.stream_chat(&config, &request.messages), &mut commands)
            .await
        {
            None => Err(ChatError::Cancelled),
            Some(Err(e)) => Err(e),
            Some(Ok(mut stream)) => {
                if let Some(handle) = typing.take() {
                    sink.remove_message(handle);
                }
                state.active = true;

                loop {
                    match self.next_or_command(stream.next_delta(), &mut commands).await {
                        None => break Err(ChatError::Cancelled),
                        Some(None) => break Ok(()),
                        Some(Some(Err(e))) => break Err(e),
                        Some(Some(Ok(delta))) => {
                            state.accumulated_text.push_str(&delta);
                            match pending {
                                None => {
                                    self.phase = TurnPhase::Streaming;
                                    self.transcript
                                        .append(ChatMessage::assistant(state.accumulated_text.as_str()));
                                    pending = Some(
                                        sink.append_pending(ChatRole::Assistant, &state.accumulated_text),
                                    );
                                }
                                Some(handle) => {
                                    self.transcript
                                        .update_last(ChatRole::Assistant, &state.accumulated_text);
                                    sink.update_message(handle, &state.accumulated_text);
                                }
                            }
                        }
                    }
                }
            }
        };

        if let Some(handle) = typing.take() {
            sink.remove_message(handle);
        }

        let outcome = match result {
            Ok(()) => self.finalize(sink, pending, state),
            Err(error) => self.fail(sink, pending, state, error),
        };

        self.phase = TurnPhase::Idle;
        sink.set_busy(false);
        outcome
    }

    fn finalize<S>(&mut self, sink: &mut S, pending: Option<MessageHandle>, state: StreamState) -> TurnOutcome
    where
        S: PresentationSink + ?Sized,
    {
        match pending {
            Some(handle) => {
                sink.finish_message(handle);
                info!(chars = state.accumulated_text.chars().count(), "turn finalized");
                TurnOutcome::Finalized {
                    content: state.accumulated_text,
                }
            }
            None => {
                warn!("response ended without content");
                sink.set_status("No response received from the model.", StatusKind::Info);
                TurnOutcome::Empty
            }
        }
    }

    fn fail<S>(
        &mut self,
        sink: &mut S,
        pending: Option<MessageHandle>,
        state: StreamState,
        error: ChatError,
    ) -> TurnOutcome
    where
        S: PresentationSink + ?Sized,
    {
        let state_active = state.active;
        let partial = match (pending, self.partial_policy) {
            (Some(handle), PartialReplyPolicy::Keep) => {
                sink.finish_message(handle);
                Some(state.accumulated_text)
            }
            (Some(handle), PartialReplyPolicy::Discard) => {
                sink.remove_message(handle);
                self.transcript.rollback_last(ChatRole::Assistant);
                None
            }
            (None, _) => None,
        };

        match error {
            ChatError::Cancelled => {
                info!(kept_partial = partial.is_some(), "turn cancelled");
                sink.set_status("Request cancelled.", StatusKind::Info);
                TurnOutcome::Cancelled { partial }
            }
            error => {
                warn!(
                    error = %error,
                    response_started = state_active,
                    kept_partial = partial.is_some(),
                    "turn failed"
                );
                sink.set_status(&error.to_string(), StatusKind::Error);
                TurnOutcome::Failed { error, partial }
            }
        }
    }

    /// Awaits `fut` while serving commands. `None` means the turn was cancelled.
    async fn next_or_command<F>(
        &mut self,
        fut: F,
        commands: &mut Option<&mut mpsc::UnboundedReceiver<SessionCommand>>,
    ) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::pin!(fut);
        loop {
            let Some(rx) = commands.as_deref_mut() else {
                return Some(fut.await);
            };

            let mut closed = false;
            tokio::select! {
                output = &mut fut => return Some(output),
                command = rx.recv() => match command {
                    Some(SessionCommand::Cancel) => return None,
                    Some(SessionCommand::Submit(_)) => debug!("turn in flight, ignoring submit"),
                    Some(SessionCommand::ConfigChanged(config)) => self.on_config_changed(config),
                    None => closed = true,
                },
            }
            if closed {
                *commands = None;
            }
        }
    }
}
