pub mod client;
pub mod config;
pub mod error;
pub mod page;
pub mod request;
pub mod session;
pub mod sink;
pub mod sse;
pub mod state;
pub mod transcript;

// Re-export main types for convenience
pub use client::{ChatClient, DeltaStream};
pub use config::{bootstrap, BootstrapOutcome, Config, ConfigStore, FileConfigStore};
pub use error::{ChatError, ConfigError, FrameError};
pub use page::{FilePageProvider, PageContext, PageContextProvider, UrlPageProvider};
pub use request::TurnRequest;
pub use session::{PartialReplyPolicy, RejectReason, Session, SessionCommand, TurnOutcome, TurnPhase};
pub use sink::{ChannelSink, MessageHandle, PresentationSink, SinkEvent, StatusKind};
pub use state::{ChatMessage, ChatRole};
pub use transcript::Transcript;
