//! parley-server - conversational front end with per-user sessions and
//! image grounding.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod chat;
pub mod conversation;
pub mod error;
pub mod grounding;
pub mod health;
pub mod routes;
pub mod session;

pub use chat::ChatService;
pub use conversation::{
    BotReply, Conversation, ConversationError, ConversationGateway, ConversationHandle,
    ConversationProvider, GeminiProvider,
};
pub use error::ChatError;
pub use grounding::{
    synthesize_prompt, ClassificationResult, DecodedImage, FetchedImage, HttpClassifier,
    HttpImageFetcher, ImageAsset, ImageClassifier, ImageFetcher, ImageGrounding, ImageSource,
    Label,
};
pub use health::{HealthProber, ProbeOutcome};
pub use routes::{build_router, AppState};
pub use session::{HistoryBuffer, Session, SessionRegistry, Speaker, Turn};
