pub mod audio;
pub mod config;
pub mod credential;
pub mod error;
pub mod http;
pub mod session;
pub mod transport;

pub use audio::{
    AudioCapture, AudioFile, AudioFrame, AudioOutput, CaptureConfig, Direction, Microphone,
    PlaybackPipeline, WavFileMicrophone, WavFileOutput,
};
pub use config::Config;
pub use credential::{CredentialProvider, HttpCredentialProvider, StaticCredentialProvider, Token};
pub use error::{GuardianError, GuardianResult};
pub use http::{create_router, AppState};
pub use session::{
    ConversationContext, Session, SessionConfig, SessionEvent, SessionOrchestrator, SessionState,
    SessionStats, Speaker, TranscriptEntry,
};
pub use transport::{Transport, TransportConfig, TransportEvent, WebSocketTransportFactory};
