//! Voice-session lifecycle core: session creation, client tools, the
//! session state machine, transcript reconciliation and post-call analysis.

pub mod analysis;
pub mod call_config;
pub mod client_tools;
pub mod controller;
pub mod error;
pub mod events;
pub mod gateway;
pub mod poller;
pub mod presets;
pub mod prompts;
pub mod reconciler;
pub mod tools;
pub mod transcript;
pub mod transport;

pub use analysis::{Analysis, AnalysisDispatcher, Ratings, Recommendation};
pub use call_config::CallConfiguration;
pub use controller::SessionController;
pub use error::{SessionError, ToolError, TransportError};
pub use events::{SessionObserver, SessionState, SessionStatus};
pub use gateway::{HttpSessionGateway, MessageSource, SessionGateway, SessionHandle};
pub use poller::TranscriptPoller;
pub use reconciler::TranscriptReconciler;
pub use tools::{ClientTool, ToolRegistry};
pub use transcript::{Role, TranscriptEntry};
