pub mod auth;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod service;
pub mod session;
pub mod uploads;

pub use auth::{Authenticator, DryrunAuthenticator, SessionAuthenticator};
pub use config::WhiskConfig;
pub use error::{EngineError, GenerationFailure};
pub use orchestrator::{
    OrchestratorConfig, OrchestratorHandle, PromptTask, RunState, TaskOrchestrator,
};
pub use service::{DryrunService, ImageService, WhiskService};
pub use session::Session;
pub use uploads::{UploadCache, UploadedReference};
