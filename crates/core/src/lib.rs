pub mod analysis;
pub mod catalog;
pub mod directive;
pub mod generator;
pub mod prompt_loader;
pub mod registry;
pub mod session;
pub mod simulated;
pub mod speech;
pub mod turn;

pub use analysis::AnalysisResult;
pub use catalog::{CatalogError, Role, RoleScenarioCatalog, Scenario};
pub use generator::{
    AnalysisRequester, OpenAiChatClient, SharedAnalysisRequester, SharedTurnGenerator,
    TurnGenerator,
};
pub use registry::{
    Assignment, ScenarioSwitch, SessionId, SessionRegistry, SessionView, spawn_idle_sweeper,
};
pub use session::{ConversationSession, NOT_STARTED_GUIDANCE, SessionError, SessionSnapshot};
pub use simulated::SimulatedClient;
pub use speech::SpeechClient;
pub use turn::{Speaker, Turn};
