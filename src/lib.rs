pub mod config;
pub mod context;
pub mod contract;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fs_util;
pub mod hooks;
pub mod input;
pub mod logging;
pub mod message;
pub mod operation;
pub mod operations;
pub mod pending;
pub mod plugins;
pub mod presenter;
pub mod registry;
pub mod shell;
pub mod slash;
pub mod tasks;
pub mod tokens;
pub mod transport;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::{ApprovalRules, Config, ConfigLayer, ConfigManager, Scope};
pub use context::ContextWindow;
pub use contract::{ResponseContract, SchemaNegotiator};
pub use conversation::{Boundaries, Conversation, SharedState};
pub use engine::Engine;
pub use error::{ContractError, EngineError, HookError, TransportError};
pub use hooks::{Hook, HookEvent, Phase, PolicyRegistry};
pub use message::{AssistantResponse, TurnPayload};
pub use operation::{OperationContext, OperationRequest, OperationResult, OperationType};
pub use pending::PendingResultQueue;
pub use presenter::{Presenter, TerminalPresenter};
pub use registry::{CapabilityRegistry, Descriptor};
pub use shell::{PersistentShell, Shell, ShellOutput};
pub use transport::{ModelTransport, ScriptedTransport};
