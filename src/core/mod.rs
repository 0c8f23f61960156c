//! 核心层：指纹、frontier、状态与 reducer、流水线控制器、会话注册表、错误恢复、优雅关闭

pub mod error;
pub mod events;
pub mod fingerprint;
pub mod frontier;
pub mod pipeline;
pub mod recovery;
pub mod registry;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;

pub use error::{ExploreError, RecoveryAction};
pub use events::ExploreEvent;
pub use fingerprint::{fingerprint, is_cycle, Fingerprint};
pub use frontier::{BacktrackTarget, Frontier, FrontierRecord, PopResult};
pub use pipeline::{
    decide_stage, execute_stage, observe_stage, persist_stage, Collaborators, DecideContext,
    Pipeline, PipelineOptions, RunReport,
};
pub use recovery::RecoveryEngine;
pub use registry::{CollaboratorFactory, SessionRegistry, SessionSummary, StartRequest};
pub use session_supervisor::SessionSupervisor;
pub use shutdown::{
    run_with_graceful_shutdown, CleanupReport, RegistryCleanup, ShutdownCleanup,
    ShutdownCoordinator, ShutdownReason, ShutdownSignal,
};
pub use state::{
    ExplorationState, ExploreStatus, FrontierOp, PendingTransition, SessionStatus, SessionView,
    StateUpdate,
};
