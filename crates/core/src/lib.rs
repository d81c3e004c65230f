pub mod audit;
pub mod catalog;
pub mod config;
pub mod decision;
pub mod delegation;
pub mod domain;
pub mod errors;
pub mod notify;
pub mod orchestrator;
pub mod resolver;
pub mod store;
pub mod telemetry;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use catalog::LevelCatalog;
pub use config::{
    AppConfig, ConfigError, ConfigOverrides, DatabaseConfig, EngineSettings, LoadOptions,
    LogFormat, LoggingConfig,
};
pub use decision::{Decision, DecisionOutcome, DecisionProcessor};
pub use delegation::DelegationManager;
pub use domain::approval::{Approval, ApprovalStatus};
pub use domain::chain::{ApprovalChain, ChainState, ChainTransition};
pub use domain::document::DocumentType;
pub use domain::ids::{
    ApprovalId, ChainId, CompanyId, DocumentId, LevelApproverId, LevelId, UserId,
};
pub use domain::level::{
    AmountRange, ApprovalLevel, Delegation, DelegationWindow, LevelApprover, QuorumPolicy,
};
pub use errors::{ConfigViolation, DelegationError, DomainError, EngineError};
pub use notify::{ChainNotification, NoopNotificationSink, NotificationSink};
pub use orchestrator::{
    ChainOrchestrator, ChainStatus, PendingApproval, StartChainRequest, StartOutcome,
};
pub use resolver::{LevelResolver, Resolution};
pub use store::{ApprovalStore, ChainStore, LevelStore, StoreError, UserDirectory};
