pub mod allocator;
pub mod audit;
pub mod config;
pub mod dispatch;
pub mod element;
pub mod error;
pub mod event;
pub mod fsm;
pub mod gc;
pub mod guru;
pub mod host;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod rules;
pub mod store;

pub use audit::AuditLogger;
pub use config::{ConfigError, OrchestratorConfig};
pub use element::{AggregatedExecution, DhcpServiceProvider, NetworkElement, UserDataServiceProvider};
pub use error::{OrchestratorError, ProviderError, ProviderResult, Result};
pub use event::Event;
pub use gc::{GcHandle, IdleMap, NetworkGc};
pub use guru::{MigrationResponder, NetworkGuru};
pub use host::{AgentChannel, CheckNetworkAnswer, HostNetworkValidator, PhysicalNetworkSetupInfo, StartupInfo};
pub use orchestrator::{LbScheme, NetworkOrchestrator, NetworkSetup};
pub use registry::ProviderRegistry;
pub use rules::{NoopRules, RuleKind, RulesManager};
pub use store::{MemoryStore, ResourceStore, StoreError};
