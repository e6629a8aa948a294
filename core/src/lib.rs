// Adaptive query engine for rural health assistants:
// - Connectivity monitoring with debounce
// - Online/offline mode resolution per session
// - Provider adapters (rule tables, generative AI, search sources)
// - Parallel fan-out with local fallback and deterministic ranking
// - Bounded conversation history

// Shared error types
pub mod errors;
pub use errors::*;

// Request/response data structures
pub mod types;
pub use types::*;

// Configuration loading
pub mod config;
pub use config::*;

pub mod aggregator;
pub mod history;
pub mod mode;
pub mod network;
pub mod orchestrator;
pub mod providers;
pub mod session;
pub mod store;

pub mod engine;
pub use engine::{QueryEngine, QueryEngineBuilder};

pub use history::{ConversationHistory, ConversationTurn, TurnRole};
pub use mode::{ModeController, ModeSnapshot};
pub use network::{
    spawn_probe_loop, ConnectivityProbe, HttpProbe, ListenerGuard, NetworkStatusMonitor,
};
pub use orchestrator::{resolve_mode, FallbackOrchestrator};
pub use providers::{ProviderAdapter, ProviderRef, QueryContext};
pub use session::{Session, SessionInfo};
pub use store::{InMemoryStore, KeyValueStore, KeyValueStoreRef, StoreError};
