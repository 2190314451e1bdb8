// Graph sync engine: autosave scheduling, optimistic snapshot writes,
// realtime application of remote snapshots and conflict resolution.

pub mod debounce;
pub mod listener;
pub mod resolver;
pub mod session;
pub mod writer;

pub use debounce::{DebounceConfig, Debouncer};
pub use listener::ListenerDecision;
pub use resolver::ResolutionPlan;
pub use session::{ResolutionStep, SessionConfig, SyncError, SyncSession, SyncState};
pub use writer::{PendingWrite, WriteKind, WriteMode, WriteOutcome};
