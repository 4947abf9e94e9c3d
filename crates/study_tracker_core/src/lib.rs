pub mod domain;
pub mod lifecycle;
pub mod memory;
pub mod ports;
pub mod progress;
pub mod reaper;
pub mod streak;

pub use domain::{
    ActiveSessionView, CloseReason, DailyStat, Goal, PageActivity, ProgressRecord, Session,
    SessionStats, SweptSession,
};
pub use lifecycle::{EngineError, EngineResult, SessionLifecycleManager};
pub use memory::MemoryStore;
pub use ports::{ResourceCatalog, SessionStore, StoreError, StoreResult};
pub use progress::ProgressAggregator;
pub use reaper::StaleSessionReaper;
pub use streak::{activity_streak, advance_goal, evaluate_goal, goal_streak, GoalEvaluation};
