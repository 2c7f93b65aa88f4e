//! Core engine for the watch-time budget tracker.
//!
//! This crate contains the durable state machine that:
//! - tracks one active viewing timer per browser tab
//! - accrues elapsed time into per-bucket daily totals
//! - enforces per-bucket daily limits
//! - keeps remote page agents consistent via pushed commands plus a
//!   polling handshake
//!
//! All state lives behind the [`Store`] port; the hosting process is
//! assumed disposable between any two operations.

pub mod agent;
pub mod bucket;
pub mod clock;
pub mod engine;
pub mod request;
pub mod settings;
pub mod stats;
pub mod store;
pub mod timer;

pub use agent::{AgentCommand, AgentPush, AgentTransport, DeliveryError, EnforcementAction, NullTransport};
pub use bucket::{Bucket, UnknownBucket};
pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{Engine, EngineError, ResumeOutcome, SettingsCache};
pub use request::{Request, Response, StartOutcome};
pub use settings::Settings;
pub use stats::{DayTotals, live_totals};
pub use store::{MemoryStore, Store, StoreError};
pub use timer::{TabId, TimerMap, TimerState};
