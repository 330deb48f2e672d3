//! Balance Telemetry - behavioral measurement for ball-on-platform experiments
//!
//! Agents balance balls on tilting platforms while a supervisor switches control
//! between several platforms. Telemetry bins the state of the active platform
//! every tick and aggregates:
//!
//! - the actions taken per state cell (behavioral data)
//! - the time an agent needs after a task switch before acting as usual
//!   (reaction times)
//!
//! ## Modules
//!
//! - **Bin math** ([`bins`]): stateless conversions between continuous values and bins
//! - **Measurement** ([`measurement`]): the tick-driven aggregation engine
//! - **Settings** ([`settings`]): versioned configuration with legacy migration
//! - **Conversion** ([`conversion`]): offline replay of raw captures

pub mod bins;
pub mod conversion;
pub mod error;
pub mod grid;
pub mod measurement;
pub mod paths;
pub mod persistence;
pub mod settings;
pub mod signal;
pub mod types;

pub use conversion::{AgentPool, ConversionDriver, ConversionSummary};
pub use error::TelemetryError;
pub use grid::{BehaviorGrid, ComparisonMask, ReactionTimeGrid};
pub use measurement::{
    ArtifactTargets, BehaviorStatsEngine, MeasurementConfig, MeasurementProgress, ReactionState,
};
pub use persistence::{FilePersistence, MemoryPersistence, PersistenceService};
pub use settings::{migrate, Settings, SettingsBundle, SettingsKind};
pub use signal::{Clock, ExitFlag, ExitReason, ExitSignal, ManualClock, SystemClock};
pub use types::{Action, AgentSnapshot, AgentState, RawSample, ReactionTimeSample, Vec3};

/// Telemetry version reported by the CLI
pub const TELEMETRY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "balance-telemetry";
