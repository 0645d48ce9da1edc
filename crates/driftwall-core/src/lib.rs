pub mod drift;
pub mod error;
pub mod state;
pub mod store;
pub mod wall;

pub use drift::{
    Diagnostics, DriftAnalyzer, DriftCounts, DriftMetrics, DriftOptions, Episode, Predictions,
    Query, RetrievalDiagnostic,
};
pub use error::{DriftwallError, DriftwallResult};
pub use state::{Backend, Event, EventOp, Patch, Snapshot, StateRecord};
pub use store::StateStore;
pub use wall::{
    aggregate, find_wall, Aggregation, Direction, PointFilter, PointSummary, WallPoint, WallQuery,
    WallReport, WallScan,
};
