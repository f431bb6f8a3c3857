//! Validation engine: scheduling, aggregation and watch mode

pub mod aggregator;
pub mod cancel;
pub mod record;
pub mod scheduler;
pub mod watch;

pub use aggregator::{aggregate, sort_records};
pub use cancel::CancelToken;
pub use record::{
    ErrorKind, FileRecord, FileStatus, RuleOutcome, RunMeta, RunReport, RunStatus, RunSummary,
    SeverityCounts, Totals, content_digest,
};
pub use scheduler::{DEFAULT_GRACE_PERIOD, Scheduler};
pub use watch::{
    DEFAULT_DEBOUNCE, WatchController, WatchState, WatchStats, reload_rules_on_change,
};
