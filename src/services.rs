pub mod backfill_service;

pub use backfill_service::{
    AbortFlag, BackfillError, BackfillService, BackfillSettings, RunSummary, StationStatus,
    StationSummary,
};
