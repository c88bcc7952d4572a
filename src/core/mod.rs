pub mod engine;
pub mod executor;
pub mod inventory;
pub mod planner;
pub mod scanner;

pub use engine::{BackupEngine, PlanError};
pub use executor::{RetryPolicy, RunSummary, TransferExecutor};
pub use inventory::RemoteInventory;
pub use planner::{BatchPlan, BatchPlanner, PlannedCopy, PlannedDelete, PlannedUpload};
pub use scanner::{calculate_hash, ExcludeRules, LocalFile, LocalFileScanner};
