pub mod alerts;
pub mod business;
pub mod classify;
pub mod config;
pub mod crypto;
pub mod executor;
pub mod outcome;
pub mod probes;
pub mod scheduler;
pub mod sink;
pub mod storage;
pub mod target;
pub mod util;
pub mod webhook;

pub use outcome::{AlertKind, Metrics, Outcome, Status};
pub use scheduler::{CycleReport, Monitor};
pub use target::{NewTarget, Target, TargetKind};
