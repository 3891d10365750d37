//! Coordination services

pub mod controller;
pub mod coordinator;
pub mod health_monitor;
pub mod maintenance;
pub mod recovery;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod validator;

pub use controller::{Controller, RunHandle};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use health_monitor::HealthMonitor;
pub use maintenance::FsMaintenance;
pub use recovery::{emergency_reset, ResetReport};
pub use scheduler::Scheduler;
pub use sink::SqliteRecordSink;
pub use source::{FileSourceOpener, LineSource};
pub use validator::{ValidationReport, Validator};
