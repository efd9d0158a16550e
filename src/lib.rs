//! Slot-scheduled analytical query service.
//!
//! Clients submit SQL jobs through [`QueryService`]; a central
//! scheduler admits them against a fixed pool of compute slots and
//! dispatches them to one of two engines (an embedded local engine and
//! a remote columnar cluster). A versioned schema registry and a
//! protobuf ingestion pipeline handle getting data into those engines.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod ingest;
pub mod jobs;
pub mod logging;
pub mod proto;
pub mod scheduler;
pub mod schema;
pub mod service;
pub mod storage;
pub mod validate;

pub use config::Config;
pub use error::{Result, ServiceError};
pub use service::{QueryService, QuerySubmission, ResultPoll, SystemStatus};
