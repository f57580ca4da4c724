pub mod db;
pub mod documents;
pub mod error;
pub mod legacy;
pub mod merge;
pub mod models;
pub mod remote;
pub mod report;
pub mod schema;
pub mod service;
pub mod sync;

pub use error::SyncError;
pub use service::FleetService;
