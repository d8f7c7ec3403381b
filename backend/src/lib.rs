pub mod auth;
pub mod automation;
pub mod config;
pub mod db;
pub mod error;
pub mod leads;
pub mod models;
pub mod policy;
pub mod routes;
pub mod schema;
pub mod state;
pub mod store;
pub mod tasks;
pub mod telemetry;
pub mod utils;

pub use automation::{default_sweeps, AutomationWorker};
