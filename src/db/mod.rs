mod connection;
pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

pub use connection::Database;
#[cfg(test)]
pub(crate) use connection::tmp_db;
pub use models::{EnrollmentRun, LatencyRecord, Termination};
