pub mod latency;
pub mod run;

pub use latency::LatencyRecord;
pub use run::{EnrollmentRun, Termination};
