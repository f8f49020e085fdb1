pub mod enrollment_runs;
pub mod latency_log;
