//! Transfer statistics for pipe sessions

pub mod metrics;

pub use metrics::PipeStats;
