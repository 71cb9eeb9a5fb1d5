//! Library half of `sentinel-scheduler`, split out so the job map's
//! tick/lifecycle logic has somewhere to be unit-tested independent of
//! the binary's broker/registry wiring.

/// The scheduler's per-source job map.
pub mod jobs;
