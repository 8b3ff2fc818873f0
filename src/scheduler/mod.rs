//! Per-stream affinity write scheduling
//!
//! A fixed pool of strictly sequential lanes. Same-stream work always lands
//! on the same lane, which lazily opens and then owns that stream's
//! [`LogWriter`](crate::log::LogWriter).

mod affinity;
mod lane;

pub use affinity::AffinityScheduler;
