//! Admission control: which torrents may download right now.
//!
//! A pass loads every `downloading` video, ranks videos and their torrents,
//! interleaves them round-robin and walks the result against two budgets:
//! download slots (`max_downloads`) and storage (`max_memory_mb` minus what
//! is on disk). Slow torrents pay storage but no slot. Allocated torrents
//! that are not running are started; running torrents that lost their
//! allocation are stopped.

mod budget;
mod controller;
mod rank;


pub use budget::{allocate, Budget, Demand};
pub use controller::{AdmissionController, AdmissionDeps, PassReport};
pub use rank::{interleave, is_slow_video, order_torrents, order_videos, AllocationCandidate};
