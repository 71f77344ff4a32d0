//! Checkpoint store for the bootstrap protocol.
//!
//! The bootstrap status is a flat JSON object mapping stage keys to results.
//! The authoritative copy lives on the control node; a local cache sits
//! under the topology's storage directory. Every mutation is a whole-document
//! read-modify-write issued by the single controller.

mod error;
mod status;
mod store;

pub use error::CheckpointError;
pub use error::Result;
pub use status::BootstrapStatus;
pub use status::DONE_VALUE;
pub use status::READY_VALUE;
pub use status::STATUS_KEY;
pub use store::CheckpointStore;
pub use store::Refresh;
