//! Video lifecycle: the job handlers that move a video from identified to
//! deleted, and the service the upstream uses to queue and remove videos.
//!
//! ```text
//! identified -> searching/unreleased -> downloading -> exporting -> completed -> (deleted)
//! ```

mod collab;
mod handlers;
mod service;

pub use collab::{
    Exporter, LogNotifier, MoveExporter, NoReleaseSearch, Notifier, ReleaseSearch, SearchOutcome,
};
pub use handlers::{
    register_handlers, AddTorrent, DeleteVideo, LifecycleDeps, MonitorDownload, SearchForRelease,
};
pub use service::{AcquisitionService, Queued};
