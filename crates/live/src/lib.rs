pub mod buffer;
pub mod coordinator;
pub mod feed;
pub mod follow;
pub mod source;

#[cfg(test)]
mod testing;

pub use buffer::PresentationBuffer;
pub use coordinator::{
    ConnectionState, CoordinatorOptions, Provenance, TrackerUpdate, TrackingCoordinator,
    TrackingSession,
};
pub use feed::{ApiFeed, ExecutionFeed};
pub use follow::FollowState;
pub use source::{SourceEvent, SourceHandle, Transport};
