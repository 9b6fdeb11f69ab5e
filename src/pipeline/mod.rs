pub mod broadcaster;
pub mod export;
pub mod replay;

pub use broadcaster::FrameBroadcaster;
pub use export::{export_clip, ReplayArtifact};
pub use replay::ReplayBuffer;
