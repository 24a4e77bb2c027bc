pub mod doa;
pub mod geometry;

pub use doa::DoaRecord;
pub use geometry::{ArrayGeometry, ChannelGroup, MAX_CHANNELS, MAX_OFFSET};
