//! Core trait definitions

mod transport;

pub use transport::{Connector, FrameSink, FrameStream};
