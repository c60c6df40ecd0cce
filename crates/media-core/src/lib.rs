//! Media-side plumbing for the emvoip stack
//!
//! - [`jitter`]: fixed-capacity reorder buffer between RTP and the codec link
//! - [`clock`]: the shared outgoing timestamp/sequence source for all calls
//! - [`bridge`]: the framed byte protocol to the external codec peripheral

pub mod bridge;
pub mod clock;
pub mod error;
pub mod jitter;

pub use bridge::{AudioFrame, AudioLink, FrameCodec, FRAME_HEADER_SIZE, FRAME_MAGIC};
pub use clock::{MediaClock, SAMPLES_PER_PACKET};
pub use error::{Error, Result};
pub use jitter::{JitterBuffer, JitterEntry};
