//! Wire-level handling of scale telemetry.
//!
//! - Line framing for stream transports
//! - Frame decoding into a weight and unit

pub mod decode;
pub mod line;

pub use decode::{DecodedReading, WeightUnit, decode, frame_text, parse_weight};
pub use line::{DEFAULT_MAX_LINE, LineDecoder};
