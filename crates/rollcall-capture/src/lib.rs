//! rollcall-capture — Turns still images into recognition payloads.
//!
//! Camera access stays with the caller; this crate takes an image the
//! caller already has (a file or an in-memory buffer), rejects frames
//! too dark to classify, and re-encodes it at the size the recognition
//! service expects.

pub mod frame;

pub use frame::{capture_from_bytes, load_image, CaptureError, Frame};
