//! platewatch: license-plate candidate narrowing and confirmation engine.
//!
//! Frames from a camera feed go through a coarse-to-fine narrowing search
//! that isolates a single plate-like text line, a visibility window filter
//! that scopes full-frame detector output, and two independent temporal
//! voting tracks that only promote a candidate after an operator confirms
//! it. Confirmed plates live in a session registry that keeps the best
//! supporting snapshot per plate.
//!
//! Text detection itself is pluggable: implement [`detect::TextDetector`]
//! over whatever OCR backend is available and hand it to
//! [`pipeline::Engine`] together with a [`pipeline::ConfirmationUi`].

pub mod config;
pub mod detect;
pub mod filter;
pub mod frame;
pub mod geometry;
pub mod normalize;
pub mod pipeline;
pub mod registry;
pub mod voting;
pub mod zoom;

pub use config::EngineConfig;
pub use detect::{DetectorError, TextDetector, TextLine};
pub use frame::Frame;
pub use geometry::PixelRect;
pub use pipeline::{CandidateState, ConfirmationOutcome, ConfirmationUi, Engine};
pub use registry::PlateRegistry;
pub use voting::WindowVoting;
pub use zoom::{ZoomResult, ZoomSearch};
