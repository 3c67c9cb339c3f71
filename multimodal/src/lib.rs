//! Image resolution for vision-language prompts.
//!
//! Turns the image references found in chat messages (data URIs or remote
//! URLs) into decoded, size-checked and pixel-normalized frames ready to be
//! handed to the inference engine. Resolution of several images runs
//! concurrently but results always come back in prompt order.

pub mod error;
pub mod media;
pub mod resize;
pub mod tracker;
pub mod types;

pub use error::{MediaConnectorError, MultiModalResult};
pub use media::{ImageLimits, MediaConnector, MediaConnectorConfig, MediaSource};
pub use resize::smart_resize;
pub use tracker::AsyncMultiModalTracker;
pub use types::{ImageFrame, ImageSize, ImageSource};
