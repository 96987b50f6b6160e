//! Deduplicated pipeline layouts.
//!
//! Describe binding slots with a [`PipelineLayoutBuilder`], then resolve the
//! description through a [`PipelineLayoutCache`]. Structurally identical
//! descriptions share one table layout per slot and one realized pipeline
//! layout per set of flags.

mod cache;
mod device;
mod layout;
pub mod serialize;
mod texture;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use cache::*;
pub use device::LayoutDevice;
pub use layout::*;
pub use serialize::{LayoutVersion, PipelineLayoutDesc, SerializationError, SerializedLayout};
pub use texture::*;
