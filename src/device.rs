use crate::serialize::{self, LayoutVersion, PipelineLayoutDesc, SerializationError, SerializedLayout};

/// The device collaborator of [`PipelineLayoutCache`](crate::PipelineLayoutCache).
///
/// Implementations are cheap, cloneable handles to a native device that
/// outlives the cache. The cache never owns the native device itself.
pub trait LayoutDevice: Clone {
    /// Native pipeline layout object.
    type PipelineLayout;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Highest layout version the device can consume.
    fn highest_layout_version(&self) -> Result<LayoutVersion, Self::Error>;

    /// Serializes an aggregate layout description. Backends with their own
    /// serialization facility override this.
    fn serialize_pipeline_layout(
        &self,
        desc: &PipelineLayoutDesc,
        version: LayoutVersion,
    ) -> Result<SerializedLayout, SerializationError> {
        serialize::serialize(desc, version)
    }

    /// Realizes a serialized layout. `name` is a debug label only.
    fn create_pipeline_layout(
        &self,
        serialized: &SerializedLayout,
        name: Option<&str>,
    ) -> Result<Self::PipelineLayout, Self::Error>;
}
