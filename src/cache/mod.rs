use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;
use thiserror::Error;

use crate::layout::{
    DescriptorTableLayout, DescriptorTableLayoutKey, PipelineLayoutBuilder, PipelineLayoutFlags,
};
use crate::serialize::{LayoutVersion, PipelineLayoutDesc, SerializationError};
use crate::LayoutDevice;


static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies one generation of one cache. Table layout ids are only
/// meaningful within the generation that issued them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct CacheId(u64);

impl CacheId {
    fn next() -> Self {
        Self(NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Index of a table layout in the arena of the cache that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableLayoutId(u32);

impl TableLayoutId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Structural key of a whole pipeline layout: the layout flags followed by
/// the resolved table layout of every slot, in slot order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipelineLayoutKey {
    pub flags: PipelineLayoutFlags,
    pub tables: SmallVec<[TableLayoutId; 8]>,
}

/// A realized pipeline layout.
pub struct PipelineLayout<L> {
    raw: L,
    flags: PipelineLayoutFlags,
    table_layouts: Vec<Arc<DescriptorTableLayout>>,
    version: LayoutVersion,
    name: Option<String>,
}

impl<L> PipelineLayout<L> {
    pub fn new(
        raw: L,
        flags: PipelineLayoutFlags,
        table_layouts: Vec<Arc<DescriptorTableLayout>>,
        version: LayoutVersion,
    ) -> Self {
        Self {
            raw,
            flags,
            table_layouts,
            version,
            name: None,
        }
    }
    pub fn raw(&self) -> &L {
        &self.raw
    }
    pub fn flags(&self) -> PipelineLayoutFlags {
        self.flags
    }
    pub fn descriptor_table_layouts(&self) -> &[Arc<DescriptorTableLayout>] {
        &self.table_layouts
    }
    /// Version the layout was serialized with.
    pub fn version(&self) -> LayoutVersion {
        self.version
    }
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    pub fn desc(&self) -> PipelineLayoutDesc {
        PipelineLayoutDesc {
            flags: self.flags,
            parameters: self
                .table_layouts
                .iter()
                .map(|layout| layout.as_ref().clone())
                .collect(),
        }
    }
}

impl<L: std::fmt::Debug> std::fmt::Debug for PipelineLayout<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineLayout")
            .field("raw", &self.raw)
            .field("flags", &self.flags)
            .field("slots", &self.table_layouts.len())
            .field("version", &self.version)
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum PipelineLayoutError {
    #[error("no device bound to the pipeline layout cache")]
    NoDevice,
    #[error("pipeline layout serialization failed: {0}")]
    Serialization(#[from] SerializationError),
    #[error("device failed to create pipeline layout: {0}")]
    DeviceCreation(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Clone, Debug)]
pub struct PipelineLayoutCacheSettings {
    /// Layouts are never serialized with a version above this one, even if
    /// the device supports it.
    pub max_layout_version: LayoutVersion,
    /// Forward debug names to the device.
    pub name_objects: bool,
}

impl Default for PipelineLayoutCacheSettings {
    fn default() -> Self {
        Self {
            max_layout_version: LayoutVersion::V1_1,
            name_objects: true,
        }
    }
}

/// Builds every distinct table layout and pipeline layout once.
///
/// Table layouts live in an arena and are referred to by [`TableLayoutId`].
/// Nothing is evicted: objects stay alive until the cache is dropped or
/// [`cleared`](Self::clear). The cache is meant to be filled from a single
/// thread, typically while loading pipelines.
pub struct PipelineLayoutCache<D: LayoutDevice> {
    id: CacheId,
    device: Option<D>,
    settings: PipelineLayoutCacheSettings,
    table_layouts: Vec<Arc<DescriptorTableLayout>>,
    table_layout_ids: HashMap<DescriptorTableLayoutKey, TableLayoutId>,
    pipeline_layouts: HashMap<PipelineLayoutKey, Arc<PipelineLayout<D::PipelineLayout>>>,
}

impl<D: LayoutDevice> Default for PipelineLayoutCache<D> {
    fn default() -> Self {
        Self::with_settings(PipelineLayoutCacheSettings::default())
    }
}

impl<D: LayoutDevice> PipelineLayoutCache<D> {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_settings(settings: PipelineLayoutCacheSettings) -> Self {
        Self {
            id: CacheId::next(),
            device: None,
            settings,
            table_layouts: Vec::new(),
            table_layout_ids: HashMap::new(),
            pipeline_layouts: HashMap::new(),
        }
    }
    pub fn with_device(device: D) -> Self {
        let mut cache = Self::new();
        cache.set_device(device);
        cache
    }
    pub fn set_device(&mut self, device: D) {
        self.device = Some(device);
    }
    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }
    pub fn settings(&self) -> &PipelineLayoutCacheSettings {
        &self.settings
    }
    pub(crate) fn id(&self) -> CacheId {
        self.id
    }

    /// Builds the table layout of slot `index` and makes it the cached
    /// object for that key, replacing any earlier one.
    ///
    /// A replaced object keeps its id, so pipeline keys resolved before the
    /// replacement stay equal to keys resolved after it.
    ///
    /// Returns `None` when the builder has no slot `index`.
    pub fn create_descriptor_table_layout(
        &mut self,
        index: u32,
        builder: &PipelineLayoutBuilder,
    ) -> Option<Arc<DescriptorTableLayout>> {
        let key = builder.descriptor_table_layout_keys().get(index as usize)?;
        let id = match self.table_layout_ids.get(key) {
            Some(&id) => {
                self.table_layouts[id.index()] = Arc::new(DescriptorTableLayout::from_key(key));
                tracing::trace!(?id, "replaced descriptor table layout");
                id
            }
            None => {
                let id = self.push_table_layout(key);
                self.table_layout_ids.insert(key.clone(), id);
                id
            }
        };
        Some(self.table_layouts[id.index()].clone())
    }

    /// Returns the cached table layout of slot `index`, building it if absent.
    ///
    /// Returns `None` when the builder has no slot `index`.
    pub fn get_descriptor_table_layout(
        &mut self,
        index: u32,
        builder: &PipelineLayoutBuilder,
    ) -> Option<Arc<DescriptorTableLayout>> {
        let key = builder.descriptor_table_layout_keys().get(index as usize)?;
        let id = self.descriptor_table_layout_id(key);
        Some(self.table_layouts[id.index()].clone())
    }

    pub fn descriptor_table_layout(&self, id: TableLayoutId) -> Option<&Arc<DescriptorTableLayout>> {
        self.table_layouts.get(id.index())
    }

    pub(crate) fn descriptor_table_layout_id(&mut self, key: &DescriptorTableLayoutKey) -> TableLayoutId {
        if let Some(id) = self.table_layout_ids.get(key) {
            return *id;
        }
        let id = self.push_table_layout(key);
        self.table_layout_ids.insert(key.clone(), id);
        id
    }

    fn push_table_layout(&mut self, key: &DescriptorTableLayoutKey) -> TableLayoutId {
        let id = TableLayoutId(self.table_layouts.len() as u32);
        self.table_layouts
            .push(Arc::new(DescriptorTableLayout::from_key(key)));
        tracing::trace!(?id, stage = ?key.stage, ranges = key.ranges.len(), "new descriptor table layout");
        id
    }

    /// Realizes the builder's pipeline layout under `flags` and makes it the
    /// cached object for that key, replacing any earlier one.
    pub fn create_pipeline_layout(
        &mut self,
        builder: &mut PipelineLayoutBuilder,
        flags: PipelineLayoutFlags,
        name: Option<&str>,
    ) -> Result<Arc<PipelineLayout<D::PipelineLayout>>, PipelineLayoutError> {
        let key = self.pipeline_layout_key(builder, flags);
        let layout = Arc::new(self.build_pipeline_layout(&key, name)?);
        self.pipeline_layouts.insert(key, layout.clone());
        Ok(layout)
    }

    /// Returns the cached pipeline layout for the builder under `flags`,
    /// realizing it if absent. `name` is only used when realizing.
    pub fn get_pipeline_layout(
        &mut self,
        builder: &mut PipelineLayoutBuilder,
        flags: PipelineLayoutFlags,
        name: Option<&str>,
    ) -> Result<Arc<PipelineLayout<D::PipelineLayout>>, PipelineLayoutError> {
        let key = self.pipeline_layout_key(builder, flags);
        if let Some(layout) = self.pipeline_layouts.get(&key) {
            return Ok(layout.clone());
        }
        let layout = Arc::new(self.build_pipeline_layout(&key, name)?);
        self.pipeline_layouts.insert(key, layout.clone());
        Ok(layout)
    }

    /// Looks up a pipeline layout without realizing one. Resolving the key
    /// may still create table layouts.
    pub fn find_pipeline_layout(
        &mut self,
        builder: &mut PipelineLayoutBuilder,
        flags: PipelineLayoutFlags,
    ) -> Option<Arc<PipelineLayout<D::PipelineLayout>>> {
        let key = self.pipeline_layout_key(builder, flags);
        self.pipeline_layouts.get(&key).cloned()
    }

    /// Registers a layout built outside the cache. Returns the layout it
    /// replaced, if any.
    pub fn insert_pipeline_layout(
        &mut self,
        key: PipelineLayoutKey,
        layout: Arc<PipelineLayout<D::PipelineLayout>>,
    ) -> Option<Arc<PipelineLayout<D::PipelineLayout>>> {
        self.pipeline_layouts.insert(key, layout)
    }

    pub fn num_descriptor_table_layouts(&self) -> usize {
        self.table_layouts.len()
    }

    pub fn num_pipeline_layouts(&self) -> usize {
        self.pipeline_layouts.len()
    }

    /// Drops every cached object. The device binding is kept. Keys resolved
    /// before this call are re-resolved on their next use.
    pub fn clear(&mut self) {
        tracing::debug!(
            table_layouts = self.table_layouts.len(),
            pipeline_layouts = self.pipeline_layouts.len(),
            "clearing pipeline layout cache"
        );
        self.pipeline_layouts.clear();
        self.table_layout_ids.clear();
        self.table_layouts.clear();
        self.id = CacheId::next();
    }

    fn pipeline_layout_key(
        &mut self,
        builder: &mut PipelineLayoutBuilder,
        flags: PipelineLayoutFlags,
    ) -> PipelineLayoutKey {
        let key = builder.resolve(self);
        key.flags = flags;
        key.clone()
    }

    fn build_pipeline_layout(
        &self,
        key: &PipelineLayoutKey,
        name: Option<&str>,
    ) -> Result<PipelineLayout<D::PipelineLayout>, PipelineLayoutError> {
        let device = self.device.as_ref().ok_or(PipelineLayoutError::NoDevice)?;
        let version = match device.highest_layout_version() {
            Ok(version) => version,
            Err(err) => {
                tracing::warn!(%err, "layout version query failed, falling back to 1.0");
                LayoutVersion::V1_0
            }
        }
        .min(self.settings.max_layout_version);

        let table_layouts: Vec<_> = key
            .tables
            .iter()
            .map(|id| self.table_layouts[id.index()].clone())
            .collect();
        let desc = PipelineLayoutDesc {
            flags: key.flags,
            parameters: table_layouts
                .iter()
                .map(|layout| layout.as_ref().clone())
                .collect(),
        };
        let serialized = device.serialize_pipeline_layout(&desc, version)?;

        let name = name.filter(|_| self.settings.name_objects);
        let raw = device
            .create_pipeline_layout(&serialized, name)
            .map_err(|err| PipelineLayoutError::DeviceCreation(Box::new(err)))?;
        tracing::debug!(
            slots = table_layouts.len(),
            flags = key.flags.bits(),
            ?version,
            name,
            "created pipeline layout"
        );
        Ok(PipelineLayout {
            raw,
            flags: key.flags,
            table_layouts,
            version,
            name: name.map(str::to_owned),
        })
    }
}
