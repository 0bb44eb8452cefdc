//! CPU-side sparse virtual texturing: a layered page table indirecting
//! into padded physical tile atlases, with a packing engine that makes
//! texture mip chains resident and releases them again.

use std::fmt;

use images::{BlitError, BorderColor, FormatClass, ImageError};
use wgpu::TextureFormat;

mod miptail;
mod packer;
mod page_table;
mod storage;
mod texture;


pub use packer::VirtualTexture;
pub use page_table::PageTableTexel;
pub use storage::{ResidentStorage, StorageParams, TileAddress};
pub use texture::{
    LayerMeta, TextureHandle, ViewSets, page_table_layout_entry, page_table_sampler_descriptor,
    tile_sampler_descriptor, view_array_layout_entry,
};

/// Construction-time shape of the whole system. Fixed after
/// `VirtualTexture::new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualTextureConfig {
    /// Tile content side length as log2 (7 = 128 texel tiles). One page of
    /// the page table covers one tile's worth of texels.
    pub page_size_log2: u32,
    /// Array layers of the page table.
    pub page_table_layers: u32,
    /// Synthesized ring around each tile's content, in texels.
    pub tile_padding: u32,
    /// Largest packable base level extent as log2, per axis.
    pub max_allocatable_size_log2: u32,
}

impl Default for VirtualTextureConfig {
    fn default() -> Self {
        Self {
            page_size_log2: 7,
            page_table_layers: 32,
            tile_padding: 9,
            max_allocatable_size_log2: 14,
        }
    }
}

impl VirtualTextureConfig {
    pub(crate) fn validate(&self) -> Result<(), CreateError> {
        if self.page_size_log2 < 1 || self.page_size_log2 > 15 {
            return Err(CreateError::InvalidPageSize(self.page_size_log2));
        }
        // The per-layer region allocator spans extent^2 texels; cap the
        // page-table extent at 2^15 so that square fits a u32.
        if self.max_allocatable_size_log2 < self.page_size_log2
            || self.max_allocatable_size_log2 - self.page_size_log2 > 15
        {
            return Err(CreateError::InvalidMaxSize(self.max_allocatable_size_log2));
        }
        if self.page_table_layers == 0 || self.page_table_layers > 0x100 {
            return Err(CreateError::InvalidLayerCount(self.page_table_layers));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    InvalidPageSize(u32),
    InvalidMaxSize(u32),
    InvalidLayerCount(u32),
    TilePaddingTooLarge(u32),
    NoStorageFormats,
    UnsupportedFormat(TextureFormat),
    MixedFormatClasses,
    DuplicateFormatClass(FormatClass),
    DuplicateViewFormat(TextureFormat),
    InvalidStorageSize,
    Image(ImageError),
}

impl fmt::Display for CreateError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateError::InvalidPageSize(log2) => {
                write!(formatter, "page size log2 {log2} is outside 1..=15")
            }
            CreateError::InvalidMaxSize(log2) => {
                write!(formatter, "max allocatable size log2 {log2} does not fit a page table")
            }
            CreateError::InvalidLayerCount(count) => {
                write!(formatter, "page table layer count {count} is outside 1..=256")
            }
            CreateError::TilePaddingTooLarge(padding) => {
                write!(formatter, "tile padding {padding} leaves no room for the mip tail slots")
            }
            CreateError::NoStorageFormats => {
                write!(formatter, "a resident storage needs at least one format")
            }
            CreateError::UnsupportedFormat(format) => {
                write!(formatter, "format {format:?} has no format class")
            }
            CreateError::MixedFormatClasses => {
                write!(formatter, "storage formats span more than one format class")
            }
            CreateError::DuplicateFormatClass(class) => {
                write!(formatter, "format class {class:?} already has a resident storage")
            }
            CreateError::DuplicateViewFormat(format) => {
                write!(formatter, "view format {format:?} registered twice")
            }
            CreateError::InvalidStorageSize => {
                write!(formatter, "storage must hold between 1 and 65535 tiles")
            }
            CreateError::Image(error) => write!(formatter, "backing image: {error}"),
        }
    }
}

impl std::error::Error for CreateError {}

impl From<ImageError> for CreateError {
    fn from(error: ImageError) -> Self {
        CreateError::Image(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackError {
    UnsupportedFormat(TextureFormat),
    NoStorageForClass(FormatClass),
    NoMatchingView(TextureFormat),
    UnsupportedBorderColor(BorderColor),
    InvalidSubresource,
    ExtentTooLarge { width: u32, height: u32 },
    PageTableFull,
    AtlasFull,
    Copy(BlitError),
}

impl fmt::Display for PackError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackError::UnsupportedFormat(format) => {
                write!(formatter, "format {format:?} has no format class")
            }
            PackError::NoStorageForClass(class) => {
                write!(formatter, "no resident storage serves format class {class:?}")
            }
            PackError::NoMatchingView(format) => {
                write!(formatter, "format {format:?} has no registered sampler view")
            }
            PackError::UnsupportedBorderColor(border) => {
                write!(formatter, "border color {border:?} has no encoding for the image format")
            }
            PackError::InvalidSubresource => {
                write!(formatter, "mip range does not fit the image")
            }
            PackError::ExtentTooLarge { width, height } => {
                write!(formatter, "base level {width}x{height} exceeds the maximum allocatable size")
            }
            PackError::PageTableFull => {
                write!(formatter, "no page-table layer has room for the region")
            }
            PackError::AtlasFull => {
                write!(formatter, "physical tile storage is exhausted")
            }
            PackError::Copy(error) => write!(formatter, "tile copy: {error}"),
        }
    }
}

impl std::error::Error for PackError {}
