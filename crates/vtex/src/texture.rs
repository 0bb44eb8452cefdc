use std::num::NonZeroU32;

use bytemuck::{Pod, Zeroable};
use images::{SampleCategory, WrapMode, sample_category};
use static_assertions::const_assert_eq;
use wgpu::TextureFormat;

use crate::CreateError;

/// Opaque result of packing one texture.
///
/// Carries everything a renderer needs to sample the texture (page-table
/// region and layer, base extent, wrap modes) and everything `free` needs
/// to walk the same level/tile grid again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureHandle {
    pub page_table_x: u32,
    pub page_table_y: u32,
    pub page_table_layer: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
}

impl TextureHandle {
    pub const INVALID: TextureHandle = TextureHandle {
        page_table_x: 0,
        page_table_y: 0,
        page_table_layer: u32::MAX,
        original_width: 0,
        original_height: 0,
        wrap_u: WrapMode::ClampToEdge,
        wrap_v: WrapMode::ClampToEdge,
    };

    pub fn is_valid(&self) -> bool {
        self.page_table_layer != u32::MAX
    }
}

/// Per page-table-layer constants the renderer reads at draw time.
///
/// Written once when a layer is claimed for a format class and never
/// mutated afterwards. `view_index` selects the sampler view within the
/// layer's sample category; unclaimed layers keep the `u32::MAX`
/// sentinel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LayerMeta {
    pub storage_reciprocal: [f32; 2],
    pub view_index: u32,
    pub _pad: u32,
}

const_assert_eq!(size_of::<LayerMeta>(), 16);

impl LayerMeta {
    pub const UNASSIGNED_VIEW: u32 = u32::MAX;

    pub(crate) fn unassigned() -> LayerMeta {
        LayerMeta {
            storage_reciprocal: [0.0, 0.0],
            view_index: Self::UNASSIGNED_VIEW,
            _pad: 0,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.view_index != Self::UNASSIGNED_VIEW
    }
}

/// The three sampler view classes, as ordered format lists.
///
/// A format's position in its category list is the `view_index` shaders
/// use to pick the right element of the bound texture array.
#[derive(Debug, Default)]
pub struct ViewSets {
    float: Vec<TextureFormat>,
    sint: Vec<TextureFormat>,
    uint: Vec<TextureFormat>,
}

impl ViewSets {
    pub(crate) fn register(&mut self, format: TextureFormat) -> Result<u32, CreateError> {
        let category = sample_category(format).ok_or(CreateError::UnsupportedFormat(format))?;
        let list = self.list_mut(category);
        if list.contains(&format) {
            return Err(CreateError::DuplicateViewFormat(format));
        }
        list.push(format);
        Ok(list.len() as u32 - 1)
    }

    pub fn view_index(&self, format: TextureFormat) -> Option<u32> {
        let category = sample_category(format)?;
        self.formats(category)
            .iter()
            .position(|&candidate| candidate == format)
            .map(|index| index as u32)
    }

    pub fn formats(&self, category: SampleCategory) -> &[TextureFormat] {
        match category {
            SampleCategory::Float => &self.float,
            SampleCategory::Sint => &self.sint,
            SampleCategory::Uint => &self.uint,
        }
    }

    fn list_mut(&mut self, category: SampleCategory) -> &mut Vec<TextureFormat> {
        match category {
            SampleCategory::Float => &mut self.float,
            SampleCategory::Sint => &mut self.sint,
            SampleCategory::Uint => &mut self.uint,
        }
    }
}

/// Bind group layout entry for the page-table texture.
pub fn page_table_layout_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Uint,
            view_dimension: wgpu::TextureViewDimension::D2Array,
            multisampled: false,
        },
        count: None,
    }
}

/// Bind group layout entry for one sample category's view array, `None`
/// when the category has no registered views.
pub fn view_array_layout_entry(
    binding: u32,
    category: SampleCategory,
    view_count: u32,
) -> Option<wgpu::BindGroupLayoutEntry> {
    let count = NonZeroU32::new(view_count)?;
    let sample_type = match category {
        SampleCategory::Float => wgpu::TextureSampleType::Float { filterable: true },
        SampleCategory::Sint => wgpu::TextureSampleType::Sint,
        SampleCategory::Uint => wgpu::TextureSampleType::Uint,
    };
    Some(wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2Array,
            multisampled: false,
        },
        count: Some(count),
    })
}

/// Sampler for page-table lookups: exact texels, no filtering.
pub fn page_table_sampler_descriptor() -> wgpu::SamplerDescriptor<'static> {
    wgpu::SamplerDescriptor {
        label: Some("vtex page table sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Nearest,
        min_filter: wgpu::FilterMode::Nearest,
        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
        ..Default::default()
    }
}

/// Sampler for the physical tiles. Tiles carry their own padding ring, so
/// linear filtering never reads a neighboring tile's texels.
pub fn tile_sampler_descriptor() -> wgpu::SamplerDescriptor<'static> {
    wgpu::SamplerDescriptor {
        label: Some("vtex tile sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_start_invalid() {
        assert!(!TextureHandle::INVALID.is_valid());
        let handle = TextureHandle {
            page_table_layer: 3,
            ..TextureHandle::INVALID
        };
        assert!(handle.is_valid());
    }

    #[test]
    fn unassigned_meta_is_detectable() {
        let meta = LayerMeta::unassigned();
        assert!(!meta.is_assigned());
        assert_eq!(bytemuck::bytes_of(&meta).len(), 16);
    }

    #[test]
    fn view_indices_follow_registration_order() {
        let mut views = ViewSets::default();
        assert_eq!(views.register(TextureFormat::R8Unorm).unwrap(), 0);
        assert_eq!(views.register(TextureFormat::Rgba8Unorm).unwrap(), 1);
        assert_eq!(views.register(TextureFormat::R8Sint).unwrap(), 0);
        assert_eq!(views.register(TextureFormat::R32Uint).unwrap(), 0);

        assert_eq!(views.view_index(TextureFormat::Rgba8Unorm), Some(1));
        assert_eq!(views.view_index(TextureFormat::R8Sint), Some(0));
        assert_eq!(views.view_index(TextureFormat::Rg8Unorm), None);
        assert_eq!(views.formats(SampleCategory::Float).len(), 2);
        assert_eq!(views.formats(SampleCategory::Uint), &[TextureFormat::R32Uint]);
    }

    #[test]
    fn duplicate_view_formats_are_rejected() {
        let mut views = ViewSets::default();
        views.register(TextureFormat::R8Unorm).unwrap();
        assert!(matches!(
            views.register(TextureFormat::R8Unorm),
            Err(CreateError::DuplicateViewFormat(TextureFormat::R8Unorm))
        ));
    }

    #[test]
    fn layout_entries_carry_the_view_counts() {
        let entry = page_table_layout_entry(0);
        assert_eq!(entry.binding, 0);
        assert!(matches!(
            entry.ty,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Uint,
                view_dimension: wgpu::TextureViewDimension::D2Array,
                multisampled: false,
            }
        ));
        assert_eq!(entry.count, None);

        let array = view_array_layout_entry(1, SampleCategory::Float, 3).unwrap();
        assert_eq!(array.count, NonZeroU32::new(3));
        assert!(view_array_layout_entry(2, SampleCategory::Sint, 0).is_none());
    }
}
