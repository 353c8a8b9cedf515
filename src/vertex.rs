//! Vertex buffers with typed attribute layouts, and the vertex arrays that
//! compose them.
//!
//! The attribute layout is declared up front as an explicit slice of
//! descriptors. Each attribute owns a contiguous byte region of the buffer;
//! `sub_data` can replace one region without touching the others, and
//! `invalidate` orphans the whole storage when a frame rewrites everything.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::backends::{AttributeLayout, ResourceName};
use crate::bindable::Bindable;
use crate::device::Device;
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Written once, drawn many times.
    Static,
    /// Rewritten roughly every frame.
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Byte,
    UByte,
    Short,
    UShort,
    HalfFloat,
    Float,
}

impl VertexFormat {
    /// Bytes per component.
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Byte | VertexFormat::UByte => 1,
            VertexFormat::Short | VertexFormat::UShort | VertexFormat::HalfFloat => 2,
            VertexFormat::Float => 4,
        }
    }
}

/// One attribute of a vertex buffer's layout.
///
/// `elements` is the number of vertices the attribute covers, so its byte
/// region is `elements * components * format.size()` long. `offset` is only
/// consulted when the buffer is created without automatic offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeBinding {
    pub attribute: u32,
    pub components: u8,
    pub format: VertexFormat,
    pub elements: u32,
    pub stride: u32,
    pub normalized: bool,
    pub offset: usize,
}

impl AttributeBinding {
    fn region_len(&self) -> usize {
        self.elements as usize * self.components as usize * self.format.size() as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct Region {
    attribute: u32,
    offset: usize,
    len: usize,
}

pub struct VertexBuffer {
    name: ResourceName,
    usage: BufferUsage,
    size: usize,
    layout: SmallVec<[AttributeLayout; 8]>,
    regions: SmallVec<[Region; 8]>,
    device: Arc<Device>,
}

impl VertexBuffer {
    /// Allocates GPU storage sized by the declared attributes. With
    /// `auto_offset` each attribute's byte offset is the running total of
    /// the preceding attributes' region sizes; without it every
    /// descriptor's own `offset` is used verbatim.
    pub fn new(
        device: &Arc<Device>,
        usage: BufferUsage,
        auto_offset: bool,
        bindings: &[AttributeBinding],
    ) -> Result<VertexBuffer> {
        if bindings.is_empty() {
            return Err(Error::EmptyLayout);
        }

        let mut seen: SmallVec<[u32; 8]> = SmallVec::new();
        let mut regions: SmallVec<[Region; 8]> = SmallVec::new();
        let mut layout: SmallVec<[AttributeLayout; 8]> = SmallVec::new();
        let mut cursor = 0;
        let mut size = 0;

        for binding in bindings {
            if binding.components == 0 {
                return Err(Error::AttributeInvalid(binding.attribute));
            }
            if seen.contains(&binding.attribute) {
                return Err(Error::DuplicateAttribute(binding.attribute));
            }
            seen.push(binding.attribute);

            let len = binding.region_len();
            let offset = if auto_offset { cursor } else { binding.offset };
            cursor += len;
            size = size.max(offset + len);

            regions.push(Region {
                attribute: binding.attribute,
                offset,
                len,
            });
            layout.push(AttributeLayout {
                attribute: binding.attribute,
                components: binding.components,
                format: binding.format,
                normalized: binding.normalized,
                stride: binding.stride,
                offset,
            });
        }

        let name = device.run_on_main_sync(|| unsafe {
            device.visitor().create_buffer(usage, size)
        })?;

        Ok(VertexBuffer {
            name,
            usage,
            size,
            layout,
            regions,
            device: device.clone(),
        })
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Total bytes of GPU storage.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The resolved byte offset of an attribute's region.
    pub fn offset_of(&self, attribute: u32) -> Option<usize> {
        self.region(attribute).map(|r| r.offset)
    }

    fn region(&self, attribute: u32) -> Option<&Region> {
        self.regions.iter().find(|r| r.attribute == attribute)
    }

    /// Replaces the leading bytes of one attribute's region. Fails without
    /// touching the storage when the attribute was never declared or the
    /// bytes overflow its region.
    pub fn sub_data(&self, attribute: u32, data: &[u8]) -> Result<()> {
        let region = self
            .region(attribute)
            .ok_or(Error::AttributeInvalid(attribute))?;
        if data.len() > region.len {
            return Err(Error::OutOfBounds);
        }

        let name = self.name;
        let offset = region.offset;
        let device = &self.device;
        device.run_on_main_sync(|| unsafe {
            device.visitor().update_buffer(name, offset, data)
        })
    }

    /// Orphans the GPU storage, leaving its contents undefined, so the next
    /// full rewrite does not synchronize against in-flight draws.
    pub fn invalidate(&self) -> Result<()> {
        let name = self.name;
        let usage = self.usage;
        let size = self.size;
        let device = &self.device;
        device.run_on_main_sync(|| unsafe {
            device.visitor().invalidate_buffer(name, usage, size)
        })
    }
}

impl Bindable for VertexBuffer {
    fn name(&self) -> ResourceName {
        self.name
    }

    /// Binding also uploads the attribute pointer layout into the vertex
    /// array current on the calling thread.
    fn bind(&self) -> Result<()> {
        unsafe { self.device.visitor().bind_buffer(self.name, &self.layout) }
    }

    fn unbind(&self) -> Result<()> {
        unsafe { self.device.visitor().bind_buffer(0, &[]) }
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        let name = self.name;
        let device = &self.device;
        device.run_on_main_sync(|| {
            if let Err(err) = unsafe { device.visitor().delete_buffer(name) } {
                warn!("failed to delete buffer {}: {}", name, err);
            }
        });
    }
}

impl fmt::Debug for VertexBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VertexBuffer")
            .field("name", &self.name)
            .field("usage", &self.usage)
            .field("size", &self.size)
            .field("layout", &self.layout)
            .finish()
    }
}

/// A handle-only vertex array object. Binding it and then binding vertex
/// buffers composes their layouts into one drawable vertex state.
pub struct VertexArray {
    name: ResourceName,
    device: Arc<Device>,
}

impl VertexArray {
    pub fn new(device: &Arc<Device>) -> Result<VertexArray> {
        let name = device.run_on_main_sync(|| unsafe {
            device.visitor().create_vertex_array()
        })?;

        Ok(VertexArray {
            name,
            device: device.clone(),
        })
    }
}

impl Bindable for VertexArray {
    fn name(&self) -> ResourceName {
        self.name
    }

    fn bind(&self) -> Result<()> {
        unsafe { self.device.visitor().bind_vertex_array(self.name) }
    }

    fn unbind(&self) -> Result<()> {
        unsafe { self.device.visitor().bind_vertex_array(0) }
    }
}

impl Drop for VertexArray {
    fn drop(&mut self) {
        let name = self.name;
        let device = &self.device;
        device.run_on_main_sync(|| {
            if let Err(err) = unsafe { device.visitor().delete_vertex_array(name) } {
                warn!("failed to delete vertex array {}: {}", name, err);
            }
        });
    }
}

impl fmt::Debug for VertexArray {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VertexArray")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::headless::HeadlessVisitor;

    fn probed_device() -> (Arc<Device>, HeadlessVisitor) {
        let visitor = HeadlessVisitor::new();
        let probe = visitor.clone();
        (Device::new(Box::new(visitor)).unwrap(), probe)
    }

    fn binding(attribute: u32, components: u8, format: VertexFormat) -> AttributeBinding {
        AttributeBinding {
            attribute,
            components,
            format,
            elements: 4,
            stride: 0,
            normalized: false,
            offset: 0,
        }
    }

    #[test]
    fn automatic_offsets_are_cumulative() {
        let device = Device::headless().unwrap();

        // 4 vertices: position 3xf32 (48), uv 2xf16 (16), color 4xu8 (16).
        let bindings = [
            binding(0, 3, VertexFormat::Float),
            binding(1, 2, VertexFormat::HalfFloat),
            binding(2, 4, VertexFormat::UByte),
        ];
        let vbo = VertexBuffer::new(&device, BufferUsage::Static, true, &bindings).unwrap();

        assert_eq!(vbo.offset_of(0), Some(0));
        assert_eq!(vbo.offset_of(1), Some(48));
        assert_eq!(vbo.offset_of(2), Some(64));
        assert_eq!(vbo.size(), 80);
    }

    #[test]
    fn explicit_offsets_are_taken_verbatim() {
        let device = Device::headless().unwrap();

        let mut a = binding(0, 2, VertexFormat::Float);
        a.offset = 64;
        let mut b = binding(1, 2, VertexFormat::Float);
        b.offset = 0;

        let vbo = VertexBuffer::new(&device, BufferUsage::Static, false, &[a, b]).unwrap();
        assert_eq!(vbo.offset_of(0), Some(64));
        assert_eq!(vbo.offset_of(1), Some(0));
        assert_eq!(vbo.size(), 96);
    }

    #[test]
    fn rejects_bad_layouts() {
        let device = Device::headless().unwrap();

        match VertexBuffer::new(&device, BufferUsage::Static, true, &[]) {
            Err(Error::EmptyLayout) => (),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }

        let dup = [
            binding(3, 2, VertexFormat::Float),
            binding(3, 2, VertexFormat::Float),
        ];
        match VertexBuffer::new(&device, BufferUsage::Static, true, &dup) {
            Err(Error::DuplicateAttribute(3)) => (),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }

        let degenerate = [binding(0, 0, VertexFormat::Float)];
        match VertexBuffer::new(&device, BufferUsage::Static, true, &degenerate) {
            Err(Error::AttributeInvalid(0)) => (),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn sub_data_writes_only_its_region() {
        let (device, probe) = probed_device();

        let bindings = [
            binding(0, 1, VertexFormat::UByte),
            binding(1, 1, VertexFormat::UByte),
        ];
        let vbo = VertexBuffer::new(&device, BufferUsage::Stream, true, &bindings).unwrap();
        assert_eq!(vbo.size(), 8);

        vbo.sub_data(1, &[9, 9, 9, 9]).unwrap();
        assert_eq!(
            probe.buffer_bytes(vbo.name()),
            Some(vec![0, 0, 0, 0, 9, 9, 9, 9])
        );
    }

    #[test]
    fn sub_data_rejections_leave_storage_untouched() {
        let (device, probe) = probed_device();

        let vbo = VertexBuffer::new(
            &device,
            BufferUsage::Stream,
            true,
            &[binding(0, 1, VertexFormat::UByte)],
        )
        .unwrap();

        match vbo.sub_data(7, &[1]) {
            Err(Error::AttributeInvalid(7)) => (),
            other => panic!("unexpected: {:?}", other),
        }
        match vbo.sub_data(0, &[1, 2, 3, 4, 5]) {
            Err(Error::OutOfBounds) => (),
            other => panic!("unexpected: {:?}", other),
        }

        assert_eq!(probe.buffer_bytes(vbo.name()), Some(vec![0; 4]));
    }

    #[test]
    fn invalidate_orphans_the_storage() {
        let (device, probe) = probed_device();

        let vbo = VertexBuffer::new(
            &device,
            BufferUsage::Stream,
            true,
            &[binding(0, 1, VertexFormat::UByte)],
        )
        .unwrap();

        vbo.sub_data(0, &[1, 2, 3, 4]).unwrap();
        vbo.invalidate().unwrap();
        assert_eq!(probe.buffer_bytes(vbo.name()), Some(vec![0; 4]));
    }

    #[test]
    fn vertex_array_binding_is_scoped() {
        let (device, probe) = probed_device();
        let vao = VertexArray::new(&device).unwrap();

        {
            let _guard = vao.bind_scoped().unwrap();
            assert_eq!(probe.bound_vertex_array(), vao.name());
        }
        assert_eq!(probe.bound_vertex_array(), 0);
    }

    #[test]
    fn dropping_frees_the_name() {
        let (device, probe) = probed_device();

        let vbo = VertexBuffer::new(
            &device,
            BufferUsage::Static,
            true,
            &[binding(0, 1, VertexFormat::UByte)],
        )
        .unwrap();
        assert_eq!(probe.alive_buffers(), 1);

        drop(vbo);
        assert_eq!(probe.alive_buffers(), 0);
    }
}
