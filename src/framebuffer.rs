//! Render targets: freestanding render buffers and framebuffers composed
//! out of them.
//!
//! A `FrameBuffer` owns its color attachment outright (a texture, a mapped
//! texture, a render buffer, or nothing) and optionally a depth render
//! buffer. Attachment dimensions must equal the framebuffer's dimensions;
//! mismatches are rejected at construction and re-checked when binding.

use std::fmt;
use std::sync::Arc;

use cgmath::Vector2;

use crate::backends::{Attachment, DrawableStorage, ResourceName};
use crate::bindable::Bindable;
use crate::device::Device;
use crate::errors::{Error, Result};
use crate::texture::{MappedTexture, Texture};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderBufferFormat {
    Rgba8,
    Rgb565,
    Depth16,
    Depth24,
}

impl RenderBufferFormat {
    /// True for formats that can serve as a color attachment.
    pub fn is_color(self) -> bool {
        match self {
            RenderBufferFormat::Rgba8 | RenderBufferFormat::Rgb565 => true,
            RenderBufferFormat::Depth16 | RenderBufferFormat::Depth24 => false,
        }
    }
}

/// The platform surface seam. The windowing layer implements this for
/// whatever it renders into; the runtime only ever reads the dimensions and
/// forwards the opaque storage token to the backend.
pub trait Drawable {
    fn dimensions(&self) -> Vector2<u32>;
    fn storage(&self) -> DrawableStorage;
}

pub struct RenderBuffer {
    name: ResourceName,
    dimensions: Vector2<u32>,
    format: RenderBufferFormat,
    device: Arc<Device>,
}

impl RenderBuffer {
    /// Freestanding storage of the given shape, allocated on the main lane.
    pub fn new(
        device: &Arc<Device>,
        dimensions: Vector2<u32>,
        format: RenderBufferFormat,
    ) -> Result<RenderBuffer> {
        if dimensions.x == 0 || dimensions.y == 0 {
            return Err(Error::InvalidDimensions(dimensions.x, dimensions.y));
        }

        let name = device.run_on_main_sync(|| unsafe {
            device.visitor().create_render_buffer(dimensions, format)
        })?;

        Ok(RenderBuffer {
            name,
            dimensions,
            format,
            device: device.clone(),
        })
    }

    /// Storage backed by a platform drawable, sized by the drawable and
    /// allocated against the context current on the calling thread. The
    /// caller recreates the render buffer when the drawable resizes.
    pub fn from_drawable(device: &Arc<Device>, drawable: &dyn Drawable) -> Result<RenderBuffer> {
        let dimensions = drawable.dimensions();
        if dimensions.x == 0 || dimensions.y == 0 {
            return Err(Error::InvalidDimensions(dimensions.x, dimensions.y));
        }

        let ctx = device.current_context().ok_or(Error::ContextInvalid(0))?;
        let name = unsafe {
            device
                .visitor()
                .create_drawable_render_buffer(ctx.name(), drawable.storage(), dimensions)
        }?;

        Ok(RenderBuffer {
            name,
            dimensions,
            format: RenderBufferFormat::Rgba8,
            device: device.clone(),
        })
    }

    #[inline]
    pub fn dimensions(&self) -> Vector2<u32> {
        self.dimensions
    }

    #[inline]
    pub fn format(&self) -> RenderBufferFormat {
        self.format
    }
}

impl Bindable for RenderBuffer {
    fn name(&self) -> ResourceName {
        self.name
    }

    fn bind(&self) -> Result<()> {
        unsafe { self.device.visitor().bind_render_buffer(self.name) }
    }

    fn unbind(&self) -> Result<()> {
        unsafe { self.device.visitor().bind_render_buffer(0) }
    }
}

impl Drop for RenderBuffer {
    fn drop(&mut self) {
        let name = self.name;
        let device = &self.device;
        device.run_on_main_sync(|| {
            if let Err(err) = unsafe { device.visitor().delete_render_buffer(name) } {
                warn!("failed to delete render buffer {}: {}", name, err);
            }
        });
    }
}

impl fmt::Debug for RenderBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RenderBuffer")
            .field("name", &self.name)
            .field("dimensions", &self.dimensions)
            .field("format", &self.format)
            .finish()
    }
}

/// The color attachment a framebuffer owns.
pub enum ColorTarget {
    None,
    Texture(Texture),
    MappedTexture(MappedTexture),
    RenderBuffer(RenderBuffer),
}

impl ColorTarget {
    fn dimensions(&self) -> Option<Vector2<u32>> {
        match self {
            ColorTarget::None => None,
            ColorTarget::Texture(t) => Some(t.dimensions()),
            ColorTarget::MappedTexture(t) => Some(t.dimensions()),
            ColorTarget::RenderBuffer(rb) => Some(rb.dimensions()),
        }
    }
}

pub struct FrameBuffer {
    name: ResourceName,
    dimensions: Vector2<u32>,
    color: ColorTarget,
    depth: Option<RenderBuffer>,
    device: Arc<Device>,
}

impl FrameBuffer {
    /// The validating constructor every factory funnels through: rejects a
    /// color attachment whose dimensions differ from `dimensions`, or a
    /// render buffer of a non-color format.
    pub fn new(
        device: &Arc<Device>,
        dimensions: Vector2<u32>,
        color: ColorTarget,
    ) -> Result<FrameBuffer> {
        if dimensions.x == 0 || dimensions.y == 0 {
            return Err(Error::InvalidDimensions(dimensions.x, dimensions.y));
        }

        if let ColorTarget::RenderBuffer(rb) = &color {
            if !rb.format().is_color() {
                return Err(Error::UnsupportedFormat(format!(
                    "{:?} as a color attachment",
                    rb.format()
                )));
            }
        }

        if let Some(d) = color.dimensions() {
            if d != dimensions {
                return Err(Error::AttachmentSizeMismatch(
                    d.x,
                    d.y,
                    dimensions.x,
                    dimensions.y,
                ));
            }
        }

        // Capture only resource names: the closure must be `Send`, and
        // `ColorTarget` is `!Sync` once it holds a `MappedTexture`.
        let (texture_name, render_buffer_name) = match &color {
            ColorTarget::None => (None, None),
            ColorTarget::Texture(t) => (Some(t.name()), None),
            ColorTarget::MappedTexture(t) => (Some(t.name()), None),
            ColorTarget::RenderBuffer(rb) => (None, Some(rb.name())),
        };

        let name = device.run_on_main_sync(|| -> Result<ResourceName> {
            let mut v = device.visitor();
            unsafe {
                let name = v.create_frame_buffer()?;
                v.bind_frame_buffer(name)?;
                if let Some(t) = texture_name {
                    v.attach_texture(t)?;
                }
                if let Some(rb) = render_buffer_name {
                    v.attach_render_buffer(rb, Attachment::Color)?;
                }
                v.bind_frame_buffer(0)?;
                Ok(name)
            }
        })?;

        Ok(FrameBuffer {
            name,
            dimensions,
            color,
            depth: None,
            device: device.clone(),
        })
    }

    /// A framebuffer with no color attachment.
    pub fn empty(device: &Arc<Device>, dimensions: Vector2<u32>) -> Result<FrameBuffer> {
        FrameBuffer::new(device, dimensions, ColorTarget::None)
    }

    /// Takes ownership of `render_buffer` as the color target.
    pub fn on_render_buffer(
        device: &Arc<Device>,
        render_buffer: RenderBuffer,
    ) -> Result<FrameBuffer> {
        let dimensions = render_buffer.dimensions();
        FrameBuffer::new(device, dimensions, ColorTarget::RenderBuffer(render_buffer))
    }

    /// Takes ownership of `texture` as the color target.
    pub fn on_texture(device: &Arc<Device>, texture: Texture) -> Result<FrameBuffer> {
        let dimensions = texture.dimensions();
        FrameBuffer::new(device, dimensions, ColorTarget::Texture(texture))
    }

    /// Takes ownership of `texture` as the color target; rendering into it
    /// and then locking it readable is the readback path.
    pub fn on_mapped_texture(device: &Arc<Device>, texture: MappedTexture) -> Result<FrameBuffer> {
        let dimensions = texture.dimensions();
        FrameBuffer::new(device, dimensions, ColorTarget::MappedTexture(texture))
    }

    /// A framebuffer rendering into a platform drawable, via a layer-backed
    /// render buffer created against the calling thread's context.
    pub fn on_drawable(device: &Arc<Device>, drawable: &dyn Drawable) -> Result<FrameBuffer> {
        let render_buffer = RenderBuffer::from_drawable(device, drawable)?;
        FrameBuffer::on_render_buffer(device, render_buffer)
    }

    /// Attaches a 16-bit depth render buffer matching this framebuffer's
    /// dimensions, replacing any existing depth attachment.
    pub fn attach_depth_buffer16(&mut self) -> Result<()> {
        self.attach_depth(RenderBufferFormat::Depth16)
    }

    /// Attaches a 24-bit depth render buffer matching this framebuffer's
    /// dimensions, replacing any existing depth attachment.
    pub fn attach_depth_buffer24(&mut self) -> Result<()> {
        self.attach_depth(RenderBufferFormat::Depth24)
    }

    fn attach_depth(&mut self, format: RenderBufferFormat) -> Result<()> {
        let depth = RenderBuffer::new(&self.device, self.dimensions, format)?;

        let name = self.name;
        let depth_name = depth.name();
        let device = &self.device;
        device.run_on_main_sync(|| {
            let mut v = device.visitor();
            unsafe {
                v.bind_frame_buffer(name)?;
                v.attach_render_buffer(depth_name, Attachment::Depth)?;
                v.bind_frame_buffer(0)
            }
        })?;

        self.depth = Some(depth);
        Ok(())
    }

    /// Hints that the color contents need not survive the current render
    /// pass. Purely a bandwidth optimization; never affects correctness.
    pub fn discard_color(&self) -> Result<()> {
        let mut v = self.device.visitor();
        unsafe {
            v.bind_frame_buffer(self.name)?;
            v.discard_color()?;
            v.bind_frame_buffer(0)
        }
    }

    #[inline]
    pub fn dimensions(&self) -> Vector2<u32> {
        self.dimensions
    }

    #[inline]
    pub fn color(&self) -> &ColorTarget {
        &self.color
    }

    pub fn texture(&self) -> Option<&Texture> {
        match &self.color {
            ColorTarget::Texture(t) => Some(t),
            _ => None,
        }
    }

    pub fn mapped_texture(&self) -> Option<&MappedTexture> {
        match &self.color {
            ColorTarget::MappedTexture(t) => Some(t),
            _ => None,
        }
    }

    pub fn render_buffer(&self) -> Option<&RenderBuffer> {
        match &self.color {
            ColorTarget::RenderBuffer(rb) => Some(rb),
            _ => None,
        }
    }

    #[inline]
    pub fn depth(&self) -> Option<&RenderBuffer> {
        self.depth.as_ref()
    }
}

impl Bindable for FrameBuffer {
    fn name(&self) -> ResourceName {
        self.name
    }

    fn bind(&self) -> Result<()> {
        // Attachments are immutable once owned, but the shape contract is
        // cheap to re-assert at the moment it actually matters.
        if let Some(d) = self.color.dimensions() {
            if d != self.dimensions {
                fault!("framebuffer {} bound with a mismatched attachment", self.name);
                return Err(Error::AttachmentSizeMismatch(
                    d.x,
                    d.y,
                    self.dimensions.x,
                    self.dimensions.y,
                ));
            }
        }

        let mut v = self.device.visitor();
        unsafe {
            v.bind_frame_buffer(self.name)?;
            v.check_frame_buffer()
        }
    }

    fn unbind(&self) -> Result<()> {
        unsafe { self.device.visitor().bind_frame_buffer(0) }
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        let name = self.name;
        let device = &self.device;
        device.run_on_main_sync(|| {
            if let Err(err) = unsafe { device.visitor().delete_frame_buffer(name) } {
                warn!("failed to delete framebuffer {}: {}", name, err);
            }
        });
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("name", &self.name)
            .field("dimensions", &self.dimensions)
            .field("depth", &self.depth.as_ref().map(|v| v.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::headless::HeadlessVisitor;
    use crate::texture::{TextureFormat, TextureParams};

    fn probed_device() -> (Arc<Device>, HeadlessVisitor) {
        let visitor = HeadlessVisitor::new();
        let probe = visitor.clone();
        (Device::new(Box::new(visitor)).unwrap(), probe)
    }

    struct FakeSurface {
        dimensions: Vector2<u32>,
    }

    impl Drawable for FakeSurface {
        fn dimensions(&self) -> Vector2<u32> {
            self.dimensions
        }

        fn storage(&self) -> DrawableStorage {
            0xD00D
        }
    }

    #[test]
    fn offscreen_target_with_depth() {
        let device = Device::headless().unwrap();

        let color = RenderBuffer::new(
            &device,
            Vector2::new(64, 64),
            RenderBufferFormat::Rgba8,
        )
        .unwrap();
        let mut fbo = FrameBuffer::on_render_buffer(&device, color).unwrap();
        fbo.attach_depth_buffer16().unwrap();

        assert_eq!(fbo.dimensions(), Vector2::new(64, 64));
        assert!(fbo.render_buffer().is_some());
        let depth = fbo.depth().expect("depth attachment");
        assert_eq!(depth.format(), RenderBufferFormat::Depth16);
        assert_eq!(depth.dimensions(), Vector2::new(64, 64));
    }

    #[test]
    fn depth_reattachment_replaces() {
        let device = Device::headless().unwrap();
        let mut fbo = FrameBuffer::empty(&device, Vector2::new(32, 32)).unwrap();

        fbo.attach_depth_buffer16().unwrap();
        fbo.attach_depth_buffer24().unwrap();
        assert_eq!(fbo.depth().unwrap().format(), RenderBufferFormat::Depth24);
    }

    #[test]
    fn rejects_mismatched_color_attachment() {
        let device = Device::headless().unwrap();
        let tex =
            Texture::new(&device, TextureParams::new(32, 32, TextureFormat::Rgba8)).unwrap();

        match FrameBuffer::new(&device, Vector2::new(64, 64), ColorTarget::Texture(tex)) {
            Err(Error::AttachmentSizeMismatch(32, 32, 64, 64)) => (),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_depth_format_as_color() {
        let device = Device::headless().unwrap();
        let rb = RenderBuffer::new(
            &device,
            Vector2::new(16, 16),
            RenderBufferFormat::Depth16,
        )
        .unwrap();

        assert!(FrameBuffer::on_render_buffer(&device, rb).is_err());
    }

    #[test]
    fn binding_is_scoped() {
        let (device, probe) = probed_device();
        let fbo = FrameBuffer::empty(&device, Vector2::new(8, 8)).unwrap();

        {
            let _guard = fbo.bind_scoped().unwrap();
            assert_eq!(probe.bound_frame_buffer(), fbo.name());
        }
        assert_eq!(probe.bound_frame_buffer(), 0);
    }

    #[test]
    fn mapped_texture_target_is_reachable() {
        let device = Device::headless().unwrap();
        let tex = MappedTexture::new(
            &device,
            TextureParams::new(16, 16, TextureFormat::Rgba8),
        )
        .unwrap();

        let fbo = FrameBuffer::on_mapped_texture(&device, tex).unwrap();
        assert!(fbo.mapped_texture().is_some());
        assert_eq!(fbo.dimensions(), Vector2::new(16, 16));
    }

    #[test]
    fn drawable_target_uses_the_calling_threads_context() {
        let device = Device::headless().unwrap();
        let surface = FakeSurface {
            dimensions: Vector2::new(320, 240),
        };

        // No context current on this thread yet.
        assert!(RenderBuffer::from_drawable(&device, &surface).is_err());

        let _ctx = device.make_new_context().unwrap();
        let fbo = FrameBuffer::on_drawable(&device, &surface).unwrap();
        assert_eq!(fbo.dimensions(), Vector2::new(320, 240));
        device.set_context(None).unwrap();
    }

    #[test]
    fn discard_color_is_harmless() {
        let device = Device::headless().unwrap();
        let fbo = FrameBuffer::empty(&device, Vector2::new(8, 8)).unwrap();
        fbo.discard_color().unwrap();
    }
}
