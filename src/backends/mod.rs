//! The backend of the runtime, which is responsible for only one thing:
//! issuing resource commands to the low-level graphics API.
//!
//! Everything above this module speaks in typed params and opaque names;
//! everything below is raw API calls. The `headless` implementation keeps
//! the whole bookkeeping in memory so the crate is testable without a GPU.

pub mod headless;

use cgmath::Vector2;

use crate::errors::Result;
use crate::framebuffer::RenderBufferFormat;
use crate::texture::TextureParams;
use crate::vertex::{BufferUsage, VertexFormat};

/// Opaque non-zero integer identifying a native GPU resource. Zero means
/// "not allocated" or "deleted".
pub type ResourceName = u32;

/// Opaque identity of a native graphics context.
pub type ContextName = u32;

/// Opaque token of a platform drawable's storage, handed over by the
/// windowing layer and consumed verbatim by the backend.
pub type DrawableStorage = usize;

/// Static limits of the underlying implementation, queried once at startup.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub max_texture_size: u32,
}

/// Attachment point of the currently bound framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    Color,
    Depth,
}

/// Resolved pointer layout of one vertex attribute, uploaded whenever the
/// owning vertex buffer is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeLayout {
    pub attribute: u32,
    pub components: u8,
    pub format: VertexFormat,
    pub normalized: bool,
    pub stride: u32,
    pub offset: usize,
}

pub trait Visitor: Send {
    fn capabilities(&self) -> Capabilities;

    /// Returns true when `format` can back a texture on this implementation.
    fn supports_texture_format(&self, format: crate::texture::TextureFormat) -> bool;

    unsafe fn create_context(&mut self, share: Option<ContextName>) -> Result<ContextName>;
    unsafe fn make_current(&mut self, ctx: Option<ContextName>) -> Result<()>;
    unsafe fn delete_context(&mut self, ctx: ContextName) -> Result<()>;

    unsafe fn create_texture(
        &mut self,
        params: TextureParams,
        data: Option<&[u8]>,
    ) -> Result<ResourceName>;
    unsafe fn update_texture(
        &mut self,
        name: ResourceName,
        params: TextureParams,
        data: &[u8],
    ) -> Result<()>;
    unsafe fn delete_texture(&mut self, name: ResourceName) -> Result<()>;
    /// Binds `name` on the given texture unit; zero restores none-current.
    unsafe fn bind_texture(&mut self, unit: u32, name: ResourceName) -> Result<()>;
    /// Points a sampler uniform of the active shader program at `unit`.
    unsafe fn set_sampler(&mut self, uniform: i32, unit: u32) -> Result<()>;
    /// Attaches `name` as the color target of the currently bound framebuffer.
    unsafe fn attach_texture(&mut self, name: ResourceName) -> Result<()>;

    unsafe fn create_render_buffer(
        &mut self,
        dimensions: Vector2<u32>,
        format: RenderBufferFormat,
    ) -> Result<ResourceName>;
    /// Allocates render buffer storage out of a platform drawable; returns
    /// the name and the dimensions derived from the drawable.
    unsafe fn create_drawable_render_buffer(
        &mut self,
        ctx: ContextName,
        storage: DrawableStorage,
        dimensions: Vector2<u32>,
    ) -> Result<ResourceName>;
    unsafe fn delete_render_buffer(&mut self, name: ResourceName) -> Result<()>;
    unsafe fn bind_render_buffer(&mut self, name: ResourceName) -> Result<()>;
    unsafe fn attach_render_buffer(
        &mut self,
        name: ResourceName,
        attachment: Attachment,
    ) -> Result<()>;

    unsafe fn create_frame_buffer(&mut self) -> Result<ResourceName>;
    unsafe fn delete_frame_buffer(&mut self, name: ResourceName) -> Result<()>;
    unsafe fn bind_frame_buffer(&mut self, name: ResourceName) -> Result<()>;
    /// Fails when the currently bound framebuffer is not complete.
    unsafe fn check_frame_buffer(&mut self) -> Result<()>;
    /// Hints that the bound framebuffer's color contents need not be
    /// preserved past the current render pass.
    unsafe fn discard_color(&mut self) -> Result<()>;

    unsafe fn create_buffer(&mut self, usage: BufferUsage, size: usize) -> Result<ResourceName>;
    unsafe fn update_buffer(
        &mut self,
        name: ResourceName,
        offset: usize,
        data: &[u8],
    ) -> Result<()>;
    /// Orphans the buffer storage, leaving its contents undefined.
    unsafe fn invalidate_buffer(
        &mut self,
        name: ResourceName,
        usage: BufferUsage,
        size: usize,
    ) -> Result<()>;
    unsafe fn delete_buffer(&mut self, name: ResourceName) -> Result<()>;
    unsafe fn bind_buffer(&mut self, name: ResourceName, layout: &[AttributeLayout])
        -> Result<()>;

    unsafe fn create_vertex_array(&mut self) -> Result<ResourceName>;
    unsafe fn delete_vertex_array(&mut self, name: ResourceName) -> Result<()>;
    unsafe fn bind_vertex_array(&mut self, name: ResourceName) -> Result<()>;

    /// Inserts a GPU fence and waits until commands issued before it are
    /// visible to every context sharing the resource namespace.
    unsafe fn fence_sync(&mut self) -> Result<()>;
    unsafe fn flush(&mut self) -> Result<()>;
}

#[cfg(not(target_arch = "wasm32"))]
pub mod gl;

#[cfg(not(target_arch = "wasm32"))]
pub fn new() -> Result<Box<dyn Visitor>> {
    let visitor = unsafe { self::gl::visitor::GLVisitor::new()? };
    Ok(Box::new(visitor))
}

pub fn new_headless() -> Box<dyn Visitor> {
    Box::new(self::headless::HeadlessVisitor::new())
}
