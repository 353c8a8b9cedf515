//! The OpenGL implementation of `Visitor`.
//!
//! Function pointers must be loaded (`gl::load_with`) before `GLVisitor::new`
//! is called, and a native context must be current on every thread that
//! issues commands; both belong to the embedder's windowing layer, which
//! also owns real context creation. Context names handed out here identify
//! the embedder's contexts inside the device's bookkeeping.

use std::collections::HashSet;
use std::os::raw::c_void;
use std::ptr;

use cgmath::Vector2;
use gl;
use gl::types::*;

use crate::errors::{Error, Result};
use crate::framebuffer::RenderBufferFormat;
use crate::texture::{TextureFormat, TextureParams};
use crate::vertex::BufferUsage;

use super::super::{
    Attachment, AttributeLayout, Capabilities, ContextName, DrawableStorage, ResourceName,
    Visitor,
};
use super::types;

// GLES-only status code, absent from the desktop GL bindings.
const FRAMEBUFFER_INCOMPLETE_DIMENSIONS: GLenum = 0x8CD9;

pub struct GLVisitor {
    capabilities: Capabilities,
    contexts: HashSet<ContextName>,
    next_context: ContextName,
}

impl GLVisitor {
    pub unsafe fn new() -> Result<Self> {
        let mut max_texture_size = 0;
        gl::GetIntegerv(gl::MAX_TEXTURE_SIZE, &mut max_texture_size);
        check("GetIntegerv(MAX_TEXTURE_SIZE)")?;

        // Pixel stores in this crate are tightly packed per row.
        gl::PixelStorei(gl::UNPACK_ALIGNMENT, 1);
        gl::PixelStorei(gl::PACK_ALIGNMENT, 1);
        check("PixelStorei")?;

        let capabilities = Capabilities {
            max_texture_size: max_texture_size as u32,
        };
        info!("GLVisitor {:#?}", capabilities);

        Ok(GLVisitor {
            capabilities,
            contexts: HashSet::new(),
            next_context: 0,
        })
    }
}

impl Visitor for GLVisitor {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn supports_texture_format(&self, _: TextureFormat) -> bool {
        // Every format this crate names is core since GL 3.0 / ES 3.0.
        true
    }

    unsafe fn create_context(&mut self, share: Option<ContextName>) -> Result<ContextName> {
        if let Some(v) = share {
            if !self.contexts.contains(&v) {
                return Err(Error::ContextInvalid(v));
            }
        }

        self.next_context += 1;
        self.contexts.insert(self.next_context);
        Ok(self.next_context)
    }

    unsafe fn make_current(&mut self, ctx: Option<ContextName>) -> Result<()> {
        // Real current-ness is switched by the windowing layer that owns the
        // native contexts; the name only participates in bookkeeping here.
        if let Some(v) = ctx {
            if !self.contexts.contains(&v) {
                return Err(Error::ContextInvalid(v));
            }
        }
        Ok(())
    }

    unsafe fn delete_context(&mut self, ctx: ContextName) -> Result<()> {
        if !self.contexts.remove(&ctx) {
            return Err(Error::ContextInvalid(ctx));
        }
        Ok(())
    }

    unsafe fn create_texture(
        &mut self,
        params: TextureParams,
        data: Option<&[u8]>,
    ) -> Result<ResourceName> {
        let mut id = 0;
        gl::GenTextures(1, &mut id);
        check("GenTextures")?;
        assert!(id != 0);

        gl::BindTexture(gl::TEXTURE_2D, id);
        let filter: GLenum = params.filter.into();
        let wrap: GLenum = params.wrap.into();
        gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, filter as GLint);
        gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, filter as GLint);
        gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, wrap as GLint);
        gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, wrap as GLint);
        check("TexParameteri")?;

        let (internal, format, ty) = types::texture_format(params.format);
        let ptr = data.map_or(ptr::null(), |v| v.as_ptr() as *const c_void);
        gl::TexImage2D(
            gl::TEXTURE_2D,
            0,
            internal as GLint,
            params.dimensions.x as GLsizei,
            params.dimensions.y as GLsizei,
            0,
            format,
            ty,
            ptr,
        );
        gl::BindTexture(gl::TEXTURE_2D, 0);
        check("TexImage2D")?;

        Ok(id)
    }

    unsafe fn update_texture(
        &mut self,
        name: ResourceName,
        params: TextureParams,
        data: &[u8],
    ) -> Result<()> {
        let (_, format, ty) = types::texture_format(params.format);
        gl::BindTexture(gl::TEXTURE_2D, name);
        gl::TexSubImage2D(
            gl::TEXTURE_2D,
            0,
            0,
            0,
            params.dimensions.x as GLsizei,
            params.dimensions.y as GLsizei,
            format,
            ty,
            data.as_ptr() as *const c_void,
        );
        gl::BindTexture(gl::TEXTURE_2D, 0);
        check("TexSubImage2D")
    }

    unsafe fn delete_texture(&mut self, name: ResourceName) -> Result<()> {
        gl::DeleteTextures(1, &name);
        check("DeleteTextures")
    }

    unsafe fn bind_texture(&mut self, unit: u32, name: ResourceName) -> Result<()> {
        gl::ActiveTexture(gl::TEXTURE0 + unit);
        gl::BindTexture(gl::TEXTURE_2D, name);
        check("BindTexture")
    }

    unsafe fn set_sampler(&mut self, uniform: i32, unit: u32) -> Result<()> {
        gl::Uniform1i(uniform, unit as GLint);
        check("Uniform1i")
    }

    unsafe fn attach_texture(&mut self, name: ResourceName) -> Result<()> {
        gl::FramebufferTexture2D(
            gl::FRAMEBUFFER,
            gl::COLOR_ATTACHMENT0,
            gl::TEXTURE_2D,
            name,
            0,
        );
        check("FramebufferTexture2D")
    }

    unsafe fn create_render_buffer(
        &mut self,
        dimensions: Vector2<u32>,
        format: RenderBufferFormat,
    ) -> Result<ResourceName> {
        let mut id = 0;
        gl::GenRenderbuffers(1, &mut id);
        check("GenRenderbuffers")?;
        assert!(id != 0);

        gl::BindRenderbuffer(gl::RENDERBUFFER, id);
        gl::RenderbufferStorage(
            gl::RENDERBUFFER,
            format.into(),
            dimensions.x as GLsizei,
            dimensions.y as GLsizei,
        );
        gl::BindRenderbuffer(gl::RENDERBUFFER, 0);
        check("RenderbufferStorage")?;

        Ok(id)
    }

    unsafe fn create_drawable_render_buffer(
        &mut self,
        ctx: ContextName,
        _: DrawableStorage,
        dimensions: Vector2<u32>,
    ) -> Result<ResourceName> {
        // Layer-backed storage is a platform (EGL/EAGL) concern; on desktop
        // GL the closest equivalent is plain color storage at the drawable's
        // dimensions.
        if !self.contexts.contains(&ctx) {
            return Err(Error::ContextInvalid(ctx));
        }

        self.create_render_buffer(dimensions, RenderBufferFormat::Rgba8)
    }

    unsafe fn delete_render_buffer(&mut self, name: ResourceName) -> Result<()> {
        gl::DeleteRenderbuffers(1, &name);
        check("DeleteRenderbuffers")
    }

    unsafe fn bind_render_buffer(&mut self, name: ResourceName) -> Result<()> {
        gl::BindRenderbuffer(gl::RENDERBUFFER, name);
        check("BindRenderbuffer")
    }

    unsafe fn attach_render_buffer(
        &mut self,
        name: ResourceName,
        attachment: Attachment,
    ) -> Result<()> {
        let point = match attachment {
            Attachment::Color => gl::COLOR_ATTACHMENT0,
            Attachment::Depth => gl::DEPTH_ATTACHMENT,
        };

        gl::FramebufferRenderbuffer(gl::FRAMEBUFFER, point, gl::RENDERBUFFER, name);
        check("FramebufferRenderbuffer")
    }

    unsafe fn create_frame_buffer(&mut self) -> Result<ResourceName> {
        let mut id = 0;
        gl::GenFramebuffers(1, &mut id);
        check("GenFramebuffers")?;
        assert!(id != 0);
        Ok(id)
    }

    unsafe fn delete_frame_buffer(&mut self, name: ResourceName) -> Result<()> {
        gl::DeleteFramebuffers(1, &name);
        check("DeleteFramebuffers")
    }

    unsafe fn bind_frame_buffer(&mut self, name: ResourceName) -> Result<()> {
        gl::BindFramebuffer(gl::FRAMEBUFFER, name);
        check("BindFramebuffer")
    }

    unsafe fn check_frame_buffer(&mut self) -> Result<()> {
        let status = gl::CheckFramebufferStatus(gl::FRAMEBUFFER);
        let reason = match status {
            gl::FRAMEBUFFER_COMPLETE => return Ok(()),
            gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => "incomplete attachment",
            gl::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => "missing attachment",
            FRAMEBUFFER_INCOMPLETE_DIMENSIONS => "attachment dimensions mismatch",
            gl::FRAMEBUFFER_UNSUPPORTED => "unsupported attachment combination",
            _ => "unknown status",
        };

        Err(Error::IncompleteFrameBuffer(reason.into()))
    }

    unsafe fn discard_color(&mut self) -> Result<()> {
        let attachment = gl::COLOR_ATTACHMENT0;
        gl::InvalidateFramebuffer(gl::FRAMEBUFFER, 1, &attachment);
        check("InvalidateFramebuffer")
    }

    unsafe fn create_buffer(&mut self, usage: BufferUsage, size: usize) -> Result<ResourceName> {
        let mut id = 0;
        gl::GenBuffers(1, &mut id);
        check("GenBuffers")?;
        assert!(id != 0);

        gl::BindBuffer(gl::ARRAY_BUFFER, id);
        gl::BufferData(
            gl::ARRAY_BUFFER,
            size as isize,
            ptr::null(),
            GLenum::from(usage),
        );
        gl::BindBuffer(gl::ARRAY_BUFFER, 0);
        check("BufferData")?;

        Ok(id)
    }

    unsafe fn update_buffer(
        &mut self,
        name: ResourceName,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        gl::BindBuffer(gl::ARRAY_BUFFER, name);
        gl::BufferSubData(
            gl::ARRAY_BUFFER,
            offset as isize,
            data.len() as isize,
            data.as_ptr() as *const c_void,
        );
        gl::BindBuffer(gl::ARRAY_BUFFER, 0);
        check("BufferSubData")
    }

    unsafe fn invalidate_buffer(
        &mut self,
        name: ResourceName,
        usage: BufferUsage,
        size: usize,
    ) -> Result<()> {
        // Orphans the storage so the next full write does not stall on
        // commands still reading the old contents.
        gl::BindBuffer(gl::ARRAY_BUFFER, name);
        gl::BufferData(
            gl::ARRAY_BUFFER,
            size as isize,
            ptr::null(),
            GLenum::from(usage),
        );
        gl::BindBuffer(gl::ARRAY_BUFFER, 0);
        check("BufferData(NULL)")
    }

    unsafe fn delete_buffer(&mut self, name: ResourceName) -> Result<()> {
        gl::DeleteBuffers(1, &name);
        check("DeleteBuffers")
    }

    unsafe fn bind_buffer(
        &mut self,
        name: ResourceName,
        layout: &[AttributeLayout],
    ) -> Result<()> {
        gl::BindBuffer(gl::ARRAY_BUFFER, name);
        check("BindBuffer")?;

        for v in layout {
            gl::EnableVertexAttribArray(v.attribute);
            gl::VertexAttribPointer(
                v.attribute,
                GLint::from(v.components),
                v.format.into(),
                v.normalized as GLboolean,
                v.stride as GLsizei,
                v.offset as *const c_void,
            );
        }
        check("VertexAttribPointer")
    }

    unsafe fn create_vertex_array(&mut self) -> Result<ResourceName> {
        let mut id = 0;
        gl::GenVertexArrays(1, &mut id);
        check("GenVertexArrays")?;
        assert!(id != 0);
        Ok(id)
    }

    unsafe fn delete_vertex_array(&mut self, name: ResourceName) -> Result<()> {
        gl::DeleteVertexArrays(1, &name);
        check("DeleteVertexArrays")
    }

    unsafe fn bind_vertex_array(&mut self, name: ResourceName) -> Result<()> {
        gl::BindVertexArray(name);
        check("BindVertexArray")
    }

    unsafe fn fence_sync(&mut self) -> Result<()> {
        let fence = gl::FenceSync(gl::SYNC_GPU_COMMANDS_COMPLETE, 0);
        check("FenceSync")?;

        let status = gl::ClientWaitSync(fence, gl::SYNC_FLUSH_COMMANDS_BIT, u64::max_value());
        gl::DeleteSync(fence);

        if status == gl::WAIT_FAILED {
            return Err(Error::Backend("ClientWaitSync failed".into()));
        }
        check("ClientWaitSync")
    }

    unsafe fn flush(&mut self) -> Result<()> {
        gl::Flush();
        check("Flush")
    }
}

/// OpenGL reports errors through a per-context flag that has to be polled;
/// every state-changing call above is followed by one of these.
unsafe fn check(op: &'static str) -> Result<()> {
    match gl::GetError() {
        gl::NO_ERROR => Ok(()),
        code => {
            fault!("[GL] error 0x{:04x} after {}.", code, op);
            Err(Error::Gl(code, op))
        }
    }
}
