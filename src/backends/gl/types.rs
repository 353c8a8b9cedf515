use gl;
use gl::types::*;

use crate::framebuffer::RenderBufferFormat;
use crate::texture::{TextureFilter, TextureFormat, TextureWrap};
use crate::vertex::{BufferUsage, VertexFormat};

impl From<TextureFilter> for GLenum {
    fn from(filter: TextureFilter) -> Self {
        match filter {
            TextureFilter::Nearest => gl::NEAREST,
            TextureFilter::Linear => gl::LINEAR,
        }
    }
}

impl From<TextureWrap> for GLenum {
    fn from(wrap: TextureWrap) -> Self {
        match wrap {
            TextureWrap::Clamp => gl::CLAMP_TO_EDGE,
            TextureWrap::Repeat => gl::REPEAT,
        }
    }
}

/// Returns the `(internal format, format, type)` triple of a texture format.
pub fn texture_format(format: TextureFormat) -> (GLenum, GLenum, GLenum) {
    match format {
        TextureFormat::R8 => (gl::R8, gl::RED, gl::UNSIGNED_BYTE),
        TextureFormat::Rg8 => (gl::RG8, gl::RG, gl::UNSIGNED_BYTE),
        TextureFormat::Rgb8 => (gl::RGB8, gl::RGB, gl::UNSIGNED_BYTE),
        TextureFormat::Rgba8 => (gl::RGBA8, gl::RGBA, gl::UNSIGNED_BYTE),
        TextureFormat::Rgb565 => (gl::RGB565, gl::RGB, gl::UNSIGNED_SHORT_5_6_5),
        TextureFormat::Rgba4 => (gl::RGBA4, gl::RGBA, gl::UNSIGNED_SHORT_4_4_4_4),
    }
}

impl From<RenderBufferFormat> for GLenum {
    fn from(format: RenderBufferFormat) -> Self {
        match format {
            RenderBufferFormat::Rgba8 => gl::RGBA8,
            RenderBufferFormat::Rgb565 => gl::RGB565,
            RenderBufferFormat::Depth16 => gl::DEPTH_COMPONENT16,
            RenderBufferFormat::Depth24 => gl::DEPTH_COMPONENT24,
        }
    }
}

impl From<BufferUsage> for GLenum {
    fn from(usage: BufferUsage) -> Self {
        match usage {
            BufferUsage::Static => gl::STATIC_DRAW,
            BufferUsage::Stream => gl::STREAM_DRAW,
        }
    }
}

impl From<VertexFormat> for GLenum {
    fn from(format: VertexFormat) -> Self {
        match format {
            VertexFormat::Byte => gl::BYTE,
            VertexFormat::UByte => gl::UNSIGNED_BYTE,
            VertexFormat::Short => gl::SHORT,
            VertexFormat::UShort => gl::UNSIGNED_SHORT,
            VertexFormat::HalfFloat => gl::HALF_FLOAT,
            VertexFormat::Float => gl::FLOAT,
        }
    }
}
