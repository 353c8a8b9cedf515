//! # Glaze
//!
//! Glaze is a thin runtime layer on top of the immediate-mode OpenGL API. It
//! does NOT try to be a renderer or a scene graph; it owns exactly three
//! concerns and owns them carefully:
//!
//! 1. The lifecycle and binding discipline of native GPU resource handles
//!    (textures, render targets, vertex storage). Every handle is allocated
//!    and deleted synchronously on the thread that owns its context, and the
//!    common bind/unbind contract is expressed as the [`Bindable`] trait with
//!    a RAII scoped-bind guard.
//! 2. The cross-thread synchronization those handles depend on: a [`Device`]
//!    owning a primary context, a passive context sharing the same resource
//!    namespace, and a serial texture-cache lane, with blocking `run_on_*`
//!    submission and a GPU fence for cross-context visibility.
//! 3. A bit-exact codec between 32-bit floats and the compact 16-bit
//!    half-float representation used to shrink vertex and pixel payloads.
//!
//! All raw graphics calls are routed through the [`backends::Visitor`] trait,
//! which ships with an OpenGL implementation and a headless implementation
//! for tests and CI.
//!
//! [`Bindable`]: bindable/trait.Bindable.html
//! [`Device`]: device/struct.Device.html
//! [`backends::Visitor`]: backends/trait.Visitor.html

#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

#[cfg(not(target_arch = "wasm32"))]
extern crate gl;

extern crate cgmath;
extern crate rand;
extern crate smallvec;

#[macro_use]
pub mod errors;

pub mod archive;
pub mod backends;
pub mod bindable;
pub mod device;
pub mod framebuffer;
pub mod half;
pub mod texture;
pub mod vertex;

pub mod prelude {
    pub use crate::archive::PixelArchive;
    pub use crate::bindable::{BindGuard, Bindable};
    pub use crate::device::{Device, GraphicsContext};
    pub use crate::errors::{Error, Result};
    pub use crate::framebuffer::{
        ColorTarget, Drawable, FrameBuffer, RenderBuffer, RenderBufferFormat,
    };
    pub use crate::half;
    pub use crate::texture::{
        MappedTexture, Texture, TextureFilter, TextureFormat, TextureParams, TextureWrap,
    };
    pub use crate::vertex::{
        AttributeBinding, BufferUsage, VertexArray, VertexBuffer, VertexFormat,
    };
}
