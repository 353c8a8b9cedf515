//! An in-memory backend with no native API underneath.
//!
//! Unlike a real driver it keeps every piece of state observable, so the
//! resource layer can be exercised (and its discipline asserted) on machines
//! without a GPU. Clones share the same state, which lets a test keep a
//! probe onto a visitor it has moved into a `Device`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use cgmath::Vector2;
use smallvec::SmallVec;

use crate::errors::{Error, Result};
use crate::framebuffer::RenderBufferFormat;
use crate::texture::{TextureFormat, TextureParams};
use crate::vertex::BufferUsage;

use super::{
    Attachment, AttributeLayout, Capabilities, ContextName, DrawableStorage, ResourceName,
    Visitor,
};

const MAX_TEXTURE_SIZE: u32 = 4096;

#[derive(Debug)]
struct TextureRecord {
    params: TextureParams,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct BufferRecord {
    usage: BufferUsage,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct FrameBufferRecord {
    color: Option<ResourceName>,
    depth: Option<ResourceName>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_name: ResourceName,
    next_context: ContextName,
    contexts: HashMap<ContextName, Option<ContextName>>,
    currents: HashMap<ThreadId, ContextName>,

    textures: HashMap<ResourceName, TextureRecord>,
    render_buffers: HashMap<ResourceName, (Vector2<u32>, RenderBufferFormat)>,
    frame_buffers: HashMap<ResourceName, FrameBufferRecord>,
    buffers: HashMap<ResourceName, BufferRecord>,
    vertex_arrays: HashMap<ResourceName, ()>,

    bound_textures: SmallVec<[Option<ResourceName>; 8]>,
    bound_frame_buffer: ResourceName,
    bound_render_buffer: ResourceName,
    bound_buffer: ResourceName,
    bound_vertex_array: ResourceName,
    samplers: HashMap<i32, u32>,
    fences: u64,
}

impl HeadlessState {
    fn allocate(&mut self) -> ResourceName {
        self.next_name += 1;
        self.next_name
    }
}

#[derive(Clone)]
pub struct HeadlessVisitor {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessVisitor {
    pub fn new() -> Self {
        HeadlessVisitor {
            state: Arc::new(Mutex::new(HeadlessState::default())),
        }
    }

    fn state(&self) -> MutexGuard<HeadlessState> {
        self.state.lock().unwrap()
    }
}

impl Default for HeadlessVisitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Observation surface for tests.
impl HeadlessVisitor {
    pub fn bound_texture(&self, unit: usize) -> Option<ResourceName> {
        self.state().bound_textures.get(unit).cloned().unwrap_or(None)
    }

    pub fn bound_frame_buffer(&self) -> ResourceName {
        self.state().bound_frame_buffer
    }

    pub fn bound_vertex_array(&self) -> ResourceName {
        self.state().bound_vertex_array
    }

    pub fn texture_bytes(&self, name: ResourceName) -> Option<Vec<u8>> {
        self.state().textures.get(&name).map(|v| v.bytes.clone())
    }

    pub fn buffer_bytes(&self, name: ResourceName) -> Option<Vec<u8>> {
        self.state().buffers.get(&name).map(|v| v.bytes.clone())
    }

    pub fn is_texture_alive(&self, name: ResourceName) -> bool {
        self.state().textures.contains_key(&name)
    }

    pub fn alive_textures(&self) -> usize {
        self.state().textures.len()
    }

    pub fn alive_buffers(&self) -> usize {
        self.state().buffers.len()
    }

    pub fn fence_count(&self) -> u64 {
        self.state().fences
    }
}

impl Visitor for HeadlessVisitor {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_texture_size: MAX_TEXTURE_SIZE,
        }
    }

    fn supports_texture_format(&self, _: TextureFormat) -> bool {
        true
    }

    unsafe fn create_context(&mut self, share: Option<ContextName>) -> Result<ContextName> {
        let mut state = self.state();
        if let Some(v) = share {
            if !state.contexts.contains_key(&v) {
                return Err(Error::ContextInvalid(v));
            }
        }

        state.next_context += 1;
        let ctx = state.next_context;
        state.contexts.insert(ctx, share);
        Ok(ctx)
    }

    unsafe fn make_current(&mut self, ctx: Option<ContextName>) -> Result<()> {
        let mut state = self.state();
        let id = thread::current().id();
        match ctx {
            Some(v) => {
                if !state.contexts.contains_key(&v) {
                    return Err(Error::ContextInvalid(v));
                }
                state.currents.insert(id, v);
            }
            None => {
                state.currents.remove(&id);
            }
        }
        Ok(())
    }

    unsafe fn delete_context(&mut self, ctx: ContextName) -> Result<()> {
        if self.state().contexts.remove(&ctx).is_none() {
            return Err(Error::ContextInvalid(ctx));
        }
        Ok(())
    }

    unsafe fn create_texture(
        &mut self,
        params: TextureParams,
        data: Option<&[u8]>,
    ) -> Result<ResourceName> {
        let mut state = self.state();
        let name = state.allocate();
        let len = params.bytes();
        let mut bytes = vec![0; len];
        if let Some(v) = data {
            if v.len() > len {
                return Err(Error::OutOfBounds);
            }
            bytes[..v.len()].copy_from_slice(v);
        }

        state.textures.insert(name, TextureRecord { params, bytes });
        Ok(name)
    }

    unsafe fn update_texture(
        &mut self,
        name: ResourceName,
        _: TextureParams,
        data: &[u8],
    ) -> Result<()> {
        let mut state = self.state();
        let record = state
            .textures
            .get_mut(&name)
            .ok_or_else(|| Error::Backend(format!("texture {} does not exist", name)))?;

        if data.len() > record.bytes.len() {
            return Err(Error::OutOfBounds);
        }

        record.bytes[..data.len()].copy_from_slice(data);
        Ok(())
    }

    unsafe fn delete_texture(&mut self, name: ResourceName) -> Result<()> {
        if self.state().textures.remove(&name).is_none() {
            return Err(Error::Backend(format!("texture {} does not exist", name)));
        }
        Ok(())
    }

    unsafe fn bind_texture(&mut self, unit: u32, name: ResourceName) -> Result<()> {
        let mut state = self.state();
        if name != 0 && !state.textures.contains_key(&name) {
            return Err(Error::Backend(format!("texture {} does not exist", name)));
        }

        let unit = unit as usize;
        while state.bound_textures.len() <= unit {
            state.bound_textures.push(None);
        }
        state.bound_textures[unit] = if name == 0 { None } else { Some(name) };
        Ok(())
    }

    unsafe fn set_sampler(&mut self, uniform: i32, unit: u32) -> Result<()> {
        self.state().samplers.insert(uniform, unit);
        Ok(())
    }

    unsafe fn attach_texture(&mut self, name: ResourceName) -> Result<()> {
        let mut state = self.state();
        let fbo = state.bound_frame_buffer;
        if fbo == 0 {
            return Err(Error::Backend("no framebuffer is bound".into()));
        }
        if !state.textures.contains_key(&name) {
            return Err(Error::Backend(format!("texture {} does not exist", name)));
        }

        state.frame_buffers.get_mut(&fbo).unwrap().color = Some(name);
        Ok(())
    }

    unsafe fn create_render_buffer(
        &mut self,
        dimensions: Vector2<u32>,
        format: RenderBufferFormat,
    ) -> Result<ResourceName> {
        let mut state = self.state();
        let name = state.allocate();
        state.render_buffers.insert(name, (dimensions, format));
        Ok(name)
    }

    unsafe fn create_drawable_render_buffer(
        &mut self,
        ctx: ContextName,
        _: DrawableStorage,
        dimensions: Vector2<u32>,
    ) -> Result<ResourceName> {
        let mut state = self.state();
        if !state.contexts.contains_key(&ctx) {
            return Err(Error::ContextInvalid(ctx));
        }

        let name = state.allocate();
        state
            .render_buffers
            .insert(name, (dimensions, RenderBufferFormat::Rgba8));
        Ok(name)
    }

    unsafe fn delete_render_buffer(&mut self, name: ResourceName) -> Result<()> {
        if self.state().render_buffers.remove(&name).is_none() {
            return Err(Error::Backend(format!(
                "render buffer {} does not exist",
                name
            )));
        }
        Ok(())
    }

    unsafe fn bind_render_buffer(&mut self, name: ResourceName) -> Result<()> {
        let mut state = self.state();
        if name != 0 && !state.render_buffers.contains_key(&name) {
            return Err(Error::Backend(format!(
                "render buffer {} does not exist",
                name
            )));
        }
        state.bound_render_buffer = name;
        Ok(())
    }

    unsafe fn attach_render_buffer(
        &mut self,
        name: ResourceName,
        attachment: Attachment,
    ) -> Result<()> {
        let mut state = self.state();
        let fbo = state.bound_frame_buffer;
        if fbo == 0 {
            return Err(Error::Backend("no framebuffer is bound".into()));
        }
        if !state.render_buffers.contains_key(&name) {
            return Err(Error::Backend(format!(
                "render buffer {} does not exist",
                name
            )));
        }

        let record = state.frame_buffers.get_mut(&fbo).unwrap();
        match attachment {
            Attachment::Color => record.color = Some(name),
            Attachment::Depth => record.depth = Some(name),
        }
        Ok(())
    }

    unsafe fn create_frame_buffer(&mut self) -> Result<ResourceName> {
        let mut state = self.state();
        let name = state.allocate();
        state.frame_buffers.insert(name, Default::default());
        Ok(name)
    }

    unsafe fn delete_frame_buffer(&mut self, name: ResourceName) -> Result<()> {
        if self.state().frame_buffers.remove(&name).is_none() {
            return Err(Error::Backend(format!(
                "framebuffer {} does not exist",
                name
            )));
        }
        Ok(())
    }

    unsafe fn bind_frame_buffer(&mut self, name: ResourceName) -> Result<()> {
        let mut state = self.state();
        if name != 0 && !state.frame_buffers.contains_key(&name) {
            return Err(Error::Backend(format!(
                "framebuffer {} does not exist",
                name
            )));
        }
        state.bound_frame_buffer = name;
        Ok(())
    }

    unsafe fn check_frame_buffer(&mut self) -> Result<()> {
        let state = self.state();
        if state.bound_frame_buffer == 0 {
            return Err(Error::Backend("no framebuffer is bound".into()));
        }
        Ok(())
    }

    unsafe fn discard_color(&mut self) -> Result<()> {
        Ok(())
    }

    unsafe fn create_buffer(&mut self, usage: BufferUsage, size: usize) -> Result<ResourceName> {
        let mut state = self.state();
        let name = state.allocate();
        state.buffers.insert(
            name,
            BufferRecord {
                usage,
                bytes: vec![0; size],
            },
        );
        Ok(name)
    }

    unsafe fn update_buffer(
        &mut self,
        name: ResourceName,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        let mut state = self.state();
        let record = state
            .buffers
            .get_mut(&name)
            .ok_or_else(|| Error::Backend(format!("buffer {} does not exist", name)))?;

        if offset + data.len() > record.bytes.len() {
            return Err(Error::OutOfBounds);
        }

        record.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    unsafe fn invalidate_buffer(
        &mut self,
        name: ResourceName,
        usage: BufferUsage,
        size: usize,
    ) -> Result<()> {
        let mut state = self.state();
        let record = state
            .buffers
            .get_mut(&name)
            .ok_or_else(|| Error::Backend(format!("buffer {} does not exist", name)))?;

        record.usage = usage;
        record.bytes = vec![0; size];
        Ok(())
    }

    unsafe fn delete_buffer(&mut self, name: ResourceName) -> Result<()> {
        if self.state().buffers.remove(&name).is_none() {
            return Err(Error::Backend(format!("buffer {} does not exist", name)));
        }
        Ok(())
    }

    unsafe fn bind_buffer(&mut self, name: ResourceName, _: &[AttributeLayout]) -> Result<()> {
        let mut state = self.state();
        if name != 0 && !state.buffers.contains_key(&name) {
            return Err(Error::Backend(format!("buffer {} does not exist", name)));
        }
        state.bound_buffer = name;
        Ok(())
    }

    unsafe fn create_vertex_array(&mut self) -> Result<ResourceName> {
        let mut state = self.state();
        let name = state.allocate();
        state.vertex_arrays.insert(name, ());
        Ok(name)
    }

    unsafe fn delete_vertex_array(&mut self, name: ResourceName) -> Result<()> {
        if self.state().vertex_arrays.remove(&name).is_none() {
            return Err(Error::Backend(format!(
                "vertex array {} does not exist",
                name
            )));
        }
        Ok(())
    }

    unsafe fn bind_vertex_array(&mut self, name: ResourceName) -> Result<()> {
        let mut state = self.state();
        if name != 0 && !state.vertex_arrays.contains_key(&name) {
            return Err(Error::Backend(format!(
                "vertex array {} does not exist",
                name
            )));
        }
        state.bound_vertex_array = name;
        Ok(())
    }

    unsafe fn fence_sync(&mut self) -> Result<()> {
        self.state().fences += 1;
        Ok(())
    }

    unsafe fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
