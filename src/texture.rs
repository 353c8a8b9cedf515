//! Immutable-shape 2D textures and their CPU-mapped variant.
//!
//! A `Texture` is a GPU name plus the params it was created with; the params
//! never change afterwards. A `MappedTexture` additionally keeps a CPU pixel
//! store (owned, or a zero-copy alias of an external image-buffer plane) and
//! a lock discipline: CPU access happens between lock and unlock, GPU reads
//! are only valid while unlocked. Dropping a write guard uploads the store
//! to the GPU name on the main lane.

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::slice;
use std::sync::Arc;

use cgmath::Vector2;
use rand::RngCore;

use crate::archive::PixelArchive;
use crate::backends::ResourceName;
use crate::bindable::Bindable;
use crate::device::Device;
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    Rgb565,
    Rgba4,
}

impl TextureFormat {
    /// Bytes per pixel.
    pub fn size(self) -> u32 {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::Rg8 => 2,
            TextureFormat::Rgb8 => 3,
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgb565 => 2,
            TextureFormat::Rgba4 => 2,
        }
    }

    pub fn components(self) -> u32 {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::Rg8 => 2,
            TextureFormat::Rgb8 => 3,
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgb565 => 3,
            TextureFormat::Rgba4 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFilter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureWrap {
    Clamp,
    Repeat,
}

/// The shape of a texture, fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureParams {
    pub dimensions: Vector2<u32>,
    pub format: TextureFormat,
    pub filter: TextureFilter,
    pub wrap: TextureWrap,
}

impl Default for TextureParams {
    fn default() -> Self {
        TextureParams {
            dimensions: Vector2::new(0, 0),
            format: TextureFormat::Rgba8,
            filter: TextureFilter::Linear,
            wrap: TextureWrap::Clamp,
        }
    }
}

impl TextureParams {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        TextureParams {
            dimensions: Vector2::new(width, height),
            format,
            ..Default::default()
        }
    }

    /// Bytes per row of tightly packed pixels.
    pub fn bytes_per_row(&self) -> usize {
        (self.dimensions.x * self.format.size()) as usize
    }

    /// Total bytes of a tightly packed pixel store of this shape.
    pub fn bytes(&self) -> usize {
        self.bytes_per_row() * self.dimensions.y as usize
    }

    pub(crate) fn validate(&self, device: &Device) -> Result<()> {
        if self.dimensions.x == 0 || self.dimensions.y == 0 {
            return Err(Error::InvalidDimensions(
                self.dimensions.x,
                self.dimensions.y,
            ));
        }

        let max = device.capabilities().max_texture_size;
        if self.dimensions.x > max || self.dimensions.y > max {
            return Err(Error::InvalidDimensions(
                self.dimensions.x,
                self.dimensions.y,
            ));
        }

        if !device.visitor().supports_texture_format(self.format) {
            return Err(Error::UnsupportedFormat(format!("{:?}", self.format)));
        }

        Ok(())
    }
}

/// A plain GPU-resident texture without a CPU store.
pub struct Texture {
    name: ResourceName,
    params: TextureParams,
    device: Arc<Device>,
}

impl Texture {
    /// Allocates the GPU name on the main lane, initialized to all zeroes.
    pub fn new(device: &Arc<Device>, params: TextureParams) -> Result<Texture> {
        params.validate(device)?;

        let name = device.run_on_main_sync(|| unsafe {
            device.visitor().create_texture(params, None)
        })?;

        Ok(Texture {
            name,
            params,
            device: device.clone(),
        })
    }

    #[inline]
    pub fn params(&self) -> TextureParams {
        self.params
    }

    #[inline]
    pub fn dimensions(&self) -> Vector2<u32> {
        self.params.dimensions
    }

    /// Binds on `unit` and points the sampler uniform at it.
    pub fn set_uniform(&self, uniform: i32, unit: u32) -> Result<()> {
        let mut v = self.device.visitor();
        unsafe {
            v.bind_texture(unit, self.name)?;
            v.set_sampler(uniform, unit)
        }
    }

    /// Attaches this texture as the color target of the currently bound
    /// framebuffer.
    pub fn attach_color_target(&self) -> Result<()> {
        unsafe { self.device.visitor().attach_texture(self.name) }
    }
}

impl Bindable for Texture {
    fn name(&self) -> ResourceName {
        self.name
    }

    fn bind(&self) -> Result<()> {
        unsafe { self.device.visitor().bind_texture(0, self.name) }
    }

    fn unbind(&self) -> Result<()> {
        unsafe { self.device.visitor().bind_texture(0, 0) }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        let name = self.name;
        let device = &self.device;
        device.run_on_main_sync(|| {
            if let Err(err) = unsafe { device.visitor().delete_texture(name) } {
                warn!("failed to delete texture {}: {}", name, err);
            }
        });
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

enum PixelStore {
    Owned(UnsafeCell<Box<[u8]>>),
    External { ptr: *mut u8, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Unlocked,
    ReadOnly,
    Writable,
}

/// A texture whose pixels stay addressable on the CPU.
///
/// The store is only touched between `lock_*` and guard drop; the GPU name
/// is only valid to read from while unlocked. Locks are deliberately not
/// internally synchronized, so the type is `!Sync`; moving it to another
/// thread is fine.
pub struct MappedTexture {
    name: ResourceName,
    params: TextureParams,
    store: PixelStore,
    bytes_per_row: usize,
    num_bytes: usize,
    lock: Cell<LockState>,
    cached: bool,
    device: Arc<Device>,
}

// An external store aliases a caller-owned plane; the factory's safety
// contract obliges the caller to keep the plane alive for the texture's
// lifetime, on whichever thread it ends up.
unsafe impl Send for MappedTexture {}

impl MappedTexture {
    /// A mapped texture with an owned, zero-initialized store.
    pub fn new(device: &Arc<Device>, params: TextureParams) -> Result<MappedTexture> {
        params.validate(device)?;

        let pixels = vec![0u8; params.bytes()].into_boxed_slice();
        let name = device.run_on_main_sync(|| unsafe {
            device.visitor().create_texture(params, Some(&pixels))
        })?;

        Ok(MappedTexture {
            name,
            params,
            bytes_per_row: params.bytes_per_row(),
            num_bytes: params.bytes(),
            store: PixelStore::Owned(UnsafeCell::new(pixels)),
            lock: Cell::new(LockState::Unlocked),
            cached: false,
            device: device.clone(),
        })
    }

    /// Wraps one plane of an external image buffer without copying. Routed
    /// through the device texture cache: wrapping the same `(base, plane)`
    /// again before the next [`Device::flush_texture_cache`] reuses the GPU
    /// name, and the cache (not this object) owns that name.
    ///
    /// # Safety
    ///
    /// `base` must point at `params.bytes()` addressable bytes that outlive
    /// the returned texture, and nothing else may touch them while a lock
    /// is held.
    pub unsafe fn from_image_buffer_plane(
        device: &Arc<Device>,
        base: *mut u8,
        plane: usize,
        params: TextureParams,
    ) -> Result<MappedTexture> {
        params.validate(device)?;

        let len = params.bytes();
        let pixels = slice::from_raw_parts(base, len);
        let name = Self::cached_name(device, base as usize, plane, params, pixels)?;

        Ok(MappedTexture {
            name,
            params,
            bytes_per_row: params.bytes_per_row(),
            num_bytes: len,
            store: PixelStore::External { ptr: base, len },
            lock: Cell::new(LockState::Unlocked),
            cached: true,
            device: device.clone(),
        })
    }

    /// A mapped texture seeded from caller-decoded pixels.
    pub fn from_decoded_image(
        device: &Arc<Device>,
        params: TextureParams,
        pixels: &[u8],
    ) -> Result<MappedTexture> {
        params.validate(device)?;

        if pixels.len() != params.bytes() {
            return Err(Error::OutOfBounds);
        }

        let store: Box<[u8]> = pixels.to_vec().into_boxed_slice();
        let name = device.run_on_main_sync(|| unsafe {
            device.visitor().create_texture(params, Some(&store))
        })?;

        Ok(MappedTexture {
            name,
            params,
            bytes_per_row: params.bytes_per_row(),
            num_bytes: params.bytes(),
            store: PixelStore::Owned(UnsafeCell::new(store)),
            lock: Cell::new(LockState::Unlocked),
            cached: false,
            device: device.clone(),
        })
    }

    fn cached_name(
        device: &Arc<Device>,
        base: usize,
        plane: usize,
        params: TextureParams,
        pixels: &[u8],
    ) -> Result<ResourceName> {
        if let Some(name) = device.use_fast_texture_cache(|cache| cache.lookup(base, plane)) {
            trace!("texture cache hit: plane {} of {:#x} -> {}", plane, base, name);
            return Ok(name);
        }

        let name = device.run_on_main_sync(|| unsafe {
            device.visitor().create_texture(params, Some(pixels))
        })?;
        device.use_fast_texture_cache(|cache| cache.insert(base, plane, name));
        Ok(name)
    }

    #[inline]
    pub fn params(&self) -> TextureParams {
        self.params
    }

    #[inline]
    pub fn dimensions(&self) -> Vector2<u32> {
        self.params.dimensions
    }

    #[inline]
    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    #[inline]
    pub fn num_bytes(&self) -> usize {
        self.num_bytes
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock.get() != LockState::Unlocked
    }

    unsafe fn store_slice(&self) -> &[u8] {
        match &self.store {
            PixelStore::Owned(cell) => &**cell.get(),
            PixelStore::External { ptr, len } => slice::from_raw_parts(*ptr, *len),
        }
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn store_slice_mut(&self) -> &mut [u8] {
        match &self.store {
            PixelStore::Owned(cell) => &mut **cell.get(),
            PixelStore::External { ptr, len } => slice::from_raw_parts_mut(*ptr, *len),
        }
    }

    /// Locks the store for CPU writes. Dropping the guard unlocks and
    /// uploads the store to the GPU name on the main lane.
    pub fn lock_writable(&self) -> Result<MappedWriteGuard> {
        if self.lock.get() != LockState::Unlocked {
            fault!("texture {} is already locked", self.name);
            return Err(Error::AlreadyLocked);
        }

        self.lock.set(LockState::Writable);
        Ok(MappedWriteGuard { texture: self })
    }

    /// Locks the store for CPU reads. Dropping the guard unlocks; nothing
    /// is uploaded.
    pub fn lock_readonly(&self) -> Result<MappedReadGuard> {
        if self.lock.get() != LockState::Unlocked {
            fault!("texture {} is already locked", self.name);
            return Err(Error::AlreadyLocked);
        }

        self.lock.set(LockState::ReadOnly);
        Ok(MappedReadGuard { texture: self })
    }

    /// Scoped write access; unlocks (and uploads) on every exit path.
    pub fn use_writable<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut [u8]) -> T,
    {
        let mut guard = self.lock_writable()?;
        Ok(f(&mut guard))
    }

    /// Scoped read access; unlocks on every exit path.
    pub fn use_readonly<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> T,
    {
        let guard = self.lock_readonly()?;
        Ok(f(&guard))
    }

    /// Replaces the whole store in one lock/copy/unlock round; `data` must
    /// be exactly `num_bytes` long.
    pub fn write_data(&self, data: &[u8]) -> Result<()> {
        if data.len() != self.num_bytes {
            return Err(Error::OutOfBounds);
        }

        let mut guard = self.lock_writable()?;
        guard.copy_from_slice(data);
        Ok(())
    }

    /// Fills the store with pseudo-random bytes. Diagnostic aid for making
    /// uninitialized-read bugs visible.
    pub fn randomize(&self) -> Result<()> {
        let mut guard = self.lock_writable()?;
        rand::thread_rng().fill_bytes(&mut guard);
        Ok(())
    }

    /// Binds on `unit` and points the sampler uniform at it. Rejected while
    /// locked, since the GPU side is stale until unlock.
    pub fn set_uniform(&self, uniform: i32, unit: u32) -> Result<()> {
        if self.is_locked() {
            fault!("texture {} sampled while locked", self.name);
            return Err(Error::AlreadyLocked);
        }

        let mut v = self.device.visitor();
        unsafe {
            v.bind_texture(unit, self.name)?;
            v.set_sampler(uniform, unit)
        }
    }

    /// Attaches this texture as the color target of the currently bound
    /// framebuffer.
    pub fn attach_color_target(&self) -> Result<()> {
        unsafe { self.device.visitor().attach_texture(self.name) }
    }

    /// Dumps the CPU store into `archive` under `key`.
    pub fn save(&self, archive: &PixelArchive, key: &str) -> Result<()> {
        archive.save(key, self)
    }

    /// Reconstructs a texture previously dumped under `key`; `params` must
    /// describe exactly the stored byte count.
    pub fn load(
        archive: &PixelArchive,
        device: &Arc<Device>,
        key: &str,
        params: TextureParams,
    ) -> Result<MappedTexture> {
        archive.load(device, key, params)
    }
}

impl Bindable for MappedTexture {
    fn name(&self) -> ResourceName {
        self.name
    }

    fn bind(&self) -> Result<()> {
        unsafe { self.device.visitor().bind_texture(0, self.name) }
    }

    fn unbind(&self) -> Result<()> {
        unsafe { self.device.visitor().bind_texture(0, 0) }
    }
}

impl Drop for MappedTexture {
    fn drop(&mut self) {
        // Cache-derived names belong to the device texture cache and die in
        // flush_texture_cache instead.
        if self.cached {
            return;
        }

        let name = self.name;
        let device = &self.device;
        device.run_on_main_sync(|| {
            if let Err(err) = unsafe { device.visitor().delete_texture(name) } {
                warn!("failed to delete texture {}: {}", name, err);
            }
        });
    }
}

impl fmt::Debug for MappedTexture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MappedTexture")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("num_bytes", &self.num_bytes)
            .field("lock", &self.lock.get())
            .finish()
    }
}

/// Write access to a mapped texture's store; unlocks and uploads on drop.
pub struct MappedWriteGuard<'a> {
    texture: &'a MappedTexture,
}

impl<'a> Deref for MappedWriteGuard<'a> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { self.texture.store_slice() }
    }
}

impl<'a> DerefMut for MappedWriteGuard<'a> {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { self.texture.store_slice_mut() }
    }
}

impl<'a> Drop for MappedWriteGuard<'a> {
    fn drop(&mut self) {
        let tex = self.texture;
        tex.lock.set(LockState::Unlocked);

        let name = tex.name;
        let params = tex.params;
        let data = unsafe { tex.store_slice() };
        let device = &tex.device;
        device.run_on_main_sync(|| {
            if let Err(err) = unsafe { device.visitor().update_texture(name, params, data) } {
                error!("failed to upload pixels of texture {}: {}", name, err);
            }
        });
    }
}

/// Read access to a mapped texture's store; unlocks on drop.
pub struct MappedReadGuard<'a> {
    texture: &'a MappedTexture,
}

impl<'a> Deref for MappedReadGuard<'a> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { self.texture.store_slice() }
    }
}

impl<'a> Drop for MappedReadGuard<'a> {
    fn drop(&mut self) {
        self.texture.lock.set(LockState::Unlocked);
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

    #[test]
    fn rejects_degenerate_params() {
        let device = Device::headless().unwrap();

        let zero = TextureParams::new(0, 16, TextureFormat::Rgba8);
        assert!(Texture::new(&device, zero).is_err());

        let max = device.capabilities().max_texture_size;
        let huge = TextureParams::new(max + 1, 16, TextureFormat::Rgba8);
        assert!(Texture::new(&device, huge).is_err());
    }

    #[test]
    fn write_then_read_back() {
        let (device, probe) = probed_device();

        let params = TextureParams::new(4, 4, TextureFormat::Rgba8);
        let tex = MappedTexture::new(&device, params).unwrap();
        assert_eq!(tex.num_bytes(), 64);
        assert_eq!(tex.bytes_per_row(), 16);

        let pattern: Vec<u8> = (0..64u8).collect();
        tex.write_data(&pattern).unwrap();

        let seen = tex.use_readonly(|data| data.to_vec()).unwrap();
        assert_eq!(seen, pattern);

        // The unlock uploaded the pattern to the GPU side as well.
        assert_eq!(probe.texture_bytes(tex.name()), Some(pattern));
    }

    #[test]
    fn double_lock_is_rejected_and_harmless() {
        let device = Device::headless().unwrap();
        let tex =
            MappedTexture::new(&device, TextureParams::new(2, 2, TextureFormat::R8)).unwrap();

        let mut guard = tex.lock_writable().unwrap();
        guard[0] = 0xAB;

        match tex.lock_writable() {
            Err(Error::AlreadyLocked) => (),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert!(tex.lock_readonly().is_err());

        // The original guard keeps working and still uploads on drop.
        guard[1] = 0xCD;
        drop(guard);

        let seen = tex.use_readonly(|data| data.to_vec()).unwrap();
        assert_eq!(&seen[..2], &[0xAB, 0xCD]);
    }

    #[test]
    fn write_data_length_is_checked() {
        let (device, probe) = probed_device();
        let tex =
            MappedTexture::new(&device, TextureParams::new(2, 2, TextureFormat::R8)).unwrap();

        match tex.write_data(&[1, 2, 3]) {
            Err(Error::OutOfBounds) => (),
            other => panic!("unexpected: {:?}", other),
        }

        assert!(!tex.is_locked());
        assert_eq!(probe.texture_bytes(tex.name()), Some(vec![0; 4]));
    }

    #[test]
    fn scoped_access_unlocks_on_exit() {
        let device = Device::headless().unwrap();
        let tex =
            MappedTexture::new(&device, TextureParams::new(2, 2, TextureFormat::R8)).unwrap();

        tex.use_writable(|data| {
            data[0] = 7;
        })
        .unwrap();
        assert!(!tex.is_locked());

        tex.use_readonly(|data| assert_eq!(data[0], 7)).unwrap();
        assert!(!tex.is_locked());
    }

    #[test]
    fn sampling_is_rejected_while_locked() {
        let device = Device::headless().unwrap();
        let tex =
            MappedTexture::new(&device, TextureParams::new(2, 2, TextureFormat::Rgba8)).unwrap();

        let _guard = tex.lock_writable().unwrap();
        match tex.set_uniform(0, 1) {
            Err(Error::AlreadyLocked) => (),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn decoded_image_seeds_both_sides() {
        let (device, probe) = probed_device();

        let params = TextureParams::new(2, 2, TextureFormat::Rg8);
        let pixels = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let tex = MappedTexture::from_decoded_image(&device, params, &pixels).unwrap();

        assert_eq!(probe.texture_bytes(tex.name()), Some(pixels.to_vec()));
        tex.use_readonly(|data| assert_eq!(data, &pixels[..])).unwrap();

        assert!(MappedTexture::from_decoded_image(&device, params, &pixels[..5]).is_err());
    }

    #[test]
    fn plane_wrapping_goes_through_the_cache() {
        let (device, probe) = probed_device();

        let params = TextureParams::new(2, 2, TextureFormat::R8);
        let mut plane = vec![9u8; params.bytes()];
        let base = plane.as_mut_ptr();

        let (a, b) = unsafe {
            let a = MappedTexture::from_image_buffer_plane(&device, base, 0, params).unwrap();
            let b = MappedTexture::from_image_buffer_plane(&device, base, 0, params).unwrap();
            (a, b)
        };

        // Same plane, same frame: one GPU name shared through the cache.
        assert_eq!(a.name(), b.name());
        let name = a.name();

        // Cache-derived textures do not own their name.
        drop(a);
        drop(b);
        assert!(probe.is_texture_alive(name));

        device.flush_texture_cache().unwrap();
        assert!(!probe.is_texture_alive(name));
    }

    #[test]
    fn dropping_owned_textures_frees_the_name() {
        let (device, probe) = probed_device();

        let tex =
            Texture::new(&device, TextureParams::new(8, 8, TextureFormat::Rgba8)).unwrap();
        let name = tex.name();
        assert!(probe.is_texture_alive(name));

        drop(tex);
        assert!(!probe.is_texture_alive(name));
    }

    #[test]
    fn randomize_touches_every_byte_eventually() {
        let (device, probe) = probed_device();
        let tex =
            MappedTexture::new(&device, TextureParams::new(16, 16, TextureFormat::Rgba8)).unwrap();

        tex.randomize().unwrap();

        // 1024 random bytes being all zero is not a thing.
        let bytes = probe.texture_bytes(tex.name()).unwrap();
        assert!(bytes.iter().any(|&b| b != 0));
    }
}
