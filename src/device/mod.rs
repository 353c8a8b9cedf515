//! The owner of the graphics contexts and their thread affinities.
//!
//! A `Device` runs three dedicated lanes: a main thread owning the primary
//! context, a background thread owning a passive context that shares the
//! primary's resource namespace (used for off-main-thread uploads), and a
//! serial queue for texture-cache bookkeeping. The blocking `run_on_*_sync`
//! calls are the only sanctioned way a resource operation reaches the thread
//! owning its context; each executes inline when already on the target
//! thread, so nesting never self-deadlocks.
//!
//! There is deliberately no process-wide singleton. Construct a `Device`,
//! keep it in an `Arc`, and hand it to the resource factories; every resource
//! keeps its device alive for its own lifetime so that dropping the last
//! owner can still hop to the owning thread for handle deletion.

pub mod cache;
pub mod queue;

pub use self::cache::TextureCache;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use crate::backends::{self, Capabilities, ContextName, Visitor};
use crate::errors::{Error, Result};

use self::queue::WorkQueue;

/// A native graphics execution/state scope. At most one context is current
/// per owning thread at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphicsContext {
    name: ContextName,
}

impl GraphicsContext {
    /// The opaque identity of the native context.
    #[inline]
    pub fn name(self) -> ContextName {
        self.name
    }
}

pub struct Device {
    visitor: Mutex<Box<dyn Visitor>>,
    capabilities: Capabilities,

    main: WorkQueue,
    passive: WorkQueue,
    cache_queue: WorkQueue,
    cache: Mutex<TextureCache>,

    primary: GraphicsContext,
    passive_context: GraphicsContext,
    live: Mutex<HashSet<ContextName>>,
    currents: Mutex<HashMap<ThreadId, ContextName>>,
}

impl Device {
    /// Brings up a device over the given backend: spawns the three lanes,
    /// creates the primary context on the main lane and a passive context
    /// sharing its namespace on the passive lane.
    pub fn new(visitor: Box<dyn Visitor>) -> Result<Arc<Device>> {
        let capabilities = visitor.capabilities();
        let visitor = Mutex::new(visitor);

        let main = WorkQueue::new("glaze-main");
        let passive = WorkQueue::new("glaze-passive");
        let cache_queue = WorkQueue::new("glaze-texcache");

        let (primary, main_id) = main.run_sync(|| -> Result<_> {
            let mut v = visitor.lock().unwrap();
            unsafe {
                let ctx = v.create_context(None)?;
                v.make_current(Some(ctx))?;
                Ok((ctx, thread::current().id()))
            }
        })?;

        let (shared, passive_id) = passive.run_sync(|| -> Result<_> {
            let mut v = visitor.lock().unwrap();
            unsafe {
                let ctx = v.create_context(Some(primary))?;
                v.make_current(Some(ctx))?;
                Ok((ctx, thread::current().id()))
            }
        })?;

        let mut currents = HashMap::new();
        currents.insert(main_id, primary);
        currents.insert(passive_id, shared);

        let mut live = HashSet::new();
        live.insert(primary);
        live.insert(shared);

        info!(
            "Device up: primary context {} on the main lane, passive context {} sharing its namespace.",
            primary, shared
        );

        Ok(Arc::new(Device {
            visitor,
            capabilities,
            main,
            passive,
            cache_queue,
            cache: Mutex::new(TextureCache::new()),
            primary: GraphicsContext { name: primary },
            passive_context: GraphicsContext { name: shared },
            live: Mutex::new(live),
            currents: Mutex::new(currents),
        }))
    }

    /// A device over the in-memory backend; runs anywhere, GPU or not.
    pub fn headless() -> Result<Arc<Device>> {
        Device::new(backends::new_headless())
    }

    /// A device over the OpenGL backend. Function pointers must already be
    /// loaded by the embedder's windowing layer.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn opengl() -> Result<Arc<Device>> {
        Device::new(backends::new()?)
    }

    #[inline]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub(crate) fn visitor(&self) -> MutexGuard<'_, Box<dyn Visitor>> {
        self.visitor.lock().unwrap()
    }
}

/// Cross-thread execution.
impl Device {
    /// Executes `f` on the thread owning the primary context and blocks until
    /// it completes. Executes inline when called from that thread.
    #[inline]
    pub fn run_on_main_sync<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        self.main.run_sync(f)
    }

    /// Executes `f` on the thread owning the passive context and blocks until
    /// it completes. Executes inline when called from that thread.
    #[inline]
    pub fn run_on_passive_context_sync<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        self.passive.run_sync(f)
    }

    /// Executes `f` on the serial texture-cache lane and blocks until it
    /// completes. Executes inline when called from that lane.
    #[inline]
    pub fn run_on_texture_cache_queue_sync<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        self.cache_queue.run_sync(f)
    }
}

/// Context lifecycle and lookup.
impl Device {
    /// The context owned by the main lane.
    #[inline]
    pub fn primary_context(&self) -> GraphicsContext {
        self.primary
    }

    /// The context owned by the passive lane, sharing the primary's
    /// resource namespace.
    #[inline]
    pub fn passive_context(&self) -> GraphicsContext {
        self.passive_context
    }

    /// Creates a context sharing the primary's resource namespace without
    /// making it current anywhere.
    pub fn create_context(&self) -> Result<GraphicsContext> {
        let primary = self.primary.name;
        let ctx = self.run_on_main_sync(|| unsafe {
            self.visitor().create_context(Some(primary))
        })?;

        self.live.lock().unwrap().insert(ctx);
        Ok(GraphicsContext { name: ctx })
    }

    /// Makes `ctx` current on the calling thread, replacing whatever context
    /// was current there; `None` leaves the thread without a context.
    pub fn set_context(&self, ctx: Option<GraphicsContext>) -> Result<()> {
        if let Some(v) = ctx {
            if !self.live.lock().unwrap().contains(&v.name) {
                return Err(Error::ContextInvalid(v.name));
            }
        }

        unsafe {
            self.visitor().make_current(ctx.map(|v| v.name))?;
        }

        let id = thread::current().id();
        let mut currents = self.currents.lock().unwrap();
        match ctx {
            Some(v) => {
                currents.insert(id, v.name);
            }
            None => {
                currents.remove(&id);
            }
        }
        Ok(())
    }

    /// Creates a fresh shared-namespace context and makes it current on the
    /// calling thread.
    pub fn make_new_context(&self) -> Result<GraphicsContext> {
        let ctx = self.create_context()?;
        self.set_context(Some(ctx))?;
        Ok(ctx)
    }

    /// The context current on the calling thread, if any.
    pub fn current_context(&self) -> Option<GraphicsContext> {
        let id = thread::current().id();
        self.currents
            .lock()
            .unwrap()
            .get(&id)
            .map(|&name| GraphicsContext { name })
    }
}

/// Texture cache and GPU synchronization.
impl Device {
    /// Hands `f` the fast-path texture cache, valid only for the duration of
    /// the call; runs on the serial cache lane.
    pub fn use_fast_texture_cache<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut TextureCache) -> T + Send,
        T: Send,
    {
        self.cache_queue
            .run_sync(|| f(&mut self.cache.lock().unwrap()))
    }

    /// Invalidates the fast-path texture cache and deletes the names it
    /// owned. Consumers call this after they finish using cache-derived
    /// textures in a frame; otherwise stale entries may be reused.
    pub fn flush_texture_cache(&self) -> Result<()> {
        let retired = self
            .cache_queue
            .run_sync(|| self.cache.lock().unwrap().drain());

        if retired.is_empty() {
            return Ok(());
        }

        debug!("flushing texture cache: {} entries retired", retired.len());
        self.run_on_main_sync(|| {
            let mut v = self.visitor();
            for name in retired {
                unsafe {
                    v.delete_texture(name)?;
                }
            }
            Ok(())
        })
    }

    /// Inserts a GPU fence and waits it, establishing a happens-before edge
    /// between commands issued before the fence on this thread's context and
    /// commands issued afterwards on any context sharing its namespace.
    /// Required whenever resources written on the passive context are
    /// consumed on the primary one (or vice versa) within a frame.
    pub fn fence_sync(&self) -> Result<()> {
        unsafe { self.visitor().fence_sync() }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(err) = self.flush_texture_cache() {
            warn!("failed to flush the texture cache at teardown: {}", err);
        }

        let extra: Vec<ContextName> = {
            let live = self.live.lock().unwrap();
            live.iter()
                .cloned()
                .filter(|&v| v != self.primary.name && v != self.passive_context.name)
                .collect()
        };

        let passive = self.passive_context.name;
        self.passive.run_sync(|| {
            let mut v = self.visitor();
            unsafe {
                let _ = v.make_current(None);
                if let Err(err) = v.delete_context(passive) {
                    warn!("failed to delete the passive context: {}", err);
                }
            }
        });

        let primary = self.primary.name;
        self.main.run_sync(|| {
            let mut v = self.visitor();
            unsafe {
                for ctx in extra {
                    if let Err(err) = v.delete_context(ctx) {
                        warn!("failed to delete context {}: {}", ctx, err);
                    }
                }

                let _ = v.make_current(None);
                if let Err(err) = v.delete_context(primary) {
                    warn!("failed to delete the primary context: {}", err);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::headless::HeadlessVisitor;

    #[test]
    fn lanes_are_distinct_threads() {
        let device = Device::headless().unwrap();

        let main = device.run_on_main_sync(|| thread::current().id());
        let passive = device.run_on_passive_context_sync(|| thread::current().id());
        let cache = device.run_on_texture_cache_queue_sync(|| thread::current().id());

        assert_ne!(main, passive);
        assert_ne!(main, cache);
        assert_ne!(passive, cache);
        assert_ne!(main, thread::current().id());
    }

    #[test]
    fn nested_submission_executes_inline() {
        let device = Device::headless().unwrap();

        // Submitting to the passive lane from the passive lane itself must
        // run inline: same thread, no hop, no deadlock.
        let (outer, inner) = device.run_on_passive_context_sync(|| {
            let outer = thread::current().id();
            let inner = device.run_on_passive_context_sync(|| thread::current().id());
            (outer, inner)
        });
        assert_eq!(outer, inner);
    }

    #[test]
    fn lanes_own_their_contexts() {
        let device = Device::headless().unwrap();

        let on_main = device.run_on_main_sync(|| device.current_context());
        assert_eq!(on_main, Some(device.primary_context()));

        let on_passive = device.run_on_passive_context_sync(|| device.current_context());
        assert_eq!(on_passive, Some(device.passive_context()));

        // The calling thread owns no context unless it asks for one.
        assert_eq!(device.current_context(), None);
    }

    #[test]
    fn context_lifecycle_on_caller_threads() {
        let device = Device::headless().unwrap();

        let ctx = device.make_new_context().unwrap();
        assert_eq!(device.current_context(), Some(ctx));

        device.set_context(None).unwrap();
        assert_eq!(device.current_context(), None);

        device.set_context(Some(ctx)).unwrap();
        assert_eq!(device.current_context(), Some(ctx));
        device.set_context(None).unwrap();
    }

    #[test]
    fn rejects_foreign_contexts() {
        let a = Device::headless().unwrap();
        let b = Device::headless().unwrap();

        let ctx = a.make_new_context().unwrap();
        a.set_context(None).unwrap();

        match b.set_context(Some(ctx)) {
            Err(Error::ContextInvalid(_)) => (),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn fence_reaches_the_backend() {
        let visitor = HeadlessVisitor::new();
        let probe = visitor.clone();
        let device = Device::new(Box::new(visitor)).unwrap();

        device.fence_sync().unwrap();
        device
            .run_on_passive_context_sync(|| device.fence_sync())
            .unwrap();
        assert_eq!(probe.fence_count(), 2);
    }

    #[test]
    fn cross_lane_results_come_back() {
        let device = Device::headless().unwrap();
        let sum: u64 = device.run_on_main_sync(|| (0..100u64).sum());
        assert_eq!(sum, 4950);
    }

    #[test]
    fn texture_cache_scope_and_flush() {
        let device = Device::headless().unwrap();

        device.use_fast_texture_cache(|cache| {
            assert!(cache.is_empty());
        });

        device.flush_texture_cache().unwrap();
    }
}
