//! The contract shared by every bindable GPU object.
//!
//! A bindable object owns an opaque non-zero name and a binding target
//! (texture unit, buffer target, framebuffer target, vertex-array target).
//! At most one name is current per target per context; binding a new name
//! implicitly un-currents the previous one. Unbinding only consults the
//! target, never the instance — it restores the target to none-current no
//! matter which object was bound.

use crate::backends::ResourceName;
use crate::errors::Result;

pub trait Bindable {
    /// The opaque non-zero name of the native resource. Zero means the
    /// resource is not (or no longer) allocated.
    fn name(&self) -> ResourceName;

    /// Makes this name current on its target for the calling thread's
    /// context.
    fn bind(&self) -> Result<()>;

    /// Restores this object's target to none-current.
    fn unbind(&self) -> Result<()>;

    /// Binds, handing back a guard that unconditionally unbinds when
    /// dropped — on normal exit, on `?`-style early return, and during
    /// unwinding alike.
    fn bind_scoped(&self) -> Result<BindGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.bind()?;
        Ok(BindGuard { resource: self })
    }
}

/// Scoped-acquisition token of a binding; see [`Bindable::bind_scoped`].
#[must_use = "dropping the guard is what unbinds; binding for no statements is a bug"]
pub struct BindGuard<'a, T: Bindable> {
    resource: &'a T,
}

impl<'a, T: Bindable> Drop for BindGuard<'a, T> {
    fn drop(&mut self) {
        if let Err(err) = self.resource.unbind() {
            error!("failed to unbind {}: {}", self.resource.name(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};

    struct FakeBuffer {
        bound: Cell<bool>,
        binds: Cell<u32>,
        unbinds: Cell<u32>,
    }

    impl FakeBuffer {
        fn new() -> Self {
            FakeBuffer {
                bound: Cell::new(false),
                binds: Cell::new(0),
                unbinds: Cell::new(0),
            }
        }
    }

    impl Bindable for FakeBuffer {
        fn name(&self) -> ResourceName {
            1
        }

        fn bind(&self) -> Result<()> {
            self.bound.set(true);
            self.binds.set(self.binds.get() + 1);
            Ok(())
        }

        fn unbind(&self) -> Result<()> {
            self.bound.set(false);
            self.unbinds.set(self.unbinds.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn scoped_bind_is_balanced() {
        let buf = FakeBuffer::new();
        {
            let _guard = buf.bind_scoped().unwrap();
            assert!(buf.bound.get());
        }
        assert!(!buf.bound.get());
        assert_eq!(buf.binds.get(), buf.unbinds.get());
    }

    #[test]
    fn scoped_bind_unbinds_on_early_return() {
        let buf = FakeBuffer::new();

        fn early(buf: &FakeBuffer) -> Result<u32> {
            let _guard = buf.bind_scoped()?;
            Err(Error::OutOfBounds)?;
            Ok(0)
        }

        assert!(early(&buf).is_err());
        assert!(!buf.bound.get());
    }

    #[test]
    fn scoped_bind_unbinds_during_unwinding() {
        let buf = FakeBuffer::new();
        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = buf.bind_scoped().unwrap();
            panic!("render pass exploded");
        }));

        assert!(caught.is_err());
        assert!(!buf.bound.get());
    }

    #[test]
    fn rebinding_replaces_the_current_name() {
        // Nested guards: the inner unbind un-currents the target even though
        // the outer object was bound first; that is the documented
        // at-most-one-current-per-target rule, not a bug.
        let a = FakeBuffer::new();
        let b = FakeBuffer::new();

        let _ga = a.bind_scoped().unwrap();
        {
            let _gb = b.bind_scoped().unwrap();
            assert!(b.bound.get());
        }
        assert!(!b.bound.get());
    }
}
