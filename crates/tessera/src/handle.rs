//! The generic native handle and its acquire guards.
//!
//! A [`Handle<K>`] owns one pointer of resource kind `K`. Native calls go
//! through a [`Guard`] (borrowed) or [`OwnedGuard`] (owns a handle clone);
//! while any guard is outstanding a release request is deferred, so the
//! pointer a guard hands out stays valid until the guard drops.
//!
//! Teardown order is fixed: the native free, then the attached state, then
//! the parent guards.

use crate::error::{Error, Result};
use crate::resource::Resource;
use crate::runtime::Runtime;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use tessera_sys::{Api, TESSERA_OK};
use tracing::{debug, trace, warn};

/// A raw resource pointer that may cross threads.
struct RawPtr<T>(NonNull<T>);

// SAFETY: the pointer is an opaque token; the engine resources it names are
// thread-safe and the layer never dereferences it.
unsafe impl<T> Send for RawPtr<T> {}
// SAFETY: see above.
unsafe impl<T> Sync for RawPtr<T> {}

impl<T> Clone for RawPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RawPtr<T> {}

struct State<K: Resource> {
    raw: Option<RawPtr<K::Raw>>,
    parent: Option<K::Parent>,
    guards: usize,
    release_requested: bool,
}

impl<K: Resource> State<K> {
    /// Takes the pointer and parent out for teardown, if still present.
    fn take(&mut self) -> Option<(RawPtr<K::Raw>, K::Parent)> {
        let raw = self.raw.take()?;
        let parent = self.parent.take()?;
        Some((raw, parent))
    }
}

struct Inner<K: Resource> {
    runtime: Arc<Runtime>,
    owns: bool,
    state: Mutex<State<K>>,
    attached: Mutex<K::Attached>,
}

impl<K: Resource> Inner<K> {
    fn teardown(&self, raw: RawPtr<K::Raw>, parent: K::Parent) {
        if self.owns {
            // SAFETY: `take` hands the pointer out exactly once, and the
            // parent guards are still held.
            let rc = unsafe { K::free(self.runtime.api(), &parent, raw.0.as_ptr()) };
            if rc == TESSERA_OK {
                trace!(kind = K::NAME, ptr = ?raw.0, "freed native resource");
            } else {
                warn!(kind = K::NAME, status = rc, "failed to free native resource");
            }
        }
        let attached = std::mem::take(&mut *self.attached.lock());
        drop(attached);
        drop(parent);
    }

    fn unguard(&self) {
        let taken = {
            let mut state = self.state.lock();
            state.guards -= 1;
            if state.guards == 0 && state.release_requested {
                state.take()
            } else {
                None
            }
        };
        if let Some((raw, parent)) = taken {
            trace!(kind = K::NAME, "running deferred release");
            self.teardown(raw, parent);
        }
    }
}

impl<K: Resource> Drop for Inner<K> {
    fn drop(&mut self) {
        if let Some((raw, parent)) = self.state.get_mut().take() {
            debug!(kind = K::NAME, "releasing native resource on drop");
            self.teardown(raw, parent);
        }
    }
}

/// Owner of one native resource of kind `K`.
///
/// Clones share the resource; it is freed by an explicit [`release`] or
/// when the last clone drops.
///
/// [`release`]: Handle::release
pub struct Handle<K: Resource> {
    inner: Arc<Inner<K>>,
}

impl<K: Resource> Clone for Handle<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Resource> Handle<K> {
    /// Allocates a resource.
    ///
    /// `alloc` runs while `parent` (the owned guards on every parent) is
    /// held, and writes the new pointer to its out-parameter. A failed
    /// status or a null pointer never yields a handle.
    pub fn create<F>(runtime: &Arc<Runtime>, parent: K::Parent, alloc: F) -> Result<Self>
    where
        F: FnOnce(&K::Parent, *mut *mut K::Raw) -> Result<()>,
    {
        let mut raw: *mut K::Raw = ptr::null_mut();
        if let Err(e) = alloc(&parent, ptr::addr_of_mut!(raw)) {
            if !raw.is_null() {
                // SAFETY: the engine handed `raw` out and no handle owns it yet.
                let rc = unsafe { K::free(runtime.api(), &parent, raw) };
                debug!(kind = K::NAME, status = rc, "freed resource from a failed allocation");
            }
            return Err(match e {
                Error::Native { message, .. } => Error::Allocation {
                    kind: K::NAME,
                    message,
                },
                other => other,
            });
        }
        let handle = Self::adopt(runtime, parent, raw, true)?;
        trace!(kind = K::NAME, ptr = ?raw, "allocated native resource");
        Ok(handle)
    }

    /// Wraps a pointer the engine returned. Unowned handles are never freed
    /// by the layer.
    pub fn adopt(
        runtime: &Arc<Runtime>,
        parent: K::Parent,
        raw: *mut K::Raw,
        owns: bool,
    ) -> Result<Self> {
        let raw = NonNull::new(raw).ok_or_else(|| Error::Allocation {
            kind: K::NAME,
            message: "engine returned a null pointer".to_owned(),
        })?;
        Ok(Self {
            inner: Arc::new(Inner {
                runtime: Arc::clone(runtime),
                owns,
                state: Mutex::new(State {
                    raw: Some(RawPtr(raw)),
                    parent: Some(parent),
                    guards: 0,
                    release_requested: false,
                }),
                attached: Mutex::new(K::Attached::default()),
            }),
        })
    }

    /// Acquires the resource for the duration of the returned guard.
    pub fn acquire(&self) -> Result<Guard<'_, K>> {
        let ptr = self.inner.enter()?;
        Ok(Guard { handle: self, ptr })
    }

    /// Like [`acquire`](Self::acquire), but the guard owns a handle clone.
    pub fn acquire_owned(&self) -> Result<OwnedGuard<K>> {
        let ptr = self.inner.enter()?;
        Ok(OwnedGuard {
            handle: self.clone(),
            ptr: RawPtr(ptr),
        })
    }

    /// Releases the resource.
    ///
    /// Idempotent. With guards outstanding the free is deferred until the
    /// last one drops; the handle refuses new acquisitions either way.
    pub fn release(&self) {
        let taken = {
            let mut state = self.inner.state.lock();
            if state.raw.is_none() || state.release_requested {
                return;
            }
            state.release_requested = true;
            if state.guards > 0 {
                trace!(kind = K::NAME, guards = state.guards, "release deferred");
                None
            } else {
                state.take()
            }
        };
        if let Some((raw, parent)) = taken {
            self.inner.teardown(raw, parent);
        }
    }

    /// Returns true once a release was requested.
    pub fn is_released(&self) -> bool {
        let state = self.inner.state.lock();
        state.raw.is_none() || state.release_requested
    }

    /// Number of guards currently held.
    pub fn outstanding_guards(&self) -> usize {
        self.inner.state.lock().guards
    }

    /// Whether the layer frees the resource.
    pub fn owns_resource(&self) -> bool {
        self.inner.owns
    }

    /// Runtime the handle calls into.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.inner.runtime
    }

    /// Returns true when both handles share one resource.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<K: Resource> Inner<K> {
    fn enter(&self) -> Result<NonNull<K::Raw>> {
        let mut state = self.state.lock();
        match state.raw {
            Some(raw) if !state.release_requested => {
                state.guards += 1;
                Ok(raw.0)
            }
            _ => Err(Error::Released { kind: K::NAME }),
        }
    }
}

impl<K: Resource> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Handle")
            .field("kind", &K::NAME)
            .field("ptr", &state.raw.map(|r| r.0))
            .field("owns", &self.inner.owns)
            .field("guards", &state.guards)
            .field("release_requested", &state.release_requested)
            .finish()
    }
}

/// Scoped proof that a handle is alive.
pub struct Guard<'h, K: Resource> {
    handle: &'h Handle<K>,
    ptr: NonNull<K::Raw>,
}

impl<K: Resource> Guard<'_, K> {
    /// The raw pointer, valid while the guard lives.
    pub fn as_ptr(&self) -> *mut K::Raw {
        self.ptr.as_ptr()
    }

    /// Entry points of the handle's runtime.
    pub fn api(&self) -> &Api {
        self.handle.inner.runtime.api()
    }

    /// Runtime of the handle.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.handle.inner.runtime
    }

    /// Locks the attached state.
    pub fn attached(&self) -> MutexGuard<'_, K::Attached> {
        self.handle.inner.attached.lock()
    }

    /// The guarded handle.
    pub fn handle(&self) -> &Handle<K> {
        self.handle
    }
}

impl<K: Resource> Drop for Guard<'_, K> {
    fn drop(&mut self) {
        self.handle.inner.unguard();
    }
}

/// A guard that owns a clone of its handle.
///
/// Used for parent links and for payloads that outlive a call frame.
pub struct OwnedGuard<K: Resource> {
    handle: Handle<K>,
    ptr: RawPtr<K::Raw>,
}

impl<K: Resource> OwnedGuard<K> {
    /// The raw pointer, valid while the guard lives.
    pub fn as_ptr(&self) -> *mut K::Raw {
        self.ptr.0.as_ptr()
    }

    /// Entry points of the handle's runtime.
    pub fn api(&self) -> &Api {
        self.handle.inner.runtime.api()
    }

    /// Runtime of the handle.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.handle.inner.runtime
    }

    /// Locks the attached state.
    pub fn attached(&self) -> MutexGuard<'_, K::Attached> {
        self.handle.inner.attached.lock()
    }

    /// The guarded handle.
    pub fn handle(&self) -> &Handle<K> {
        &self.handle
    }
}

impl<K: Resource> Drop for OwnedGuard<K> {
    fn drop(&mut self) {
        self.handle.inner.unguard();
    }
}

impl<K: Resource> fmt::Debug for OwnedGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedGuard")
            .field("kind", &K::NAME)
            .field("ptr", &self.ptr.0)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource;
    use crate::test_support::runtime;
    use tessera_sys::tessera_config_t;

    fn config_handle() -> Handle<resource::Config> {
        let rt = runtime();
        Handle::<resource::Config>::create(&rt, (), |_, out| {
            let mut err = ptr::null_mut();
            let rc = unsafe { (rt.api().tessera_config_alloc)(out, &mut err) };
            crate::error::check_out_param(&rt, rc, err)
        })
        .unwrap()
    }

    fn addr(ptr: *mut tessera_config_t) -> usize {
        ptr as usize
    }

    #[test]
    fn release_is_idempotent() {
        let handle = config_handle();
        let ptr = addr(handle.acquire().unwrap().as_ptr());

        handle.release();
        handle.release();
        drop(handle);

        assert_eq!(tessera_sim::free_count(ptr), 1);
        assert!(tessera_sim::violations_for(ptr).is_empty());
    }

    #[test]
    fn acquire_after_release_fails() {
        let handle = config_handle();
        handle.release();
        assert!(handle.is_released());
        assert!(matches!(
            handle.acquire(),
            Err(Error::Released { kind: "config" })
        ));
        assert!(matches!(handle.acquire_owned(), Err(Error::Released { .. })));
    }

    #[test]
    fn guard_defers_release() {
        let handle = config_handle();
        let guard = handle.acquire_owned().unwrap();
        let ptr = addr(guard.as_ptr());
        assert_eq!(handle.outstanding_guards(), 1);

        handle.release();
        assert!(handle.is_released());
        assert!(tessera_sim::is_live(ptr));
        assert_eq!(tessera_sim::free_count(ptr), 0);

        drop(guard);
        assert!(!tessera_sim::is_live(ptr));
        assert_eq!(tessera_sim::free_count(ptr), 1);
    }

    #[test]
    fn last_clone_drop_frees() {
        let handle = config_handle();
        let clone = handle.clone();
        let ptr = addr(handle.acquire().unwrap().as_ptr());

        drop(handle);
        assert!(tessera_sim::is_live(ptr));
        drop(clone);
        assert_eq!(tessera_sim::free_count(ptr), 1);
    }

    #[test]
    fn unowned_handle_is_not_freed() {
        let owner = config_handle();
        let ptr = owner.acquire().unwrap().as_ptr();
        let borrowed = Handle::<resource::Config>::adopt(&runtime(), (), ptr, false).unwrap();
        assert!(!borrowed.owns_resource());

        borrowed.release();
        assert!(tessera_sim::is_live(addr(ptr)));
        drop(owner);
        assert_eq!(tessera_sim::free_count(addr(ptr)), 1);
    }

    #[test]
    fn null_pointer_is_allocation_error() {
        let err = Handle::<resource::Config>::create(&runtime(), (), |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, Error::Allocation { kind: "config", .. }));
    }

    #[test]
    fn failed_alloc_frees_the_written_pointer() {
        let rt = runtime();
        let written = std::cell::Cell::new(0usize);
        let err = Handle::<resource::Config>::create(&rt, (), |_, out| {
            let mut err = ptr::null_mut();
            let rc = unsafe { (rt.api().tessera_config_alloc)(out, &mut err) };
            crate::error::check_out_param(&rt, rc, err)?;
            written.set(addr(unsafe { *out }));
            Err(Error::usage("rejected after allocation"))
        })
        .unwrap_err();

        assert!(matches!(err, Error::Usage { .. }));
        let ptr = written.get();
        assert_ne!(ptr, 0);
        assert!(!tessera_sim::is_live(ptr));
        assert_eq!(tessera_sim::free_count(ptr), 1);
        assert!(tessera_sim::violations_for(ptr).is_empty());
    }

    #[test]
    fn concurrent_acquire() {
        let handle = config_handle();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        let guard = handle.acquire().unwrap();
                        assert!(!guard.as_ptr().is_null());
                    }
                });
            }
        });
        assert_eq!(handle.outstanding_guards(), 0);
    }
}
