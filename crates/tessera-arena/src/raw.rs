//! Atomically swappable owned pointers with generation-deferred frees.
//!
//! This is the only module in the crate that contains `unsafe` code. An
//! [`AtomicBox`] owns a heap value that readers load without locking. The
//! writer replaces the value and receives a [`Retired`] that it must keep
//! on a generation hold list until every reader guard that could have
//! loaded the old pointer is gone; dropping the `Retired` frees it.
//! A [`OnceBox`] is set at most once by any thread and never replaced, so
//! its value lives as long as the box.
//!
//! Invariants the rest of the crate upholds:
//!
//! - Each family of boxes has exactly one [`WriterToken`], owned by the
//!   component that replaces them, and only that token is passed in.
//! - Guards passed to [`AtomicBox::load_with`] come from the generation
//!   handler that gates the owning component's hold list.
//! - A `Retired` is dropped only after the hold list reclaims it.

#![allow(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::generation::GenerationGuard;

/// Proof of being the single writer of a family of [`AtomicBox`]es.
///
/// Replacing a pointer requires `&mut WriterToken`, while writer-side loads
/// borrow it shared, so a value can never be retired while a writer-side
/// reference to it is alive.
#[derive(Debug)]
pub(crate) struct WriterToken {
    _private: (),
}

impl WriterToken {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

/// How a load is protected from concurrent frees.
#[derive(Clone, Copy)]
pub(crate) enum ReadAccess<'a> {
    /// A reader holding a generation guard.
    Reader(&'a GenerationGuard<'a>),
    /// The writer itself.
    Writer(&'a WriterToken),
}

/// Owned, atomically replaceable `Option<Box<X>>`.
pub(crate) struct AtomicBox<X: Send + Sync> {
    ptr: AtomicPtr<X>,
    _owns: PhantomData<Box<X>>,
}

impl<X: Send + Sync> AtomicBox<X> {
    pub(crate) fn new(value: Option<Box<X>>) -> Self {
        Self {
            ptr: AtomicPtr::new(value.map_or(ptr::null_mut(), Box::into_raw)),
            _owns: PhantomData,
        }
    }

    pub(crate) fn empty() -> Self {
        Self::new(None)
    }

    /// Load the current value, valid for as long as `access` is borrowed.
    pub(crate) fn load_with<'a>(&'a self, _access: ReadAccess<'a>) -> Option<&'a X> {
        let p = self.ptr.load(Ordering::Acquire);
        // SAFETY: `p` is null or came from `Box::into_raw` and has not been
        // freed. A reader's guard keeps any pointer replaced after the guard
        // was taken on the hold list until the guard drops. For the writer,
        // replacing requires `&mut WriterToken`, which cannot coexist with
        // the shared borrow carried by `access`.
        unsafe { p.as_ref() }
    }

    /// Writer-side load.
    pub(crate) fn load_by_writer<'a>(&'a self, writer: &'a WriterToken) -> Option<&'a X> {
        self.load_with(ReadAccess::Writer(writer))
    }

    /// Install `value`, returning the previous value for deferred release.
    pub(crate) fn replace(
        &self,
        _writer: &mut WriterToken,
        value: Option<Box<X>>,
    ) -> Option<Retired<X>> {
        let new = value.map_or(ptr::null_mut(), Box::into_raw);
        let old = self.ptr.swap(new, Ordering::AcqRel);
        NonNull::new(old).map(|ptr| Retired {
            ptr,
            _owns: PhantomData,
        })
    }

    /// Exclusive access to the value.
    pub(crate) fn get_mut(&mut self) -> Option<&mut X> {
        // SAFETY: `&mut self` rules out readers holding a reference obtained
        // through this box, and the pointer is null or a live `Box`.
        unsafe { self.ptr.get_mut().as_mut() }
    }

    /// Remove and return the value with exclusive access.
    pub(crate) fn take(&mut self) -> Option<Box<X>> {
        let p = std::mem::replace(self.ptr.get_mut(), ptr::null_mut());
        // SAFETY: `p` came from `Box::into_raw`; the slot no longer refers
        // to it, so ownership moves to the returned box exactly once.
        NonNull::new(p).map(|p| unsafe { Box::from_raw(p.as_ptr()) })
    }
}

impl<X: Send + Sync> Drop for AtomicBox<X> {
    fn drop(&mut self) {
        drop(self.take());
    }
}

impl<X: Send + Sync> fmt::Debug for AtomicBox<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let occupied = !self.ptr.load(Ordering::Relaxed).is_null();
        f.debug_struct("AtomicBox")
            .field("occupied", &occupied)
            .finish()
    }
}

/// Owned `Option<Box<X>>` that any thread may fill once, without locking.
///
/// Racing initializers each allocate; the loser frees its value and
/// returns the winner's.
pub(crate) struct OnceBox<X: Send + Sync> {
    ptr: AtomicPtr<X>,
    _owns: PhantomData<Box<X>>,
}

impl<X: Send + Sync> OnceBox<X> {
    pub(crate) fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }

    pub(crate) fn get(&self) -> Option<&X> {
        let p = self.ptr.load(Ordering::SeqCst);
        // SAFETY: `p` is null or a `Box` installed by `get_or_init`, which
        // is never replaced and freed only through `&mut self`.
        unsafe { p.as_ref() }
    }

    pub(crate) fn get_or_init(&self, init: impl FnOnce() -> Box<X>) -> &X {
        if let Some(value) = self.get() {
            return value;
        }
        let new = Box::into_raw(init());
        match self
            .ptr
            .compare_exchange(ptr::null_mut(), new, Ordering::SeqCst, Ordering::SeqCst)
        {
            // SAFETY: `new` is now owned by the box; see `get`.
            Ok(_) => unsafe { &*new },
            Err(current) => {
                // SAFETY: `new` was never published, so this is its only
                // owner. `current` is the installed value; see `get`.
                drop(unsafe { Box::from_raw(new) });
                unsafe { &*current }
            }
        }
    }
}

impl<X: Send + Sync> Drop for OnceBox<X> {
    fn drop(&mut self) {
        let p = std::mem::replace(self.ptr.get_mut(), ptr::null_mut());
        if let Some(p) = NonNull::new(p) {
            // SAFETY: `p` came from `Box::into_raw` in `get_or_init` and
            // `&mut self` rules out outstanding references.
            drop(unsafe { Box::from_raw(p.as_ptr()) });
        }
    }
}

impl<X: Send + Sync> fmt::Debug for OnceBox<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceBox")
            .field("set", &self.get().is_some())
            .finish()
    }
}

/// A value unlinked from its [`AtomicBox`], freed when dropped.
pub(crate) struct Retired<X> {
    ptr: NonNull<X>,
    _owns: PhantomData<Box<X>>,
}

// SAFETY: `Retired` uniquely owns its pointee, like `Box<X>`.
unsafe impl<X: Send> Send for Retired<X> {}
// SAFETY: shared access only hands out `&X`.
unsafe impl<X: Sync> Sync for Retired<X> {}

impl<X> Retired<X> {
    pub(crate) fn get(&self) -> &X {
        // SAFETY: the pointee stays allocated until `self` drops.
        unsafe { self.ptr.as_ref() }
    }

    /// Take back unique ownership once no reader can observe the value.
    pub(crate) fn into_box(self) -> Box<X> {
        let p = self.ptr.as_ptr();
        std::mem::forget(self);
        // SAFETY: `p` came from `Box::into_raw` and `forget` prevents the
        // double free `Drop` would otherwise perform.
        unsafe { Box::from_raw(p) }
    }
}

impl<X> Drop for Retired<X> {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `Box::into_raw` and is freed only here.
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }
}

impl<X> fmt::Debug for Retired<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retired").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationHandler;

    #[test]
    fn replace_returns_previous_value() {
        let mut writer = WriterToken::new();
        let slot = AtomicBox::new(Some(Box::new(1u32)));
        let old = slot.replace(&mut writer, Some(Box::new(2)));
        assert_eq!(old.map(|r| *r.get()), Some(1));
        assert_eq!(slot.load_by_writer(&writer), Some(&2));
    }

    #[test]
    fn guarded_load_sees_current_value() {
        let handler = GenerationHandler::new();
        let slot = AtomicBox::new(Some(Box::new(7u64)));
        let guard = handler.take_guard();
        assert_eq!(slot.load_with(ReadAccess::Reader(&guard)), Some(&7));
    }

    #[test]
    fn retired_value_outlives_unlink() {
        let mut writer = WriterToken::new();
        let slot = AtomicBox::new(Some(Box::new(String::from("old"))));
        let retired = slot.replace(&mut writer, None).unwrap();
        assert!(slot.load_by_writer(&writer).is_none());
        assert_eq!(retired.get(), "old");
        assert_eq!(*retired.into_box(), "old");
    }

    #[test]
    fn once_box_keeps_first_value() {
        let cell = OnceBox::new();
        assert!(cell.get().is_none());
        assert_eq!(*cell.get_or_init(|| Box::new(1u32)), 1);
        assert_eq!(*cell.get_or_init(|| Box::new(2u32)), 1);
        assert_eq!(cell.get(), Some(&1));
    }

    #[test]
    fn once_box_race_installs_one_value() {
        let cell = OnceBox::new();
        let seen: Vec<u32> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4u32)
                .map(|i| {
                    let cell = &cell;
                    s.spawn(move || *cell.get_or_init(|| Box::new(i)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(seen.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cell.get(), Some(&seen[0]));
    }

    #[test]
    fn take_empties_slot() {
        let mut slot = AtomicBox::new(Some(Box::new(5i32)));
        *slot.get_mut().unwrap() += 1;
        assert_eq!(slot.take().map(|b| *b), Some(6));
        assert!(slot.take().is_none());
        assert!(AtomicBox::<i32>::empty().get_mut().is_none());
    }
}
