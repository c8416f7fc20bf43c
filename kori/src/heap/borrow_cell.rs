use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicIsize, Ordering::{Acquire, Relaxed, Release}},
};

/// Borrow flag value while a mutable borrow exists.
const WRITING: isize = -1;

/// Like [`RefCell`][`std::cell::RefCell`], but shareable across threads.
///
/// The borrow flag is atomic and borrowing never blocks:
/// a borrow that conflicts with an existing borrow returns [`None`].
/// The object protocol ensures that mutable borrows only ever
/// happen on the owning thread, so cross-thread readers
/// only meet frozen objects, which nobody borrows mutably.
pub struct BorrowCell<T>
{
    /// Number of shared borrows, or [`WRITING`].
    borrow: AtomicIsize,

    inner: UnsafeCell<T>,
}

// SAFETY: Access to inner is arbitrated by the atomic borrow flag.
unsafe impl<T> Send for BorrowCell<T> where T: Send { }
unsafe impl<T> Sync for BorrowCell<T> where T: Send + Sync { }

pub struct Ref<'a, T>
{
    cell: &'a BorrowCell<T>,
}

pub struct RefMut<'a, T>
{
    cell: &'a BorrowCell<T>,
}

impl<T> BorrowCell<T>
{
    pub const fn new(value: T) -> Self
    {
        Self{borrow: AtomicIsize::new(0), inner: UnsafeCell::new(value)}
    }

    /// Borrow the contents immutably.
    ///
    /// Returns [`None`] if the contents are mutably borrowed.
    pub fn try_borrow(&self) -> Option<Ref<T>>
    {
        let mut current = self.borrow.load(Relaxed);
        loop {
            if current == WRITING || current == isize::MAX {
                return None;
            }
            match self.borrow.compare_exchange_weak(
                current, current + 1, Acquire, Relaxed,
            ) {
                Ok(..) => return Some(Ref{cell: self}),
                Err(actual) => current = actual,
            }
        }
    }

    /// Borrow the contents mutably.
    ///
    /// Returns [`None`] if the contents are borrowed at all.
    pub fn try_borrow_mut(&self) -> Option<RefMut<T>>
    {
        self.borrow.compare_exchange(0, WRITING, Acquire, Relaxed)
            .ok()
            .map(|_| RefMut{cell: self})
    }

    /// Whether a mutable borrow currently exists.
    pub fn is_mutably_borrowed(&self) -> bool
    {
        self.borrow.load(Acquire) == WRITING
    }
}

impl<'a, T> Deref for Ref<'a, T>
{
    type Target = T;

    fn deref(&self) -> &Self::Target
    {
        // SAFETY: The borrow flag counts this shared borrow.
        unsafe { &*self.cell.inner.get() }
    }
}

impl<'a, T> Drop for Ref<'a, T>
{
    fn drop(&mut self)
    {
        self.cell.borrow.fetch_sub(1, Release);
    }
}

impl<'a, T> Deref for RefMut<'a, T>
{
    type Target = T;

    fn deref(&self) -> &Self::Target
    {
        // SAFETY: The borrow flag records this exclusive borrow.
        unsafe { &*self.cell.inner.get() }
    }
}

impl<'a, T> DerefMut for RefMut<'a, T>
{
    fn deref_mut(&mut self) -> &mut Self::Target
    {
        // SAFETY: The borrow flag records this exclusive borrow.
        unsafe { &mut *self.cell.inner.get() }
    }
}

impl<'a, T> Drop for RefMut<'a, T>
{
    fn drop(&mut self)
    {
        self.cell.borrow.store(0, Release);
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn shared_borrows_coexist()
    {
        let cell = BorrowCell::new(1);
        let a = cell.try_borrow().unwrap();
        let b = cell.try_borrow().unwrap();
        assert_eq!(*a + *b, 2);
        assert!(cell.try_borrow_mut().is_none());
    }

    #[test]
    fn mutable_borrow_is_exclusive()
    {
        let cell = BorrowCell::new(1);
        let mut a = cell.try_borrow_mut().unwrap();
        *a = 2;
        assert!(cell.is_mutably_borrowed());
        assert!(cell.try_borrow().is_none());
        assert!(cell.try_borrow_mut().is_none());
        drop(a);
        assert!(!cell.is_mutably_borrowed());
        assert_eq!(*cell.try_borrow().unwrap(), 2);
    }
}
