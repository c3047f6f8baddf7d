//! 单核下的独占访问单元。
//!
//! 本机只有一个核，核内状态（快表、当前地址空间）不会被另一个核
//! 同时摸到；`UpCell` 据此对 `RefCell` 声明 `Sync`。
//! 借用冲突即是违反了"临界区不重入"的纪律，直接panic。

use core::cell::{RefCell, RefMut};

#[derive(Debug, Default)]
pub struct UpCell<T> {
    inner: RefCell<T>,
}

unsafe impl<T> Sync for UpCell<T> {}

impl<T> UpCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: RefCell::new(value),
        }
    }

    /// Panic if the data has been borrowed.
    pub fn exclusive_access(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }

    pub fn exclusive_session<F, V>(&self, f: F) -> V
    where
        F: FnOnce(&mut T) -> V,
    {
        let mut inner = self.exclusive_access();
        f(&mut inner)
    }
}
