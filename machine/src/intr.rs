//! 本核的中断开关。
//!
//! 快表没有跨中断的原子更新手段，摆弄它的期间必须关中断；
//! 关与开必须严格成对，嵌套时恢复到进入前的状态而不是无脑打开。

use core::sync::atomic::{AtomicBool, Ordering};

/// 中断使能位，上电为开。
///
/// 单核机器，Relaxed 足矣。
pub struct InterruptFlag {
    enabled: AtomicBool,
}

impl Default for InterruptFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptFlag {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    /// 关中断，返回负责恢复的守卫
    pub fn disable(&self) -> IntrGuard<'_> {
        let saved = self.enabled.swap(false, Ordering::Relaxed);
        IntrGuard { flag: self, saved }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

/// 析构时把使能位恢复成 `disable` 之前的样子
pub struct IntrGuard<'a> {
    flag: &'a InterruptFlag,
    saved: bool,
}

impl Drop for IntrGuard<'_> {
    fn drop(&mut self) {
        self.flag.enabled.store(self.saved, Ordering::Relaxed);
    }
}
