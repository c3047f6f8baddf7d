//! 本核的内存上下文：快表、当前地址空间，以及缺页处理。
//!
//! 快表是核内的硬件状态，没有跨中断的原子更新手段，
//! 对它的读改写一律在关中断下进行。这不是锁的替代品，
//! 而正是单核上对核内硬件应有的互斥纪律。

use alloc::sync::Arc;

use machine::{EntryFlag, FaultKind, InterruptFlag, TLB_ENTRIES, Tlb, TlbEntry};

use crate::address::{PhysAddr, VirtAddr};
use crate::address_space::AddressSpace;
use crate::sync::UpCell;

/// 缺页处理的失败上报。
///
/// 两种错误都送回出错线程的执行环境，照惯例了结掉那个用户计算，
/// 决不重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// 地址不落在任何区域、写到只读页，或者当前根本没有地址空间
    AccessViolation,
    /// 故障码不是硬件会报的任何一种
    InvalidArgument,
}

/// 跨核快表击落请求。
///
/// 本内核明确只支持单核，这种请求没有对象可发，
/// 出现即说明内存模型已经乱了。
#[derive(Debug)]
pub struct TlbShootdown {
    pub vaddr: VirtAddr,
}

pub struct Processor {
    tlb: UpCell<Tlb>,
    intr: InterruptFlag,
    current: UpCell<Option<Arc<UpCell<AddressSpace>>>>,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor {
    pub const fn new() -> Self {
        Self {
            tlb: UpCell::new(Tlb::new()),
            intr: InterruptFlag::new(),
            current: UpCell::new(None),
        }
    }

    /// 切换当前地址空间。
    ///
    /// 装上新空间时整张快表作废：本机没有ASID，
    /// 上一个空间的任何残留表项都不允许再被命中。
    /// 传入`None`（内核线程、空闲核）只清空当前槽位，快表不动。
    pub fn activate(&self, space: Option<&Arc<UpCell<AddressSpace>>>) {
        *self.current.exclusive_access() = space.cloned();
        if space.is_some() {
            let _guard = self.intr.disable();
            self.tlb.exclusive_access().invalidate_all();
        }
    }

    /// 与[`Processor::activate`]对偶。本实现无事可做，
    /// 过期表项统一由下一次激活时的全表作废处理。
    pub fn deactivate(&self) {}

    pub fn current(&self) -> Option<Arc<UpCell<AddressSpace>>> {
        self.current.exclusive_access().clone()
    }

    /// 缺页处理：`code`是硬件报的故障码，`addr`是出错的虚拟地址。
    ///
    /// 成功即表示映射已装进快表，重试那条访存就会命中。
    pub fn handle_fault(&self, code: usize, addr: VirtAddr) -> Result<(), FaultError> {
        let Ok(kind) = FaultKind::try_from(code) else {
            return Err(FaultError::InvalidArgument);
        };

        log::trace!("vm fault: {kind:?} at {addr:?}");

        // 写到只读页。映射本身没毛病，不必回填，按访问违例上报
        if kind == FaultKind::Modified {
            return Err(FaultError::AccessViolation);
        }

        // 启动早期没有当前地址空间。上报而不是重试，免得陷入无限缺页
        let Some(space) = self.current.exclusive_access().clone() else {
            return Err(FaultError::AccessViolation);
        };
        let space = space.exclusive_access();

        assert!(
            space.is_populated(),
            "fault taken on an address space without backing frames"
        );

        let vpn = addr.floor();
        let Some(translation) = space.resolve(addr) else {
            return Err(FaultError::AccessViolation);
        };
        drop(space);

        let pa = PhysAddr::from(translation.ppn);
        assert!(pa.is_aligned());

        let flags = if translation.writable {
            EntryFlag::V | EntryFlag::D
        } else {
            // 装载完成后的代码页：有效但不可写
            EntryFlag::V.into()
        };
        let entry = TlbEntry::new(VirtAddr::from(vpn).into(), pa.into(), flags);

        // 摆弄快表期间不许本核的中断插进来
        let _guard = self.intr.disable();
        let mut tlb = self.tlb.exclusive_access();
        match (0..TLB_ENTRIES).find(|&i| !tlb.read(i).is_valid()) {
            Some(index) => tlb.write(index, entry),
            // 没有空槽就随机逐一个出去，快表写满不算失败
            None => {
                tlb.write_random(entry);
            }
        }

        log::trace!("vm: {vpn:?} -> {:?}", translation.ppn);
        Ok(())
    }

    /// 模拟一次用户访存：走快表翻译，未命中或权限不足时
    /// 原样给出硬件会报的故障
    pub fn access(&self, va: VirtAddr, write: bool) -> Result<PhysAddr, FaultKind> {
        self.tlb
            .exclusive_session(|tlb| tlb.access(va.into(), write))
            .map(PhysAddr::from)
    }

    /// 查快表里是否有覆盖`va`的有效表项，相当于 probe 指令
    pub fn probe(&self, va: VirtAddr) -> Option<TlbEntry> {
        let page = usize::from(VirtAddr::from(va.floor()));
        self.tlb.exclusive_session(|tlb| tlb.lookup(page))
    }

    pub fn shootdown(&self, request: &TlbShootdown) -> ! {
        panic!("tlb shootdown on a single-core kernel: {request:?}");
    }

    pub fn shootdown_all(&self) -> ! {
        panic!("tlb shootdown on a single-core kernel");
    }
}
