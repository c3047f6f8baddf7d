//! 地址空间由最多两个普通区域（通常是代码与数据）加一个
//! 固定大小的用户栈组成。区域的虚拟范围连续，
//! 背后的物理页帧却逐页独立分配，彼此不必相邻，
//! 每个区域因此记一个逐页的帧号数组。
//!
//! 生命周期：空壳创建 → 划定区域（只定虚拟边界）→
//! 装载准备（逐页分配并清零物理帧）→ 可以上核运行 →
//! 析构时所有页帧原路退回分配器。
//! 释放可能历时较长，不要在关中断的临界区里丢弃地址空间。

use alloc::sync::Arc;
use alloc::vec::Vec;

use enumflags2::{BitFlags, bitflags};

use crate::address::{PhysPageNum, VirtAddr, VirtPageNum};
use crate::config::{MAX_REGIONS, PAGE_SIZE, STACK_PAGES, USER_STACK};
use crate::frame_allocator::{self, Frame, FrameAllocator};

/// 区域的访问权限。
///
/// 目前只记录不执行：装载完成前所有页一律可读写，
/// 装载完成后仅头一个区域（代码）变为只读。
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum MapPermission {
    R = 0b001,
    W = 0b010,
    X = 0b100,
}

pub struct AddressSpace {
    /// 有序的普通区域，缺页时按先后顺序匹配
    regions: Vec<Region>,
    stack: Region,
    /// 程序装载是否已完成，决定代码页的写保护
    load_complete: bool,
    allocator: Arc<FrameAllocator>,
}

struct Region {
    start: VirtPageNum,
    pages: usize,
    /// 逐页的物理帧，`prepare_load`之前为空
    frames: Vec<Frame>,
    permission: BitFlags<MapPermission>,
}

/// [`AddressSpace::resolve`]的结果：某虚拟页背后的物理帧及其写策略
#[derive(Debug, Clone, Copy)]
pub struct Translation {
    pub ppn: PhysPageNum,
    pub writable: bool,
}

impl AddressSpace {
    pub fn new(allocator: Arc<FrameAllocator>) -> Self {
        let stack_base = USER_STACK - STACK_PAGES * PAGE_SIZE;
        Self {
            regions: Vec::new(),
            stack: Region::new(
                VirtAddr::from_raw(stack_base),
                STACK_PAGES * PAGE_SIZE,
                MapPermission::R | MapPermission::W,
            ),
            load_complete: false,
            allocator,
        }
    }

    /// 划定一个普通区域：基址向下、长度向上对齐到页。
    /// 只登记虚拟边界，物理帧留待装载准备时分配。
    pub fn define_region(
        &mut self,
        start: VirtAddr,
        len: usize,
        permission: BitFlags<MapPermission>,
    ) -> Result<(), TooManyRegions> {
        if self.regions.len() >= MAX_REGIONS {
            log::warn!("too many regions in one address space");
            return Err(TooManyRegions);
        }
        self.regions.push(Region::new(start, len, permission));
        Ok(())
    }

    /// 为全部区域（含栈）逐页分配清零的物理帧。
    ///
    /// 半途耗尽时原样返回错误，已经到手的帧留在数组里，
    /// 调用者此时应当销毁整个地址空间，析构会把它们如数退还。
    pub fn prepare_load(&mut self) -> Result<(), OutOfMemory> {
        let allocator = Arc::clone(&self.allocator);
        for region in self.regions.iter_mut().chain([&mut self.stack]) {
            region.populate(&allocator)?;
        }
        Ok(())
    }

    /// 宣告程序装载完成。此后代码区域的缺页装出来的映射是只读的，
    /// 装载器自己写页的窗口到此关闭。
    pub fn complete_load(&mut self) {
        self.load_complete = true;
    }

    /// 用户栈顶。栈必须已经有了物理帧，否则这个空间根本没法上核。
    pub fn stack_top(&self) -> VirtAddr {
        assert!(
            self.stack.is_populated(),
            "stack queried before prepare_load"
        );
        VirtAddr::from_raw(USER_STACK)
    }

    /// 复制出一个形状相同、物理帧全新的地址空间。
    ///
    /// 先照搬各区域的虚拟边界，再走一遍装载准备拿新帧，
    /// 最后逐页把内容搬过去。两边的帧号集合不相交。
    /// 复制期间源空间被本次借用按住，不可能被并发销毁。
    pub fn copy(&self) -> Result<Self, OutOfMemory> {
        let mut new = Self::new(Arc::clone(&self.allocator));
        for region in &self.regions {
            new.regions.push(region.shape());
        }
        new.prepare_load()?;

        for (dst, src) in new.regions.iter().zip(&self.regions) {
            dst.copy_contents_from(src);
        }
        new.stack.copy_contents_from(&self.stack);

        Ok(new)
    }

    /// 查出虚拟地址落在哪个区域、背后是哪个物理帧。
    /// 匹配顺序：各普通区域按划定的先后，最后是栈；都不中即越界。
    pub fn resolve(&self, va: VirtAddr) -> Option<Translation> {
        let vpn = va.floor();

        for (i, region) in self.regions.iter().enumerate() {
            if region.contains(vpn) {
                return region.frame_of(vpn).map(|ppn| Translation {
                    ppn,
                    // 只有头一个区域（代码）在装载完成后受写保护
                    writable: !(i == 0 && self.load_complete),
                });
            }
        }

        if self.stack.contains(vpn) {
            return self
                .stack
                .frame_of(vpn)
                .map(|ppn| Translation { ppn, writable: true });
        }

        None
    }

    /// 全部区域（含栈）是否都已配齐物理帧
    pub fn is_populated(&self) -> bool {
        !self.regions.is_empty()
            && self.regions.iter().all(Region::is_populated)
            && self.stack.is_populated()
    }
}

impl Region {
    fn new(start_va: VirtAddr, len: usize, permission: BitFlags<MapPermission>) -> Self {
        // 基址切到页边界，切掉的部分补进长度里
        let start = start_va.floor();
        let pages = (start_va.page_offset() + len).div_ceil(PAGE_SIZE);
        Self {
            start,
            pages,
            frames: Vec::new(),
            permission,
        }
    }

    /// 同样的虚拟边界与权限，不带物理帧
    fn shape(&self) -> Self {
        Self {
            start: self.start,
            pages: self.pages,
            frames: Vec::new(),
            permission: self.permission,
        }
    }

    fn contains(&self, vpn: VirtPageNum) -> bool {
        let vpn = usize::from(vpn);
        let start = usize::from(self.start);
        (start..start + self.pages).contains(&vpn)
    }

    fn frame_of(&self, vpn: VirtPageNum) -> Option<PhysPageNum> {
        let index = usize::from(vpn) - usize::from(self.start);
        self.frames.get(index).map(|frame| frame.ppn)
    }

    fn is_populated(&self) -> bool {
        self.frames.len() == self.pages
    }

    fn populate(&mut self, allocator: &Arc<FrameAllocator>) -> Result<(), OutOfMemory> {
        assert!(self.frames.is_empty(), "region populated twice");
        for _ in 0..self.pages {
            let frame = frame_allocator::alloc(allocator).ok_or(OutOfMemory)?;
            self.frames.push(frame);
        }
        Ok(())
    }

    /// 逐页照搬内容。按较短的一方截止，形状一致时即是整段。
    fn copy_contents_from(&self, src: &Self) {
        for (dst, src) in self.frames.iter().zip(&src.frames) {
            dst.ppn.page_bytes_mut().copy_from_slice(src.ppn.page_bytes());
        }
    }
}

pub use error::*;
mod error {
    /// 物理页帧耗尽
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OutOfMemory;

    /// 普通区域的数量超出了上限
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TooManyRegions;
}

#[cfg(test)]
mod tests {
    use enumflags2::BitFlags;

    use super::Region;
    use crate::address::{VirtAddr, VirtPageNum};
    use crate::config::PAGE_SIZE;

    #[test]
    fn region_alignment_covers_request() {
        // 基址落在页中间：页数要把切掉的偏移补回来
        let r = Region::new(VirtAddr::from_raw(0x1800), 2 * PAGE_SIZE, BitFlags::empty());
        assert_eq!(r.start, VirtPageNum::from_raw(1));
        assert_eq!(r.pages, 3);

        assert!(r.contains(VirtPageNum::from_raw(1)));
        assert!(r.contains(VirtPageNum::from_raw(3)));
        assert!(!r.contains(VirtPageNum::from_raw(4)));
    }
}
