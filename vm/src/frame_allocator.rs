//! 物理页帧分配器。
//!
//! 物理内存的管理分两个阶段：
//! 启动早期帧表尚不存在，只能用[`BumpAllocator`]从裸内存上
//! 单调地偷页，偷出去的不再回收；[`FrameAllocator::init`]之后
//! 帧表接管余下的全部页面，支持连续多页的分配与归还。
//! 两个阶段各有一把互斥锁，时间上互不重叠，永远不会同时持有。
//!
//! 帧表按页记账：空闲、某段连续分配的首页（记全段长度）、
//! 或该段的后续页。归还时只认首页，长度从首页读出，
//! 绝不靠相邻页的编码去猜，物理上贴着的两段分配因此互不相扰。

use core::fmt::{self, Debug, Formatter};

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use machine::Ram;
use spin::{Mutex, Once};

use crate::address::{PhysAddr, PhysPageNum};

/// 分配一个清零的单页，附带所有权凭证
pub fn alloc(allocator: &Arc<FrameAllocator>) -> Option<Frame> {
    allocator.alloc_contiguous(1).map(|ppn| {
        // 清零整个页面
        ppn.page_bytes_mut().fill(0);
        Frame {
            ppn,
            allocator: Arc::clone(allocator),
        }
    })
}

/// 物理页帧分配器，持有它所管理的那块物理内存
pub struct FrameAllocator {
    ram: Ram,
    boot: Mutex<BumpAllocator>,
    table: Once<Mutex<FrameTable>>,
}

impl FrameAllocator {
    pub fn new(ram: Ram) -> Self {
        let current = PhysAddr::from(ram.start()).page_number();
        let end = PhysAddr::from(ram.end()).page_number();
        Self {
            ram,
            boot: Mutex::new(BumpAllocator { current, end }),
            table: Once::new(),
        }
    }

    /// 启动期偷页：游标单调前进，越界即是内核没法活了
    pub fn steal(&self, n_pages: usize) -> PhysAddr {
        assert!(
            self.table.get().is_none(),
            "stealing raw memory after the frame table took over"
        );
        self.boot.lock().steal(n_pages).into()
    }

    /// 帧表接管启动分配器剩下的范围。只生效一次，此后所有
    /// 分配都走帧表。
    pub fn init(&self) {
        self.table.call_once(|| {
            let boot = self.boot.lock();
            let pages = usize::from(boot.end) - usize::from(boot.current);
            log::info!(
                "frame table managing {} pages at {:?}",
                pages,
                PhysAddr::from(boot.current)
            );
            Mutex::new(FrameTable::new(boot.current, pages))
        });
    }

    /// 分配`n_pages`个连续页帧，返回首页页号。
    ///
    /// 帧表建立前退到启动分配器；建立后首次适应，
    /// 从左到右找第一段足够长的空闲，找不到便是内存耗尽。
    pub fn alloc_contiguous(&self, n_pages: usize) -> Option<PhysPageNum> {
        assert!(n_pages > 0);
        match self.table.get() {
            Some(table) => table.lock().alloc(n_pages),
            None => Some(self.boot.lock().steal(n_pages)),
        }
    }

    /// 归还以`base`开头的一整段分配
    pub fn dealloc(&self, base: PhysPageNum) {
        let table = self
            .table
            .get()
            .expect("frame released before the frame table exists");
        table.lock().release(base);
    }

    /// 分配`n_pages`个连续的内核页，给出直接映射窗口里的地址
    pub fn alloc_kernel_pages(&self, n_pages: usize) -> Option<PhysAddr> {
        self.alloc_contiguous(n_pages).map(PhysAddr::from)
    }

    pub fn free_kernel_pages(&self, addr: PhysAddr) {
        self.dealloc(addr.into());
    }

    /// 当前尚未分出去的页数
    pub fn free_pages(&self) -> usize {
        match self.table.get() {
            Some(table) => table.lock().free_pages(),
            None => {
                let boot = self.boot.lock();
                usize::from(boot.end) - usize::from(boot.current)
            }
        }
    }

    /// 所管理物理内存的总页数
    pub fn total_pages(&self) -> usize {
        self.ram.pages()
    }
}

/// 实际上是一个独占指针：页帧随它的析构回到分配器
pub struct Frame {
    pub ppn: PhysPageNum,
    allocator: Arc<FrameAllocator>,
}

impl Debug for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("Frame:PPN={:?}", self.ppn))
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.allocator.dealloc(self.ppn);
    }
}

/// 启动期的单调分配器
///
/// `current`为下一个未被偷走的物理页号，
/// 页号区间 [current, end) 的物理内存从未被碰过
struct BumpAllocator {
    current: PhysPageNum,
    end: PhysPageNum,
}

impl BumpAllocator {
    fn steal(&mut self, n_pages: usize) -> PhysPageNum {
        let base = self.current;
        let next = base + n_pages;
        if usize::from(next) > usize::from(self.end) {
            panic!("out of memory while bootstrapping: {n_pages} pages wanted");
        }
        self.current = next;
        base
    }
}

/// 帧表里一页的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameEntry {
    Free,
    /// 一段连续分配的首页，记着整段的页数
    Head { len: usize },
    /// 首页之后的页
    Body,
}

/// 每个可管理物理页一格的帧表
struct FrameTable {
    base: PhysPageNum,
    entries: Vec<FrameEntry>,
}

impl FrameTable {
    fn new(base: PhysPageNum, pages: usize) -> Self {
        Self {
            base,
            entries: vec![FrameEntry::Free; pages],
        }
    }

    /// 首次适应：返回第一段长度不小于`n_pages`的空闲的首页
    fn alloc(&mut self, n_pages: usize) -> Option<PhysPageNum> {
        let mut run = 0;
        for i in 0..self.entries.len() {
            if self.entries[i] == FrameEntry::Free {
                run += 1;
                if run == n_pages {
                    let start = i + 1 - n_pages;
                    self.entries[start] = FrameEntry::Head { len: n_pages };
                    for entry in &mut self.entries[start + 1..=i] {
                        *entry = FrameEntry::Body;
                    }
                    return Some(self.base + start);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    /// 释放以`base`开头的一段。长度取自首页的记账，
    /// 只清到本段末尾为止，后面哪怕紧贴着另一段也动不到。
    fn release(&mut self, base: PhysPageNum) {
        let index = usize::from(base)
            .checked_sub(usize::from(self.base))
            .filter(|&i| i < self.entries.len())
            .unwrap_or_else(|| panic!("frame {base:?} is outside the frame table"));

        let FrameEntry::Head { len } = self.entries[index] else {
            panic!("frame {base:?} has not been allocated!");
        };

        self.entries[index] = FrameEntry::Free;
        for entry in &mut self.entries[index + 1..index + len] {
            assert_eq!(*entry, FrameEntry::Body, "frame table run is torn");
            *entry = FrameEntry::Free;
        }
    }

    fn free_pages(&self) -> usize {
        self.entries
            .iter()
            .filter(|&&e| e == FrameEntry::Free)
            .count()
    }
}
