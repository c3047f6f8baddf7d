//! 一台软件管理快表机器的虚拟内存核心。
//!
//! 三层结构，自底向上：
//! - [`FrameAllocator`]：全局稀缺资源（物理页帧）的分配与回收，
//!   启动期用单调偷页过渡，帧表建好后支持连续多页的借与还；
//! - [`AddressSpace`]：每进程一份的地址空间描述，区域的虚拟边界
//!   加逐页的物理帧，帧的所有权自始至终属于它；
//! - [`Processor`]：缺页的最终解决者，把"虚拟页落在哪、背后是谁"
//!   翻译成一条快表表项装进硬件。
//!
//! 进程的创建销毁、程序映像的装载都是外部协作者，
//! 它们只消费这里的接口。

#![no_std]

extern crate alloc;

pub mod address;
mod address_space;
pub mod config;
pub mod frame_allocator;
mod processor;
mod sync;

pub use self::{
    address_space::{AddressSpace, MapPermission, OutOfMemory, TooManyRegions, Translation},
    frame_allocator::{Frame, FrameAllocator},
    processor::{FaultError, Processor, TlbShootdown},
    sync::UpCell,
};

use alloc::sync::Arc;

use machine::Ram;

/// 启动期初始化：接管整台机器的物理内存并立即建立帧表。
/// 必须先于一切分配运行一次。
pub fn init(ram: Ram) -> Arc<FrameAllocator> {
    let allocator = Arc::new(FrameAllocator::new(ram));
    allocator.init();
    allocator
}
