//! 一台被模拟出来的单核载入/存储机器。
//!
//! 真实硬件上，内核透过特权指令与MMU、TLB和中断开关打交道；
//! 这里把同样的接口落在普通内存上：
//! - [`Ram`]：一块页对齐的物理内存，经由直接映射窗口按物理地址访问；
//! - [`Tlb`]：软件管理的快表，未命中时由内核的缺页处理回填；
//! - [`InterruptFlag`]：本核的中断开关，关/开成对出现。
//!
//! 本机只有一个核，凡涉及跨核的操作（TLB击落）一概不存在。

#![no_std]

extern crate alloc;

pub mod intr;
pub mod ram;
pub mod tlb;

pub use self::{
    intr::{InterruptFlag, IntrGuard},
    ram::Ram,
    tlb::{EntryFlag, FaultKind, InvalidFaultCode, TLB_ENTRIES, Tlb, TlbEntry},
};

/// 物理页大小，十六进制表示方便地址转页号的计算
pub const PAGE_SIZE: usize = 0x1000;
/// 物理页内寻址的位数
pub const PAGE_SIZE_BITS: usize = 12;
