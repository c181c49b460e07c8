//! 次设备号分配

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use crate::error::{Error, ErrorKind, Result};

/// 模块级次设备号位图分配器
///
/// 每个导出设备在创建时分配一段连续的次设备号；
/// 按不变式，次设备号只在设备记录最终释放时归还。
pub struct MinorAllocator {
    bits: Mutex<Vec<bool>>,
}

/// 一段已分配的次设备号
///
/// drop 时自动归还给分配器。
pub struct MinorLease {
    allocator: Arc<MinorAllocator>,
    first: u32,
    count: u32,
}

impl core::fmt::Debug for MinorLease {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MinorLease")
            .field("first", &self.first)
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

impl MinorAllocator {
    /// 创建覆盖 `space` 个次设备号的分配器
    pub fn new(space: u32) -> Arc<Self> {
        Arc::new(Self {
            bits: Mutex::new(vec![false; space as usize]),
        })
    }

    /// 分配 `count` 个连续的次设备号
    ///
    /// 空间耗尽返回 `NoMemory`。
    pub fn allocate(self: &Arc<Self>, count: u32) -> Result<MinorLease> {
        if count == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "zero minors requested"));
        }
        let mut bits = self.bits.lock();
        let count_usize = count as usize;
        let mut run_start = 0usize;
        let mut run_len = 0usize;
        for (idx, used) in bits.iter().enumerate() {
            if *used {
                run_len = 0;
                run_start = idx + 1;
            } else {
                run_len += 1;
                if run_len == count_usize {
                    for bit in &mut bits[run_start..run_start + count_usize] {
                        *bit = true;
                    }
                    return Ok(MinorLease {
                        allocator: Arc::clone(self),
                        first: run_start as u32,
                        count,
                    });
                }
            }
        }
        log::warn!("[MODULE] Cannot allocate {} minors", count);
        Err(Error::new(ErrorKind::NoMemory, "minor number space exhausted"))
    }

    /// 当前在用的次设备号数量
    pub fn in_use(&self) -> usize {
        self.bits.lock().iter().filter(|bit| **bit).count()
    }

    fn release(&self, first: u32, count: u32) {
        let mut bits = self.bits.lock();
        for bit in &mut bits[first as usize..(first + count) as usize] {
            debug_assert!(*bit, "minor released twice");
            *bit = false;
        }
    }
}

impl MinorLease {
    /// 首个次设备号
    pub fn first(&self) -> u32 {
        self.first
    }

    /// 次设备号数量
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Drop for MinorLease {
    fn drop(&mut self) {
        self.allocator.release(self.first, self.count);
    }
}
