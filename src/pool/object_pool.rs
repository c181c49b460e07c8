//! 对象池实现

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, ErrorKind, Result};

/// 固定容量对象池
///
/// 跟踪在用数量、峰值与失败次数。容量在创建时固定，
/// 生命周期与创建它的模块对象一致。
pub struct ObjectPool {
    /// 池名称（用于日志与统计）
    name: &'static str,
    /// 槽位总数
    capacity: usize,
    /// 当前在用槽位
    in_use: AtomicUsize,
    /// 在用峰值
    peak: AtomicUsize,
    /// 预约失败次数
    failed: AtomicUsize,
}

/// 对象池统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// 槽位总数
    pub capacity: usize,
    /// 当前在用槽位
    pub in_use: usize,
    /// 在用峰值
    pub peak: usize,
    /// 预约失败次数
    pub failed: usize,
}

/// 池槽位预约凭证
///
/// drop 时自动归还槽位。持有凭证的结构体随自身释放归还池内存，
/// 这是设备记录"引用计数归零时释放"语义的落点。
pub struct PoolToken {
    pool: Arc<ObjectPool>,
}

impl core::fmt::Debug for PoolToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolToken").finish_non_exhaustive()
    }
}

impl ObjectPool {
    /// 创建新对象池
    pub fn new(name: &'static str, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            capacity,
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        })
    }

    /// 预约一个槽位
    ///
    /// 池耗尽返回 `NoMemory`，调用方立即失败，不重试。
    pub fn reserve(self: &Arc<Self>) -> Result<PoolToken> {
        let mut cur = self.in_use.load(Ordering::SeqCst);
        loop {
            if cur >= self.capacity {
                self.failed.fetch_add(1, Ordering::SeqCst);
                log::warn!("[POOL] {} exhausted ({}/{})", self.name, cur, self.capacity);
                return Err(Error::new(ErrorKind::NoMemory, "object pool exhausted"));
            }
            match self.in_use.compare_exchange(
                cur,
                cur + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        self.peak.fetch_max(cur + 1, Ordering::SeqCst);
        Ok(PoolToken {
            pool: Arc::clone(self),
        })
    }

    /// 池名称
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 当前在用槽位数
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// 是否没有任何在用槽位
    pub fn is_idle(&self) -> bool {
        self.in_use() == 0
    }

    /// 获取统计信息
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            in_use: self.in_use.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

impl Drop for PoolToken {
    fn drop(&mut self) {
        let prev = self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "pool token released twice");
    }
}
