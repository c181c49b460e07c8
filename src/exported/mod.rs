//! 导出设备（核心实体）
//!
//! [`ExportedDevice`] 拥有一个设备节点身份、一个请求队列、每 CPU 的
//! 待决请求计数和一张可交换的能力表，实现请求准入、按模式派发与排空。
//!
//! 按操作域拆分：
//! - `admission` - 请求准入与派发（两阶段检查-递增-复查协议）
//! - `passthrough` - 直通转发（克隆 + 异步完成）
//! - `transition` - 模式转换与排空协议
//! - `lifecycle` - 创建/激活/锁定/销毁的可回滚链与附着/解除
//!
//! # 并发模型
//!
//! 模式、转换标志与计数器都是原子量；热路径不取全局锁。模式只在
//! `in_transition` 置位且全部计数器排空到零之后改变，这由准入协议
//! 的检查-递增-复查纪律保证（见 `admission`）。控制面操作
//! （激活/锁定/销毁）由控制状态锁串行化，且允许睡眠。

mod admission;
mod lifecycle;
mod passthrough;
mod transition;

pub use admission::QueueStats;

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use spin::{Mutex, RwLock};

use crate::capability::{ExportedDeviceOps, OwnerPin};
use crate::core_dev::{ScanFlags, UnderlyingDevice};
use crate::module::{DiskModule, MinorLease};
use crate::pool::PoolToken;
use crate::node::DeviceNode;
use crate::types::{DevId, SystemHal};

use self::admission::{PendingCounters, RequestQueue};

/// 设备操作模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DeviceMode {
    /// 未绑定：尚未激活，不接受请求
    Unbound = 0,
    /// 附着：请求路由到缓存引擎的能力表
    Attached = 1,
    /// 直通：请求克隆后直接转发给底层设备
    PassThrough = 2,
    /// 关闭中：请求立即以 I/O 错误完成
    ShuttingDown = 3,
}

impl DeviceMode {
    fn from_raw(raw: u32) -> Self {
        match raw {
            0 => DeviceMode::Unbound,
            1 => DeviceMode::Attached,
            2 => DeviceMode::PassThrough,
            3 => DeviceMode::ShuttingDown,
            _ => panic!("invalid device mode value"),
        }
    }
}

/// 已安装的能力表附着
///
/// 能力表与模块引用钉总是一起安装、一起清除。
struct Attachment<H: SystemHal> {
    ops: Arc<dyn ExportedDeviceOps<H>>,
    _pin: OwnerPin,
}

/// 控制面状态（激活标志、独占锁句柄、销毁标志）
struct ControlState {
    activated: bool,
    locked: Option<Arc<DeviceNode>>,
    destroyed: bool,
}

/// 导出设备
///
/// 中心实体：对外呈现一个虚拟磁盘身份，背后交替由缓存引擎（附着模式）
/// 或底层设备直通承载。记录本体从模块的对象池预约，最终释放发生在
/// 最后一个引用消失时（池槽位与次设备号随 drop 归还）。
pub struct ExportedDevice<H: SystemHal> {
    /// 设备名称（模块命名空间内唯一）
    name: String,
    /// 设备号（创建时分配，之后不可变）
    devt: DevId,
    /// 从被隐藏整盘继承的扫描标志
    scan_flags: ScanFlags,
    /// 所属模块
    module: Arc<DiskModule>,
    /// 被包装的底层设备
    underlying: Arc<UnderlyingDevice>,
    /// 当前模式（[`DeviceMode`] 的原子存储）
    mode: AtomicU32,
    /// 模式转换进行中标志
    in_transition: AtomicBool,
    /// 每 CPU 待决请求计数
    pending: PendingCounters,
    /// 直通在途 I/O 计数（在派发调用栈之外异步完成）
    pt_ios: AtomicU32,
    /// 请求队列（队列级在途计数）
    queue: RequestQueue,
    /// 可交换能力表；未附着时为 `None`
    ops: RwLock<Option<Attachment<H>>>,
    /// 控制面状态
    ctl: Mutex<ControlState>,
    /// 注册表中的身份对象路径
    registry_path: String,
    /// 次设备号租约（随记录释放归还）
    _minors: MinorLease,
    /// 记录池槽位（随记录释放归还）
    _record: PoolToken,
}

impl<H: SystemHal> core::fmt::Debug for ExportedDevice<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExportedDevice")
            .field("name", &self.name)
            .field("devt", &self.devt)
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl<H: SystemHal> ExportedDevice<H> {
    /// 设备名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 设备号
    pub fn devt(&self) -> DevId {
        self.devt
    }

    /// 导出身份继承的扫描标志
    pub fn scan_flags(&self) -> ScanFlags {
        self.scan_flags
    }

    /// 所属模块
    pub fn module(&self) -> &Arc<DiskModule> {
        &self.module
    }

    /// 被包装的底层设备
    pub fn underlying(&self) -> &UnderlyingDevice {
        &self.underlying
    }

    /// 注册表中的身份对象路径
    pub fn registry_path(&self) -> &str {
        &self.registry_path
    }

    /// 当前模式
    pub fn mode(&self) -> DeviceMode {
        DeviceMode::from_raw(self.mode.load(Ordering::SeqCst))
    }

    fn store_mode(&self, mode: DeviceMode) {
        self.mode.store(mode as u32, Ordering::SeqCst);
    }

    /// 模式转换是否进行中
    pub fn in_transition(&self) -> bool {
        self.in_transition.load(Ordering::SeqCst)
    }

    /// 设备节点是否已激活（对外可见）
    pub fn activated(&self) -> bool {
        self.ctl.lock().activated
    }

    /// 是否持有销毁前独占锁
    pub fn is_locked(&self) -> bool {
        self.ctl.lock().locked.is_some()
    }

    /// 设备是否已销毁
    pub fn is_destroyed(&self) -> bool {
        self.ctl.lock().destroyed
    }

    /// 是否安装了能力表
    pub fn has_capability_set(&self) -> bool {
        self.ops.read().is_some()
    }

    /// 直通在途 I/O 数量
    pub fn pt_ios(&self) -> u32 {
        self.pt_ios.load(Ordering::SeqCst)
    }

    /// 全部计数槽上的待决请求总数
    pub fn pending_requests(&self) -> u32 {
        self.pending.total()
    }

    /// 请求队列统计
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

impl<H: SystemHal> Drop for ExportedDevice<H> {
    fn drop(&mut self) {
        // 名称随记录释放；池槽位与次设备号租约由字段 drop 归还
        log::trace!("[EXPORT] Released device record {}", self.name);
    }
}
