//! 底层设备接口

use alloc::sync::Arc;
use bitflags::bitflags;

use crate::error::Result;
use crate::io::IoRequest;

bitflags! {
    /// 分区扫描标志
    ///
    /// 导出整盘时从底层设备上摘下、保存，拆除时恢复。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScanFlags: u32 {
        /// 禁止分区扫描
        const NO_PART_SCAN = 0x01;
        /// 扩展设备号空间
        const EXT_DEVT     = 0x02;
    }
}

/// 底层设备的扫描配置（扫描标志 + 次设备号数量）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// 分区扫描标志
    pub flags: ScanFlags,
    /// 次设备号数量
    pub minors: u32,
}

/// 底层设备接口
///
/// 由底层块设备子系统实现；导出层只通过这个接口打开/认领设备、
/// 操作分区表和转发克隆的请求。
///
/// # 示例
///
/// ```rust,ignore
/// struct SataDisk { /* ... */ }
///
/// impl CoreDevice for SataDisk {
///     fn name(&self) -> &str { "sda" }
///     fn is_whole_disk(&self) -> bool { true }
///     // ...
/// }
/// ```
pub trait CoreDevice: Send + Sync {
    /// 设备名称
    fn name(&self) -> &str;

    /// 是否整盘设备（而不是某个分区）
    fn is_whole_disk(&self) -> bool;

    /// 设备预留的次设备号数量
    fn max_parts(&self) -> u32;

    /// 下一个存在的分区号
    ///
    /// 没有分区时返回 `None`。分区删除循环以此为迭代器。
    fn next_part_no(&self) -> Option<u32>;

    /// 删除指定分区
    fn delete_partition(&self, part_no: u32) -> Result<()>;

    /// 重扫分区表
    fn rescan_partitions(&self);

    /// 当前扫描配置
    fn scan_config(&self) -> ScanConfig;

    /// 设置扫描配置
    fn set_scan_config(&self, config: ScanConfig);

    /// 独占认领设备
    ///
    /// 已被其他持有者认领时返回 `Busy`。
    fn claim(&self, holder: &str) -> Result<()>;

    /// 释放独占认领
    fn release_claim(&self);

    /// 克隆一个指向本设备的请求
    ///
    /// 分配失败返回 `None`（映射为内存不足）。克隆尚未接线完成回调，
    /// 由调用方在提交前设置。
    fn clone_request(&self, rq: &IoRequest) -> Option<Arc<IoRequest>>;

    /// 提交请求
    ///
    /// 完成可以同步发生，也可以稍后从其他执行上下文发生。
    fn submit(&self, rq: Arc<IoRequest>);
}
