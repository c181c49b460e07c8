//! 底层（核心）设备适配
//!
//! 导出设备包裹一个底层物理设备。本模块定义底层设备子系统接口
//! [`CoreDevice`]（分区枚举/删除/重扫、扫描配置、独占认领、请求克隆与
//! 提交），以及包装结构 [`UnderlyingDevice`]：区分整盘与分区，导出整盘
//! 时隐藏其分区表并保存原始扫描配置，拆除时恢复。
//!
//! 分区设备从不做分区隐藏（no-op）。

mod device;
mod underlying;

pub use device::{CoreDevice, ScanConfig, ScanFlags};
pub use underlying::UnderlyingDevice;
