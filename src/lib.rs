//! expdisk_core: 缓存盘驱动的块设备导出层
//!
//! 这是一个纯 Rust 实现的导出设备层，对外呈现一个虚拟磁盘身份，
//! 背后交替由缓存引擎（附着模式）或底层设备直通承载，并在 I/O
//! 并发进行时安全地在两种模式间切换。提供：
//! - **零 unsafe 代码**
//! - **无锁的请求准入热路径**（每 CPU 计数 + 两阶段准入协议）
//! - **完全可逆的生命周期链**（create/activate/lock/destroy）
//! - **可交换的缓存引擎能力表**（换引擎不换设备节点）
//!
//! # 示例
//!
//! ```rust,ignore
//! use expdisk_core::{DiskModule, ModuleConfig, ModuleHandle, Result};
//!
//! fn main() -> Result<()> {
//!     let module = DiskModule::init(ModuleConfig::default())?;
//!     let owner = ModuleHandle::new("cache_engine");
//!
//!     // core_dev 实现 CoreDevice trait，ops 实现 ExportedDeviceOps
//!     let dsk = module.create_exported::<MyHal>("cache0", core_dev, &owner, ops)?;
//!     dsk.activate()?;
//!
//!     // 入站 I/O
//!     dsk.submit_request(rq);
//!
//!     // 拆除
//!     dsk.lock()?;
//!     dsk.destroy()?;
//!     dsk.unlock()?;
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`consts`] - 常量定义
//! - [`types`] - 环境抽象与配置
//! - [`pool`] - 固定容量对象池
//! - [`io`] - 请求与完成回调
//! - [`core_dev`] - 底层设备适配（分区隐藏/恢复）
//! - [`node`] - 设备节点命名空间
//! - [`registry`] - 发现/注册子系统
//! - [`capability`] - 缓存引擎能力表接口
//! - [`module`] - 模块生命周期对象
//! - [`exported`] - 导出设备（准入、派发、转换、生命周期）

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 常量定义
pub mod consts;

/// 环境抽象与配置
pub mod types;

/// 固定容量对象池
pub mod pool;

/// 请求与完成回调
pub mod io;

/// 底层设备适配
pub mod core_dev;

/// 设备节点命名空间
pub mod node;

/// 发现/注册子系统
pub mod registry;

/// 缓存引擎能力表接口
pub mod capability;

/// 模块生命周期对象
pub mod module;

/// 导出设备
pub mod exported;

#[cfg(test)]
pub(crate) mod testing;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 环境与配置
pub use types::{DevId, ModuleConfig, SystemHal};

// 对象池
pub use pool::{ObjectPool, PoolStats, PoolToken};

// 请求
pub use io::{EndIoCallback, IoFlags, IoRequest, IoStatus};

// 底层设备
pub use core_dev::{CoreDevice, ScanConfig, ScanFlags, UnderlyingDevice};

// 节点与注册
pub use node::{DeviceNode, NodeNamespace};
pub use registry::Registry;

// 能力表
pub use capability::{ExportedDeviceOps, ModuleHandle, OwnerPin, RequestStatus};

// 模块
pub use module::{DiskModule, MinorAllocator, MinorLease, REGISTRY_ROOT};

// 导出设备
pub use exported::{DeviceMode, ExportedDevice, QueueStats};
