//! 固定容量对象池
//!
//! 模块级的三个对象池（导出设备记录、每 CPU 计数块、直通 I/O 上下文）
//! 都基于这里的 [`ObjectPool`]。池在模块初始化时创建一次，随模块卸载
//! 一起销毁；池耗尽映射为 `NoMemory` 错误，由调用方立即失败，不重试。
//!
//! # 设计说明
//!
//! 池记账采用容量预约模型：[`ObjectPool::reserve`] 返回一个 RAII 的
//! [`PoolToken`]，持有期间占用一个槽位，drop 时自动归还。对象本体由
//! 持有者按普通所有权管理，token 只负责容量与统计。

mod object_pool;

pub use object_pool::{ObjectPool, PoolStats, PoolToken};
