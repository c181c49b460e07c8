//! 导出设备层常量定义
//!
//! 这个模块包含了导出设备层的所有常量定义，包括：
//! - 设备标识相关常量
//! - 排空（quiescence）轮询参数
//! - 请求队列默认参数

use core::time::Duration;

//=============================================================================
// 设备标识
//=============================================================================

/// 设备名称最大长度（含义同内核 gendisk 的 32 字节名称上限）
///
/// 超过此长度的名称在任何资源分配之前即被拒绝。
pub const DISK_NAME_LEN: usize = 32;

/// 每个导出整盘设备预留的次设备号数量
pub const DEV_MINORS: u32 = 16;

/// 模块次设备号空间大小
///
/// 次设备号由模块级位图分配，只在设备记录最终释放时归还。
pub const MINOR_SPACE: u32 = 1 << 12;

//=============================================================================
// 排空与转换
//=============================================================================

/// 直通在途 I/O 排空的轮询间隔
///
/// 直通 I/O 在派发调用栈之外异步完成，排空时用有界睡眠轮询而不是紧自旋。
pub const PT_DRAIN_INTERVAL: Duration = Duration::from_millis(200);

//=============================================================================
// 请求队列
//=============================================================================

/// 请求队列默认深度
pub const DEFAULT_QUEUE_DEPTH: u32 = 128;
