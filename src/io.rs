//! 请求与完成回调
//!
//! 定义进入导出设备的 I/O 请求 [`IoRequest`]、完成状态 [`IoStatus`]
//! 和一次性完成回调 [`EndIoCallback`]。
//!
//! 请求的完成是一次性的：派发可以同步完成，也可以由另一个执行上下文
//! 的异步完成回调触发，但同一请求完成两次是契约违规（panic）。

use alloc::boxed::Box;
use alloc::sync::Arc;
use bitflags::bitflags;
use spin::Mutex;

bitflags! {
    /// 请求类型标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IoFlags: u32 {
        /// 读请求
        const READ  = 0x01;
        /// 写请求
        const WRITE = 0x02;
        /// 刷新请求
        const FLUSH = 0x04;
        /// 同步请求
        const SYNC  = 0x08;
    }
}

/// 请求完成状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// 成功
    Ok,
    /// I/O 错误（例如在关闭中的设备上派发）
    IoError,
    /// 内存不足（直通转发分配失败）
    NoMemory,
}

/// 完成回调类型
///
/// 回调只会被调用一次，可能来自与提交者不同的执行上下文。
pub type EndIoCallback = Box<dyn FnOnce(IoStatus) + Send>;

/// I/O 请求
///
/// 扇区与长度描述请求覆盖的范围；本层不携带数据缓冲区，
/// 数据归属由能力表或底层设备侧处理。
pub struct IoRequest {
    /// 请求类型
    flags: IoFlags,
    /// 起始扇区
    sector: u64,
    /// 长度（字节）
    bytes: u32,
    /// 完成回调（一次性）
    end_io: Mutex<Option<EndIoCallback>>,
    /// 完成状态；`None` 表示尚未完成
    status: Mutex<Option<IoStatus>>,
}

impl IoRequest {
    /// 创建新请求（无完成回调）
    pub fn new(flags: IoFlags, sector: u64, bytes: u32) -> Arc<Self> {
        Arc::new(Self {
            flags,
            sector,
            bytes,
            end_io: Mutex::new(None),
            status: Mutex::new(None),
        })
    }

    /// 创建带完成回调的请求
    pub fn with_end_io(
        flags: IoFlags,
        sector: u64,
        bytes: u32,
        end_io: EndIoCallback,
    ) -> Arc<Self> {
        let rq = Self::new(flags, sector, bytes);
        rq.set_end_io(end_io);
        rq
    }

    /// 设置完成回调
    ///
    /// 在请求提交前由创建者调用；直通转发也用它给克隆接线。
    pub fn set_end_io(&self, end_io: EndIoCallback) {
        *self.end_io.lock() = Some(end_io);
    }

    /// 请求类型
    pub fn flags(&self) -> IoFlags {
        self.flags
    }

    /// 起始扇区
    pub fn sector(&self) -> u64 {
        self.sector
    }

    /// 长度（字节）
    pub fn bytes(&self) -> u32 {
        self.bytes
    }

    /// 完成请求
    ///
    /// 记录状态并调用完成回调。对同一请求的第二次完成是契约违规。
    pub fn complete(&self, status: IoStatus) {
        {
            let mut slot = self.status.lock();
            if slot.is_some() {
                panic!("request completed twice");
            }
            *slot = Some(status);
        }
        let end_io = self.end_io.lock().take();
        if let Some(end_io) = end_io {
            end_io(status);
        }
    }

    /// 是否已完成
    pub fn is_completed(&self) -> bool {
        self.status.lock().is_some()
    }

    /// 完成状态（未完成时为 `None`）
    pub fn status(&self) -> Option<IoStatus> {
        *self.status.lock()
    }
}

impl core::fmt::Debug for IoRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IoRequest")
            .field("flags", &self.flags)
            .field("sector", &self.sector)
            .field("bytes", &self.bytes)
            .field("status", &*self.status.lock())
            .finish()
    }
}
