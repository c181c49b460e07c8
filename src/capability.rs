//! 能力表（缓存引擎接口）
//!
//! 附着的缓存引擎向导出设备提供一张可交换的回调表
//! [`ExportedDeviceOps`]：可选的快路径处理（可逐请求谢绝）、必选的
//! 队列级处理、围绕队列级处理调用的待决请求钩子，以及可选的几何
//! 设置/队列清理钩子。
//!
//! 安装能力表的同时钉住提供它的模块（[`ModuleHandle::try_pin`]），
//! 防止引擎模块在附着期间卸载；两者总是一起安装、一起清除。

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{Error, ErrorKind, Result};
use crate::exported::ExportedDevice;
use crate::io::{IoRequest, IoStatus};
use crate::types::SystemHal;

/// 快路径处理的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// 请求已被快路径接管
    Handled,
    /// 快路径谢绝，请求落入队列级处理
    NotHandled,
}

/// 导出设备能力表
///
/// 队列级处理是完成归属的分界：[`queue_request`](Self::queue_request)
/// 返回 [`IoStatus::Ok`] 时由引擎负责完成请求（同步或异步皆可）；
/// 返回其他状态时由导出层以该状态完成请求。
pub trait ExportedDeviceOps<H: SystemHal>: Send + Sync {
    /// 快路径请求处理（可选）
    ///
    /// 谢绝（返回 [`RequestStatus::NotHandled`]）的请求落入队列级处理。
    fn make_request(&self, _dsk: &ExportedDevice<H>, _rq: &Arc<IoRequest>) -> RequestStatus {
        RequestStatus::NotHandled
    }

    /// 队列级请求处理（必选）
    fn queue_request(&self, dsk: &ExportedDevice<H>, rq: &Arc<IoRequest>) -> IoStatus;

    /// 队列级处理前的待决请求钩子（引擎自身记账）
    fn pending_request_inc(&self, _dsk: &ExportedDevice<H>) {}

    /// 队列级处理后的待决请求钩子
    fn pending_request_dec(&self, _dsk: &ExportedDevice<H>) {}

    /// 几何设置钩子，创建时调用一次（可选）
    fn set_geometry(&self, _dsk: &ExportedDevice<H>) -> Result<()> {
        Ok(())
    }

    /// 队列清理钩子，拆除时调用一次（可选）
    fn cleanup_queue(&self, _dsk: &ExportedDevice<H>) {}
}

struct OwnerInner {
    name: String,
    unloading: AtomicBool,
    pins: AtomicUsize,
}

/// 能力表提供方（引擎模块）的句柄
///
/// 可克隆；[`try_pin`](Self::try_pin) 在模块开始卸载后失败。
#[derive(Clone)]
pub struct ModuleHandle {
    inner: Arc<OwnerInner>,
}

/// 模块引用钉
///
/// 持有期间阻止提供方模块卸载；drop 时自动归还引用。
pub struct OwnerPin {
    inner: Arc<OwnerInner>,
}

impl core::fmt::Debug for OwnerPin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OwnerPin")
            .field("module", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl ModuleHandle {
    /// 创建新的模块句柄
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(OwnerInner {
                name: String::from(name),
                unloading: AtomicBool::new(false),
                pins: AtomicUsize::new(0),
            }),
        }
    }

    /// 模块名称
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 尝试钉住模块
    ///
    /// 模块已开始卸载时返回 `NotAvailable`。
    pub fn try_pin(&self) -> Result<OwnerPin> {
        // 先计数再检查：卸载标志置位后不会再有新钉成功
        self.inner.pins.fetch_add(1, Ordering::SeqCst);
        if self.inner.unloading.load(Ordering::SeqCst) {
            self.inner.pins.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::new(
                ErrorKind::NotAvailable,
                "cannot get reference to module",
            ));
        }
        Ok(OwnerPin {
            inner: Arc::clone(&self.inner),
        })
    }

    /// 标记模块开始卸载，之后的 [`try_pin`](Self::try_pin) 都会失败
    pub fn begin_unload(&self) {
        self.inner.unloading.store(true, Ordering::SeqCst);
    }

    /// 当前被钉住的引用数
    pub fn pin_count(&self) -> usize {
        self.inner.pins.load(Ordering::SeqCst)
    }
}

impl OwnerPin {
    /// 被钉住模块的名称
    pub fn module_name(&self) -> &str {
        &self.inner.name
    }
}

impl Drop for OwnerPin {
    fn drop(&mut self) {
        let prev = self.inner.pins.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "owner pin released twice");
    }
}
