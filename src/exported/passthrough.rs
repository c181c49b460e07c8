//! 直通转发
//!
//! 未附着缓存引擎时，入站请求被克隆成一个指向底层设备的新请求直接
//! 提交。克隆的完成在派发调用栈之外异步发生：完成回调用克隆的状态
//! 完成原始请求、递减设备的直通在途计数并释放上下文。
//!
//! 上下文或克隆任一分配失败都立即以内存不足完成原始请求，并释放
//! 已获取的那部分资源，不重试。

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::io::{IoRequest, IoStatus};
use crate::pool::PoolToken;
use crate::types::SystemHal;

use super::ExportedDevice;

/// 直通 I/O 上下文
///
/// 每个被转发的 I/O 一个：引用原始请求与所属设备，在转发时创建、
/// 在克隆的完成回调里销毁。生存期不会超过与之相伴的克隆。
struct PtIoContext<H: SystemHal> {
    rq: Arc<IoRequest>,
    dsk: Arc<ExportedDevice<H>>,
    _token: PoolToken,
}

impl<H: SystemHal> PtIoContext<H> {
    /// 克隆完成：用克隆的状态完成原始请求并结算在途计数
    fn complete(self: Box<Self>, status: IoStatus) {
        self.rq.complete(status);

        let prev = self.dsk.pt_ios.fetch_sub(1, Ordering::SeqCst);
        if prev == 0 {
            panic!("pass-through in-flight counter underflow");
        }
        // 上下文与池槽位随 self 释放
    }
}

/// 把请求克隆转发给底层设备
pub(super) fn forward<H: SystemHal>(dsk: &Arc<ExportedDevice<H>>, rq: Arc<IoRequest>) {
    let token = match dsk.module().pt_io_ctx_pool().reserve() {
        Ok(token) => token,
        Err(_) => {
            // 在途计数尚未递增，保持原样
            rq.complete(IoStatus::NoMemory);
            return;
        }
    };

    let cloned = match dsk.underlying().device().clone_request(&rq) {
        Some(cloned) => cloned,
        None => {
            log::warn!("[PT] {} cannot clone request", dsk.name());
            drop(token);
            rq.complete(IoStatus::NoMemory);
            return;
        }
    };

    let io = Box::new(PtIoContext {
        rq,
        dsk: Arc::clone(dsk),
        _token: token,
    });

    dsk.pt_ios.fetch_add(1, Ordering::SeqCst);

    cloned.set_end_io(Box::new(move |status| io.complete(status)));
    dsk.underlying().device().submit(cloned);
}
