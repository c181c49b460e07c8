//! 模式转换与排空协议
//!
//! 模式切换前必须静默：先把每个计数槽上的待决请求排空到零（槽间
//! 协作式让出），附着/关闭转换还要等直通在途计数归零；后者异步
//! 完成，用有界睡眠轮询而不是紧自旋。排空期间转换标志置位，准入
//! 协议保证不会有新请求进入，于是计数只减不增，轮询必然终止。
//!
//! 直通排空与关闭排空刻意相同：两者等的都是同一个在途计数。

use crate::consts::PT_DRAIN_INTERVAL;
use crate::error::{Error, ErrorKind, Result};
use crate::types::SystemHal;
use core::sync::atomic::Ordering;

use super::{DeviceMode, ExportedDevice};

/// 转换标志守卫
///
/// drop 时清除 `in_transition`（对 panic 也成立），保证标志不会泄漏。
struct TransitionGuard<'a, H: SystemHal> {
    dsk: &'a ExportedDevice<H>,
}

impl<H: SystemHal> Drop for TransitionGuard<'_, H> {
    fn drop(&mut self) {
        self.dsk.in_transition.store(false, Ordering::SeqCst);
    }
}

impl<H: SystemHal> ExportedDevice<H> {
    /// 占用转换标志
    ///
    /// 已有转换进行中时返回 `Busy`。
    fn begin_transition(&self) -> Result<TransitionGuard<'_, H>> {
        if self
            .in_transition
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::new(
                ErrorKind::Busy,
                "mode transition already in progress",
            ));
        }
        Ok(TransitionGuard { dsk: self })
    }

    /// 把每个计数槽上的待决请求排空到零
    fn wait_for_pending_rqs(&self) {
        for slot in 0..self.pending.len() {
            while self.pending.read(slot) != 0 {
                H::yield_now();
            }
        }
    }

    /// 等待直通在途计数归零
    ///
    /// 直通 I/O 异步完成，轮询间用有界睡眠退避。
    fn wait_for_pt_ios(&self) {
        while self.pt_ios.load(Ordering::SeqCst) != 0 {
            H::sleep(PT_DRAIN_INTERVAL);
        }
    }

    /// 冲刷请求队列（等待队列级在途请求归零）
    fn flush_queue(&self) {
        while self.queue.in_flight() != 0 {
            H::yield_now();
        }
    }

    /// 直通转换前的静默准备
    ///
    /// 排空待决计数并冲刷请求队列。应在转换标志置位期间调用。
    pub fn prepare_passthrough(&self) {
        self.wait_for_pending_rqs();
        self.flush_queue();
    }

    /// 附着转换前的静默准备
    ///
    /// 排空待决计数，并等待遗留的直通完成结束，保证不会有过期的
    /// 直通完成与新模式竞争。
    pub fn prepare_attached(&self) {
        self.wait_for_pending_rqs();
        self.wait_for_pt_ios();
    }

    /// 关闭前的静默准备
    pub fn prepare_shutdown(&self) {
        self.wait_for_pending_rqs();
        self.wait_for_pt_ios();
    }

    /// 切换操作模式
    ///
    /// 置位转换标志（并发转换返回 `Busy`）、按目标模式排空、存储
    /// 新模式、清除标志。返回时设备已静默并运行在新模式下。
    ///
    /// `Unbound` 不是合法的转换目标：只有销毁路径清除模式。
    pub fn set_mode(&self, target: DeviceMode) -> Result<()> {
        if target == DeviceMode::Unbound {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "cannot transition to unbound",
            ));
        }

        let guard = self.begin_transition()?;

        match target {
            DeviceMode::PassThrough => self.prepare_passthrough(),
            DeviceMode::Attached => self.prepare_attached(),
            DeviceMode::ShuttingDown => self.prepare_shutdown(),
            DeviceMode::Unbound => unreachable!(),
        }

        self.store_mode(target);
        drop(guard);

        log::info!("[EXPORT] {} switched to {:?} mode", self.name, target);
        Ok(())
    }
}
