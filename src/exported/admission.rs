//! 请求准入与派发
//!
//! 准入协议是本层并发正确性的核心：`begin_request` 在转换进行中
//! 协作式让出，随后递增本执行上下文的待决计数，再复查转换标志；
//! 如果转换恰好在递增前后启动，就回退计数并重试。这个两阶段
//! 检查-递增-复查关闭了"转换观察到计数为零的同时新请求开始准入"
//! 的窗口：请求绝不会被准入到转换中的设备，转换也绝不会在请求
//! 派发中途开始。
//!
//! `begin_request`/`end_request` 从任意并发执行上下文调用
//! （包括不允许阻塞的中断类上下文），除了转换期间的有界让出之外
//! 从不阻塞。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::capability::RequestStatus;
use crate::io::{IoRequest, IoStatus};
use crate::pool::PoolToken;
use crate::types::SystemHal;

use super::{passthrough, Attachment, DeviceMode, ExportedDevice};

/// 每 CPU 待决请求计数块
///
/// 槽位从每 CPU 计数块池预约，避免热准入路径上的跨上下文争用；
/// 槽位按执行上下文编号对槽数取模索引。
pub(crate) struct PendingCounters {
    slots: Box<[AtomicU32]>,
    _token: PoolToken,
}

impl PendingCounters {
    pub(crate) fn new(nr_slots: usize, token: PoolToken) -> Self {
        let mut slots = Vec::with_capacity(nr_slots.max(1));
        for _ in 0..nr_slots.max(1) {
            slots.push(AtomicU32::new(0));
        }
        Self {
            slots: slots.into_boxed_slice(),
            _token: token,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot_of(&self, cpu: usize) -> usize {
        cpu % self.slots.len()
    }

    pub(crate) fn inc(&self, slot: usize) {
        self.slots[slot].fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn dec(&self, slot: usize) {
        let prev = self.slots[slot].fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "pending counter underflow");
    }

    pub(crate) fn read(&self, slot: usize) -> u32 {
        self.slots[slot].load(Ordering::SeqCst)
    }

    pub(crate) fn total(&self) -> u32 {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::SeqCst))
            .sum()
    }
}

/// 请求队列
///
/// 承载队列级派发路径的在途计数；直通准备阶段以它做队列冲刷。
pub(crate) struct RequestQueue {
    depth: u32,
    in_flight: AtomicU32,
}

/// 请求队列统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// 队列深度
    pub depth: u32,
    /// 队列级在途请求数
    pub in_flight: u32,
}

impl RequestQueue {
    pub(crate) fn new(depth: u32) -> Self {
        Self {
            depth,
            in_flight: AtomicU32::new(0),
        }
    }

    fn enter(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "queue in-flight underflow");
    }

    pub(crate) fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.depth,
            in_flight: self.in_flight(),
        }
    }
}

impl<H: SystemHal> ExportedDevice<H> {
    /// 请求准入
    ///
    /// 两阶段检查-递增-复查；返回所用的计数槽编号，
    /// 与之配对的 [`end_request`](Self::end_request) 必须使用同一编号。
    pub fn begin_request(&self) -> usize {
        loop {
            while self.in_transition() {
                H::yield_now();
            }

            let slot = self.pending.slot_of(H::current_cpu());
            self.pending.inc(slot);

            if self.in_transition() {
                // 转换已并发启动：回退计数并重试准入
                self.pending.dec(slot);
                continue;
            }

            return slot;
        }
    }

    /// 请求完成记账
    ///
    /// 完成顺序不受约束：派发可以同步完成，也可以由其他执行上下文
    /// 的异步完成回调触发。
    pub fn end_request(&self, slot: usize) {
        self.pending.dec(slot);
    }

    /// 提交请求：准入、按当前模式派发、记账
    pub fn submit_request(self: &Arc<Self>, rq: Arc<IoRequest>) {
        let slot = self.begin_request();
        self.dispatch(rq);
        self.end_request(slot);
    }

    /// 按当前模式派发已准入的请求
    ///
    /// 准入期间计数槽被持有，模式不会改变。
    fn dispatch(self: &Arc<Self>, rq: Arc<IoRequest>) {
        match self.mode() {
            DeviceMode::Attached => self.dispatch_attached(rq),
            DeviceMode::PassThrough => passthrough::forward(self, rq),
            DeviceMode::ShuttingDown => {
                log::trace!("[EXPORT] {} shutting down, failing request", self.name());
                rq.complete(IoStatus::IoError);
            }
            DeviceMode::Unbound => {
                panic!("request dispatched on unbound exported device")
            }
        }
    }

    /// 附着模式派发：先问快路径，谢绝则落入队列级处理
    fn dispatch_attached(&self, rq: Arc<IoRequest>) {
        let guard = self.ops.read();
        let att = match guard.as_ref() {
            Some(att) => att,
            None => panic!("attached mode with no capability set installed"),
        };

        if att.ops.make_request(self, &rq) == RequestStatus::NotHandled {
            self.queue_request(att, rq);
        }
    }

    /// 队列级派发：引擎的待决钩子围绕必选处理调用
    ///
    /// 处理返回 [`IoStatus::Ok`] 时由引擎负责完成请求；
    /// 其他状态由本层以该状态完成。
    fn queue_request(&self, att: &Attachment<H>, rq: Arc<IoRequest>) {
        self.queue.enter();
        att.ops.pending_request_inc(self);

        let status = att.ops.queue_request(self, &rq);

        att.ops.pending_request_dec(self);
        self.queue.exit();

        if status != IoStatus::Ok {
            rq.complete(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::IoFlags;
    use crate::testing::{rig, FastPath, QueueBehavior, StdHal};
    use core::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    fn read_rq(sector: u64) -> Arc<IoRequest> {
        IoRequest::new(IoFlags::READ, sector, 4096)
    }

    #[test]
    fn test_begin_end_balance() {
        let rig = rig("cache0");
        let slot = rig.dsk.begin_request();
        assert_eq!(rig.dsk.pending_requests(), 1);
        rig.dsk.end_request(slot);
        assert_eq!(rig.dsk.pending_requests(), 0);
    }

    #[test]
    fn test_attached_queue_path_completes() {
        let rig = rig("cache0");
        rig.activate();

        let rq = read_rq(0);
        rig.dsk.submit_request(Arc::clone(&rq));

        assert_eq!(rq.status(), Some(IoStatus::Ok));
        assert_eq!(rig.ops.make_request_calls(), 1);
        assert_eq!(rig.ops.queue_request_calls(), 1);
        // 待决钩子围绕队列级处理成对调用
        assert_eq!(rig.ops.pending_inc_calls(), 1);
        assert_eq!(rig.ops.pending_dec_calls(), 1);
        assert_eq!(rig.dsk.pending_requests(), 0);
        assert_eq!(rig.dsk.queue_stats().in_flight, 0);
    }

    #[test]
    fn test_fast_path_handles_request() {
        let rig = rig("cache0");
        rig.ops.set_fast_path(FastPath::Handle(IoStatus::Ok));
        rig.activate();

        let rq = read_rq(8);
        rig.dsk.submit_request(Arc::clone(&rq));

        assert_eq!(rq.status(), Some(IoStatus::Ok));
        assert_eq!(rig.ops.queue_request_calls(), 0);
        assert_eq!(rig.ops.pending_inc_calls(), 0);
    }

    #[test]
    fn test_queue_error_status_completes_request() {
        let rig = rig("cache0");
        rig.ops.set_queue_behavior(QueueBehavior::ReturnStatus(IoStatus::IoError));
        rig.activate();

        let rq = read_rq(16);
        rig.dsk.submit_request(Arc::clone(&rq));

        assert_eq!(rq.status(), Some(IoStatus::IoError));
    }

    #[test]
    fn test_shutdown_mode_fails_requests() {
        let rig = rig("cache0");
        rig.activate();
        rig.dsk.set_mode(DeviceMode::ShuttingDown).unwrap();

        let rq = read_rq(0);
        rig.dsk.submit_request(Arc::clone(&rq));
        assert_eq!(rq.status(), Some(IoStatus::IoError));
    }

    #[test]
    #[should_panic(expected = "request dispatched on unbound exported device")]
    fn test_unbound_dispatch_is_contract_violation() {
        let rig = rig("cache0");
        // 未激活：模式仍为 Unbound
        rig.dsk.submit_request(read_rq(0));
    }

    #[test]
    fn test_admission_retries_while_transition_active() {
        let rig = rig("cache0");
        rig.activate();

        // 手动占住转换标志，模拟进行中的转换
        rig.dsk.in_transition.store(true, Ordering::SeqCst);

        let dsk = Arc::clone(&rig.dsk);
        let rq = read_rq(0);
        let rq_clone = Arc::clone(&rq);
        let handle = thread::spawn(move || {
            dsk.submit_request(rq_clone);
        });

        // 转换期间请求不得被准入
        thread::sleep(Duration::from_millis(50));
        assert_eq!(rq.status(), None);
        assert_eq!(rig.dsk.pending_requests(), 0);

        rig.dsk.in_transition.store(false, Ordering::SeqCst);
        handle.join().unwrap();

        assert_eq!(rq.status(), Some(IoStatus::Ok));
    }

    #[test]
    fn test_concurrent_requests_all_complete() {
        let rig = rig("cache0");
        rig.activate();

        let completed = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for t in 0..8 {
            let dsk = Arc::clone(&rig.dsk);
            let completed = Arc::clone(&completed);
            handles.push(thread::spawn(move || {
                for i in 0..125u64 {
                    let completed = Arc::clone(&completed);
                    let rq = IoRequest::with_end_io(
                        IoFlags::WRITE,
                        t * 1000 + i,
                        512,
                        Box::new(move |status| {
                            assert_eq!(status, IoStatus::Ok);
                            completed.fetch_add(1, Ordering::SeqCst);
                        }),
                    );
                    dsk.submit_request(rq);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(completed.load(Ordering::SeqCst), 1000);
        assert_eq!(rig.ops.queue_request_calls(), 1000);
        assert_eq!(rig.dsk.pending_requests(), 0);
        assert_eq!(rig.dsk.queue_stats().in_flight, 0);
    }

    #[test]
    fn test_detach_attach_swaps_engine_between_requests() {
        let rig = rig("cache0");
        rig.activate();

        let rq = read_rq(0);
        rig.dsk.submit_request(Arc::clone(&rq));
        assert_eq!(rig.ops.queue_request_calls(), 1);

        // 换一个引擎实例，设备节点身份保持不变
        let second = crate::testing::RecordingOps::new();
        rig.dsk.detach();
        rig.dsk
            .attach(&rig.owner, second.clone_as_ops::<StdHal>())
            .unwrap();

        let rq2 = read_rq(1);
        rig.dsk.submit_request(Arc::clone(&rq2));
        assert_eq!(rq2.status(), Some(IoStatus::Ok));
        assert_eq!(second.queue_request_calls(), 1);
        assert_eq!(rig.ops.queue_request_calls(), 1);
    }

    #[test]
    fn test_gated_queue_holds_pending_counter() {
        let rig = rig("cache0");
        let gate = Arc::new(AtomicBool::new(true));
        rig.ops
            .set_queue_behavior(QueueBehavior::Gated(Arc::clone(&gate)));
        rig.activate();

        let dsk = Arc::clone(&rig.dsk);
        let handle = thread::spawn(move || {
            dsk.submit_request(read_rq(0));
        });

        // 请求停在队列级处理里：待决计数与队列在途都非零
        while rig.dsk.queue_stats().in_flight == 0 {
            thread::yield_now();
        }
        assert!(rig.dsk.pending_requests() > 0);

        gate.store(false, Ordering::SeqCst);
        handle.join().unwrap();
        assert_eq!(rig.dsk.pending_requests(), 0);
        assert_eq!(rig.dsk.queue_stats().in_flight, 0);
    }
}
