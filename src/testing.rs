//! 测试基础设施
//!
//! 各测试模块共享的环境实现与可注入故障的模拟设备：
//! - [`StdHal`] - 基于 std 线程原语的 [`SystemHal`](crate::types::SystemHal)
//! - [`MockCoreDevice`] - 可注入分区删除/认领/克隆失败的底层设备
//! - [`RecordingOps`] - 记录每个钩子调用次数的能力表
//! - [`rig`] 系列 - 组装好模块、底层设备与导出设备的测试台架

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::Mutex;

use crate::capability::{ExportedDeviceOps, ModuleHandle, RequestStatus};
use crate::consts::DEV_MINORS;
use crate::core_dev::{CoreDevice, ScanConfig, ScanFlags};
use crate::error::{Error, ErrorKind, Result};
use crate::exported::ExportedDevice;
use crate::io::{IoRequest, IoStatus};
use crate::module::DiskModule;
use crate::types::{ModuleConfig, SystemHal};

/// 基于 std 的执行环境
pub(crate) struct StdHal;

impl SystemHal for StdHal {
    fn current_cpu() -> usize {
        use core::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        hasher.finish() as usize
    }

    fn yield_now() {
        std::thread::yield_now();
    }

    fn sleep(dur: core::time::Duration) {
        std::thread::sleep(dur);
    }
}

/// 可注入故障的模拟底层设备
pub(crate) struct MockCoreDevice {
    name: String,
    whole_disk: bool,
    max_parts: u32,
    parts: Mutex<Vec<u32>>,
    config: Mutex<ScanConfig>,
    rescans: AtomicUsize,
    fail_delete: Mutex<Option<u32>>,
    fail_claim: AtomicBool,
    claimed: Mutex<Option<String>>,
    fail_clone: AtomicBool,
    defer: AtomicBool,
    deferred: Mutex<Vec<Arc<IoRequest>>>,
    submitted: AtomicUsize,
}

impl MockCoreDevice {
    /// 整盘设备，预留 [`DEV_MINORS`] 个次设备号
    pub fn whole_disk(name: &str, parts: &[u32]) -> Arc<Self> {
        Self::whole_disk_with_parts_limit(name, parts, DEV_MINORS)
    }

    /// 整盘设备，自定义次设备号预留数量
    pub fn whole_disk_with_parts_limit(name: &str, parts: &[u32], max_parts: u32) -> Arc<Self> {
        let mut sorted = Vec::from(parts);
        sorted.sort_unstable();
        Arc::new(Self {
            name: String::from(name),
            whole_disk: true,
            max_parts,
            parts: Mutex::new(sorted),
            config: Mutex::new(ScanConfig {
                flags: ScanFlags::NO_PART_SCAN | ScanFlags::EXT_DEVT,
                minors: max_parts,
            }),
            rescans: AtomicUsize::new(0),
            fail_delete: Mutex::new(None),
            fail_claim: AtomicBool::new(false),
            claimed: Mutex::new(None),
            fail_clone: AtomicBool::new(false),
            defer: AtomicBool::new(false),
            deferred: Mutex::new(Vec::new()),
            submitted: AtomicUsize::new(0),
        })
    }

    /// 分区设备（从不做分区隐藏）
    pub fn partition(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: String::from(name),
            whole_disk: false,
            max_parts: 1,
            parts: Mutex::new(Vec::new()),
            config: Mutex::new(ScanConfig {
                flags: ScanFlags::empty(),
                minors: 1,
            }),
            rescans: AtomicUsize::new(0),
            fail_delete: Mutex::new(None),
            fail_claim: AtomicBool::new(false),
            claimed: Mutex::new(None),
            fail_clone: AtomicBool::new(false),
            defer: AtomicBool::new(false),
            deferred: Mutex::new(Vec::new()),
            submitted: AtomicUsize::new(0),
        })
    }

    /// 指定分区的删除注入为失败
    pub fn fail_delete_partition(&self, part_no: u32) {
        *self.fail_delete.lock() = Some(part_no);
    }

    /// 让独占认领失败
    pub fn fail_claim(&self) {
        self.fail_claim.store(true, Ordering::SeqCst);
    }

    /// 让请求克隆失败
    pub fn fail_clone(&self) {
        self.fail_clone.store(true, Ordering::SeqCst);
    }

    /// 提交的克隆不再同步完成，挂起等待 [`complete_deferred`](Self::complete_deferred)
    pub fn defer_completions(&self) {
        self.defer.store(true, Ordering::SeqCst);
    }

    /// 以给定状态完成全部挂起的克隆，返回完成数量
    pub fn complete_deferred(&self, status: IoStatus) -> usize {
        let pending: Vec<_> = self.deferred.lock().drain(..).collect();
        let count = pending.len();
        for rq in pending {
            rq.complete(status);
        }
        count
    }

    /// 剩余分区数量
    pub fn partition_count(&self) -> usize {
        self.parts.lock().len()
    }

    /// 重扫次数
    pub fn rescan_count(&self) -> usize {
        self.rescans.load(Ordering::SeqCst)
    }

    /// 已提交的克隆数量
    pub fn submitted_count(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    /// 当前认领持有者
    pub fn claimed_by(&self) -> Option<String> {
        self.claimed.lock().clone()
    }

    /// 当前扫描配置（内联转发，省去 trait 导入）
    pub fn scan_config(&self) -> ScanConfig {
        *self.config.lock()
    }
}

impl CoreDevice for MockCoreDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_whole_disk(&self) -> bool {
        self.whole_disk
    }

    fn max_parts(&self) -> u32 {
        self.max_parts
    }

    fn next_part_no(&self) -> Option<u32> {
        self.parts.lock().first().copied()
    }

    fn delete_partition(&self, part_no: u32) -> Result<()> {
        if *self.fail_delete.lock() == Some(part_no) {
            return Err(Error::new(ErrorKind::Io, "partition delete failed"));
        }
        self.parts.lock().retain(|no| *no != part_no);
        Ok(())
    }

    fn rescan_partitions(&self) {
        self.rescans.fetch_add(1, Ordering::SeqCst);
    }

    fn scan_config(&self) -> ScanConfig {
        *self.config.lock()
    }

    fn set_scan_config(&self, config: ScanConfig) {
        *self.config.lock() = config;
    }

    fn claim(&self, holder: &str) -> Result<()> {
        if self.fail_claim.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Busy, "device already claimed"));
        }
        let mut claimed = self.claimed.lock();
        if claimed.is_some() {
            return Err(Error::new(ErrorKind::Busy, "device already claimed"));
        }
        *claimed = Some(String::from(holder));
        Ok(())
    }

    fn release_claim(&self) {
        *self.claimed.lock() = None;
    }

    fn clone_request(&self, rq: &IoRequest) -> Option<Arc<IoRequest>> {
        if self.fail_clone.load(Ordering::SeqCst) {
            return None;
        }
        Some(IoRequest::new(rq.flags(), rq.sector(), rq.bytes()))
    }

    fn submit(&self, rq: Arc<IoRequest>) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        if self.defer.load(Ordering::SeqCst) {
            self.deferred.lock().push(rq);
        } else {
            rq.complete(IoStatus::Ok);
        }
    }
}

/// 快路径行为
#[derive(Clone, Copy)]
pub(crate) enum FastPath {
    /// 谢绝，落入队列级处理
    Decline,
    /// 以给定状态完成请求并接管
    Handle(IoStatus),
}

/// 队列级处理行为
#[derive(Clone)]
pub(crate) enum QueueBehavior {
    /// 以给定状态完成请求，向导出层返回 Ok（引擎拥有完成权）
    CompleteWith(IoStatus),
    /// 不完成请求，直接返回给定状态（导出层负责完成）
    ReturnStatus(IoStatus),
    /// 门打开前自旋等待，然后以 Ok 完成
    Gated(Arc<AtomicBool>),
}

/// 记录钩子调用的能力表
pub(crate) struct RecordingOps {
    fast_path: Mutex<FastPath>,
    queue_behavior: Mutex<QueueBehavior>,
    fail_geometry: AtomicBool,
    make_request: AtomicUsize,
    queue_request: AtomicUsize,
    pending_inc: AtomicUsize,
    pending_dec: AtomicUsize,
    set_geometry: AtomicUsize,
    cleanup_queue: AtomicUsize,
}

impl RecordingOps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fast_path: Mutex::new(FastPath::Decline),
            queue_behavior: Mutex::new(QueueBehavior::CompleteWith(IoStatus::Ok)),
            fail_geometry: AtomicBool::new(false),
            make_request: AtomicUsize::new(0),
            queue_request: AtomicUsize::new(0),
            pending_inc: AtomicUsize::new(0),
            pending_dec: AtomicUsize::new(0),
            set_geometry: AtomicUsize::new(0),
            cleanup_queue: AtomicUsize::new(0),
        })
    }

    /// 以能力表 trait 对象的形式克隆
    pub fn clone_as_ops<H: SystemHal>(self: &Arc<Self>) -> Arc<dyn ExportedDeviceOps<H>> {
        Arc::clone(self) as Arc<dyn ExportedDeviceOps<H>>
    }

    pub fn set_fast_path(&self, behavior: FastPath) {
        *self.fast_path.lock() = behavior;
    }

    pub fn set_queue_behavior(&self, behavior: QueueBehavior) {
        *self.queue_behavior.lock() = behavior;
    }

    pub fn fail_geometry(&self) {
        self.fail_geometry.store(true, Ordering::SeqCst);
    }

    pub fn make_request_calls(&self) -> usize {
        self.make_request.load(Ordering::SeqCst)
    }

    pub fn queue_request_calls(&self) -> usize {
        self.queue_request.load(Ordering::SeqCst)
    }

    pub fn pending_inc_calls(&self) -> usize {
        self.pending_inc.load(Ordering::SeqCst)
    }

    pub fn pending_dec_calls(&self) -> usize {
        self.pending_dec.load(Ordering::SeqCst)
    }

    pub fn set_geometry_calls(&self) -> usize {
        self.set_geometry.load(Ordering::SeqCst)
    }

    pub fn cleanup_queue_calls(&self) -> usize {
        self.cleanup_queue.load(Ordering::SeqCst)
    }
}

impl<H: SystemHal> ExportedDeviceOps<H> for RecordingOps {
    fn make_request(&self, _dsk: &ExportedDevice<H>, rq: &Arc<IoRequest>) -> RequestStatus {
        self.make_request.fetch_add(1, Ordering::SeqCst);
        match *self.fast_path.lock() {
            FastPath::Decline => RequestStatus::NotHandled,
            FastPath::Handle(status) => {
                rq.complete(status);
                RequestStatus::Handled
            }
        }
    }

    fn queue_request(&self, _dsk: &ExportedDevice<H>, rq: &Arc<IoRequest>) -> IoStatus {
        self.queue_request.fetch_add(1, Ordering::SeqCst);
        let behavior = self.queue_behavior.lock().clone();
        match behavior {
            QueueBehavior::CompleteWith(status) => {
                rq.complete(status);
                IoStatus::Ok
            }
            QueueBehavior::ReturnStatus(status) => status,
            QueueBehavior::Gated(gate) => {
                while gate.load(Ordering::SeqCst) {
                    std::thread::yield_now();
                }
                rq.complete(IoStatus::Ok);
                IoStatus::Ok
            }
        }
    }

    fn pending_request_inc(&self, _dsk: &ExportedDevice<H>) {
        self.pending_inc.fetch_add(1, Ordering::SeqCst);
    }

    fn pending_request_dec(&self, _dsk: &ExportedDevice<H>) {
        self.pending_dec.fetch_add(1, Ordering::SeqCst);
    }

    fn set_geometry(&self, _dsk: &ExportedDevice<H>) -> Result<()> {
        self.set_geometry.fetch_add(1, Ordering::SeqCst);
        if self.fail_geometry.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Io, "geometry setup failed"));
        }
        Ok(())
    }

    fn cleanup_queue(&self, _dsk: &ExportedDevice<H>) {
        self.cleanup_queue.fetch_add(1, Ordering::SeqCst);
    }
}

/// 组装好的测试台架
pub(crate) struct TestRig {
    pub module: Arc<DiskModule>,
    pub core: Arc<MockCoreDevice>,
    pub owner: ModuleHandle,
    pub ops: Arc<RecordingOps>,
    pub dsk: Arc<ExportedDevice<StdHal>>,
}

impl TestRig {
    /// 激活设备（测试速记）
    pub fn activate(&self) {
        self.dsk.activate().unwrap();
    }
}

fn build_rig(name: &str, config: ModuleConfig, core: Arc<MockCoreDevice>) -> TestRig {
    let module = DiskModule::init(config).unwrap();
    let owner = ModuleHandle::new("cache_engine");
    let ops = RecordingOps::new();
    let dsk = module
        .create_exported::<StdHal>(
            name,
            Arc::clone(&core) as Arc<dyn CoreDevice>,
            &owner,
            ops.clone_as_ops(),
        )
        .unwrap();
    TestRig {
        module,
        core,
        owner,
        ops,
        dsk,
    }
}

/// 默认台架：4 个计数槽，分区底层设备
pub(crate) fn rig(name: &str) -> TestRig {
    rig_with(name, |_| {})
}

/// 自定义模块配置的台架
pub(crate) fn rig_with(name: &str, tweak: impl FnOnce(&mut ModuleConfig)) -> TestRig {
    let mut config = ModuleConfig {
        nr_cpus: 4,
        ..ModuleConfig::default()
    };
    tweak(&mut config);
    build_rig(name, config, MockCoreDevice::partition("sda1"))
}

/// 自定义底层设备的台架
pub(crate) fn rig_with_core(name: &str, core: Arc<MockCoreDevice>) -> TestRig {
    build_rig(
        name,
        ModuleConfig {
            nr_cpus: 4,
            ..ModuleConfig::default()
        },
        core,
    )
}
