//! 模块生命周期对象
//!
//! [`DiskModule`] 是模块加载/卸载范围内的全部进程级状态：三个固定
//! 容量对象池（导出设备记录、每 CPU 计数块、直通 I/O 上下文）、模块
//! 共享的主设备号、次设备号位图、设备节点命名空间和身份对象注册表。
//!
//! 状态不做环境全局量，而是由 [`DiskModule::init`] 显式创建一次、
//! 随最后一个引用释放一起销毁；[`DiskModule::shutdown`] 在仍有在用
//! 对象时拒绝卸载。

mod minors;

pub use minors::{MinorAllocator, MinorLease};

use alloc::sync::Arc;

use crate::consts::MINOR_SPACE;
use crate::error::{Error, ErrorKind, Result};
use crate::node::NodeNamespace;
use crate::pool::ObjectPool;
use crate::registry::Registry;
use crate::types::ModuleConfig;

/// 注册表中导出设备身份对象的父路径
pub const REGISTRY_ROOT: &str = "expdisk";

/// 模块生命周期对象
pub struct DiskModule {
    config: ModuleConfig,
    exp_obj_pool: Arc<ObjectPool>,
    pending_rqs_pool: Arc<ObjectPool>,
    pt_io_ctx_pool: Arc<ObjectPool>,
    minors: Arc<MinorAllocator>,
    namespace: NodeNamespace,
    registry: Registry,
}

impl core::fmt::Debug for DiskModule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DiskModule").finish_non_exhaustive()
    }
}

impl DiskModule {
    /// 初始化模块状态
    ///
    /// 校验配置并创建对象池、次设备号位图、命名空间与注册表。
    /// 失败时不留下任何部分初始化的状态。
    pub fn init(config: ModuleConfig) -> Result<Arc<Self>> {
        if config.nr_cpus == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "nr_cpus must be nonzero"));
        }
        if config.queue_depth == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "queue depth must be nonzero",
            ));
        }

        let module = Arc::new(Self {
            exp_obj_pool: ObjectPool::new("exp_obj", config.exp_obj_capacity),
            pending_rqs_pool: ObjectPool::new("exp_obj_pending_rqs", config.pending_rqs_capacity),
            pt_io_ctx_pool: ObjectPool::new("exp_obj_pt_io_ctx", config.pt_io_ctx_capacity),
            minors: MinorAllocator::new(MINOR_SPACE),
            namespace: NodeNamespace::new(),
            registry: Registry::new(),
            config,
        });
        log::debug!(
            "[MODULE] Initialized (major={}, nr_cpus={})",
            module.config.disk_major,
            module.config.nr_cpus
        );
        Ok(module)
    }

    /// 模块配置
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// 模块共享的主设备号
    pub fn disk_major(&self) -> u32 {
        self.config.disk_major
    }

    /// 执行上下文数量（每设备计数槽数）
    pub fn nr_cpus(&self) -> usize {
        self.config.nr_cpus
    }

    /// 设备节点命名空间
    pub fn namespace(&self) -> &NodeNamespace {
        &self.namespace
    }

    /// 身份对象注册表
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 导出设备记录池
    pub fn exp_obj_pool(&self) -> &Arc<ObjectPool> {
        &self.exp_obj_pool
    }

    /// 每 CPU 计数块池
    pub fn pending_rqs_pool(&self) -> &Arc<ObjectPool> {
        &self.pending_rqs_pool
    }

    /// 直通 I/O 上下文池
    pub fn pt_io_ctx_pool(&self) -> &Arc<ObjectPool> {
        &self.pt_io_ctx_pool
    }

    /// 次设备号分配器
    pub(crate) fn minors(&self) -> &Arc<MinorAllocator> {
        &self.minors
    }

    /// 卸载前检查
    ///
    /// 任一对象池仍有在用对象时返回 `Busy`；否则模块可以安全卸载
    /// （实际释放随最后一个 `Arc` 引用发生）。
    pub fn shutdown(&self) -> Result<()> {
        for pool in [
            &self.exp_obj_pool,
            &self.pending_rqs_pool,
            &self.pt_io_ctx_pool,
        ] {
            if !pool.is_idle() {
                log::warn!(
                    "[MODULE] Cannot unload: pool {} has {} objects in use",
                    pool.name(),
                    pool.in_use()
                );
                return Err(Error::new(ErrorKind::Busy, "module objects still in use"));
            }
        }
        log::debug!("[MODULE] Shut down");
        Ok(())
    }
}
