//! 生命周期与回滚控制
//!
//! 状态机：`Unbound -> (create) -> 已绑定未激活 -> (activate) -> 已激活
//! -> (lock) -> 已锁定 -> (destroy) -> Unbound（随引用归零释放）`。
//! 能力表的附着/解除与激活正交。
//!
//! 多步骤操作（create、activate）是回滚链：每一步的失败只回退已提交
//! 的步骤、按精确逆序，然后把首个失败步骤的错误码原样返回；任何失败
//! 的 create 都不会留下可达的半成品设备。
//!
//! # 示例
//!
//! ```rust,ignore
//! let module = DiskModule::init(ModuleConfig::default())?;
//! let dsk = module.create_exported::<MyHal>("cache0", core_dev, &owner, ops)?;
//! dsk.activate()?;
//! // ... I/O ...
//! dsk.lock()?;
//! dsk.destroy()?;
//! dsk.unlock()?;
//! ```

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32};
use spin::{Mutex, RwLock};

use crate::capability::{ExportedDeviceOps, ModuleHandle};
use crate::consts::DISK_NAME_LEN;
use crate::core_dev::{CoreDevice, UnderlyingDevice};
use crate::error::{Error, ErrorKind, Result};
use crate::module::{DiskModule, REGISTRY_ROOT};
use crate::types::{DevId, SystemHal};

use super::admission::{PendingCounters, RequestQueue};
use super::{Attachment, ControlState, DeviceMode, ExportedDevice};

/// 已提交步骤的有序撤销链
///
/// drop 时按提交的逆序执行所有撤销动作；成功路径调用
/// [`commit`](Rollback::commit) 解除武装。
struct Rollback {
    undos: Vec<Box<dyn FnOnce()>>,
}

impl Rollback {
    fn new() -> Self {
        Self { undos: Vec::new() }
    }

    /// 记录一步的撤销动作
    fn push<F: FnOnce() + 'static>(&mut self, undo: F) {
        self.undos.push(Box::new(undo));
    }

    /// 全部步骤成功，解除撤销链
    fn commit(mut self) {
        self.undos.clear();
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        while let Some(undo) = self.undos.pop() {
            undo();
        }
    }
}

impl DiskModule {
    /// 创建导出设备
    ///
    /// 绑定底层设备、安装能力表并钉住提供方模块、分配设备节点身份
    /// （导出整盘时先隐藏其分区表）、建立请求队列并接线派发入口，
    /// 最后运行可选的几何设置钩子。
    ///
    /// 任何一步失败都按精确逆序释放已完成的步骤并返回该步骤的错误；
    /// 名称长度在任何分配之前校验。
    ///
    /// 新设备处于未绑定、未激活状态，需要 [`ExportedDevice::activate`]
    /// 才对外可见。
    pub fn create_exported<H: SystemHal>(
        self: &Arc<Self>,
        name: &str,
        core: Arc<dyn CoreDevice>,
        owner: &ModuleHandle,
        ops: Arc<dyn ExportedDeviceOps<H>>,
    ) -> Result<Arc<ExportedDevice<H>>> {
        // 名称校验先于任何资源获取
        if name.len() >= DISK_NAME_LEN {
            return Err(Error::new(ErrorKind::InvalidInput, "device name too long"));
        }

        let mut rollback = Rollback::new();

        // 记录与每 CPU 计数块从模块池预约（凭证随设备记录走，
        // 错误路径上随局部变量 drop 归还）
        let record = self.exp_obj_pool().reserve()?;
        let counters_token = self.pending_rqs_pool().reserve()?;
        let pending = PendingCounters::new(self.nr_cpus(), counters_token);

        let dev_name = String::from(name);

        // 注册身份对象
        let registry_path = self.registry().register(REGISTRY_ROOT, name)?;
        {
            let module = Arc::clone(self);
            let path = registry_path.clone();
            rollback.push(move || module.registry().unregister(&path));
        }

        // 钉住提供能力表的模块
        let pin = owner.try_pin()?;

        // 设备节点身份：整盘先隐藏分区表并继承其扫描标志
        let underlying = Arc::new(UnderlyingDevice::open(core));
        let export_minors = underlying.export_minors();
        let scan_flags = underlying.hide_partitions()?;
        {
            let underlying = Arc::clone(&underlying);
            rollback.push(move || underlying.restore_partitions());
        }

        let minors = self.minors().allocate(export_minors)?;
        let devt = DevId {
            major: self.disk_major(),
            first_minor: minors.first(),
            minors: export_minors,
        };

        // 请求队列与派发入口（submit_request）接线
        let queue = RequestQueue::new(self.config().queue_depth);

        let dsk = Arc::new(ExportedDevice {
            name: dev_name,
            devt,
            scan_flags,
            module: Arc::clone(self),
            underlying,
            mode: AtomicU32::new(DeviceMode::Unbound as u32),
            in_transition: AtomicBool::new(false),
            pending,
            pt_ios: AtomicU32::new(0),
            queue,
            ops: RwLock::new(Some(Attachment {
                ops: Arc::clone(&ops),
                _pin: pin,
            })),
            ctl: Mutex::new(ControlState {
                activated: false,
                locked: None,
                destroyed: false,
            }),
            registry_path,
            _minors: minors,
            _record: record,
        });

        // 几何设置钩子（可选）；失败时也要给引擎清理队列的机会
        if let Err(err) = ops.set_geometry(&dsk) {
            log::error!("[EXPORT] {} geometry setup failed", dsk.name());
            ops.cleanup_queue(&dsk);
            return Err(err);
        }

        rollback.commit();
        log::debug!(
            "[EXPORT] Created exported device {} (major={}, first_minor={})",
            dsk.name(),
            devt.major,
            devt.first_minor
        );
        Ok(dsk)
    }
}

impl<H: SystemHal> ExportedDevice<H> {
    /// 激活设备：让设备节点对外可见并可被认领
    ///
    /// 幂等保护：已激活的设备再次激活返回 `InvalidState`，且不改变
    /// 第一次激活的任何状态。同名节点已可见时返回 `AlreadyExists`。
    ///
    /// 成功路径：标记激活、存储附着模式、发布节点、独占认领底层
    /// 设备、发布从身份对象到节点的发现链接。认领之后的任何失败都
    /// 回退认领与节点发布。
    pub fn activate(&self) -> Result<()> {
        {
            let mut ctl = self.ctl.lock();
            if ctl.destroyed {
                return Err(Error::new(ErrorKind::NoDevice, "device already destroyed"));
            }
            if ctl.activated {
                return Err(Error::new(ErrorKind::InvalidState, "device already activated"));
            }
            if self.module.namespace().exists(&self.name) {
                log::error!(
                    "[EXPORT] Could not activate {}: device node already exists",
                    self.name
                );
                return Err(Error::new(
                    ErrorKind::AlreadyExists,
                    "device node name already visible",
                ));
            }
            ctl.activated = true;
        }

        self.store_mode(DeviceMode::Attached);

        let published = self.module.namespace().publish(&self.name, self.devt);
        if let Err(err) = published {
            self.ctl.lock().activated = false;
            return Err(err);
        }

        if let Err(err) = self.underlying.claim(&self.name) {
            self.module.namespace().unpublish(&self.name);
            self.ctl.lock().activated = false;
            return Err(err);
        }

        let node_path = alloc::format!("/dev/{}", self.name);
        if let Err(err) =
            self.module
                .registry()
                .publish_link(&self.registry_path, "blockdev", &node_path)
        {
            self.underlying.release_claim();
            self.module.namespace().unpublish(&self.name);
            self.ctl.lock().activated = false;
            return Err(err);
        }

        log::info!("[EXPORT] Activated exported device {}", self.name);
        Ok(())
    }

    /// 销毁前独占检查
    ///
    /// 内部打开设备节点并占用独占位；存在外部打开者时报告 `Busy`
    /// 并释放；节点在别处被打开期间不允许销毁。
    ///
    /// 独占位不可重入，也不得跨模式转换排空持有。
    pub fn lock(&self) -> Result<()> {
        let mut ctl = self.ctl.lock();
        if ctl.destroyed {
            return Err(Error::new(ErrorKind::NoDevice, "device already destroyed"));
        }
        if ctl.locked.is_some() {
            return Err(Error::new(ErrorKind::InvalidState, "device already locked"));
        }

        let node = self.module.namespace().get(&self.name).ok_or(Error::new(
            ErrorKind::NotAvailable,
            "device node not available",
        ))?;

        if !node.try_exclusive() {
            return Err(Error::new(
                ErrorKind::Busy,
                "device exclusive slot already held",
            ));
        }

        if node.openers() > 0 {
            log::debug!(
                "[EXPORT] Device {} in use (openers={}). Refuse to stop",
                self.name,
                node.openers()
            );
            node.release_exclusive();
            return Err(Error::new(ErrorKind::Busy, "device in use"));
        }

        ctl.locked = Some(node);
        Ok(())
    }

    /// 释放销毁前独占锁
    pub fn unlock(&self) -> Result<()> {
        let mut ctl = self.ctl.lock();
        let node = ctl
            .locked
            .take()
            .ok_or(Error::new(ErrorKind::InvalidState, "device not locked"))?;
        node.release_exclusive();
        Ok(())
    }

    /// 销毁设备
    ///
    /// 要求先成功 [`lock`](Self::lock)。已激活的设备先移除发现链接、
    /// 释放底层认领、恢复保存的分区扫描配置、撤销节点发布；随后
    /// 调用队列清理钩子、清除模式并注销身份对象。记录本体在最后
    /// 一个引用消失时释放（池槽位与次设备号随之归还）。
    ///
    /// 独占锁保持持有，由调用方在销毁后 [`unlock`](Self::unlock)。
    pub fn destroy(&self) -> Result<()> {
        let was_activated;
        {
            let mut ctl = self.ctl.lock();
            if ctl.destroyed {
                return Err(Error::new(ErrorKind::NoDevice, "device already destroyed"));
            }
            if ctl.locked.is_none() {
                return Err(Error::new(
                    ErrorKind::InvalidState,
                    "device must be locked before destroy",
                ));
            }
            was_activated = ctl.activated;
            ctl.activated = false;
            ctl.destroyed = true;
        }

        if was_activated {
            self.module
                .registry()
                .remove_link(&self.registry_path, "blockdev");
            self.underlying.release_claim();
            self.underlying.restore_partitions();
            self.module.namespace().unpublish(&self.name);
        }

        // 队列清理钩子，拆除时调用一次
        {
            let guard = self.ops.read();
            if let Some(att) = guard.as_ref() {
                att.ops.cleanup_queue(self);
            }
        }

        self.store_mode(DeviceMode::Unbound);
        self.module.registry().unregister(&self.registry_path);

        log::debug!("[EXPORT] Destroyed exported device {}", self.name);
        Ok(())
    }

    /// 附着能力表
    ///
    /// 安装引擎的回调表并钉住提供方模块；两者总是一起安装。
    /// 关闭中的设备拒绝附着；已安装能力表时返回 `InvalidState`
    /// （先 [`detach`](Self::detach)）。
    pub fn attach(&self, owner: &ModuleHandle, ops: Arc<dyn ExportedDeviceOps<H>>) -> Result<()> {
        if self.mode() == DeviceMode::ShuttingDown {
            return Err(Error::new(
                ErrorKind::InvalidState,
                "cannot attach while shutting down",
            ));
        }

        let mut slot = self.ops.write();
        if slot.is_some() {
            return Err(Error::new(
                ErrorKind::InvalidState,
                "capability set already installed",
            ));
        }

        let pin = owner.try_pin()?;
        *slot = Some(Attachment { ops, _pin: pin });
        Ok(())
    }

    /// 解除能力表
    ///
    /// 同时清除回调表与模块引用钉；不触碰设备身份与队列资源，
    /// 因此可以在保持设备节点稳定的前提下更换引擎实例。
    pub fn detach(&self) {
        *self.ops.write() = None;
    }
}
