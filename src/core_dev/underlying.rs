//! 底层设备包装

use alloc::sync::Arc;
use spin::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::core_dev::{CoreDevice, ScanConfig, ScanFlags};

/// 底层设备包装
///
/// 持有底层设备句柄与整盘/分区判定，并保管分区隐藏前的原始扫描配置。
/// 保存的配置在拆除时恢复。
pub struct UnderlyingDevice {
    /// 底层设备
    dev: Arc<dyn CoreDevice>,
    /// 是否整盘设备（打开时捕获，之后不变）
    whole_disk: bool,
    /// 分区隐藏前保存的扫描配置
    saved: Mutex<Option<ScanConfig>>,
}

impl UnderlyingDevice {
    /// 打开并包装一个底层设备
    pub fn open(dev: Arc<dyn CoreDevice>) -> Self {
        let whole_disk = dev.is_whole_disk();
        Self {
            dev,
            whole_disk,
            saved: Mutex::new(None),
        }
    }

    /// 底层设备句柄
    pub fn device(&self) -> &Arc<dyn CoreDevice> {
        &self.dev
    }

    /// 是否整盘设备
    pub fn is_whole_disk(&self) -> bool {
        self.whole_disk
    }

    /// 导出此设备需要的次设备号数量
    ///
    /// 整盘继承底层设备的预留数量，分区固定为 1。
    /// 必须在 [`hide_partitions`](Self::hide_partitions) 之前取值。
    pub fn export_minors(&self) -> u32 {
        if self.whole_disk {
            self.dev.max_parts().max(1)
        } else {
            1
        }
    }

    /// 隐藏整盘设备的分区表
    ///
    /// 逐个删除现有分区，第一个删除错误即中止（先尝试重扫恢复可见性），
    /// 成功后保存原始扫描配置并将设备重扫为未分区状态。
    /// 分区设备是 no-op。
    ///
    /// # 返回
    ///
    /// 成功返回导出标识应继承的扫描标志。
    pub fn hide_partitions(&self) -> Result<ScanFlags> {
        if !self.whole_disk {
            // 分区无需处理
            return Ok(ScanFlags::empty());
        }

        if self.dev.max_parts() > 1 {
            if let Err(err) = self.delete_partitions() {
                log::error!(
                    "[DISK] Error deleting a partition on the device {}",
                    self.dev.name()
                );
                // 重扫，尝试恢复已删除分区的可见性
                self.dev.rescan_partitions();
                return Err(err);
            }
        }

        // 保存原始扫描配置
        let saved = self.dev.scan_config();
        *self.saved.lock() = Some(saved);

        // 将底层盘重配置为未分区设备并重扫
        self.dev.set_scan_config(ScanConfig {
            flags: ScanFlags::empty(),
            minors: 1,
        });
        self.dev.rescan_partitions();

        Ok(saved.flags)
    }

    /// 逐个删除分区，返回第一个错误
    fn delete_partitions(&self) -> Result<()> {
        while let Some(part_no) = self.dev.next_part_no() {
            match self.dev.delete_partition(part_no) {
                Ok(()) => {
                    log::info!(
                        "[DISK] Partition {} on {} hidden",
                        part_no,
                        self.dev.name()
                    );
                }
                Err(err) => {
                    log::error!(
                        "[DISK] Error({:?}) hiding the partition {} on {}",
                        err.kind(),
                        part_no,
                        self.dev.name()
                    );
                    return Err(Error::new(
                        ErrorKind::InvalidInput,
                        "cannot hide partitions of the underlying device",
                    ));
                }
            }
        }
        Ok(())
    }

    /// 恢复底层设备的原始扫描配置
    ///
    /// 拆除路径调用；没有保存配置（分区设备或隐藏未发生）时是 no-op。
    pub fn restore_partitions(&self) {
        if !self.whole_disk {
            return;
        }
        if let Some(saved) = self.saved.lock().take() {
            let mut config = self.dev.scan_config();
            config.minors = saved.minors;
            config.flags |= saved.flags;
            self.dev.set_scan_config(config);
            self.dev.rescan_partitions();
        }
    }

    /// 独占认领底层设备
    pub fn claim(&self, holder: &str) -> Result<()> {
        self.dev.claim(holder)
    }

    /// 释放独占认领
    pub fn release_claim(&self) {
        self.dev.release_claim();
    }

    /// 当前保存的扫描配置
    pub fn saved_config(&self) -> Option<ScanConfig> {
        *self.saved.lock()
    }
}
