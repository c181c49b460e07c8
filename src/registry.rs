//! 发现/注册子系统
//!
//! 导出设备的身份对象在一个父命名空间下注册，激活后再发布一条从注册
//! 对象指向其设备节点的命名链接，供发现方使用。本模块是该子系统的
//! 内存实现：按路径注册身份对象，维护对象上的命名链接。
//!
//! 路径形如 `"exported/cache0"`；链接挂在源对象上，按链接名唯一。

use alloc::format;
use alloc::string::String;
use hashbrown::HashMap;
use spin::Mutex;

use crate::error::{Error, ErrorKind, Result};

/// 单个注册对象的记录
struct RegEntry {
    /// 对象上的命名链接：链接名 -> 目标路径
    links: HashMap<String, String>,
}

/// 身份对象注册表
pub struct Registry {
    entries: Mutex<HashMap<String, RegEntry>>,
}

impl Registry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 在父路径下注册一个身份对象
    ///
    /// # 返回
    ///
    /// 成功返回对象的完整路径；路径冲突返回 `AlreadyExists`。
    pub fn register(&self, parent: &str, name: &str) -> Result<String> {
        let path = format!("{}/{}", parent, name);
        let mut entries = self.entries.lock();
        if entries.contains_key(&path) {
            log::error!("[REGISTRY] Cannot register object {}", path);
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                "identity object already registered",
            ));
        }
        entries.insert(
            path.clone(),
            RegEntry {
                links: HashMap::new(),
            },
        );
        Ok(path)
    }

    /// 注销一个身份对象（连同其链接）
    pub fn unregister(&self, path: &str) {
        self.entries.lock().remove(path);
    }

    /// 在已注册对象上发布一条命名链接
    pub fn publish_link(&self, path: &str, link_name: &str, target: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(path).ok_or(Error::new(
            ErrorKind::NoDevice,
            "link source object not registered",
        ))?;
        if entry.links.contains_key(link_name) {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                "link name already published",
            ));
        }
        entry
            .links
            .insert(String::from(link_name), String::from(target));
        Ok(())
    }

    /// 移除对象上的命名链接
    pub fn remove_link(&self, path: &str, link_name: &str) {
        if let Some(entry) = self.entries.lock().get_mut(path) {
            entry.links.remove(link_name);
        }
    }

    /// 对象是否已注册
    pub fn is_registered(&self, path: &str) -> bool {
        self.entries.lock().contains_key(path)
    }

    /// 读取对象上链接的目标
    pub fn link_target(&self, path: &str, link_name: &str) -> Option<String> {
        self.entries
            .lock()
            .get(path)
            .and_then(|entry| entry.links.get(link_name).cloned())
    }

    /// 已注册对象数量
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
