//! 设备节点命名空间
//!
//! 导出设备激活后以名字对外可见、可被打开。本模块提供节点实体
//! [`DeviceNode`]（打开者计数 + 销毁者独占位）和模块级命名空间
//! [`NodeNamespace`]（按名字发布/撤销节点）。
//!
//! 独占位最多串行化一个销毁者；它与打开者计数一起实现锁定协议：
//! 存在外部打开者时拒绝销毁。

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use hashbrown::HashMap;
use spin::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::types::DevId;

/// 已发布的设备节点
pub struct DeviceNode {
    /// 节点名称
    name: String,
    /// 设备号
    devt: DevId,
    /// 外部打开者计数
    openers: AtomicU32,
    /// 销毁者独占位
    exclusive: AtomicBool,
}

impl core::fmt::Debug for DeviceNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceNode")
            .field("name", &self.name)
            .field("devt", &self.devt)
            .finish_non_exhaustive()
    }
}

impl DeviceNode {
    fn new(name: String, devt: DevId) -> Self {
        Self {
            name,
            devt,
            openers: AtomicU32::new(0),
            exclusive: AtomicBool::new(false),
        }
    }

    /// 节点名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 设备号
    pub fn devt(&self) -> DevId {
        self.devt
    }

    /// 外部打开
    pub fn open(&self) {
        self.openers.fetch_add(1, Ordering::SeqCst);
    }

    /// 外部关闭
    pub fn close(&self) {
        let prev = self.openers.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "node closed more times than opened");
    }

    /// 当前打开者数量
    pub fn openers(&self) -> u32 {
        self.openers.load(Ordering::SeqCst)
    }

    /// 尝试占用销毁者独占位
    ///
    /// 已被占用时返回 false。独占位不可重入。
    pub fn try_exclusive(&self) -> bool {
        self.exclusive
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// 释放销毁者独占位
    pub fn release_exclusive(&self) {
        let was = self.exclusive.swap(false, Ordering::SeqCst);
        debug_assert!(was, "exclusive slot released while not held");
    }

    /// 独占位是否被占用
    pub fn is_exclusive(&self) -> bool {
        self.exclusive.load(Ordering::SeqCst)
    }
}

/// 设备节点命名空间
///
/// 名字在模块命名空间内唯一；重复发布返回 `AlreadyExists`。
pub struct NodeNamespace {
    nodes: Mutex<HashMap<String, Arc<DeviceNode>>>,
}

impl NodeNamespace {
    /// 创建空命名空间
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// 名字是否已可见
    pub fn exists(&self, name: &str) -> bool {
        self.nodes.lock().contains_key(name)
    }

    /// 发布节点
    pub fn publish(&self, name: &str, devt: DevId) -> Result<Arc<DeviceNode>> {
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(name) {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                "device node name already visible",
            ));
        }
        let node = Arc::new(DeviceNode::new(String::from(name), devt));
        nodes.insert(String::from(name), Arc::clone(&node));
        Ok(node)
    }

    /// 撤销节点
    ///
    /// 已持有节点句柄的一方不受影响（句柄是引用计数的）。
    pub fn unpublish(&self, name: &str) {
        self.nodes.lock().remove(name);
    }

    /// 查找节点
    pub fn get(&self, name: &str) -> Option<Arc<DeviceNode>> {
        self.nodes.lock().get(name).cloned()
    }

    /// 已发布节点数量
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}

impl Default for NodeNamespace {
    fn default() -> Self {
        Self::new()
    }
}
