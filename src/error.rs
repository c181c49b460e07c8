//! 错误类型定义
//!
//! 提供导出设备层操作的错误类型。
//!
//! 契约违规（例如在不可能的模式下派发请求）不属于这里的错误分类，
//! 它们通过 panic 终止操作，不会以 [`Error`] 的形式返回。

use core::fmt;

/// 导出设备层操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O 错误
    Io,
    /// 无效参数（名称过长、缺少必需输入）
    InvalidInput,
    /// 内存不足（对象池耗尽、克隆分配失败）
    NoMemory,
    /// 已存在（激活时名称冲突、注册表冲突）
    AlreadyExists,
    /// 设备忙（锁定时存在外部打开者、转换进行中）
    Busy,
    /// 引用获取失败（例如模块引用钉住失败）
    NotAvailable,
    /// 设备不存在或已销毁
    NoDevice,
    /// 无效的生命周期状态（重复激活、未锁定即销毁）
    InvalidState,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
