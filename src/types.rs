//! 宿主环境集成所需的类型定义
//!
//! 这个模块定义了导出设备层与宿主内核/运行环境交互的类型：
//! 执行环境抽象 [`SystemHal`]、模块配置 [`ModuleConfig`] 和设备号 [`DevId`]。

use crate::consts::*;

/// 系统硬件抽象层 trait
///
/// 提供导出设备层所需的系统级功能：执行上下文标识与协作式让出/睡眠。
/// 准入热路径只使用 [`current_cpu`](SystemHal::current_cpu) 和
/// [`yield_now`](SystemHal::yield_now)；[`sleep`](SystemHal::sleep)
/// 只在允许睡眠的排空上下文中使用。
///
/// # 示例
///
/// ```ignore
/// struct MyHal;
/// impl SystemHal for MyHal {
///     fn current_cpu() -> usize { arch::cpu_id() }
///     fn yield_now() { sched::yield_now() }
///     fn sleep(dur: core::time::Duration) { timer::sleep(dur) }
/// }
/// ```
pub trait SystemHal: 'static {
    /// 当前执行上下文的编号
    ///
    /// 返回值按每 CPU 计数槽数量取模使用，不要求小于槽数，
    /// 但同一上下文在一次准入期间必须返回稳定的值。
    fn current_cpu() -> usize;

    /// 协作式让出当前执行上下文
    fn yield_now();

    /// 睡眠指定时长
    ///
    /// 只会从允许睡眠的上下文调用（模式转换排空），不会出现在准入热路径上。
    fn sleep(dur: core::time::Duration);
}

/// 模块配置
#[derive(Debug, Clone, Copy)]
pub struct ModuleConfig {
    /// 执行上下文（CPU）数量，决定每设备的待决请求计数槽数
    pub nr_cpus: usize,
    /// 模块共享的主设备号
    pub disk_major: u32,
    /// 导出设备记录池容量
    pub exp_obj_capacity: usize,
    /// 每 CPU 计数块池容量
    pub pending_rqs_capacity: usize,
    /// 直通 I/O 上下文池容量
    pub pt_io_ctx_capacity: usize,
    /// 请求队列深度
    pub queue_depth: u32,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            nr_cpus: 1,
            disk_major: 252,
            exp_obj_capacity: 16,
            pending_rqs_capacity: 16,
            pt_io_ctx_capacity: 1024,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// 设备节点标识（主/次设备号）
///
/// 创建时分配，一经分配不可变，只在记录最终释放时归还次设备号。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevId {
    /// 主设备号（模块内共享）
    pub major: u32,
    /// 首个次设备号
    pub first_minor: u32,
    /// 占用的次设备号数量
    pub minors: u32,
}
