//! 设备计算后端接口
//!
//! 调度核心只通过 `DeviceBackend` 访问设备，OpenCL 实现见 `opencl::kernel::OclDevice`。

use std::sync::mpsc::Sender;

use crate::config::{Mode, ResultEntry};
use crate::error::{DispatchError, EnqueueError};
use crate::worksize::WorkChunk;

/// 完成状态: CL_COMPLETE
pub const CL_COMPLETE: i32 = 0;

/// 一次性完成通知
///
/// 后端在异步读取完成时调用 `notify`，由设备的工作线程接收并执行下一次调度。
/// 通知可能来自驱动线程，因此这里只发送消息，不执行任何调度逻辑。
#[derive(Debug)]
pub struct CompletionNotifier {
    tx: Sender<i32>,
}

impl CompletionNotifier {
    pub fn new(tx: Sender<i32>) -> Self {
        Self { tx }
    }

    /// 发送完成状态 (接收端已关闭时忽略)
    pub fn notify(self, status: i32) {
        let _ = self.tx.send(status);
    }
}

/// 单个计算设备的后端操作
pub trait DeviceBackend: Send {
    /// 清零所有分数桶、上传模式并绑定固定内核参数
    fn reset(&mut self, mode: &Mode, score_floor: u8, device_index: u32)
    -> Result<(), DispatchError>;

    /// 最近一次读取到主机的分数桶 (长度 MAX_SCORE + 1)，收到完成通知后才有效
    fn results(&self) -> &[ResultEntry];

    /// 更新内核的分数下限参数
    fn set_score_floor(&mut self, floor: u8) -> Result<(), DispatchError>;

    /// 更新内核的轮次参数
    fn set_round(&mut self, round: u32) -> Result<(), DispatchError>;

    /// 入队一个内核分块，`local` 为 None 时由实现决定工作组大小
    fn enqueue_chunk(&mut self, chunk: WorkChunk, local: Option<usize>)
    -> Result<(), EnqueueError>;

    /// 非阻塞读取分数桶，完成后通过 `notifier` 通知
    fn read_results_async(&mut self, notifier: CompletionNotifier) -> Result<(), DispatchError>;

    /// 提交队列中的命令
    fn flush(&mut self) -> Result<(), DispatchError>;
}
