//! 调度错误类型

use thiserror::Error;

use crate::config::ModeError;

/// OpenCL 状态码: CL_INVALID_WORK_GROUP_SIZE
pub const CL_INVALID_WORK_GROUP_SIZE: i32 = -54;
/// OpenCL 状态码: CL_INVALID_WORK_ITEM_SIZE
pub const CL_INVALID_WORK_ITEM_SIZE: i32 = -55;

/// 调度核心的错误
#[derive(Debug, Error)]
pub enum DispatchError {
    /// 计算后端调用失败
    #[error("{context} (res = {status})")]
    Backend { context: String, status: i32 },
    /// 完成回调报告了非成功状态
    #[error("completion callback got bad status {0}")]
    CallbackStatus(i32),
    /// 回退到默认本地工作组大小后仍然被拒绝
    #[error("kernel queueing failed: work group size rejected on GPU{device} (res = {status})")]
    WorkGroupSize { device: usize, status: i32 },
    /// 设备的完成通知通道意外关闭
    #[error("completion channel for GPU{0} closed")]
    ChannelClosed(usize),
    #[error("invalid mode: {0}")]
    Mode(#[from] ModeError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    pub fn backend(context: impl Into<String>, status: i32) -> Self {
        DispatchError::Backend {
            context: context.into(),
            status,
        }
    }

    /// 将 ocl 错误转换为带状态码的后端错误
    pub fn from_ocl(context: &str, err: ocl::Error) -> Self {
        let status = ocl_status(&err);
        DispatchError::backend(format!("{}: {}", context, err), status)
    }

    /// 失败的状态码 (如果有)
    pub fn status(&self) -> Option<i32> {
        match self {
            DispatchError::Backend { status, .. }
            | DispatchError::WorkGroupSize { status, .. }
            | DispatchError::CallbackStatus(status) => Some(*status),
            _ => None,
        }
    }
}

/// ocl 错误中的 OpenCL 状态码，非 API 错误时为 0
pub fn ocl_status(err: &ocl::Error) -> i32 {
    err.api_status().map_or(0, |status| status as i32)
}

/// 单次内核入队的错误
///
/// 工作组大小被拒绝是唯一可以恢复的情况，调用方据此回退。
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("work group size rejected (res = {0})")]
    WorkGroupSize(i32),
    #[error(transparent)]
    Fatal(#[from] DispatchError),
}

impl EnqueueError {
    /// 按状态码分类
    pub fn from_status(context: &str, status: i32) -> Self {
        if status == CL_INVALID_WORK_GROUP_SIZE || status == CL_INVALID_WORK_ITEM_SIZE {
            EnqueueError::WorkGroupSize(status)
        } else {
            EnqueueError::Fatal(DispatchError::backend(context, status))
        }
    }

    pub fn from_ocl(context: &str, err: ocl::Error) -> Self {
        match ocl_status(&err) {
            status @ (CL_INVALID_WORK_GROUP_SIZE | CL_INVALID_WORK_ITEM_SIZE) => {
                EnqueueError::WorkGroupSize(status)
            }
            _ => EnqueueError::Fatal(DispatchError::from_ocl(context, err)),
        }
    }
}
