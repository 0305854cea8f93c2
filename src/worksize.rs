//! 工作量拆分与本地工作组大小回退

use log::{trace, warn};

use crate::backend::DeviceBackend;
use crate::error::{DispatchError, EnqueueError};

/// 一次入队的工作范围 [offset, offset + size)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkChunk {
    pub offset: usize,
    pub size: usize,
}

/// 将 `total` 拆分为不超过 `max` 的连续分块
///
/// `max` 为 0 时视为不限制。
///
/// # Example
/// ```
/// use rust_eradicate::worksize::split_work;
/// let chunks = split_work(10, 4);
/// assert_eq!(chunks.len(), 3);
/// assert_eq!(chunks[2].offset, 8);
/// assert_eq!(chunks[2].size, 2);
/// ```
pub fn split_work(total: usize, max: usize) -> Vec<WorkChunk> {
    let max = if max == 0 { total } else { max };
    let mut chunks = Vec::with_capacity(total.div_ceil(max.max(1)));

    let mut offset = 0;
    while offset < total {
        let size = (total - offset).min(max);
        chunks.push(WorkChunk { offset, size });
        offset += size;
    }

    chunks
}

/// 依次入队，失败时返回失败分块的下标
fn enqueue_chunks<B: DeviceBackend + ?Sized>(
    backend: &mut B,
    chunks: &[WorkChunk],
    local: Option<usize>,
) -> Result<(), (usize, EnqueueError)> {
    for (i, chunk) in chunks.iter().enumerate() {
        trace!(
            "enqueue chunk offset={} size={} local={:?}",
            chunk.offset, chunk.size, local
        );
        backend.enqueue_chunk(*chunk, local).map_err(|err| (i, err))?;
    }
    Ok(())
}

/// 按设备上限拆分并入队一整轮工作
///
/// `worksize_local` 为 0 表示由实现决定。设备拒绝该工作组大小时，
/// 永久清零 `worksize_local`，从被拒绝的分块开始重试一次；其他错误直接返回。
pub fn enqueue_device<B: DeviceBackend + ?Sized>(
    backend: &mut B,
    device_index: usize,
    worksize_local: &mut usize,
    worksize_global: usize,
    worksize_max: usize,
) -> Result<(), DispatchError> {
    let chunks = split_work(worksize_global, worksize_max);
    let local = (*worksize_local != 0).then_some(*worksize_local);

    let rejected = |status| DispatchError::WorkGroupSize {
        device: device_index,
        status,
    };

    match enqueue_chunks(backend, &chunks, local) {
        Ok(()) => Ok(()),
        Err((failed, EnqueueError::WorkGroupSize(status))) if local.is_some() => {
            warn!(
                "local work size {} abandoned on GPU{} (res = {})",
                worksize_local, device_index, status
            );
            *worksize_local = 0;
            enqueue_chunks(backend, &chunks[failed..], None).map_err(|(_, err)| match err {
                EnqueueError::WorkGroupSize(status) => rejected(status),
                EnqueueError::Fatal(err) => err,
            })
        }
        Err((_, EnqueueError::WorkGroupSize(status))) => Err(rejected(status)),
        Err((_, EnqueueError::Fatal(err))) => Err(err),
    }
}
