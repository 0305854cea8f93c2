//! OpenCL 程序构建与设备后端

use std::ffi::c_void;

use log::{debug, info};
use ocl::core::ffi::cl_event;
use ocl::{Buffer, Device, Event, Kernel, Program, Queue, SpatialDims, flags};

use super::context::OpenCLContext;
use crate::backend::{CompletionNotifier, DeviceBackend};
use crate::config::{MAX_SCORE, Mode, ResultEntry};
use crate::error::{DispatchError, EnqueueError};
use crate::worksize::WorkChunk;

/// 搜索内核名
pub const KERNEL_NAME: &str = "eradicate2_iterate";

/// 编译搜索程序
///
/// # Arguments
/// * `ctx` - OpenCL 上下文
/// * `kernel_source` - OpenCL C 内核源代码
/// * `init_hash` - `ERADICATE2_INITHASH` 预处理表达式
pub fn build_program(
    ctx: &OpenCLContext,
    kernel_source: &str,
    init_hash: &str,
) -> anyhow::Result<Program> {
    info!("Building OpenCL program...");

    let options = format!(
        "-D ERADICATE2_MAX_SCORE={} -D ERADICATE2_INITHASH={}",
        MAX_SCORE, init_hash
    );
    let program = Program::builder()
        .src(kernel_source)
        .devices(&ctx.device_list())
        .cmplr_opt(options)
        .build(&ctx.context)?;

    info!("OpenCL program built successfully");
    Ok(program)
}

/// 读取完成回调 (在驱动线程上执行)
extern "C" fn on_read_complete(_event: cl_event, status: i32, user_data: *mut c_void) {
    // user_data 由 read_results_async 中的 Box::into_raw 产生，回调只会触发一次
    let notifier = unsafe { Box::from_raw(user_data as *mut CompletionNotifier) };
    notifier.notify(status);
}

/// 单个 GPU 的队列、内核与缓冲区
pub struct OclDevice {
    name: String,
    queue: Queue,
    /// 搜索内核
    kernel: Kernel,
    /// 模式缓冲区
    mode_buffer: Buffer<u8>,
    /// 分数桶缓冲区
    result_buffer: Buffer<ResultEntry>,
    /// 分数桶的主机副本，异步读取的目标
    host_results: Vec<ResultEntry>,
    /// 最近一次异步读取的事件
    read_event: Option<Event>,
}

impl OclDevice {
    pub fn new(ctx: &OpenCLContext, program: &Program, device: Device) -> anyhow::Result<Self> {
        let name = device.name()?;
        let queue = Queue::new(&ctx.context, device, None)?;

        let mode_buffer = Buffer::<u8>::builder()
            .queue(queue.clone())
            .flags(flags::MEM_READ_ONLY | flags::MEM_HOST_WRITE_ONLY)
            .len(std::mem::size_of::<Mode>())
            .build()?;

        let result_buffer = Buffer::<ResultEntry>::builder()
            .queue(queue.clone())
            .flags(flags::MEM_READ_WRITE)
            .len(MAX_SCORE + 1)
            .build()?;

        let kernel = Kernel::builder()
            .program(program)
            .name(KERNEL_NAME)
            .queue(queue.clone())
            .global_work_size(SpatialDims::One(1)) // 临时值，入队时按分块设置
            .arg(&result_buffer)
            .arg(&mode_buffer)
            .arg_named("score_floor", 0u8)
            .arg_named("device_index", 0u32)
            .arg_named("round", 0u32)
            .build()?;

        debug!("Kernel {} created on {}", KERNEL_NAME, name);

        Ok(Self {
            name,
            queue,
            kernel,
            mode_buffer,
            result_buffer,
            host_results: vec![ResultEntry::default(); MAX_SCORE + 1],
            read_event: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 等待尚未完成的异步读取
    ///
    /// 调度出错时可能留下一次仍在写入 host_results 的读取，再次访问主机副本前必须先等待。
    fn wait_pending_read(&mut self) -> Result<(), DispatchError> {
        if let Some(event) = self.read_event.take() {
            event
                .wait_for()
                .map_err(|e| DispatchError::from_ocl("failed to wait for pending read", ocl::Error::from(e)))?;
        }
        Ok(())
    }
}

impl DeviceBackend for OclDevice {
    fn reset(
        &mut self,
        mode: &Mode,
        score_floor: u8,
        device_index: u32,
    ) -> Result<(), DispatchError> {
        self.wait_pending_read()?;
        self.host_results.fill(ResultEntry::default());

        self.mode_buffer
            .write(mode.as_bytes())
            .enq()
            .map_err(|e| DispatchError::from_ocl("failed to upload mode", e))?;
        self.result_buffer
            .write(&self.host_results)
            .enq()
            .map_err(|e| DispatchError::from_ocl("failed to reset results", e))?;

        self.kernel
            .set_arg("score_floor", score_floor)
            .and_then(|_| self.kernel.set_arg("device_index", device_index))
            .and_then(|_| self.kernel.set_arg("round", 0u32))
            .map_err(|e| DispatchError::from_ocl("failed to set kernel arguments", e))?;

        debug!("Mode uploaded to {}", self.name);
        Ok(())
    }

    fn results(&self) -> &[ResultEntry] {
        &self.host_results
    }

    fn set_score_floor(&mut self, floor: u8) -> Result<(), DispatchError> {
        self.kernel
            .set_arg("score_floor", floor)
            .map_err(|e| DispatchError::from_ocl("failed to set score floor", e))
    }

    fn set_round(&mut self, round: u32) -> Result<(), DispatchError> {
        self.kernel
            .set_arg("round", round)
            .map_err(|e| DispatchError::from_ocl("failed to set round", e))
    }

    fn enqueue_chunk(
        &mut self,
        chunk: WorkChunk,
        local: Option<usize>,
    ) -> Result<(), EnqueueError> {
        let mut cmd = self
            .kernel
            .cmd()
            .global_work_offset(chunk.offset)
            .global_work_size(chunk.size);
        if let Some(local) = local {
            cmd = cmd.local_work_size(local);
        }

        unsafe { cmd.enq() }.map_err(|e| EnqueueError::from_ocl("kernel queueing failed", e))
    }

    fn read_results_async(&mut self, notifier: CompletionNotifier) -> Result<(), DispatchError> {
        // 上一次读取已经通过回调完成，这里只是释放事件
        self.wait_pending_read()?;
        let mut event = Event::empty();

        // 读取完成前 host_results 只在 reset 中被访问，reset 会先等待该事件
        unsafe {
            self.result_buffer
                .read(&mut self.host_results)
                .block(false)
                .enew(&mut event)
                .enq()
        }
        .map_err(|e| DispatchError::from_ocl("failed to read results", e))?;

        let user_data = Box::into_raw(Box::new(notifier)) as *mut c_void;
        if let Err(err) = unsafe { event.set_callback(on_read_complete, user_data) } {
            drop(unsafe { Box::from_raw(user_data as *mut CompletionNotifier) });
            return Err(DispatchError::from_ocl("failed to set custom callback", ocl::Error::from(err)));
        }

        self.read_event = Some(event);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DispatchError> {
        self.queue
            .flush()
            .map_err(|e| DispatchError::from_ocl("failed to flush queue", e))
    }
}

impl Drop for OclDevice {
    fn drop(&mut self) {
        // 等待未完成的异步读取，避免写入已释放的 host_results
        let _ = self.queue.finish();
    }
}
