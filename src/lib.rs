//! GPU CREATE3 靓号地址搜索 - Rust + OpenCL 实现
//!
//! 本库在一个或多个 GPU 上并发搜索 CREATE3 salt，使部署地址满足指定的评分谓词。
//! 每个设备独立地异步调度，结果按分数汇总到一个全局最高分，低于最高分的结果
//! 去重后写入输出文件。

pub mod api;
pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod inithash;
pub mod kernel_loader;
pub mod opencl;
pub mod results;
pub mod speed;
pub mod worksize;

pub use api::{SearchRequest, search};
pub use backend::{CompletionNotifier, DeviceBackend};
pub use config::{FloorPolicy, MAX_SCORE, Mode, ModeError, ModeFunction, ResultEntry, RunConfig};
pub use dispatcher::{DeviceState, Dispatcher, QuitHandle, RunSummary};
pub use error::{DispatchError, EnqueueError};
pub use kernel_loader::load_kernel_source;
pub use opencl::{OclDevice, OpenCLContext};
pub use results::{ProgressSink, ResultLog};
