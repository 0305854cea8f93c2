//! OpenCL GPU 计算模块

pub mod context;
pub mod kernel;

pub use context::{OpenCLContext, list_gpu_devices};
pub use kernel::{OclDevice, build_program};
