//! 对外提供的 Rust 调用接口

use std::path::PathBuf;

use anyhow::{Context, bail};
use log::info;

use crate::config::{FloorPolicy, Mode, RunConfig, default_file_name};
use crate::dispatcher::{Dispatcher, QuitHandle, RunSummary};
use crate::inithash::{DEFAULT_C3_DEPLOYER, DEFAULT_C3_PROXY_HASH, build_init_hash};
use crate::kernel_loader::load_kernel_source;
use crate::opencl::{OclDevice, OpenCLContext, build_program};

/// 默认最低分
pub const DEFAULT_SCORE_MIN: u8 = 6;

/// 默认本地工作组大小
pub const DEFAULT_WORKSIZE_LOCAL: usize = 128;

/// 默认每轮工作量
pub const DEFAULT_SIZE: usize = 16_777_216;

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub mode: Mode,
    /// 输出文件，None 表示按模式名和时间生成
    pub file_name: Option<PathBuf>,
    pub score_min: u8,
    /// 跳过的设备索引
    pub skip: Vec<usize>,
    /// 0 表示由驱动决定
    pub worksize_local: usize,
    /// 0 表示与 size 相同
    pub worksize_max: usize,
    pub size: usize,
    pub kernel_dir: PathBuf,
    pub deployer: String,
    pub c3_deployer: String,
    pub c3_proxy_hash: String,
    pub floor_policy: FloorPolicy,
}

impl SearchRequest {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            file_name: None,
            score_min: DEFAULT_SCORE_MIN,
            skip: Vec::new(),
            worksize_local: DEFAULT_WORKSIZE_LOCAL,
            worksize_max: 0,
            size: DEFAULT_SIZE,
            kernel_dir: PathBuf::from("kernels"),
            deployer: String::new(),
            c3_deployer: String::from(DEFAULT_C3_DEPLOYER),
            c3_proxy_hash: String::from(DEFAULT_C3_PROXY_HASH),
            floor_policy: FloorPolicy::default(),
        }
    }

    /// 实际使用的输出文件
    pub fn output_file(&self) -> PathBuf {
        self.file_name
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_file_name(self.mode.function)))
    }

    /// 实际使用的单次最大入队量
    pub fn effective_worksize_max(&self) -> usize {
        if self.worksize_max == 0 {
            self.size
        } else {
            self.worksize_max
        }
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig::new(self.output_file(), self.score_min).with_floor_policy(self.floor_policy)
    }
}

/// 在所有可用 GPU 上搜索，直到 `quit` 被请求
pub fn search(request: &SearchRequest, quit: &QuitHandle) -> anyhow::Result<RunSummary> {
    if request.size == 0 {
        bail!("size must be greater than 0");
    }

    let ctx = OpenCLContext::new(&request.skip)?;
    ctx.print_device_info()?;

    let kernel_source = load_kernel_source(&request.kernel_dir)?;
    let init_hash = build_init_hash(
        &request.deployer,
        &request.c3_deployer,
        &request.c3_proxy_hash,
    )
    .context("invalid init hash parameters")?;
    let program = build_program(&ctx, &kernel_source, &init_hash)?;

    let cfg = request.run_config();
    info!(
        "Mode: {}, score min {}, output {}",
        request.mode.function.name(),
        cfg.score_min,
        cfg.file_name.display()
    );

    let mut dispatcher = Dispatcher::new(request.effective_worksize_max(), request.size, cfg)
        .with_quit_handle(quit.clone());

    for gpu in &ctx.devices {
        let device = OclDevice::new(&ctx, &program, gpu.device)
            .with_context(|| format!("failed to initialize GPU{}", gpu.index))?;
        dispatcher.add_device(device, request.worksize_local, gpu.index);
    }

    Ok(dispatcher.run(&request.mode)?)
}
