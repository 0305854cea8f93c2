//! 多设备异步调度
//!
//! 每个设备是一个显式状态机:
//!
//! ```text
//! Idle ──▶ Harvesting ──▶ Dispatched ──(完成通知)──▶ Harvesting ──▶ ...
//!                 │
//!                 └──(quit)──▶ Drained
//! ```
//!
//! 后端的完成回调只向设备的信箱发送消息，每个设备由一个工作线程接收消息并执行调度。
//! 同一设备的调度严格串行，不同设备之间并发，只在全局最高分、运行计数和结果文件上加锁。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use log::{debug, error, info, warn};

use crate::backend::{CL_COMPLETE, CompletionNotifier, DeviceBackend};
use crate::config::{MAX_SCORE, Mode, RunConfig};
use crate::error::DispatchError;
use crate::results::{ConsoleProgress, ProgressSink, ResultLog};
use crate::speed::SpeedTracker;
use crate::worksize::enqueue_device;

/// 外部请求退出的句柄
///
/// 设备在下一次调度开始时检查该标志，正在执行的一轮会先完成。
#[derive(Debug, Clone, Default)]
pub struct QuitHandle(Arc<AtomicBool>);

impl QuitHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 设备调度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// 尚未开始调度
    Idle,
    /// 内核已入队，等待完成通知
    Dispatched,
    /// 正在检查结果
    Harvesting,
    /// 已退出
    Drained,
}

/// 一个参与搜索的计算设备
pub struct Device<B> {
    index: usize,
    worksize_local: usize,
    score_max: u8,
    round: u32,
    state: DeviceState,
    backend: B,
}

impl<B: DeviceBackend> Device<B> {
    /// `worksize_local` 为 0 表示由实现决定
    pub fn new(backend: B, index: usize, worksize_local: usize) -> Self {
        Self {
            index,
            worksize_local,
            score_max: 0,
            round: 0,
            state: DeviceState::Idle,
            backend,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// 本设备的最高分
    pub fn score_max(&self) -> u8 {
        self.score_max
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn worksize_local(&self) -> usize {
        self.worksize_local
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// 清零结果、上传模式、绑定固定参数
    pub fn reset(&mut self, mode: &Mode, score_floor: u8) -> Result<(), DispatchError> {
        self.round = 0;
        self.score_max = 0;
        self.state = DeviceState::Idle;
        self.backend.reset(mode, score_floor, self.index as u32)
    }
}

/// 一次运行的结果汇总
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// 全局最高分
    pub score_max: u8,
    /// 写入输出文件的结果数
    pub saved: usize,
    /// 每个设备完成的轮数
    pub rounds: Vec<(usize, u32)>,
}

type RunOutcome = Result<(), DispatchError>;

/// 需要加锁的运行状态
struct Shared {
    score_max: u8,
    running: usize,
    log: ResultLog,
}

/// 所有设备线程共享的运行期状态
struct RunContext<'a> {
    cfg: &'a RunConfig,
    quit: &'a QuitHandle,
    progress: &'a dyn ProgressSink,
    shared: Mutex<Shared>,
    speed: Mutex<SpeedTracker>,
    size: usize,
    worksize_max: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RunContext<'_> {
    /// 驱动一个设备直到退出
    fn drive<B: DeviceBackend>(
        &self,
        d: &mut Device<B>,
        done: &Sender<RunOutcome>,
    ) -> Result<(), DispatchError> {
        let (tx, rx) = mpsc::channel::<i32>();

        loop {
            if self.dispatch(d, &tx, done)? == DeviceState::Drained {
                return Ok(());
            }

            let status = rx
                .recv()
                .map_err(|_| DispatchError::ChannelClosed(d.index))?;
            if status != CL_COMPLETE {
                return Err(DispatchError::CallbackStatus(status));
            }
        }
    }

    /// 一次调度: 检查结果，然后入队下一轮或退出
    fn dispatch<B: DeviceBackend>(
        &self,
        d: &mut Device<B>,
        tx: &Sender<i32>,
        done: &Sender<RunOutcome>,
    ) -> Result<DeviceState, DispatchError> {
        d.state = DeviceState::Harvesting;
        self.harvest(d)?;

        let line = lock(&self.speed).update(d.index, self.size as u64);
        if let Some(line) = line {
            self.progress.speed(&line);
        }

        if self.quit.is_requested() {
            d.state = DeviceState::Drained;
            let mut shared = lock(&self.shared);
            shared.running -= 1;
            debug!(
                "GPU{} drained after {} rounds, {} still running",
                d.index, d.round, shared.running
            );
            if shared.running == 0 {
                let _ = done.send(Ok(()));
            }
            return Ok(DeviceState::Drained);
        }

        d.backend
            .read_results_async(CompletionNotifier::new(tx.clone()))?;

        d.round = d.round.wrapping_add(1);
        d.backend.set_round(d.round)?;
        enqueue_device(
            &mut d.backend,
            d.index,
            &mut d.worksize_local,
            self.size,
            self.worksize_max,
        )?;
        d.backend.flush()?;

        d.state = DeviceState::Dispatched;
        Ok(DeviceState::Dispatched)
    }

    /// 从高到低扫描分数桶
    ///
    /// 超过全局最高分的结果只报告一个 (最高的)；所有高于 score_min 的结果
    /// 都写入输出文件，地址去重。
    fn harvest<B: DeviceBackend>(&self, d: &mut Device<B>) -> Result<(), DispatchError> {
        let score_min = self.cfg.score_min as usize;

        for i in (score_min + 1..=MAX_SCORE).rev() {
            let Some(entry) = d.backend.results().get(i).copied() else {
                continue;
            };
            if !entry.is_found() {
                continue;
            }

            let score = i as u8;
            let global = lock(&self.shared).score_max;

            if score > global {
                if score < d.score_max {
                    continue;
                }

                d.score_max = score;
                d.backend.set_score_floor(self.cfg.score_floor(score))?;

                let mut shared = lock(&self.shared);
                if score > shared.score_max {
                    shared.score_max = score;
                    self.progress
                        .best(self.cfg.time_start.elapsed(), score, &entry);
                }
                // 设备可能在下一轮之前退出，新最高分同样写入输出文件
                shared.log.record(score, &entry)?;
                break;
            }

            let mut shared = lock(&self.shared);
            if shared.log.record(score, &entry)? {
                debug!(
                    "GPU{} saved score {} address 0x{}",
                    d.index,
                    score,
                    entry.address_hex()
                );
            }
        }

        Ok(())
    }
}

/// 多设备调度器
pub struct Dispatcher<B> {
    devices: Vec<Device<B>>,
    worksize_max: usize,
    size: usize,
    cfg: RunConfig,
    quit: QuitHandle,
    progress: Box<dyn ProgressSink>,
    speed_print_every: usize,
}

impl<B: DeviceBackend> Dispatcher<B> {
    /// # Arguments
    /// * `worksize_max` - 单次入队的最大工作量 (0 表示不拆分)
    /// * `size` - 每轮每个设备的总工作量
    /// * `cfg` - 运行配置
    pub fn new(worksize_max: usize, size: usize, cfg: RunConfig) -> Self {
        Self {
            devices: Vec::new(),
            worksize_max,
            size,
            cfg,
            quit: QuitHandle::new(),
            progress: Box::new(ConsoleProgress),
            speed_print_every: crate::speed::DEFAULT_WINDOW,
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// 每多少次设备更新输出一次速度行，0 表示不输出
    pub fn with_speed_interval(mut self, every: usize) -> Self {
        self.speed_print_every = every;
        self
    }

    pub fn add_device(&mut self, backend: B, worksize_local: usize, index: usize) {
        self.devices.push(Device::new(backend, index, worksize_local));
    }

    pub fn devices(&self) -> &[Device<B>] {
        &self.devices
    }

    pub fn config(&self) -> &RunConfig {
        &self.cfg
    }

    /// 使用外部创建的退出句柄
    pub fn with_quit_handle(mut self, quit: QuitHandle) -> Self {
        self.quit = quit;
        self
    }

    /// 退出句柄，可以在运行前获取并交给信号处理器
    ///
    /// 运行前发出的退出请求同样有效，设备会在第一次调度时直接退出。
    pub fn quit_handle(&self) -> QuitHandle {
        self.quit.clone()
    }

    /// 在所有设备上运行搜索，直到退出请求后所有设备都完成最后一轮
    pub fn run(&mut self, mode: &Mode) -> Result<RunSummary, DispatchError> {
        let (done_tx, done_rx) = mpsc::channel::<RunOutcome>();

        let log = ResultLog::open(&self.cfg.file_name)?;

        for d in &mut self.devices {
            d.reset(mode, self.cfg.score_min)?;
        }

        let Dispatcher {
            devices,
            worksize_max,
            size,
            cfg,
            quit,
            progress,
            speed_print_every,
        } = self;

        let ctx = RunContext {
            cfg,
            quit,
            progress: progress.as_ref(),
            shared: Mutex::new(Shared {
                score_max: 0,
                running: devices.len(),
                log,
            }),
            speed: Mutex::new(SpeedTracker::new(
                crate::speed::DEFAULT_WINDOW,
                *speed_print_every,
            )),
            size: *size,
            worksize_max: *worksize_max,
        };

        if devices.is_empty() {
            warn!("No devices to run on");
            return Ok(RunSummary {
                score_max: 0,
                saved: 0,
                rounds: Vec::new(),
            });
        }

        info!(
            "Running on {} device(s), {} work items per round",
            devices.len(),
            size
        );

        let outcome = thread::scope(|s| {
            for d in devices.iter_mut() {
                let ctx = &ctx;
                let done = done_tx.clone();
                s.spawn(move || {
                    if let Err(err) = ctx.drive(d, &done) {
                        error!("GPU{} failed: {}", d.index, err);
                        ctx.quit.request();
                        let _ = done.send(Err(err));
                    }
                });
            }
            drop(done_tx);

            done_rx
                .recv()
                .unwrap_or_else(|_| Err(DispatchError::ChannelClosed(usize::MAX)))
        });

        let mut shared = ctx
            .shared
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        quit.reset();
        shared.log.flush()?;
        outcome?;

        info!(
            "Run finished: best score {}, {} result(s) saved",
            shared.score_max,
            shared.log.len()
        );

        Ok(RunSummary {
            score_max: shared.score_max,
            saved: shared.log.len(),
            rounds: devices.iter().map(|d| (d.index, d.round)).collect(),
        })
    }
}
