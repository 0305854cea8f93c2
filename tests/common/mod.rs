//! 测试公共模块
//!
//! 提供脚本化的内存设备后端和记录进度输出的工具，调度器测试不需要 GPU。

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rust_eradicate::backend::CL_COMPLETE;
use rust_eradicate::worksize::WorkChunk;
use rust_eradicate::{
    CompletionNotifier, DeviceBackend, DispatchError, EnqueueError, MAX_SCORE, Mode, ProgressSink,
    QuitHandle, ResultEntry,
};

/// 构造一个结果，salt 和地址都用 `tag` 填充
pub fn entry(tag: u8) -> ResultEntry {
    ResultEntry::new([tag; 32], [tag; 20])
}

/// 异步读取完成的方式
#[derive(Clone)]
pub enum Completion {
    /// 在 read_results_async 内同步通知
    Immediate,
    /// 延迟后从另一个线程通知，模拟驱动线程
    Delayed(Duration),
    /// 把通知交给测试，由测试决定何时触发
    Manual(Sender<(usize, CompletionNotifier)>),
    /// 以给定状态通知
    Status(i32),
}

/// 所有设备都完成至少 `target` 次读取后请求退出
#[derive(Clone)]
pub struct QuitWhen {
    handle: QuitHandle,
    reads: Arc<Mutex<Vec<u32>>>,
    target: u32,
}

impl QuitWhen {
    pub fn new(handle: QuitHandle, devices: usize, target: u32) -> Self {
        Self {
            handle,
            reads: Arc::new(Mutex::new(vec![0; devices])),
            target,
        }
    }

    fn on_read(&self, slot: usize) {
        let mut reads = self.reads.lock().unwrap();
        reads[slot] += 1;
        if reads.iter().all(|&r| r >= self.target) {
            self.handle.request();
        }
    }
}

/// 后端调用记录，测试结束后检查
#[derive(Debug, Default, Clone)]
pub struct MockLog {
    pub resets: Vec<(u8, u32)>,
    pub floors: Vec<u8>,
    pub rounds: Vec<u32>,
    pub enqueues: Vec<(WorkChunk, Option<usize>)>,
    pub reads: u32,
}

/// 脚本化的设备
///
/// 每次异步读取时，把脚本中下一轮的结果写入分数桶，模拟上一轮内核的输出。
/// 分数桶在轮次之间保留，与设备缓冲区的行为一致。
pub struct MockDevice {
    slot: usize,
    buckets: Vec<ResultEntry>,
    script: VecDeque<Vec<(u8, ResultEntry)>>,
    completion: Completion,
    quit_when: Option<QuitWhen>,
    reject_local: Option<usize>,
    fail_enqueue: Option<i32>,
    pub log: Arc<Mutex<MockLog>>,
}

impl MockDevice {
    pub fn new(slot: usize, completion: Completion) -> Self {
        Self {
            slot,
            buckets: vec![ResultEntry::default(); MAX_SCORE + 1],
            script: VecDeque::new(),
            completion,
            quit_when: None,
            reject_local: None,
            fail_enqueue: None,
            log: Arc::new(Mutex::new(MockLog::default())),
        }
    }

    /// 追加一轮脚本结果
    pub fn round(mut self, results: Vec<(u8, ResultEntry)>) -> Self {
        self.script.push_back(results);
        self
    }

    pub fn quit_when(mut self, quit_when: QuitWhen) -> Self {
        self.quit_when = Some(quit_when);
        self
    }

    /// 拒绝该本地工作组大小 (CL_INVALID_WORK_GROUP_SIZE)
    pub fn reject_local(mut self, local: usize) -> Self {
        self.reject_local = Some(local);
        self
    }

    /// 入队总是以该状态失败
    pub fn fail_enqueue(mut self, status: i32) -> Self {
        self.fail_enqueue = Some(status);
        self
    }

    pub fn log_handle(&self) -> Arc<Mutex<MockLog>> {
        Arc::clone(&self.log)
    }
}

impl DeviceBackend for MockDevice {
    fn reset(&mut self, _mode: &Mode, score_floor: u8, device_index: u32) -> Result<(), DispatchError> {
        self.buckets.fill(ResultEntry::default());
        self.log.lock().unwrap().resets.push((score_floor, device_index));
        Ok(())
    }

    fn results(&self) -> &[ResultEntry] {
        &self.buckets
    }

    fn set_score_floor(&mut self, floor: u8) -> Result<(), DispatchError> {
        self.log.lock().unwrap().floors.push(floor);
        Ok(())
    }

    fn set_round(&mut self, round: u32) -> Result<(), DispatchError> {
        self.log.lock().unwrap().rounds.push(round);
        Ok(())
    }

    fn enqueue_chunk(&mut self, chunk: WorkChunk, local: Option<usize>) -> Result<(), EnqueueError> {
        if let Some(status) = self.fail_enqueue {
            return Err(EnqueueError::from_status("mock enqueue", status));
        }
        if local.is_some() && local == self.reject_local {
            return Err(EnqueueError::from_status("mock enqueue", -54));
        }
        self.log.lock().unwrap().enqueues.push((chunk, local));
        Ok(())
    }

    fn read_results_async(&mut self, notifier: CompletionNotifier) -> Result<(), DispatchError> {
        if let Some(results) = self.script.pop_front() {
            for (score, entry) in results {
                self.buckets[score as usize] = entry;
            }
        }
        self.log.lock().unwrap().reads += 1;
        if let Some(quit_when) = &self.quit_when {
            quit_when.on_read(self.slot);
        }

        match &self.completion {
            Completion::Immediate => notifier.notify(CL_COMPLETE),
            Completion::Delayed(delay) => {
                let delay = *delay;
                thread::spawn(move || {
                    thread::sleep(delay);
                    notifier.notify(CL_COMPLETE);
                });
            }
            Completion::Manual(tx) => {
                let _ = tx.send((self.slot, notifier));
            }
            Completion::Status(status) => notifier.notify(*status),
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// 记录所有进度事件
#[derive(Clone, Default)]
pub struct RecordingProgress {
    pub best: Arc<Mutex<Vec<(u8, ResultEntry)>>>,
}

impl RecordingProgress {
    pub fn scores(&self) -> Vec<u8> {
        self.best.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn best(&self, _elapsed: Duration, score: u8, entry: &ResultEntry) {
        self.best.lock().unwrap().push((score, *entry));
    }

    fn speed(&self, _line: &str) {}
}

/// 读取输出文件的所有行
pub fn read_lines(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}
