//! 吞吐量统计

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

/// 默认滑动窗口大小 (样本数)
pub const DEFAULT_WINDOW: usize = 20;

/// 滑动窗口内的样本
#[derive(Debug, Clone)]
struct SpeedSample {
    window: usize,
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedSample {
    fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            samples: VecDeque::with_capacity(window.max(2)),
        }
    }

    fn sample(&mut self, now: Instant, count: u64) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back((now, count));
    }

    /// 每秒处理数，第一个样本只作为时间起点
    fn speed(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };

        let elapsed = last.0.duration_since(first.0).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }

        let count: u64 = self.samples.iter().skip(1).map(|(_, c)| c).sum();
        count as f64 / elapsed
    }
}

/// 各设备与总体的速度统计
#[derive(Debug, Clone)]
pub struct SpeedTracker {
    window: usize,
    print_every: usize,
    updates: usize,
    total: SpeedSample,
    devices: BTreeMap<usize, SpeedSample>,
}

impl SpeedTracker {
    /// `print_every` 为 0 时从不生成输出行
    pub fn new(window: usize, print_every: usize) -> Self {
        Self {
            window,
            print_every,
            updates: 0,
            total: SpeedSample::new(window),
            devices: BTreeMap::new(),
        }
    }

    /// 记录设备完成一轮，需要刷新显示时返回速度行
    pub fn update(&mut self, device: usize, count: u64) -> Option<String> {
        self.update_at(Instant::now(), device, count)
    }

    pub fn update_at(&mut self, now: Instant, device: usize, count: u64) -> Option<String> {
        let window = self.window;
        self.devices
            .entry(device)
            .or_insert_with(|| SpeedSample::new(window))
            .sample(now, count);
        self.total.sample(now, count);
        self.updates += 1;

        (self.print_every != 0 && self.updates % self.print_every == 0).then(|| self.line())
    }

    /// 总速度 (每秒)
    pub fn speed(&self) -> f64 {
        self.total.speed()
    }

    pub fn device_speed(&self, device: usize) -> f64 {
        self.devices.get(&device).map_or(0.0, SpeedSample::speed)
    }

    /// 速度显示行: `Total: x MH/s - GPU0: y MH/s ...`
    pub fn line(&self) -> String {
        let mut line = format!("Total: {:.3} MH/s", self.speed() / 1e6);
        for (index, sample) in &self.devices {
            line.push_str(&format!(" - GPU{}: {:.3} MH/s", index, sample.speed() / 1e6));
        }
        line
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_WINDOW)
    }
}
