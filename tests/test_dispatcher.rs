//! 多设备调度测试 (脚本化后端，不需要 GPU)

mod common;

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rust_eradicate::backend::CL_COMPLETE;
use rust_eradicate::{DeviceState, DispatchError, Dispatcher, FloorPolicy, Mode, RunConfig};

use common::{Completion, MockDevice, QuitWhen, RecordingProgress, entry, read_lines};

fn dispatcher(
    dir: &tempfile::TempDir,
    score_min: u8,
    progress: &RecordingProgress,
) -> Dispatcher<MockDevice> {
    let cfg = RunConfig::new(dir.path().join("results.txt"), score_min);
    Dispatcher::new(0, 1024, cfg)
        .with_progress(Box::new(progress.clone()))
        .with_speed_interval(0)
}

#[test]
fn test_single_device_new_best_reported_and_saved() {
    let dir = tempfile::tempdir().unwrap();
    let progress = RecordingProgress::default();
    let mut d = dispatcher(&dir, 6, &progress);

    let quit = QuitWhen::new(d.quit_handle(), 1, 3);
    let device = MockDevice::new(0, Completion::Immediate)
        .round(vec![(8, entry(0xa8))])
        .quit_when(quit);
    let log = device.log_handle();
    d.add_device(device, 0, 0);

    let summary = d.run(&Mode::zeros()).unwrap();

    // 8 分报告一次，之后的轮次重复看到同一地址也只写一行
    assert_eq!(progress.scores(), vec![8]);
    assert_eq!(
        read_lines(&dir.path().join("results.txt")),
        vec![format!("8,0x{},0x{}", "a8".repeat(32), "a8".repeat(20))]
    );
    assert_eq!(summary.score_max, 8);
    assert_eq!(summary.saved, 1);
    assert_eq!(summary.rounds, vec![(0, 3)]);

    let log = log.lock().unwrap();
    assert_eq!(log.resets, vec![(6, 0)]);
    assert_eq!(log.floors, vec![8]);
    assert_eq!(log.rounds, vec![1, 2, 3]);
    assert_eq!(d.devices()[0].state(), DeviceState::Drained);
}

#[test]
fn test_two_devices_same_address_saved_once() {
    let dir = tempfile::tempdir().unwrap();
    let progress = RecordingProgress::default();
    let mut d = dispatcher(&dir, 6, &progress);

    let quit = QuitWhen::new(d.quit_handle(), 2, 4);
    for slot in 0..2 {
        let device = MockDevice::new(slot, Completion::Delayed(Duration::from_millis(1)))
            .round(vec![(7, entry(0x77))])
            .quit_when(quit.clone());
        d.add_device(device, 0, slot);
    }

    let summary = d.run(&Mode::zeros()).unwrap();

    assert_eq!(progress.scores(), vec![7]);
    assert_eq!(read_lines(&dir.path().join("results.txt")).len(), 1);
    assert_eq!(summary.saved, 1);
    assert_eq!(summary.score_max, 7);
}

#[test]
fn test_local_size_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let progress = RecordingProgress::default();
    let mut d = dispatcher(&dir, 6, &progress);

    let quit = QuitWhen::new(d.quit_handle(), 1, 2);
    let device = MockDevice::new(0, Completion::Immediate)
        .reject_local(256)
        .quit_when(quit);
    let log = device.log_handle();
    d.add_device(device, 256, 0);

    d.run(&Mode::benchmark()).unwrap();

    assert_eq!(d.devices()[0].worksize_local(), 0);
    let log = log.lock().unwrap();
    assert_eq!(log.enqueues.len(), 2);
    assert!(log.enqueues.iter().all(|(_, local)| local.is_none()));
}

#[test]
fn test_local_size_accepted_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let progress = RecordingProgress::default();
    let cfg = RunConfig::new(dir.path().join("results.txt"), 6);
    let mut d = Dispatcher::new(256, 1024, cfg)
        .with_progress(Box::new(progress))
        .with_speed_interval(0);

    let quit = QuitWhen::new(d.quit_handle(), 1, 1);
    let device = MockDevice::new(0, Completion::Immediate).quit_when(quit);
    let log = device.log_handle();
    d.add_device(device, 128, 0);

    d.run(&Mode::benchmark()).unwrap();

    assert_eq!(d.devices()[0].worksize_local(), 128);
    let log = log.lock().unwrap();
    let offsets: Vec<usize> = log.enqueues.iter().map(|(c, _)| c.offset).collect();
    assert_eq!(offsets, vec![0, 256, 512, 768]);
    assert!(log.enqueues.iter().all(|(_, local)| *local == Some(128)));
}

#[test]
fn test_quit_drains_both_devices() {
    let dir = tempfile::tempdir().unwrap();
    let progress = RecordingProgress::default();
    let mut d = dispatcher(&dir, 6, &progress);
    let quit = d.quit_handle();

    let (tx, rx) = mpsc::channel();
    d.add_device(
        MockDevice::new(0, Completion::Manual(tx.clone())).round(vec![(9, entry(0x09))]),
        0,
        0,
    );
    d.add_device(MockDevice::new(1, Completion::Manual(tx)), 0, 1);

    let (done_tx, done_rx) = mpsc::channel();
    let summary = thread::scope(|s| {
        let handle = s.spawn(|| {
            let summary = d.run(&Mode::zeros());
            let _ = done_tx.send(());
            summary
        });

        // 两个设备都已入队第一轮
        let mut pending = vec![rx.recv().unwrap(), rx.recv().unwrap()];
        pending.sort_by_key(|(slot, _)| *slot);

        quit.request();
        let (_, second) = pending.pop().unwrap();
        let (_, first) = pending.pop().unwrap();

        first.notify(CL_COMPLETE);
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        second.notify(CL_COMPLETE);
        let summary = handle.join().unwrap().unwrap();
        assert!(done_rx.try_recv().is_ok());
        summary
    });

    // 退出前仍然检查了最后一轮的结果，新最高分也写入了输出文件
    assert_eq!(progress.scores(), vec![9]);
    assert_eq!(
        read_lines(&dir.path().join("results.txt")),
        vec![format!("9,0x{},0x{}", "09".repeat(32), "09".repeat(20))]
    );
    assert_eq!(summary.saved, 1);
    assert_eq!(summary.rounds, vec![(0, 1), (1, 1)]);
    assert!(d.devices().iter().all(|dev| dev.state() == DeviceState::Drained));
}

#[test]
fn test_watermark_is_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let progress = RecordingProgress::default();
    let mut d = dispatcher(&dir, 6, &progress);

    let quit = QuitWhen::new(d.quit_handle(), 3, 6);
    let scripts: [&[u8]; 3] = [&[7, 9, 12], &[8, 10, 11], &[13, 7]];
    for (slot, scores) in scripts.iter().enumerate() {
        let mut device = MockDevice::new(slot, Completion::Delayed(Duration::from_micros(200)))
            .quit_when(quit.clone());
        for &score in scores.iter() {
            device = device.round(vec![(score, entry(score + 0x10 * slot as u8))]);
        }
        d.add_device(device, 0, slot);
    }

    let summary = d.run(&Mode::zeros()).unwrap();

    let scores = progress.scores();
    assert!(scores.windows(2).all(|w| w[0] < w[1]), "{:?}", scores);
    assert_eq!(scores.last(), Some(&13));
    assert_eq!(summary.score_max, 13);

    // 每个地址最多一行
    let lines = read_lines(&dir.path().join("results.txt"));
    let mut addresses: Vec<&str> = lines.iter().filter_map(|l| l.rsplit(',').next()).collect();
    let total = addresses.len();
    addresses.sort();
    addresses.dedup();
    assert_eq!(addresses.len(), total);
}

#[test]
fn test_scores_at_or_below_min_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let progress = RecordingProgress::default();
    let mut d = dispatcher(&dir, 6, &progress);

    let quit = QuitWhen::new(d.quit_handle(), 1, 3);
    let device = MockDevice::new(0, Completion::Immediate)
        .round(vec![(6, entry(0x06)), (3, entry(0x03))])
        .quit_when(quit);
    d.add_device(device, 0, 0);

    let summary = d.run(&Mode::zeros()).unwrap();

    assert!(progress.scores().is_empty());
    assert!(read_lines(&dir.path().join("results.txt")).is_empty());
    assert_eq!(summary.score_max, 0);
    assert_eq!(summary.saved, 0);
}

#[test]
fn test_keep_floor_policy() {
    let dir = tempfile::tempdir().unwrap();
    let progress = RecordingProgress::default();
    let cfg = RunConfig::new(dir.path().join("results.txt"), 6).with_floor_policy(FloorPolicy::ScoreMin);
    let mut d = Dispatcher::new(0, 1024, cfg)
        .with_progress(Box::new(progress.clone()))
        .with_speed_interval(0);

    let quit = QuitWhen::new(d.quit_handle(), 1, 3);
    let device = MockDevice::new(0, Completion::Immediate)
        .round(vec![(8, entry(0x08))])
        .round(vec![(10, entry(0x0a))])
        .quit_when(quit);
    let log = device.log_handle();
    d.add_device(device, 0, 0);

    d.run(&Mode::zeros()).unwrap();

    assert_eq!(progress.scores(), vec![8, 10]);
    assert_eq!(log.lock().unwrap().floors, vec![6, 6]);
}

#[test]
fn test_output_file_is_appended() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.txt");
    std::fs::write(&path, "7,0xold,0xold\n").unwrap();

    let progress = RecordingProgress::default();
    let mut d = dispatcher(&dir, 6, &progress);
    let quit = QuitWhen::new(d.quit_handle(), 1, 3);
    let device = MockDevice::new(0, Completion::Immediate)
        .round(vec![(9, entry(0x99)), (7, entry(0x77))])
        .quit_when(quit);
    d.add_device(device, 0, 0);

    d.run(&Mode::zeros()).unwrap();

    let lines = read_lines(&path);
    assert_eq!(lines[0], "7,0xold,0xold");
    assert_eq!(lines.len(), 3);
}

#[test]
fn test_callback_error_stops_run() {
    let dir = tempfile::tempdir().unwrap();
    let progress = RecordingProgress::default();
    let mut d = dispatcher(&dir, 6, &progress);

    d.add_device(MockDevice::new(0, Completion::Status(-5)), 0, 0);
    d.add_device(MockDevice::new(1, Completion::Delayed(Duration::from_millis(1))), 0, 1);

    let err = d.run(&Mode::zeros()).unwrap_err();
    assert!(matches!(err, DispatchError::CallbackStatus(-5)), "{}", err);
    assert_eq!(d.devices()[1].state(), DeviceState::Drained);
}

#[test]
fn test_enqueue_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let progress = RecordingProgress::default();
    let mut d = dispatcher(&dir, 6, &progress);

    d.add_device(MockDevice::new(0, Completion::Immediate).fail_enqueue(-36), 0, 0);

    let err = d.run(&Mode::zeros()).unwrap_err();
    assert_eq!(err.status(), Some(-36));
}

#[test]
fn test_quit_before_run() {
    let dir = tempfile::tempdir().unwrap();
    let progress = RecordingProgress::default();
    let mut d = dispatcher(&dir, 6, &progress);
    d.add_device(MockDevice::new(0, Completion::Immediate), 0, 0);

    d.quit_handle().request();
    let summary = d.run(&Mode::zeros()).unwrap();

    assert_eq!(summary.rounds, vec![(0, 0)]);
    assert!(!d.quit_handle().is_requested());
}
