//! CREATE3 靓号地址搜索 - 主程序
//!
//! 使用方式:
//!   cargo run -- --zeros --kernel-dir kernels
//!   cargo run -- --matching 0xXXXXXXXXXXXXdeadXXXXXXXXXXXXXXXXXXXXXXXX --min-score 4
//!   cargo run -- --leading 0 --timeout 600 --skip 1

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::info;

use rust_eradicate::inithash::{DEFAULT_C3_DEPLOYER, DEFAULT_C3_PROXY_HASH};
use rust_eradicate::{FloorPolicy, Mode, QuitHandle, SearchRequest, search};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "rust-eradicate")]
#[command(about = "GPU CREATE3 靓号地址搜索")]
#[command(version = "0.1.0")]
struct Args {
    /// 最低分数 (默认 6，--leading / --leading-match 默认 2)
    #[arg(long)]
    min_score: Option<u8>,

    /// 结果输出文件 (默认 <模式>-<时间>.txt)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// 基准测试，不做匹配
    #[arg(long, group = "mode")]
    benchmark: bool,

    /// 零字节计数
    #[arg(long, group = "mode")]
    zero_bytes: bool,

    /// 零半字节计数
    #[arg(long, group = "mode")]
    zeros: bool,

    /// 字母计数
    #[arg(long, group = "mode")]
    letters: bool,

    /// 数字计数
    #[arg(long, group = "mode")]
    numbers: bool,

    /// 前导字符计数 (单个十六进制字符)
    #[arg(long, group = "mode")]
    leading: Option<char>,

    /// 模式匹配 (如 0xXXXXXXXXXXXXdeadXXXXXXXXXXXXXXXXXXXXXXXX)
    /// X/*/? 表示通配符
    #[arg(long, group = "mode")]
    matching: Option<String>,

    /// 前导半字节范围计数 (配合 --min / --max)
    #[arg(long, group = "mode")]
    leading_range: bool,

    /// 半字节范围计数 (配合 --min / --max)
    #[arg(long, group = "mode")]
    range: bool,

    /// 镜像计数
    #[arg(long, group = "mode")]
    mirror: bool,

    /// 前导重复字节计数
    #[arg(long, group = "mode")]
    leading_doubles: bool,

    /// 前导匹配 (十六进制)
    #[arg(long, group = "mode")]
    leading_match: Option<String>,

    /// 前导与尾部重复计数，可指定最多 2 个字符，可与 --all-leading-trailing 同时使用
    #[arg(long, conflicts_with_all = [
        "benchmark", "zero_bytes", "zeros", "letters", "numbers", "leading", "matching",
        "leading_range", "range", "mirror", "leading_doubles", "leading_match", "trailing",
        "all", "all_leading",
    ])]
    leading_trailing: Option<String>,

    /// 尾部匹配 (十六进制)
    #[arg(long, group = "mode")]
    trailing: Option<String>,

    /// 合并评分，参数为分数阈值
    #[arg(long, group = "mode")]
    all: Option<u8>,

    /// 合并前导评分
    #[arg(long, group = "mode")]
    all_leading: bool,

    /// 合并前导与尾部评分
    #[arg(long, group = "mode")]
    all_leading_trailing: bool,

    /// 范围下界
    #[arg(long, default_value = "0")]
    min: u8,

    /// 范围上界
    #[arg(long, default_value = "0")]
    max: u8,

    /// 跳过的设备索引 (可重复)
    #[arg(short, long)]
    skip: Vec<usize>,

    /// 本地工作组大小 (0 表示由驱动决定)
    #[arg(short, long, default_value = "128")]
    work: usize,

    /// 单次入队的最大工作量 (0 表示与 --size 相同)
    #[arg(long, default_value = "0")]
    work_max: usize,

    /// 每轮每个设备的工作量
    #[arg(long, default_value = "16777216")]
    size: usize,

    /// CREATE3 调用者地址
    #[arg(short, long, default_value = "")]
    deployer: String,

    /// CREATE3 工厂合约地址
    #[arg(long, default_value = DEFAULT_C3_DEPLOYER)]
    c3_deployer: String,

    /// CREATE3 代理字节码哈希
    #[arg(long, default_value = DEFAULT_C3_PROXY_HASH)]
    c3_proxy_hash: String,

    /// 内核源文件目录
    #[arg(long, default_value = "kernels")]
    kernel_dir: PathBuf,

    /// 超时时间 (秒，0表示无超时)
    #[arg(long, default_value = "0")]
    timeout: u64,

    /// 分数下限保持为 --min-score，不随最高分上升
    #[arg(long, default_value_t = false)]
    keep_floor: bool,
}

/// 解析搜索模式，同时返回该模式的默认最低分
fn parse_mode(args: &Args) -> anyhow::Result<(Mode, Option<u8>)> {
    let mode = if args.benchmark {
        Mode::benchmark()
    } else if args.zero_bytes {
        Mode::zero_bytes()
    } else if args.zeros {
        Mode::zeros()
    } else if args.letters {
        Mode::letters()
    } else if args.numbers {
        Mode::numbers()
    } else if let Some(ch) = args.leading {
        return Ok((Mode::leading(ch)?, Some(2)));
    } else if let Some(hex) = &args.trailing {
        Mode::trailing(hex)?
    } else if let Some(hex) = &args.leading_match {
        return Ok((Mode::match_leading(hex)?, Some(2)));
    } else if let Some(pattern) = &args.matching {
        Mode::matching(pattern)?
    } else if args.leading_range {
        Mode::leading_range(args.min, args.max)?
    } else if args.range {
        Mode::range(args.min, args.max)?
    } else if args.mirror {
        Mode::mirror()
    } else if args.leading_doubles {
        Mode::doubles()
    } else if let Some(score) = args.all.filter(|&s| s > 0) {
        Mode::all(score)
    } else if args.all_leading {
        Mode::all_leading()
    } else if args.leading_trailing.is_some() || args.all_leading_trailing {
        Mode::all_leading_trailing(args.leading_trailing.as_deref().unwrap_or(""))?
    } else {
        anyhow::bail!("请指定搜索模式，例如 --zeros, --leading <c> 或 --matching <pattern>")
    };

    Ok((mode, None))
}

fn build_request(args: &Args) -> anyhow::Result<SearchRequest> {
    let (mode, mode_score_min) = parse_mode(args)?;

    let mut request = SearchRequest::new(mode);
    request.score_min = args
        .min_score
        .filter(|&s| s > 0)
        .or(mode_score_min)
        .unwrap_or(request.score_min);
    // 文件名只生成一次，日志与结果写入使用同一个
    request.file_name = Some(args.file.clone().unwrap_or_else(|| request.output_file()));
    request.skip = args.skip.clone();
    request.worksize_local = args.work;
    request.worksize_max = args.work_max;
    request.size = args.size;
    request.kernel_dir = args.kernel_dir.clone();
    request.deployer = args.deployer.clone();
    request.c3_deployer = args.c3_deployer.clone();
    request.c3_proxy_hash = args.c3_proxy_hash.clone();
    request.floor_policy = if args.keep_floor {
        FloorPolicy::ScoreMin
    } else {
        FloorPolicy::Watermark
    };

    Ok(request)
}

/// 主函数
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("启动 CREATE3 靓号地址搜索");
    info!("参数: {:?}", args);

    let request = build_request(&args)?;
    println!(
        "Output file: {} | Min score: {}",
        request.output_file().display(),
        request.score_min
    );

    let quit = QuitHandle::new();
    {
        let quit = quit.clone();
        ctrlc::set_handler(move || {
            info!("收到中断信号，等待设备完成当前一轮...");
            quit.request();
        })?;
    }

    if args.timeout > 0 {
        let quit = quit.clone();
        let timeout = Duration::from_secs(args.timeout);
        thread::spawn(move || {
            thread::sleep(timeout);
            info!("超时 ({} 秒)，请求退出", timeout.as_secs());
            quit.request();
        });
    }

    let summary = search(&request, &quit)?;

    println!();
    println!("========================================");
    println!("最高分: {}", summary.score_max);
    println!("保存结果数: {}", summary.saved);
    for (index, rounds) in &summary.rounds {
        println!("GPU{}: {} 轮", index, rounds);
    }
    println!("========================================");

    Ok(())
}
