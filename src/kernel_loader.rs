//! OpenCL 内核源代码加载模块
//!
//! 搜索内核不随程序编译，运行时从内核目录读取。

use std::fs;
use std::path::Path;

use anyhow::Context;

/// 按依赖顺序排列的内核文件:
/// 1. Keccak-256
/// 2. 主搜索内核 (eradicate2_iterate)
pub const KERNEL_FILES: [&str; 2] = ["keccak.cl", "eradicate2.cl"];

/// 从 `dir` 加载并合并全部内核源代码
///
/// `#include` 行会被去掉，依赖已经按顺序拼接。
pub fn load_kernel_source(dir: &Path) -> anyhow::Result<String> {
    let mut source = String::new();

    for file in KERNEL_FILES {
        let path = dir.join(file);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read kernel source {}", path.display()))?;

        for line in text.lines() {
            if !line.trim_start().starts_with("#include") {
                source.push_str(line);
                source.push('\n');
            }
        }
        source.push('\n');
    }

    Ok(source)
}
