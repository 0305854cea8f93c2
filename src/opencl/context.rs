//! OpenCL 设备枚举与上下文管理

use log::{info, warn};
use std::fmt::Display;

use ocl::core::PlatformId;
use ocl::enums::DeviceInfo;
use ocl::flags::DeviceType;
use ocl::{Context, Device, Platform};

/// 一个被选中的 GPU 设备
#[derive(Debug, Clone)]
pub struct GpuDevice {
    /// 全局索引 (所有平台的 GPU 按顺序编号)
    pub index: usize,
    pub device: Device,
    pub name: String,
}

/// OpenCL 上下文结构
pub struct OpenCLContext {
    /// 选择的平台
    pub platform: Platform,
    /// 选择的设备
    pub devices: Vec<GpuDevice>,
    /// 包含全部选中设备的上下文
    pub context: Context,
}

/// 平台枚举结果，失败时视为没有平台
///
/// 只装了 ICD 加载器而没有厂商驱动时 clGetPlatformIDs 会返回 CL_PLATFORM_NOT_FOUND_KHR。
fn platforms_or_empty<E: Display>(ids: Result<Vec<PlatformId>, E>) -> Vec<Platform> {
    match ids {
        Ok(ids) => ids.into_iter().map(Platform::new).collect(),
        Err(err) => {
            warn!("No OpenCL platform available: {}", err);
            Vec::new()
        }
    }
}

/// 列出所有平台上的 GPU 设备，按全局索引排列
pub fn list_gpu_devices() -> Vec<(Platform, Device)> {
    let mut found = Vec::new();

    for platform in platforms_or_empty(ocl::core::get_platform_ids()) {
        // 没有 GPU 的平台会返回 CL_DEVICE_NOT_FOUND
        let devices = Device::list(platform, Some(DeviceType::new().gpu())).unwrap_or_default();
        info!(
            "Platform: {}, GPU devices: {}",
            platform.name().unwrap_or_default(),
            devices.len()
        );
        found.extend(devices.into_iter().map(|d| (platform, d)));
    }

    found
}

impl OpenCLContext {
    /// 创建包含所有 GPU (跳过 `skip` 中的索引) 的上下文
    ///
    /// 一个上下文只能属于一个平台，其他平台上的设备会被忽略。
    pub fn new(skip: &[usize]) -> anyhow::Result<Self> {
        let found = list_gpu_devices();
        if found.is_empty() {
            anyhow::bail!("No OpenCL GPU devices found");
        }

        let mut platform = None;
        let mut devices = Vec::new();

        info!("Devices:");
        for (index, (p, device)) in found.into_iter().enumerate() {
            if skip.contains(&index) {
                info!("  GPU{}: skipped", index);
                continue;
            }

            let name = device.name()?;
            let compute_units = device
                .info(DeviceInfo::MaxComputeUnits)
                .map(|v| v.to_string())
                .unwrap_or_else(|_| String::from("?"));
            let global_mem = device
                .info(DeviceInfo::GlobalMemSize)
                .map(|v| v.to_string())
                .unwrap_or_else(|_| String::from("?"));

            let selected = *platform.get_or_insert(p);
            if selected.as_core() != p.as_core() {
                warn!("  GPU{}: {} is on another platform, ignored", index, name);
                continue;
            }

            info!(
                "  GPU{}: {}, {} bytes available, {} compute units",
                index, name, global_mem, compute_units
            );
            devices.push(GpuDevice {
                index,
                device,
                name,
            });
        }

        let Some(platform) = platform else {
            anyhow::bail!("All OpenCL GPU devices were skipped");
        };

        info!("Creating context...");
        let device_list: Vec<Device> = devices.iter().map(|d| d.device).collect();
        let context = Context::builder()
            .platform(platform)
            .devices(&device_list[..])
            .build()?;

        Ok(Self {
            platform,
            devices,
            context,
        })
    }

    /// 选中设备的 ocl 句柄
    pub fn device_list(&self) -> Vec<Device> {
        self.devices.iter().map(|d| d.device).collect()
    }

    /// 打印设备信息
    pub fn print_device_info(&self) -> anyhow::Result<()> {
        for d in &self.devices {
            info!("OpenCL Device GPU{}:", d.index);
            info!("  Name: {}", d.name);
            info!("  Vendor: {}", d.device.vendor()?);
            info!("  Version: {}", d.device.version()?);
        }
        Ok(())
    }
}
