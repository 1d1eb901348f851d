use std::path::Path;

pub mod descriptor;
pub mod device;
pub mod enumerate;
pub mod error;
pub mod platform;
pub mod report;

pub use device::{ConfigDescriptor, ConfigIndex, ControllerStats, DeviceDescriptor, DeviceInfo};
pub use enumerate::{MAX_DEVICE_ADDRESS, ScanSession, Target};
pub use error::{Error, QueryError};
pub use report::{Mode, Report, ReportConfig};

#[cfg(target_os = "linux")]
pub use platform::linux::LinuxController as PlatformController;

/// A USB host controller that can be queried per device address.
///
/// 按设备地址查询的 USB 主控制器。每个查询都是同步阻塞的，
/// 地址上没有设备时返回 [`QueryError::NoDevice`]。
pub trait Controller {
    /// Path or name the controller was opened under.
    fn name(&self) -> &str;

    /// Summary of the device at `addr`.
    ///
    /// An implementation may mark further addresses in `session` when it
    /// learns they belong to a device already described by this answer.
    fn device_info(&self, addr: u8, session: &mut ScanSession) -> Result<DeviceInfo, QueryError>;

    fn device_descriptor(&self, addr: u8) -> Result<DeviceDescriptor, QueryError>;

    fn config_descriptor(&self, addr: u8, config: ConfigIndex) -> Result<ConfigDescriptor, QueryError>;

    /// Fills `buf` with the first `buf.len()` bytes of the configuration's
    /// full descriptor set.
    fn full_descriptor(&self, addr: u8, config: ConfigIndex, buf: &mut [u8]) -> Result<(), QueryError>;

    fn stats(&self) -> Result<ControllerStats, QueryError>;
}

/// Opens the controller at `path` with the current platform's backend.
pub fn open_controller(path: &Path) -> anyhow::Result<Box<dyn Controller>> {
    #[cfg(target_os = "linux")]
    return Ok(Box::new(platform::linux::LinuxController::open(path)?));

    #[cfg(not(target_os = "linux"))]
    anyhow::bail!("{}: unsupported OS", path.display());
}

/// Every controller the current platform can see, in bus order.
///
/// 工厂方法：列出当前平台可见的全部控制器
pub fn controllers() -> anyhow::Result<Vec<Box<dyn Controller>>> {
    #[cfg(target_os = "linux")]
    return Ok(platform::linux::LinuxController::list()?
        .into_iter()
        .map(|c| Box::new(c) as Box<dyn Controller>)
        .collect());

    #[cfg(not(target_os = "linux"))]
    Ok(Vec::new())
}
