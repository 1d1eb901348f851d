// Linux USB 查询原理：一切皆文件
// On Linux every USB bus is a root hub device `usbN` in sysfs, and each
// device hanging off it carries `busnum`/`devnum` attributes. The kernel
// also exposes the raw descriptors it read at enumeration time in the
// `descriptors` attribute file, so no USB transfer is needed here.
//     静态数据 (sysfs)：/sys/bus/usb/devices/...
//     原始描述符：<syspath>/descriptors (设备描述符 + 全部配置描述符集合)
// 前置要求：需要 libudev 开发包 (Debian/Ubuntu: sudo apt install libudev-dev)

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use log::{debug, trace};
use udev::{Device, Enumerator};

use crate::device::{
    ATTR_SELF_POWERED, ConfigDescriptor, ConfigIndex, ControllerStats, DeviceDescriptor,
    DeviceInfo, PortStatus, Speed,
};
use crate::enumerate::ScanSession;
use crate::{Controller, QueryError};

const USB_SUBSYSTEM: &str = "usb";
const USB_DEVICE: &str = "usb_device";
const USB_INTERFACE: &str = "usb_interface";
const DEV_BUS_USB: &str = "/dev/bus/usb";

/// One USB bus, addressed by its bus number.
#[derive(Debug, Clone)]
pub struct LinuxController {
    name: String,
    bus: u8,
}

impl LinuxController {
    /// Opens a bus given as `/dev/bus/usb/NNN`, `usbN` or a bare number.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let bus = parse_bus(path).ok_or_else(|| anyhow!("not a USB bus"))?;

        let mut enumerator = Enumerator::new()?;
        enumerator.match_subsystem(USB_SUBSYSTEM)?;
        enumerator.match_sysname(format!("usb{}", bus))?;
        if enumerator.scan_devices()?.next().is_none() {
            anyhow::bail!("no such USB bus");
        }

        debug!("opened bus {} as {}", bus, path.display());
        Ok(Self {
            name: path.display().to_string(),
            bus,
        })
    }

    /// Every bus with a root hub, in bus number order.
    pub fn list() -> anyhow::Result<Vec<Self>> {
        let mut enumerator = Enumerator::new()?;
        enumerator.match_subsystem(USB_SUBSYSTEM)?;
        enumerator.match_property("DEVTYPE", USB_DEVICE)?;
        enumerator.match_sysname("usb*")?;

        let mut buses: Vec<u8> = enumerator
            .scan_devices()
            .context("udev scan failed")?
            .filter_map(|dev| get_attribute(&dev, "busnum")?.parse().ok())
            .collect();
        buses.sort_unstable();
        buses.dedup();

        Ok(buses
            .into_iter()
            .map(|bus| Self {
                name: bus_path(bus).display().to_string(),
                bus,
            })
            .collect())
    }

    fn find_device(&self, addr: u8) -> Result<Device, QueryError> {
        let mut enumerator = Enumerator::new()?;
        enumerator.match_subsystem(USB_SUBSYSTEM)?;
        enumerator.match_property("DEVTYPE", USB_DEVICE)?;
        enumerator.match_attribute("busnum", self.bus.to_string())?;
        enumerator.match_attribute("devnum", addr.to_string())?;

        let dev = enumerator.scan_devices()?.next().ok_or(QueryError::NoDevice)?;
        trace!("bus {} addr {}: {}", self.bus, addr, dev.syspath().display());
        Ok(dev)
    }

    // Read the raw descriptor dump the kernel caches for the device
    // 读取内核缓存的原始描述符
    fn raw_descriptors(&self, addr: u8) -> Result<(Device, Vec<u8>), QueryError> {
        let dev = self.find_device(addr)?;
        let raw = fs::read(dev.syspath().join("descriptors"))?;
        Ok((dev, raw))
    }

    fn config_set(&self, addr: u8, config: ConfigIndex) -> Result<Vec<u8>, QueryError> {
        let (dev, raw) = self.raw_descriptors(addr)?;
        let sets = config_sets(&raw);

        let set = match config {
            ConfigIndex::Index(i) => sets.get(i as usize).copied(),
            ConfigIndex::Current => {
                let current: u8 = get_attribute(&dev, "bConfigurationValue")
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| QueryError::Invalid("device is unconfigured".into()))?;
                sets.iter().copied().find(|s| s[5] == current)
            }
        };
        set.map(<[u8]>::to_vec)
            .ok_or_else(|| QueryError::Invalid(format!("no configuration {:?}", config)))
    }

    // Hub ports: sysfs has no wPortStatus, so report power plus connection
    // derived from the child devices present.
    // 集线器端口：根据子设备是否存在推断连接状态
    fn ports(dev: &Device, speed: Speed) -> Vec<PortStatus> {
        let count: usize = get_attribute(dev, "maxchild")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let sysname = dev.sysname().to_string_lossy();
        let bus = get_attribute(dev, "busnum").unwrap_or_default();

        (1..=count)
            .map(|port| {
                let child = match sysname.strip_prefix("usb") {
                    Some(_) => format!("{}-{}", bus, port),
                    None => format!("{}.{}", sysname, port),
                };
                let connected = dev.syspath().join(child).exists();

                let status = match (speed, connected) {
                    (Speed::Super, true) => {
                        PortStatus::CONNECT | PortStatus::ENABLED | PortStatus::POWER_SS
                    }
                    // Rx.detect link state
                    (Speed::Super, false) => PortStatus::POWER_SS | (0x5 << 5),
                    (_, true) => PortStatus::CONNECT | PortStatus::ENABLED | PortStatus::POWER,
                    (_, false) => PortStatus::POWER,
                };
                PortStatus { status, change: 0 }
            })
            .collect()
    }

    // Drivers bound to the device's interfaces
    // 绑定到各接口的驱动
    fn drivers(dev: &Device) -> Vec<String> {
        let mut drivers = Vec::new();
        let Ok(mut enumerator) = Enumerator::new() else {
            return drivers;
        };
        if enumerator.match_parent(dev).is_err()
            || enumerator.match_property("DEVTYPE", USB_INTERFACE).is_err()
        {
            return drivers;
        }
        if let Ok(children) = enumerator.scan_devices() {
            for child in children {
                if let Some(driver) = child.driver().and_then(|d| d.to_str())
                    && !drivers.iter().any(|d| d == driver)
                {
                    drivers.push(driver.to_string());
                }
            }
        }
        drivers
    }
}

impl Controller for LinuxController {
    fn name(&self) -> &str {
        &self.name
    }

    fn device_info(&self, addr: u8, _session: &mut ScanSession) -> Result<DeviceInfo, QueryError> {
        let dev = self.find_device(addr)?;

        let hex = |key: &str| {
            get_attribute(&dev, key).and_then(|v| u16::from_str_radix(&v, 16).ok())
        };
        let text = |key: &str| get_attribute(&dev, key).unwrap_or_default();

        let missing = |key: &str| QueryError::Invalid(format!("missing {}", key));
        let vendor_id = hex("idVendor").ok_or_else(|| missing("idVendor"))?;
        let product_id = hex("idProduct").ok_or_else(|| missing("idProduct"))?;
        let release_no = hex("bcdDevice").unwrap_or(0);
        let attributes = hex("bmAttributes").unwrap_or(0) as u8;

        let speed = match text("speed").as_str() {
            "1.5" => Speed::Low,
            "12" => Speed::Full,
            "480" => Speed::High,
            "5000" | "10000" | "20000" => Speed::Super,
            _ => Speed::Unknown,
        };

        // "500mA"
        let power = if attributes & ATTR_SELF_POWERED != 0 {
            0
        } else {
            text("bMaxPower").trim_end_matches("mA").parse::<u32>().unwrap_or(0)
        };

        Ok(DeviceInfo {
            addr,
            bus: self.bus,
            vendor_id,
            product_id,
            vendor: text("manufacturer"),
            product: text("product"),
            release: format!("{:x}.{:02x}", release_no >> 8, release_no & 0xff),
            release_no,
            serial: text("serial"),
            speed,
            power,
            config: text("bConfigurationValue").parse::<u8>().unwrap_or(0),
            class: hex("bDeviceClass").unwrap_or(0) as u8,
            subclass: hex("bDeviceSubClass").unwrap_or(0) as u8,
            protocol: hex("bDeviceProtocol").unwrap_or(0) as u8,
            drivers: Self::drivers(&dev),
            ports: Self::ports(&dev, speed),
        })
    }

    fn device_descriptor(&self, addr: u8) -> Result<DeviceDescriptor, QueryError> {
        let (_, raw) = self.raw_descriptors(addr)?;
        DeviceDescriptor::parse(&raw)
    }

    fn config_descriptor(&self, addr: u8, config: ConfigIndex) -> Result<ConfigDescriptor, QueryError> {
        ConfigDescriptor::parse(&self.config_set(addr, config)?)
    }

    fn full_descriptor(&self, addr: u8, config: ConfigIndex, buf: &mut [u8]) -> Result<(), QueryError> {
        let set = self.config_set(addr, config)?;
        let data = set.get(..buf.len()).ok_or_else(|| {
            QueryError::Invalid(format!("short descriptor set: {} < {}", set.len(), buf.len()))
        })?;
        buf.copy_from_slice(data);
        Ok(())
    }

    fn stats(&self) -> Result<ControllerStats, QueryError> {
        Err(QueryError::Unsupported("transfer statistics"))
    }
}

// Utility function for securely reading attributes
// 工具函数 安全读取 sysfs 属性
fn get_attribute(dev: &Device, key: &str) -> Option<String> {
    dev.attribute_value(key)
        .and_then(|s| s.to_str())
        .map(|s| s.trim().to_string())
}

fn bus_path(bus: u8) -> PathBuf {
    Path::new(DEV_BUS_USB).join(format!("{:03}", bus))
}

/// `/dev/bus/usb/003`, `usb3` and `3` all name bus 3.
fn parse_bus(path: &Path) -> Option<u8> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix("usb").unwrap_or(name).parse().ok()
}

/// Splits a `descriptors` dump into the full descriptor set of each
/// configuration, skipping the leading device descriptor.
fn config_sets(raw: &[u8]) -> Vec<&[u8]> {
    let mut sets = Vec::new();
    let mut offset = DeviceDescriptor::LENGTH;

    while let Some(header) = raw.get(offset..offset + ConfigDescriptor::LENGTH) {
        let total = u16::from_le_bytes([header[2], header[3]]) as usize;
        if total < ConfigDescriptor::LENGTH {
            break;
        }
        let end = raw.len().min(offset + total);
        sets.push(&raw[offset..end]);
        offset = end;
    }
    sets
}
