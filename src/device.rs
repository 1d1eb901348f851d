//! Fixed-layout records returned by controller queries and their text form.

use std::fmt;

use crate::error::QueryError;

/// `bMaxPower` is expressed in units of 2 mA.
pub const POWER_FACTOR: u32 = 2;

pub const ATTR_BUS_POWERED: u8 = 0x80;
pub const ATTR_SELF_POWERED: u8 = 0x40;
pub const ATTR_REMOTE_WAKEUP: u8 = 0x20;

/// Which configuration a descriptor query refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigIndex {
    /// The configuration the device is currently set to.
    #[default]
    Current,
    /// Zero-based configuration index.
    Index(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Low,
    Full,
    High,
    Super,
    Unknown,
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Speed::Low => "low speed",
            Speed::Full => "full speed",
            Speed::High => "high speed",
            Speed::Super => "super speed",
            Speed::Unknown => "",
        })
    }
}

/// Hub port status word (`wPortStatus`) and change word (`wPortChange`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortStatus {
    pub status: u16,
    pub change: u16,
}

impl PortStatus {
    pub const CONNECT: u16 = 0x0001;
    pub const ENABLED: u16 = 0x0002;
    pub const SUSPEND: u16 = 0x0004;
    pub const OVERCURRENT: u16 = 0x0008;
    pub const L1: u16 = 0x0020;
    pub const POWER: u16 = 0x0100;
    pub const POWER_SS: u16 = 0x0200;

    /// SuperSpeed link state, bits 5..8.
    pub fn link_state(&self) -> u8 {
        ((self.status >> 5) & 0x0f) as u8
    }

    fn flags(&self, speed: Speed) -> Vec<&'static str> {
        let s = self.status;
        let mut flags = Vec::new();
        for (bit, name) in [
            (Self::CONNECT, "connect"),
            (Self::ENABLED, "enabled"),
            (Self::SUSPEND, "suspend"),
            (Self::OVERCURRENT, "overcurrent"),
        ] {
            if s & bit != 0 {
                flags.push(name);
            }
        }

        if speed != Speed::Super {
            if s & Self::L1 != 0 {
                flags.push("l1");
            }
            if s & Self::POWER != 0 {
                flags.push("power");
            }
        } else {
            if s & Self::POWER_SS != 0 {
                flags.push("power");
            }
            let state = match self.link_state() {
                0x0 => Some("U0"),
                0x1 => Some("U1"),
                0x2 => Some("U2"),
                0x3 => Some("U3"),
                0x4 => Some("SS.disabled"),
                0x5 => Some("Rx.detect"),
                0x6 => Some("ss.inactive"),
                0x7 => Some("polling"),
                0x8 => Some("recovery"),
                0x9 => Some("hot.reset"),
                0xa => Some("comp.mod"),
                0xb => Some("loopback"),
                _ => None,
            };
            flags.extend(state);
        }
        flags
    }
}

/// Summary of a device as reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub addr: u8,
    pub bus: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub vendor: String,
    pub product: String,
    pub release: String,
    pub release_no: u16,
    pub serial: String,
    pub speed: Speed,
    /// Current drawn from the bus in mA, 0 when self powered.
    pub power: u32,
    /// Active configuration value, 0 when unconfigured.
    pub config: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub drivers: Vec<String>,
    pub ports: Vec<PortStatus>,
}

impl DeviceInfo {
    /// Writes the summary lines for this device at the given verbosity.
    pub fn render(&self, verbosity: u8, f: &mut impl fmt::Write) -> fmt::Result {
        write!(
            f,
            "addr {:02}: {:04x}:{:04x} {}, {}, usb_bus: {}",
            self.addr,
            self.vendor_id,
            self.product_id,
            visible(&self.vendor),
            visible(&self.product),
            self.bus
        )?;

        if verbosity > 0 {
            write!(f, "\n\t {}", self.speed)?;
            if self.power > 0 {
                write!(f, ", power {} mA", self.power)?;
            } else {
                write!(f, ", self powered")?;
            }
            if self.config > 0 {
                write!(f, ", config {}", self.config)?;
            } else {
                write!(f, ", unconfigured")?;
            }
            write!(f, ", rev {} (0x{:x})", visible(&self.release), self.release_no)?;
            write!(
                f,
                "\n\t class: {}, subclass: {}, protocol: {}",
                self.class, self.subclass, self.protocol
            )?;
            if !self.serial.is_empty() {
                write!(f, ", iSerial {}", visible(&self.serial))?;
            }
        }
        writeln!(f)?;

        if verbosity > 0 {
            for driver in self.drivers.iter().filter(|d| !d.is_empty()) {
                writeln!(f, "\t driver: {}", driver)?;
            }
        }

        if verbosity > 1 {
            for (i, port) in self.ports.iter().enumerate() {
                write!(f, "\t port {:02}: {:04x}.{:04x}", i + 1, port.change, port.status)?;
                for flag in port.flags(self.speed) {
                    write!(f, " {}", flag)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Standard device descriptor (USB 2.0 §9.6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceDescriptor {
    pub usb_version: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub max_packet_size: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub manufacturer_str: u8,
    pub product_str: u8,
    pub serial_str: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub const LENGTH: usize = 18;

    pub fn parse(b: &[u8]) -> Result<Self, QueryError> {
        if b.len() < Self::LENGTH || b[1] != 1 {
            return Err(QueryError::Invalid(format!(
                "bad device descriptor ({} bytes)",
                b.len()
            )));
        }
        Ok(Self {
            usb_version: u16::from_le_bytes([b[2], b[3]]),
            class: b[4],
            subclass: b[5],
            protocol: b[6],
            max_packet_size: b[7],
            vendor_id: u16::from_le_bytes([b[8], b[9]]),
            product_id: u16::from_le_bytes([b[10], b[11]]),
            device_version: u16::from_le_bytes([b[12], b[13]]),
            manufacturer_str: b[14],
            product_str: b[15],
            serial_str: b[16],
            num_configurations: b[17],
        })
    }

    pub fn render(&self, addr: u8, f: &mut impl fmt::Write) -> fmt::Result {
        writeln!(
            f,
            "addr {:02}: max packet: {:2}, num configs: {}, iManufacturer: {}",
            addr, self.max_packet_size, self.num_configurations, self.manufacturer_str
        )
    }
}

/// Configuration descriptor header (USB 2.0 §9.6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigDescriptor {
    /// Size of the full descriptor set for this configuration.
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration_str: u8,
    pub attributes: u8,
    pub max_power: u8,
}

impl ConfigDescriptor {
    pub const LENGTH: usize = 9;

    pub fn parse(b: &[u8]) -> Result<Self, QueryError> {
        if b.len() < Self::LENGTH || b[1] != crate::descriptor::CONFIG_DESCRIPTOR {
            return Err(QueryError::Invalid(format!(
                "bad configuration descriptor ({} bytes)",
                b.len()
            )));
        }
        Ok(Self {
            total_length: u16::from_le_bytes([b[2], b[3]]),
            num_interfaces: b[4],
            configuration_value: b[5],
            configuration_str: b[6],
            attributes: b[7],
            max_power: b[8],
        })
    }

    pub fn render(&self, addr: u8, f: &mut impl fmt::Write) -> fmt::Result {
        writeln!(
            f,
            "addr {:02}, config {:02}: interfaces: {}, max-power: {}mA",
            addr,
            self.configuration_value,
            self.num_interfaces,
            self.max_power as u32 * POWER_FACTOR
        )?;
        write!(f, "\t attr 0x{:02x}:", self.attributes)?;
        for (bit, name) in [
            (ATTR_BUS_POWERED, "bus-powered"),
            (ATTR_SELF_POWERED, "self-powered"),
            (ATTR_REMOTE_WAKEUP, "remote-wakeup"),
        ] {
            if self.attributes & bit != 0 {
                write!(f, " {}", name)?;
            }
        }
        writeln!(f)
    }
}

/// Completed transfer counts of a controller, per transfer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerStats {
    pub control: u64,
    pub isochronous: u64,
    pub bulk: u64,
    pub interrupt: u64,
}

impl ControllerStats {
    pub fn render(&self, f: &mut impl fmt::Write) -> fmt::Result {
        write!(f, "\n\t Transfers completed:")?;
        write!(f, "\n\t Control: {}", self.control)?;
        write!(f, "\n\t Isochronous: {}", self.isochronous)?;
        write!(f, "\n\t Bulk: {}", self.bulk)?;
        writeln!(f, "\n\t Interrupt: {}", self.interrupt)
    }
}

/// Escapes control characters in device-supplied strings.
fn visible(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_control() {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    out
}
