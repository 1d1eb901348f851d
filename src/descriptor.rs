//! Decoding of a configuration's full descriptor set.
//!
//! The buffer returned by a full-descriptor query is a flat run of
//! length-prefixed records (`bLength`, `bDescriptorType`, payload...).
//! [`DescriptorWalker`] cuts it into [`RawDescriptor`] views without ever
//! reading past the declared total length, and [`Descriptor`] turns each
//! view into a typed record that knows how to print itself.
//!
//! 配置描述符集合的解码：先按长度切分，再按类型分类。

use std::fmt;
use std::io::Write;
use std::iter::FusedIterator;

use crate::error::{Error, Result};

pub const CONFIG_DESCRIPTOR: u8 = 2;
pub const STRING_DESCRIPTOR: u8 = 3;
pub const INTERFACE_DESCRIPTOR: u8 = 4;
pub const ENDPOINT_DESCRIPTOR: u8 = 5;

/// `bLength` and `bDescriptorType` are always present.
const MIN_LENGTH: usize = 2;

const CONFIG_LENGTH: usize = 6;
const INTERFACE_LENGTH: usize = 8;
const ENDPOINT_LENGTH: usize = 7;

/// Bytes per line in the hex dump of unrecognised records.
const DUMP_WIDTH: usize = 10;

/// One record of a descriptor buffer, borrowed in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDescriptor<'a> {
    offset: usize,
    bytes: &'a [u8],
}

impl<'a> RawDescriptor<'a> {
    /// Offset of the record inside the buffer it was walked from.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> u8 {
        self.bytes[0]
    }

    pub fn descriptor_type(&self) -> u8 {
        self.bytes[1]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[MIN_LENGTH..]
    }

    /// The whole record, length and type bytes included.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// Iterates the records of a descriptor buffer of declared size `total`.
///
/// Yields `Err(MalformedDescriptor)` once for a zero-length (or otherwise
/// truncated) record or one that would run past `total`, then stops.
#[derive(Debug, Clone)]
pub struct DescriptorWalker<'a> {
    buf: &'a [u8],
    total: usize,
    cursor: usize,
    failed: bool,
}

impl<'a> DescriptorWalker<'a> {
    pub fn new(buf: &'a [u8], total: usize) -> Self {
        Self {
            buf,
            total,
            cursor: 0,
            failed: false,
        }
    }

    fn malformed(&mut self, offset: usize) -> Option<Result<RawDescriptor<'a>>> {
        self.failed = true;
        Some(Err(Error::MalformedDescriptor { offset }))
    }
}

impl<'a> Iterator for DescriptorWalker<'a> {
    type Item = Result<RawDescriptor<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.total {
            return None;
        }

        let offset = self.cursor;
        let Some(&length) = self.buf.get(offset) else {
            return self.malformed(offset);
        };
        let end = offset + length as usize;

        if (length as usize) < MIN_LENGTH || end > self.total || end > self.buf.len() {
            return self.malformed(offset);
        }

        self.cursor = end;
        Some(Ok(RawDescriptor {
            offset,
            bytes: &self.buf[offset..end],
        }))
    }
}

impl FusedIterator for DescriptorWalker<'_> {}

/// Configuration record; only the value used to select it is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRecord {
    pub configuration_value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointRecord {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    None,
    Async,
    Adaptive,
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous(SyncType),
    Bulk,
    Interrupt,
}

impl EndpointRecord {
    pub fn number(&self) -> u8 {
        self.address & 0x03
    }

    pub fn direction(&self) -> Direction {
        if self.address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn transfer_type(&self) -> TransferType {
        match self.attributes & 0x03 {
            0 => TransferType::Control,
            1 => TransferType::Isochronous(match (self.attributes >> 2) & 0x03 {
                0 => SyncType::None,
                1 => SyncType::Async,
                2 => SyncType::Adaptive,
                _ => SyncType::Sync,
            }),
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }
}

/// A classified record. Anything that is not a well-sized configuration,
/// interface or endpoint record (strings included) is kept as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor<'a> {
    Config(ConfigRecord),
    Interface(InterfaceRecord),
    Endpoint(EndpointRecord),
    Unknown(RawDescriptor<'a>),
}

impl<'a> From<RawDescriptor<'a>> for Descriptor<'a> {
    fn from(raw: RawDescriptor<'a>) -> Self {
        let b = raw.as_bytes();
        match raw.descriptor_type() {
            CONFIG_DESCRIPTOR if b.len() >= CONFIG_LENGTH => Descriptor::Config(ConfigRecord {
                configuration_value: b[5],
            }),
            INTERFACE_DESCRIPTOR if b.len() >= INTERFACE_LENGTH => {
                Descriptor::Interface(InterfaceRecord {
                    number: b[2],
                    alternate_setting: b[3],
                    num_endpoints: b[4],
                    class: b[5],
                    subclass: b[6],
                    protocol: b[7],
                })
            }
            ENDPOINT_DESCRIPTOR if b.len() >= ENDPOINT_LENGTH => {
                Descriptor::Endpoint(EndpointRecord {
                    address: b[2],
                    attributes: b[3],
                    max_packet_size: u16::from_le_bytes([b[4], b[5]]),
                    interval: b[6],
                })
            }
            _ => Descriptor::Unknown(raw),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::In => "in",
            Direction::Out => "out",
        })
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncType::None => "none",
            SyncType::Async => "async",
            SyncType::Adaptive => "adaptive",
            SyncType::Sync => "sync",
        })
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferType::Control => f.write_str("control"),
            TransferType::Isochronous(sync) => write!(f, "isochronous, sync_type: {}", sync),
            TransferType::Bulk => f.write_str("bulk"),
            TransferType::Interrupt => f.write_str("interrupt"),
        }
    }
}

impl fmt::Display for Descriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Config(c) => writeln!(f, "config {:02}:", c.configuration_value),
            Descriptor::Interface(i) => writeln!(
                f,
                "\t iface: {:02}, altset: {:02}, numendpts: {:02}, \
                 class: {:02}, subclass: {:02}, protocol: {:02}",
                i.number, i.alternate_setting, i.num_endpoints, i.class, i.subclass, i.protocol
            ),
            Descriptor::Endpoint(e) => writeln!(
                f,
                "\t \t endpt_addr: {:02}, dir: {}, {}, max_packet: {}, polling_interval: {:02}",
                e.number(),
                e.direction(),
                e.transfer_type(),
                e.max_packet_size,
                e.interval
            ),
            Descriptor::Unknown(raw) => {
                write!(f, "\t unknown: {:02}", raw.descriptor_type())?;
                for (i, byte) in raw.as_bytes().iter().enumerate() {
                    if i % DUMP_WIDTH == 0 {
                        f.write_str("\n\t ")?;
                    }
                    write!(f, "0x{:02x} ", byte)?;
                }
                writeln!(f)
            }
        }
    }
}

/// Walks `buf` up to `total` bytes and prints every record to `out`.
///
/// Records before a malformed one are still printed. Returns the number
/// of records written.
pub fn dump<W: Write>(buf: &[u8], total: usize, out: &mut W) -> Result<usize> {
    let mut count = 0;
    for raw in DescriptorWalker::new(buf, total) {
        write!(out, "{}", Descriptor::from(raw?))?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HID_MOUSE: [u8; 34] = [
        0x09, 0x02, 0x22, 0x00, 0x01, 0x01, 0x00, 0xa0, 0x32, // config
        0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x01, 0x02, 0x00, // interface
        0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x34, 0x00, // hid
        0x07, 0x05, 0x81, 0x03, 0x04, 0x00, 0x0a, // endpoint
    ];

    fn walk_all(buf: &[u8], total: usize) -> Result<Vec<RawDescriptor<'_>>> {
        DescriptorWalker::new(buf, total).collect()
    }

    #[test]
    fn record_lengths_sum_to_total() {
        let records = walk_all(&HID_MOUSE, HID_MOUSE.len()).unwrap();
        assert_eq!(records.len(), 4);
        let sum: usize = records.iter().map(|r| r.length() as usize).sum();
        assert_eq!(sum, HID_MOUSE.len());
        assert_eq!(records[3].offset(), 27);
        assert_eq!(records[2].payload(), &HID_MOUSE[20..27]);
    }

    #[test]
    fn empty_total_yields_nothing() {
        assert!(walk_all(&[], 0).unwrap().is_empty());
        assert!(walk_all(&[0x05], 0).unwrap().is_empty());
    }

    #[test]
    fn zero_length_record_stops_the_walk() {
        let buf = [0x07, 0x02, 0x09, 0x02, 0x01, 0x01, 0x80, 0x00, 0x05];
        let mut walker = DescriptorWalker::new(&buf, buf.len());
        assert!(walker.next().unwrap().is_ok());
        assert!(matches!(
            walker.next(),
            Some(Err(Error::MalformedDescriptor { offset: 7 }))
        ));
        assert!(walker.next().is_none());
    }

    #[test]
    fn overshooting_record_is_malformed_at_its_offset() {
        let buf = [0x04, 0x03, 0x41, 0x00, 0x09, 0x04, 0x00];
        let err = walk_all(&buf, buf.len()).unwrap_err();
        assert!(matches!(err, Error::MalformedDescriptor { offset: 4 }));
    }

    #[test]
    fn declared_total_bounds_the_walk() {
        // Trailing bytes past the declared total are never looked at.
        let records = walk_all(&HID_MOUSE, 18).unwrap();
        assert_eq!(records.len(), 2);

        let err = walk_all(&HID_MOUSE, 20).unwrap_err();
        assert!(matches!(err, Error::MalformedDescriptor { offset: 18 }));
    }

    #[test]
    fn total_larger_than_buffer_is_malformed() {
        let buf = [0x02, 0x03];
        let err = walk_all(&buf, 4).unwrap_err();
        assert!(matches!(err, Error::MalformedDescriptor { offset: 2 }));
    }

    #[test]
    fn one_byte_record_is_malformed() {
        let err = walk_all(&[0x01, 0x02, 0x03], 3).unwrap_err();
        assert!(matches!(err, Error::MalformedDescriptor { offset: 0 }));
    }

    #[test]
    fn config_scenario_renders_configuration_value() {
        let buf = [0x07, 0x02, 0x09, 0x02, 0x01, 0x01, 0x80];
        let mut out = Vec::new();
        assert_eq!(dump(&buf, 7, &mut out).unwrap(), 1);
        assert_eq!(String::from_utf8(out).unwrap(), "config 01:\n");
    }

    #[test]
    fn every_record_is_classified() {
        let kinds: Vec<_> = walk_all(&HID_MOUSE, HID_MOUSE.len())
            .unwrap()
            .into_iter()
            .map(Descriptor::from)
            .collect();
        assert!(matches!(kinds[0], Descriptor::Config(ConfigRecord { configuration_value: 1 })));
        assert!(matches!(kinds[1], Descriptor::Interface(InterfaceRecord { class: 3, .. })));
        assert!(matches!(kinds[2], Descriptor::Unknown(r) if r.descriptor_type() == 0x21));
        assert!(matches!(kinds[3], Descriptor::Endpoint(_)));
    }

    #[test]
    fn short_typed_records_fall_back_to_unknown() {
        let buf = [0x03, 0x05, 0x81];
        let raw = DescriptorWalker::new(&buf, 3).next().unwrap().unwrap();
        assert!(matches!(Descriptor::from(raw), Descriptor::Unknown(_)));
    }

    #[test]
    fn endpoint_direction() {
        let mut ep = EndpointRecord {
            address: 0x81,
            attributes: 0x02,
            max_packet_size: 512,
            interval: 0,
        };
        assert_eq!(ep.direction().to_string(), "in");
        ep.address = 0x01;
        assert_eq!(ep.direction().to_string(), "out");
    }

    #[test]
    fn isochronous_adaptive_endpoint() {
        let ep = EndpointRecord {
            address: 0x03,
            attributes: 0x01 | (2 << 2),
            max_packet_size: 192,
            interval: 1,
        };
        assert_eq!(ep.transfer_type(), TransferType::Isochronous(SyncType::Adaptive));
        assert_eq!(ep.transfer_type().to_string(), "isochronous, sync_type: adaptive");
    }

    #[test]
    fn renders_interface_and_endpoint_lines() {
        let mut out = Vec::new();
        dump(&HID_MOUSE, HID_MOUSE.len(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "config 01:");
        assert_eq!(
            lines[1],
            "\t iface: 00, altset: 00, numendpts: 01, class: 03, subclass: 01, protocol: 02"
        );
        assert_eq!(
            lines.last().copied(),
            Some("\t \t endpt_addr: 01, dir: in, interrupt, max_packet: 4, polling_interval: 10")
        );
    }

    #[test]
    fn unknown_records_are_hex_dumped_ten_per_line() {
        let mut buf = vec![12, STRING_DESCRIPTOR];
        buf.extend(b"\x41\x00\x42\x00\x43\x00\x44\x00\x45\x00");
        let raw = DescriptorWalker::new(&buf, buf.len()).next().unwrap().unwrap();
        assert_eq!(
            Descriptor::from(raw).to_string(),
            "\t unknown: 03\
             \n\t 0x0c 0x03 0x41 0x00 0x42 0x00 0x43 0x00 0x44 0x00 \
             \n\t 0x45 0x00 \n"
        );
    }

    #[test]
    fn dump_prints_records_before_a_malformed_one() {
        let buf = [0x07, 0x02, 0x09, 0x02, 0x01, 0x02, 0x80, 0x09, 0x04];
        let mut out = Vec::new();
        let err = dump(&buf, buf.len(), &mut out).unwrap_err();
        assert!(matches!(err, Error::MalformedDescriptor { offset: 7 }));
        assert_eq!(String::from_utf8(out).unwrap(), "config 02:\n");
    }
}
