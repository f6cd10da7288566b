//! Wire codecs for the three CPIO variants.
//!
//! Decoding sniffs the magic of every record: a leading `'0'` byte selects
//! one of the ASCII-magic variants (`070707` octal "odc", `070701`/`070702`
//! hex "newc"/"crc"), anything else is read as the legacy fixed-width binary
//! header whose 16-bit magic must equal octal `070707`. A record named
//! `TRAILER!!!` ends the stream.
//!
//! The numeric field parsers are deliberately permissive: parsing stops at
//! the first non-digit inside the fixed-width field and keeps the prefix
//! value, matching how existing archives in the wild are read.

use std::io::{ErrorKind, Read, Write};

use tracing::warn;

use super::{ArchiveEntry, FileAttr, TRAILER};
use crate::error::{Error, Result};

/// ASCII magic of the octal "odc" variant; also the octal value of the
/// binary variant's 16-bit magic.
const MAGIC_ODC: &[u8; 6] = b"070707";
const MAGIC_NEWC: &[u8; 6] = b"070701";
const MAGIC_CRC: &[u8; 6] = b"070702";

/// 16-bit magic of the binary variant (octal 070707).
const MAGIC_BIN: u16 = 0o070707;

const HDR_BIN: usize = 26;
const HDR_ODC: usize = 76;
const HDR_HEX: usize = 110;

/// On-disk archive variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Fixed-width little-endian binary form.
    Bin,
    /// Portable ASCII-octal form.
    Odc,
    /// "New" ASCII-hex form.
    Newc,
    /// ASCII-hex form with a checksum field. The checksum is never
    /// computed; it is written zero-filled and ignored on read.
    Crc,
}

impl Format {
    /// Header size in bytes.
    fn header_size(self) -> usize {
        match self {
            Format::Bin => HDR_BIN,
            Format::Odc => HDR_ODC,
            Format::Newc | Format::Crc => HDR_HEX,
        }
    }

    /// Record alignment. The odc form is unpadded.
    pub fn alignment(self) -> usize {
        match self {
            Format::Bin => 2,
            Format::Odc => 1,
            Format::Newc | Format::Crc => 4,
        }
    }

    fn padding(self, len: usize) -> usize {
        let align = self.alignment();
        (align - len % align) % align
    }
}

/// Result of decoding an archive stream.
#[derive(Debug)]
pub struct DecodedArchive {
    /// Entries in stream order, trailer excluded.
    pub entries: Vec<ArchiveEntry>,
    /// Variant of the last record decoded, if any record was.
    pub format: Option<Format>,
}

/// Parse a fixed-width octal ASCII field, stopping at the first non-digit.
fn from_oct(field: &[u8]) -> u32 {
    let mut raw: u32 = 0;
    for &b in field {
        if !(b'0'..=b'7').contains(&b) {
            break;
        }
        raw = raw.wrapping_mul(8).wrapping_add(u32::from(b - b'0'));
    }
    raw
}

/// Parse a fixed-width hex ASCII field, stopping at the first non-digit.
fn from_hex(field: &[u8]) -> u32 {
    let mut raw: u32 = 0;
    for &b in field {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => break,
        };
        raw = raw.wrapping_mul(16).wrapping_add(u32::from(digit));
    }
    raw
}

/// Render a zero-padded octal field. Oversized values keep the low digits
/// so the field width never overflows.
fn to_oct(val: u32, width: usize, out: &mut Vec<u8>) {
    let s = format!("{:0width$o}", val, width = width);
    out.extend_from_slice(&s.as_bytes()[s.len() - width..]);
}

/// Render a zero-padded uppercase hex field.
fn to_hex(val: u32, width: usize, out: &mut Vec<u8>) {
    let s = format!("{:0width$X}", val, width = width);
    out.extend_from_slice(&s.as_bytes()[s.len() - width..]);
}

fn u16_at(hdr: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([hdr[off], hdr[off + 1]])
}

/// Two 16-bit words, high word first, as the binary form stores 32-bit
/// sizes and timestamps.
fn u32_words(hdr: &[u8], off: usize) -> u32 {
    (u32::from(u16_at(hdr, off)) << 16) | u32::from(u16_at(hdr, off + 2))
}

/// Decode an archive stream. Malformed or truncated records stop the
/// decode; everything decoded up to that point is returned, mirroring the
/// permissive reader this codec stays compatible with. Only transport-level
/// read failures surface as errors.
pub fn read_archive<R: Read>(mut reader: R) -> Result<DecodedArchive> {
    let mut entries = Vec::new();
    let mut format = None;

    loop {
        let mut lead = [0u8; 1];
        match reader.read_exact(&mut lead) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(Error::Network(e)),
        }

        let fmt = if lead[0] == b'0' {
            let mut magic = [b'0'; 6];
            if !read_fully(&mut reader, &mut magic[1..])? {
                warn!("truncated magic, stopping archive decode");
                break;
            }
            match &magic {
                MAGIC_ODC => Format::Odc,
                MAGIC_NEWC => Format::Newc,
                MAGIC_CRC => Format::Crc,
                _ => {
                    warn!("unknown archive magic, stopping archive decode");
                    break;
                }
            }
        } else {
            Format::Bin
        };

        let mut header = vec![0u8; fmt.header_size()];
        let consumed = if fmt == Format::Bin { 1 } else { 6 };
        header[0] = lead[0];
        if fmt != Format::Bin {
            header[..6].copy_from_slice(match fmt {
                Format::Odc => MAGIC_ODC,
                Format::Newc => MAGIC_NEWC,
                _ => MAGIC_CRC,
            });
        }
        if !read_fully(&mut reader, &mut header[consumed..])? {
            warn!("truncated header, stopping archive decode");
            break;
        }

        if fmt == Format::Bin && u16_at(&header, 0) != MAGIC_BIN {
            warn!("bad binary magic, stopping archive decode");
            break;
        }

        format = Some(fmt);

        let (attr, namesize) = match fmt {
            Format::Bin => parse_bin(&header),
            Format::Odc => parse_odc(&header),
            Format::Newc | Format::Crc => parse_hex(&header),
        };

        let mut name_buf = vec![0u8; namesize];
        if !read_fully(&mut reader, &mut name_buf)? {
            warn!("truncated name, stopping archive decode");
            break;
        }
        let name_end = name_buf.iter().position(|&b| b == 0).unwrap_or(namesize);
        let path = String::from_utf8_lossy(&name_buf[..name_end]).into_owned();

        if !skip(&mut reader, fmt.padding(fmt.header_size() + namesize))? {
            warn!("truncated name padding, stopping archive decode");
            break;
        }

        if path == TRAILER {
            break;
        }

        let size = attr.size as usize;
        let mut content = Vec::new();
        if size > 0 {
            if (&mut reader).take(size as u64).read_to_end(&mut content)? < size {
                warn!("truncated content, stopping archive decode");
                break;
            }
            if !skip(&mut reader, fmt.padding(size))? {
                warn!("truncated content padding, stopping archive decode");
                break;
            }
        }

        entries.push(ArchiveEntry {
            path,
            attr,
            content: if size > 0 { Some(content) } else { None },
        });
    }

    Ok(DecodedArchive { entries, format })
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(Error::Network(e)),
    }
}

fn skip<R: Read>(reader: &mut R, count: usize) -> Result<bool> {
    if count == 0 {
        return Ok(true);
    }
    let mut pad = [0u8; 8];
    read_fully(reader, &mut pad[..count])
}

fn parse_bin(hdr: &[u8]) -> (FileAttr, usize) {
    let attr = FileAttr {
        dev: u32::from(u16_at(hdr, 2)),
        ino: u32::from(u16_at(hdr, 4)),
        mode: u32::from(u16_at(hdr, 6)),
        uid: u32::from(u16_at(hdr, 8)),
        gid: u32::from(u16_at(hdr, 10)),
        nlink: u32::from(u16_at(hdr, 12)),
        rdev: u32::from(u16_at(hdr, 14)),
        mtime: u32_words(hdr, 16),
        size: u32_words(hdr, 22),
    };
    (attr, u16_at(hdr, 20) as usize)
}

fn parse_odc(hdr: &[u8]) -> (FileAttr, usize) {
    let attr = FileAttr {
        dev: from_oct(&hdr[6..12]),
        ino: from_oct(&hdr[12..18]),
        mode: from_oct(&hdr[18..24]),
        uid: from_oct(&hdr[24..30]),
        gid: from_oct(&hdr[30..36]),
        nlink: from_oct(&hdr[36..42]),
        rdev: from_oct(&hdr[42..48]),
        mtime: from_oct(&hdr[48..59]),
        size: from_oct(&hdr[65..76]),
    };
    (attr, from_oct(&hdr[59..65]) as usize)
}

fn parse_hex(hdr: &[u8]) -> (FileAttr, usize) {
    let attr = FileAttr {
        ino: from_hex(&hdr[6..14]),
        mode: from_hex(&hdr[14..22]),
        uid: from_hex(&hdr[22..30]),
        gid: from_hex(&hdr[30..38]),
        nlink: from_hex(&hdr[38..46]),
        mtime: from_hex(&hdr[46..54]),
        size: from_hex(&hdr[54..62]),
        dev: makedev(from_hex(&hdr[62..70]), from_hex(&hdr[70..78])),
        rdev: makedev(from_hex(&hdr[78..86]), from_hex(&hdr[86..94])),
    };
    // hdr[102..110] is the checksum field, carried but never validated
    (attr, from_hex(&hdr[94..102]) as usize)
}

fn makedev(major: u32, minor: u32) -> u32 {
    (major << 8) | (minor & 0xff)
}

fn dev_major(dev: u32) -> u32 {
    dev >> 8
}

fn dev_minor(dev: u32) -> u32 {
    dev & 0xff
}

/// Encode entries in the selected variant, terminated by a trailer record.
/// The size fields are derived from the actual content so the
/// content/metadata invariant holds on the wire.
pub fn write_archive<W: Write>(
    writer: &mut W,
    format: Format,
    entries: &[ArchiveEntry],
) -> Result<()> {
    for entry in entries {
        if entry.is_trailer() {
            continue;
        }
        write_entry(writer, format, entry)?;
    }

    let trailer = ArchiveEntry {
        path: TRAILER.to_string(),
        attr: FileAttr {
            nlink: 1,
            ..Default::default()
        },
        content: None,
    };
    write_entry(writer, format, &trailer)
}

fn write_entry<W: Write>(writer: &mut W, format: Format, entry: &ArchiveEntry) -> Result<()> {
    let content: &[u8] = entry.content.as_deref().unwrap_or(&[]);
    let filesize = content.len() as u32;
    let namesize = entry.path.len() + 1;
    let attr = &entry.attr;

    let mut record = Vec::with_capacity(format.header_size() + namesize + content.len() + 8);

    match format {
        Format::Bin => {
            for word in [
                MAGIC_BIN,
                attr.dev as u16,
                attr.ino as u16,
                attr.mode as u16,
                attr.uid as u16,
                attr.gid as u16,
                attr.nlink as u16,
                attr.rdev as u16,
                (attr.mtime >> 16) as u16,
                attr.mtime as u16,
                namesize as u16,
                (filesize >> 16) as u16,
                filesize as u16,
            ] {
                record.extend_from_slice(&word.to_le_bytes());
            }
        }
        Format::Odc => {
            record.extend_from_slice(MAGIC_ODC);
            to_oct(attr.dev, 6, &mut record);
            to_oct(attr.ino, 6, &mut record);
            to_oct(attr.mode, 6, &mut record);
            to_oct(attr.uid, 6, &mut record);
            to_oct(attr.gid, 6, &mut record);
            to_oct(attr.nlink, 6, &mut record);
            to_oct(attr.rdev, 6, &mut record);
            to_oct(attr.mtime, 11, &mut record);
            to_oct(namesize as u32, 6, &mut record);
            to_oct(filesize, 11, &mut record);
        }
        Format::Newc | Format::Crc => {
            record.extend_from_slice(if format == Format::Crc {
                MAGIC_CRC
            } else {
                MAGIC_NEWC
            });
            to_hex(attr.ino, 8, &mut record);
            to_hex(attr.mode, 8, &mut record);
            to_hex(attr.uid, 8, &mut record);
            to_hex(attr.gid, 8, &mut record);
            to_hex(attr.nlink, 8, &mut record);
            to_hex(attr.mtime, 8, &mut record);
            to_hex(filesize, 8, &mut record);
            to_hex(dev_major(attr.dev), 8, &mut record);
            to_hex(dev_minor(attr.dev), 8, &mut record);
            to_hex(dev_major(attr.rdev), 8, &mut record);
            to_hex(dev_minor(attr.rdev), 8, &mut record);
            to_hex(namesize as u32, 8, &mut record);
            to_hex(0, 8, &mut record); // checksum, write-only-zero
        }
    }

    record.extend_from_slice(entry.path.as_bytes());
    record.push(0);
    let name_pad = format.padding(format.header_size() + namesize);
    record.extend_from_slice(&[0u8; 4][..name_pad]);

    record.extend_from_slice(content);
    let content_pad = format.padding(content.len());
    record.extend_from_slice(&[0u8; 4][..content_pad]);

    writer.write_all(&record).map_err(Error::Network)
}
