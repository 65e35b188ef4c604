//! Binary header sniffing for candidate modules.
//!
//! Mapping a file into the process is expensive and, for the wrong
//! architecture, fails with unhelpful loader messages. The header check
//! rejects files that are not shared libraries for this host up front.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Bytes read from the start of a candidate for sniffing.
const HEADER_WINDOW: u64 = 64 * 1024;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELF_TYPE_SHARED: u16 = 3;

const PE_DOS_MAGIC: [u8; 2] = *b"MZ";
const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
const PE_HEADER_OFFSET_POS: usize = 0x3c;
const PE_CHARACTERISTIC_DLL: u16 = 0x2000;
const PE_OPTIONAL_MAGIC_32: u16 = 0x10b;
const PE_OPTIONAL_MAGIC_64: u16 = 0x20b;

const MACHO_MAGIC_32: u32 = 0xfeed_face;
const MACHO_MAGIC_64: u32 = 0xfeed_facf;
const MACHO_FAT_MAGIC: [u8; 4] = [0xca, 0xfe, 0xba, 0xbe];
const MACHO_TYPE_DYLIB: u32 = 6;
const MACHO_TYPE_BUNDLE: u32 = 8;

/// Container format of a module file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryKind {
    /// ELF shared object.
    Elf,
    /// Portable Executable DLL.
    Pe,
    /// Mach-O dylib or bundle.
    MachO,
}

/// Machine architecture of a module file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86,
    X86_64,
    Arm,
    Aarch64,
    /// Mach-O universal binary; slices are chosen by the system loader.
    Universal,
    Unknown,
}

impl Architecture {
    /// Architecture of the running host.
    pub fn host() -> Self {
        match std::env::consts::ARCH {
            "x86" => Self::X86,
            "x86_64" => Self::X86_64,
            "arm" => Self::Arm,
            "aarch64" => Self::Aarch64,
            _ => Self::Unknown,
        }
    }
}

/// Result of sniffing a module header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryFormat {
    pub kind: BinaryKind,
    pub architecture: Architecture,
    /// Pointer width, 32 or 64. Zero when unknown (universal binaries).
    pub bits: u8,
}

impl BinaryFormat {
    /// Reads the header of `path` and classifies it.
    pub fn sniff(path: &Path) -> Result<Self, String> {
        let file = File::open(path).map_err(|e| format!("cannot open file: {e}"))?;
        let mut header = Vec::new();
        file.take(HEADER_WINDOW)
            .read_to_end(&mut header)
            .map_err(|e| format!("cannot read header: {e}"))?;
        Self::parse(&header)
    }

    /// Classifies a header already in memory.
    pub fn parse(header: &[u8]) -> Result<Self, String> {
        if header.starts_with(&ELF_MAGIC) {
            parse_elf(header)
        } else if header.starts_with(&PE_DOS_MAGIC) {
            parse_pe(header)
        } else if header.starts_with(&MACHO_FAT_MAGIC) {
            Ok(Self {
                kind: BinaryKind::MachO,
                architecture: Architecture::Universal,
                bits: 0,
            })
        } else if header.len() >= 4 && is_macho_magic(read_u32_le(header, 0)) {
            parse_macho(header)
        } else {
            Err("not a shared library (unrecognized header)".to_string())
        }
    }

    /// Container format the host's system loader accepts.
    pub fn host_kind() -> BinaryKind {
        if cfg!(windows) {
            BinaryKind::Pe
        } else if cfg!(target_vendor = "apple") {
            BinaryKind::MachO
        } else {
            BinaryKind::Elf
        }
    }

    /// Checks container and architecture against the running host.
    pub fn check_host_compatible(&self) -> Result<(), String> {
        let host_kind = Self::host_kind();
        if self.kind != host_kind {
            return Err(format!(
                "{} module cannot be loaded by a {} host",
                self.kind, host_kind
            ));
        }

        let host_arch = Architecture::host();
        let arch_ok = self.architecture == host_arch
            || (self.kind == BinaryKind::MachO && self.architecture == Architecture::Universal);
        if !arch_ok {
            return Err(format!(
                "module targets {:?} but host is {:?}",
                self.architecture, host_arch
            ));
        }

        Ok(())
    }
}

impl fmt::Display for BinaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Elf => "ELF",
            Self::Pe => "PE",
            Self::MachO => "Mach-O",
        };
        f.write_str(name)
    }
}

impl fmt::Display for BinaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bits == 0 {
            write!(f, "{} {:?}", self.kind, self.architecture)
        } else {
            write!(f, "{} {:?} ({}-bit)", self.kind, self.architecture, self.bits)
        }
    }
}

fn parse_elf(header: &[u8]) -> Result<BinaryFormat, String> {
    if header.len() < 20 {
        return Err("truncated ELF header".to_string());
    }

    let bits = match header[4] {
        1 => 32,
        2 => 64,
        other => return Err(format!("invalid ELF class {other}")),
    };
    let big_endian = match header[5] {
        1 => false,
        2 => true,
        other => return Err(format!("invalid ELF data encoding {other}")),
    };

    let read = |offset| {
        if big_endian {
            read_u16_be(header, offset)
        } else {
            read_u16_le(header, offset)
        }
    };

    if read(16) != ELF_TYPE_SHARED {
        return Err("ELF file is not a shared object".to_string());
    }

    let architecture = match read(18) {
        3 => Architecture::X86,
        62 => Architecture::X86_64,
        40 => Architecture::Arm,
        183 => Architecture::Aarch64,
        _ => Architecture::Unknown,
    };

    Ok(BinaryFormat {
        kind: BinaryKind::Elf,
        architecture,
        bits,
    })
}

fn parse_pe(header: &[u8]) -> Result<BinaryFormat, String> {
    if header.len() < PE_HEADER_OFFSET_POS + 4 {
        return Err("truncated DOS header".to_string());
    }

    let pe_offset = read_u32_le(header, PE_HEADER_OFFSET_POS) as usize;
    // Signature (4) + COFF header (20) + optional header magic (2).
    if pe_offset.checked_add(26).is_none_or(|end| end > header.len()) {
        return Err("PE header offset is outside the file header".to_string());
    }

    if header[pe_offset..pe_offset + 4] != PE_SIGNATURE {
        return Err("missing PE signature".to_string());
    }

    let coff = pe_offset + 4;
    let architecture = match read_u16_le(header, coff) {
        0x014c => Architecture::X86,
        0x8664 => Architecture::X86_64,
        0x01c0 | 0x01c4 => Architecture::Arm,
        0xaa64 => Architecture::Aarch64,
        _ => Architecture::Unknown,
    };

    let characteristics = read_u16_le(header, coff + 18);
    if characteristics & PE_CHARACTERISTIC_DLL == 0 {
        return Err("PE file is not a DLL".to_string());
    }

    let bits = match read_u16_le(header, coff + 20) {
        PE_OPTIONAL_MAGIC_32 => 32,
        PE_OPTIONAL_MAGIC_64 => 64,
        other => return Err(format!("unknown PE optional header magic {other:#x}")),
    };

    Ok(BinaryFormat {
        kind: BinaryKind::Pe,
        architecture,
        bits,
    })
}

fn parse_macho(header: &[u8]) -> Result<BinaryFormat, String> {
    if header.len() < 16 {
        return Err("truncated Mach-O header".to_string());
    }

    let bits = if read_u32_le(header, 0) == MACHO_MAGIC_64 { 64 } else { 32 };

    let architecture = match read_u32_le(header, 4) {
        7 => Architecture::X86,
        0x0100_0007 => Architecture::X86_64,
        12 => Architecture::Arm,
        0x0100_000c => Architecture::Aarch64,
        _ => Architecture::Unknown,
    };

    match read_u32_le(header, 12) {
        MACHO_TYPE_DYLIB | MACHO_TYPE_BUNDLE => {}
        _ => return Err("Mach-O file is not a dylib or bundle".to_string()),
    }

    Ok(BinaryFormat {
        kind: BinaryKind::MachO,
        architecture,
        bits,
    })
}

fn is_macho_magic(magic: u32) -> bool {
    magic == MACHO_MAGIC_32 || magic == MACHO_MAGIC_64
}

fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u16_be(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
