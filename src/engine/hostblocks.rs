// ETHDFS — ENGINE: HOST BLOCK VIEWS
// The host owns every structure here; the engine only mutates them in place
// during a single synchronous call. All views are bit-exact packed layouts
// over caller-provided byte ranges — the engine never allocates them.

use bytemuck::{Pod, Zeroable};
use std::mem;

// ============================================================================
// SYSTEM FILE TABLE ENTRY
// ============================================================================

/// One open file, as the host hands it to the engine. Allocated by the host
/// on OPEN/CREATE/SPOPNFIL, populated from the reply, mutated on every
/// READ/WRITE/SEEK, winding down on CLOSE.
///
/// `start_sector` carries the server-assigned fileid — the field keeps its
/// historical name because the host reads it under that name.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct SftEntry {
    pub handle_count: u16,
    pub open_mode: u16,
    pub file_attr: u8,
    pub dev_info_word: u16,
    pub dev_drvr_ptr: u32,
    pub start_sector: u16,
    pub file_time: u32,
    pub file_size: u32,
    pub file_pos: u32,
    pub rel_sector: u16,
    pub abs_sector: u16,
    pub dir_sector: u16,
    pub dir_entry_no: u8,
    pub file_name: [u8; 11],
}

pub const SFT_SIZE: usize = 43;
const _: () = assert!(mem::size_of::<SftEntry>() == SFT_SIZE);

/// View the first SFT_SIZE bytes of a host-provided range as an SFT entry.
pub fn sft_view(bytes: &mut [u8]) -> &mut SftEntry {
    bytemuck::from_bytes_mut(&mut bytes[..SFT_SIZE])
}

/// Read-only SFT view (dispatch routing reads the device-info word).
pub fn sft_ref(bytes: &[u8]) -> &SftEntry {
    bytemuck::from_bytes(&bytes[..SFT_SIZE])
}

// ============================================================================
// DIRECTORY SCAN CURSOR + FOUND-FILE RECORD
// ============================================================================

/// 21-byte search control block living at the head of a FINDFIRST/FINDNEXT
/// DTA. Bit 7 of `drv_lett` marks a network drive.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct SearchCursor {
    pub drv_lett: u8,
    pub srch_tmpl: [u8; 11],
    pub srch_attr: u8,
    pub dir_entry: u16,
    pub par_clstr: u16,
    pub reserved: [u8; 4],
}

pub const CURSOR_SIZE: usize = 21;
const _: () = assert!(mem::size_of::<SearchCursor>() == CURSOR_SIZE);

/// 32-byte standard directory entry for the found file.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct FoundFile {
    pub fname: [u8; 11],
    pub fattr: u8,
    pub reserved: [u8; 10],
    pub time_lstupd: u16,
    pub date_lstupd: u16,
    pub start_clstr: u16,
    pub fsize: u32,
}

pub const FOUND_SIZE: usize = 32;
const _: () = assert!(mem::size_of::<FoundFile>() == FOUND_SIZE);

/// A scan DTA is the cursor followed by a copy of the found-file record.
pub const FOUND_OFFSET: usize = CURSOR_SIZE;
pub const FIND_DTA_SIZE: usize = CURSOR_SIZE + FOUND_SIZE;

pub fn cursor_view(bytes: &mut [u8]) -> &mut SearchCursor {
    bytemuck::from_bytes_mut(&mut bytes[..CURSOR_SIZE])
}

// ============================================================================
// SWAPPABLE DATA AREA (engine-relevant subset)
// ============================================================================

/// The slice of the host's swappable data area the engine reads and writes:
/// the two fully-qualified filename buffers, the FCB-style template derived
/// from fn1, the search attribute, the special-open parameters, and the
/// found-file record that FINDFIRST/FINDNEXT fill in.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct Sda {
    pub fn1: [u8; 128],
    pub fn2: [u8; 128],
    pub fcb_fn1: [u8; 11],
    pub srch_attr: u8,
    pub spop_act: u16,
    pub spop_mode: u16,
    pub found_file: FoundFile,
}

pub const SDA_SIZE: usize = 304;
const _: () = assert!(mem::size_of::<Sda>() == SDA_SIZE);

// ============================================================================
// HOST CALL INTERFACE
// ============================================================================

/// One redirector call, register file plus the host blocks the operation
/// touches. The engine never keeps any of these borrows past the call.
pub struct HostCall<'a> {
    /// Redirector subfunction (the AL value).
    pub op: u8,
    pub cx: u16,
    pub dx: u16,
    pub bl: u8,
    /// Word saved from the caller's stack (SETATTR attribute, open action).
    pub stack_word: u16,
    pub sda: &'a mut Sda,
    /// SFT entry bytes for handle-based operations.
    pub sft: Option<&'a mut [u8]>,
    /// Data transfer area: read/write buffer, or the scan cursor block.
    pub dta: &'a mut [u8],
    /// NUL-terminated current path of the drive the call addresses.
    pub cds_path: &'a [u8],
    /// Lock parameter records (8 bytes each) for LOCKFIL.
    pub lock_params: &'a [u8],
}

/// Register state handed back to the host. Carry set means AX is an error
/// code; carry clear means the registers hold the op's documented results.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HostRegs {
    pub ax: u16,
    pub bx: u16,
    pub cx: u16,
    pub dx: u16,
    pub di: u16,
    pub carry: bool,
}

impl HostRegs {
    pub fn success() -> Self {
        HostRegs::default()
    }

    pub fn fail(code: u16) -> Self {
        HostRegs { ax: code, carry: true, ..HostRegs::default() }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sizes() {
        assert_eq!(mem::size_of::<SftEntry>(), 43);
        assert_eq!(mem::size_of::<SearchCursor>(), 21);
        assert_eq!(mem::size_of::<FoundFile>(), 32);
        assert_eq!(mem::size_of::<Sda>(), 304);
        assert_eq!(FIND_DTA_SIZE, 53);
    }

    #[test]
    fn sft_view_writes_through() {
        let mut raw = [0u8; 64];
        {
            let sft = sft_view(&mut raw);
            sft.start_sector = 0x4242;
            sft.file_pos = 0x11223344;
            sft.dir_entry_no = 0xFF;
        }
        // start_sector sits at offset 11 in the packed layout
        assert_eq!(u16::from_le_bytes([raw[11], raw[12]]), 0x4242);
        let sft = sft_view(&mut raw);
        let pos = sft.file_pos;
        assert_eq!(pos, 0x11223344);
        assert_eq!(sft.dir_entry_no, 0xFF);
    }

    #[test]
    fn cursor_layout_offsets() {
        let mut raw = [0u8; CURSOR_SIZE];
        {
            let c = cursor_view(&mut raw);
            c.drv_lett = 0x85;
            c.srch_attr = 0x16;
            c.dir_entry = 0x0102;
            c.par_clstr = 0x0304;
        }
        assert_eq!(raw[0], 0x85);
        assert_eq!(raw[12], 0x16);
        assert_eq!(u16::from_le_bytes([raw[13], raw[14]]), 0x0102);
        assert_eq!(u16::from_le_bytes([raw[15], raw[16]]), 0x0304);
    }
}
