// ETHDFS — ENGINE: REDIRECTOR MODULE
// The operation dispatcher: routes each host call to the drive it concerns,
// marshals the op's arguments into the transport's send buffer, interprets
// the reply, and writes results back into the host-visible blocks.
//
// Calls for drives the engine does not map are chained to the previous
// handler untouched; chained calls produce no wire traffic.

use crate::engine::hostblocks::*;
use crate::engine::protocol::*;
use crate::engine::transport::{Link, Transport};

// ============================================================================
// DRIVE MAPPING TABLE
// ============================================================================

pub const UNMAPPED: u8 = 0xFF;

/// Local→remote drive letter table, indexed by local ordinal (A=0..Z=25).
/// All mappings share one peer MAC, which lives in the transport.
pub struct DriveMap {
    ldrv: [u8; 26],
}

impl Default for DriveMap {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveMap {
    pub fn new() -> Self {
        DriveMap { ldrv: [UNMAPPED; 26] }
    }

    /// Bind a local letter to a remote one. A letter maps at most once.
    pub fn map(&mut self, local: u8, remote: u8) -> bool {
        if local > 25 || remote > 25 || self.ldrv[local as usize] != UNMAPPED {
            return false;
        }
        self.ldrv[local as usize] = remote;
        true
    }

    pub fn remote_of(&self, local: u8) -> Option<u8> {
        if local > 25 {
            return None;
        }
        match self.ldrv[local as usize] {
            UNMAPPED => None,
            r => Some(r),
        }
    }

    pub fn first_mapped(&self) -> Option<u8> {
        (0u8..26).find(|&i| self.ldrv[i as usize] != UNMAPPED)
    }

    pub fn iter_mapped(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        (0u8..26).filter_map(move |i| self.remote_of(i).map(|r| (i, r)))
    }

    pub fn clear(&mut self) {
        self.ldrv = [UNMAPPED; 26];
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

/// What became of a host call.
pub enum Dispatch {
    /// Not for a drive we map — hand to the previous handler unchanged.
    Chain,
    /// Handled; these registers go back to the host.
    Done(HostRegs),
}

/// Reply-shape failures surface the peer's AX, or the generic code when the
/// peer claimed success.
fn shape_err(ax: u16) -> u16 {
    if ax != 0 {
        ax
    } else {
        ERR_FILE_NOT_FOUND
    }
}

impl HostRegs {
    /// Turn an in-progress register set into an error without losing the
    /// partial results already recorded (chunked-write byte counts).
    fn failed(mut self, code: u16) -> HostRegs {
        self.ax = code;
        self.carry = true;
        self
    }
}

pub struct Redirector<L: Link> {
    pub drives: DriveMap,
    pub transport: Transport<L>,
}

impl<L: Link> Redirector<L> {
    pub fn new(drives: DriveMap, transport: Transport<L>) -> Self {
        Redirector { drives, transport }
    }

    /// Entry point for one host call. Computes the affected local drive from
    /// the op-specific source, chains when the call is not for us, otherwise
    /// runs the op and returns the host-visible registers.
    pub fn dispatch(&mut self, call: &mut HostCall) -> Dispatch {
        let op = call.op;
        if op == OP_INSTALLCHK || op > OP_SPOPNFIL || !is_supported(op) {
            return Dispatch::Chain;
        }

        let local = match op {
            // handle-based ops carry the drive in the SFT device-info word
            OP_CLSFIL..=OP_UNLOCKFIL | OP_SKFMEND | OP_UNKNOWN_2D => match call.sft.as_deref() {
                Some(b) if b.len() >= SFT_SIZE => (sft_ref(b).dev_info_word & 0x3F) as u8,
                _ => return Dispatch::Chain,
            },
            // a resumed scan carries it in the cursor's drive byte
            OP_FINDNEXT => {
                if call.dta.len() < CURSOR_SIZE {
                    return Dispatch::Chain;
                }
                call.dta[0] & 0x1F
            }
            // path ops carry it as the first filename's drive letter
            OP_SETATTR | OP_GETATTR | OP_DELETE | OP_OPEN | OP_CREATE | OP_SPOPNFIL
            | OP_MKDIR | OP_RMDIR | OP_CHDIR | OP_RENAME => drive_to_num(call.sda.fn1[0]),
            // everything else goes by the current-directory structure
            _ => drive_to_num(call.cds_path.first().copied().unwrap_or(0)),
        };
        let Some(remote) = self.drives.remote_of(local) else {
            return Dispatch::Chain;
        };

        // The host does not always leave a usable FCB template behind
        // ("CD .." leaves all spaces), so rebuild it from fn1 every time.
        if op != OP_DISKSPACE {
            call.sda.fcb_fn1 = fcb_name_from_path(&call.sda.fn1);
        }

        let regs = match op {
            OP_RMDIR => self.op_rmdir(call, remote),
            OP_MKDIR | OP_CHDIR => self.op_make_or_change_dir(op, call, remote),
            OP_CLSFIL => self.op_clsfil(call, remote),
            OP_CMMTFIL => HostRegs::success(),
            OP_READFIL => self.op_readfil(call, remote),
            OP_WRITEFIL => self.op_writefil(call, remote),
            OP_LOCKFIL => self.op_lockfil(call, remote),
            // not issued by DOS 4+, which folds unlock into 0A/BL=1
            OP_UNLOCKFIL => HostRegs::fail(ERR_FILE_NOT_FOUND),
            OP_DISKSPACE => self.op_diskspace(remote),
            OP_SETATTR => self.op_setattr(call, remote),
            OP_GETATTR => self.op_getattr(call, remote),
            OP_RENAME => self.op_rename(call, remote),
            OP_DELETE => self.op_delete(call, remote),
            OP_OPEN | OP_CREATE | OP_SPOPNFIL => self.op_open(op, call, local, remote),
            OP_FINDFIRST | OP_FINDNEXT => self.op_find(op, call, local, remote),
            OP_SKFMEND => self.op_skfmend(call, remote),
            OP_UNKNOWN_2D => HostRegs { ax: 2, ..HostRegs::default() },
            _ => unreachable!("filtered by is_supported"),
        };
        Dispatch::Done(regs)
    }

    /// Broadcast server discovery: DISKSPACE against the first mapped drive
    /// with the peer check relaxed. The replying server becomes the peer.
    pub fn discover(&mut self) -> Option<[u8; 6]> {
        let local = self.drives.first_mapped()?;
        let remote = self.drives.remote_of(local)?;
        self.transport.set_peer_mac([0xFF; 6]);
        let ok = matches!(
            self.transport.request(OP_DISKSPACE, remote, 0, true),
            Some(ref r) if r.payload.len() == 6
        );
        if ok {
            Some(self.transport.peer_mac())
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // directory ops
    // ------------------------------------------------------------------

    fn op_rmdir(&mut self, call: &mut HostCall, remote: u8) -> HostRegs {
        // refuse to remove the working directory (or an ancestor of it)
        let l = cstr_len(&call.sda.fn1);
        let cds = &call.cds_path[..cstr_len(call.cds_path)];
        if l <= cds.len() && call.sda.fn1[..l] == cds[..l] {
            return HostRegs::fail(ERR_REMOVE_CURRENT_DIR);
        }
        self.op_make_or_change_dir(OP_RMDIR, call, remote)
    }

    fn op_make_or_change_dir(&mut self, op: u8, call: &mut HostCall, remote: u8) -> HostRegs {
        // CHDIR only asserts the target exists; the host updates the CDS
        let wire_fail = if op == OP_CHDIR { ERR_PATH_NOT_FOUND } else { ERR_FILE_NOT_FOUND };
        let l = cstr_len(&call.sda.fn1);
        if l < 2 {
            return HostRegs::fail(ERR_PATH_NOT_FOUND);
        }
        let tail = l - 2;
        self.transport.payload_mut()[..tail].copy_from_slice(&call.sda.fn1[2..l]);
        match self.transport.request(op, remote, tail, false) {
            Some(r) if r.payload.is_empty() => {
                HostRegs { ax: r.ax, carry: r.ax != 0, ..HostRegs::default() }
            }
            // these ops answer with AX alone; anything else gets the fixed code
            Some(_) => HostRegs::fail(wire_fail),
            None => HostRegs::fail(wire_fail),
        }
    }

    // ------------------------------------------------------------------
    // file handle ops
    // ------------------------------------------------------------------

    fn op_clsfil(&mut self, call: &mut HostCall, remote: u8) -> HostRegs {
        let Some(bytes) = call.sft.as_deref_mut() else {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        };
        let sft = sft_view(bytes);
        // DOS bumps the count on open, we settle it on close
        if sft.handle_count > 0 {
            sft.handle_count -= 1;
        }
        let fileid = sft.start_sector;
        self.transport.payload_mut()[..2].copy_from_slice(&fileid.to_le_bytes());
        match self.transport.request(OP_CLSFIL, remote, 2, false) {
            Some(r) if r.payload.is_empty() && r.ax != 0 => HostRegs::fail(r.ax),
            // a close the network ate is still a close
            _ => HostRegs::success(),
        }
    }

    fn op_readfil(&mut self, call: &mut HostCall, remote: u8) -> HostRegs {
        let HostCall { sft, dta, cx, .. } = call;
        let dta = &mut **dta;
        let Some(bytes) = sft.as_deref_mut() else {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        };
        let sft = sft_view(bytes);
        if sft.open_mode & 1 != 0 {
            return HostRegs::fail(ERR_ACCESS_DENIED); // write-only handle
        }
        let mut regs = HostRegs::success();
        let want = *cx as usize;
        if want == 0 {
            return regs;
        }
        let fileid = sft.start_sector;
        let base = sft.file_pos;
        let mut total = 0usize;
        loop {
            let chunk = (want - total).min(READ_CHUNK_MAX);
            let payload = self.transport.payload_mut();
            payload[..4].copy_from_slice(&base.wrapping_add(total as u32).to_le_bytes());
            payload[4..6].copy_from_slice(&fileid.to_le_bytes());
            payload[6..8].copy_from_slice(&(chunk as u16).to_le_bytes());
            match self.transport.request(OP_READFIL, remote, 8, false) {
                None => return HostRegs::fail(ERR_FILE_NOT_FOUND),
                Some(r) if r.ax != 0 => return HostRegs::fail(r.ax),
                Some(r) if r.payload.len() > chunk => return HostRegs::fail(shape_err(r.ax)),
                Some(r) => {
                    let got = r.payload.len();
                    dta[total..total + got].copy_from_slice(r.payload);
                    total += got;
                    // short reply = server EOF
                    if got < chunk || total == want {
                        sft.file_pos = base.wrapping_add(total as u32);
                        regs.cx = total as u16;
                        return regs;
                    }
                }
            }
        }
    }

    fn op_writefil(&mut self, call: &mut HostCall, remote: u8) -> HostRegs {
        let HostCall { sft, dta, cx, .. } = call;
        let dta = &**dta;
        let Some(bytes) = sft.as_deref_mut() else {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        };
        let sft = sft_view(bytes);
        if sft.open_mode & 3 == 0 {
            return HostRegs::fail(ERR_ACCESS_DENIED); // read-only handle
        }
        let mut regs = HostRegs::success();
        let mut bytesleft = *cx as usize;
        let mut written = 0usize;
        loop {
            // always send at least one frame: a zero-byte write is a truncate
            let chunk = bytesleft.min(WRITE_CHUNK_MAX);
            let pos = sft.file_pos;
            let fileid = sft.start_sector;
            let payload = self.transport.payload_mut();
            payload[..4].copy_from_slice(&pos.to_le_bytes());
            payload[4..6].copy_from_slice(&fileid.to_le_bytes());
            payload[6..6 + chunk].copy_from_slice(&dta[written..written + chunk]);
            match self.transport.request(OP_WRITEFIL, remote, 6 + chunk, false) {
                None => return regs.failed(ERR_FILE_NOT_FOUND),
                Some(r) if r.ax != 0 || r.payload.len() != 2 => {
                    return regs.failed(shape_err(r.ax))
                }
                Some(r) => {
                    let accepted = u16::from_le_bytes([r.payload[0], r.payload[1]]) as usize;
                    if accepted > chunk {
                        return regs.failed(ERR_FILE_NOT_FOUND);
                    }
                    written += accepted;
                    bytesleft -= accepted;
                    regs.cx = written as u16;
                    sft.file_pos = pos.wrapping_add(accepted as u32);
                    if sft.file_pos > sft.file_size {
                        sft.file_size = sft.file_pos;
                    }
                    // short write: the server stopped early, report what stuck
                    if accepted != chunk {
                        return regs;
                    }
                }
            }
            if bytesleft == 0 {
                return regs;
            }
        }
    }

    fn op_lockfil(&mut self, call: &mut HostCall, remote: u8) -> HostRegs {
        let HostCall { sft, lock_params, cx, bl, .. } = call;
        let Some(bytes) = sft.as_deref_mut() else {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        };
        let sft = sft_view(bytes);
        // BL: 0 = lock, 1 = unlock; anything else never reaches the wire
        if *bl > 1 {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        }
        let records = *cx as usize * 8;
        if 4 + records > READ_CHUNK_MAX || lock_params.len() < records {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        }
        let fileid = sft.start_sector;
        let payload = self.transport.payload_mut();
        payload[..2].copy_from_slice(&cx.to_le_bytes());
        payload[2..4].copy_from_slice(&fileid.to_le_bytes());
        payload[4..4 + records].copy_from_slice(&lock_params[..records]);
        match self.transport.request(OP_LOCKFIL + *bl, remote, 4 + records, false) {
            Some(r) if r.payload.is_empty() => HostRegs::success(),
            _ => HostRegs::fail(ERR_FILE_NOT_FOUND),
        }
    }

    fn op_skfmend(&mut self, call: &mut HostCall, remote: u8) -> HostRegs {
        let HostCall { sft, cx, dx, .. } = call;
        let Some(bytes) = sft.as_deref_mut() else {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        };
        let fileid = sft_view(bytes).start_sector;
        let payload = self.transport.payload_mut();
        payload[..2].copy_from_slice(&dx.to_le_bytes());
        payload[2..4].copy_from_slice(&cx.to_le_bytes());
        payload[4..6].copy_from_slice(&fileid.to_le_bytes());
        match self.transport.request(OP_SKFMEND, remote, 6, false) {
            None => HostRegs::fail(ERR_FILE_NOT_FOUND),
            Some(r) if r.ax != 0 || r.payload.len() != 4 => HostRegs::fail(shape_err(r.ax)),
            // new absolute position comes back in DX:AX; file_pos is not ours
            Some(r) => HostRegs {
                ax: u16::from_le_bytes([r.payload[0], r.payload[1]]),
                dx: u16::from_le_bytes([r.payload[2], r.payload[3]]),
                ..HostRegs::default()
            },
        }
    }

    // ------------------------------------------------------------------
    // path ops
    // ------------------------------------------------------------------

    fn op_diskspace(&mut self, remote: u8) -> HostRegs {
        match self.transport.request(OP_DISKSPACE, remote, 0, false) {
            Some(r) if r.payload.len() == 6 => HostRegs {
                ax: r.ax, // sectors per cluster
                bx: u16::from_le_bytes([r.payload[0], r.payload[1]]), // total clusters
                cx: u16::from_le_bytes([r.payload[2], r.payload[3]]), // bytes per sector
                dx: u16::from_le_bytes([r.payload[4], r.payload[5]]), // free clusters
                di: 0,
                carry: false,
            },
            _ => HostRegs::fail(ERR_FILE_NOT_FOUND),
        }
    }

    fn op_setattr(&mut self, call: &mut HostCall, remote: u8) -> HostRegs {
        let l = cstr_len(&call.sda.fn1);
        if l < 2 {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        }
        let payload = self.transport.payload_mut();
        payload[0] = call.stack_word as u8; // new attributes ride the stack word
        payload[1..l - 1].copy_from_slice(&call.sda.fn1[2..l]);
        match self.transport.request(OP_SETATTR, remote, l - 1, false) {
            None => HostRegs::fail(ERR_FILE_NOT_FOUND),
            Some(r) if r.payload.is_empty() => {
                if r.ax != 0 {
                    HostRegs::fail(r.ax)
                } else {
                    HostRegs::success()
                }
            }
            // AX is only meaningful on an empty reply
            Some(_) => HostRegs::fail(ERR_FILE_NOT_FOUND),
        }
    }

    fn op_getattr(&mut self, call: &mut HostCall, remote: u8) -> HostRegs {
        let l = cstr_len(&call.sda.fn1);
        if l < 2 {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        }
        let tail = l - 2;
        self.transport.payload_mut()[..tail].copy_from_slice(&call.sda.fn1[2..l]);
        match self.transport.request(OP_GETATTR, remote, tail, false) {
            None => HostRegs::fail(ERR_FILE_NOT_FOUND),
            Some(r) if r.payload.len() != 9 || r.ax != 0 => HostRegs::fail(shape_err(r.ax)),
            Some(r) => HostRegs {
                cx: u16::from_le_bytes([r.payload[0], r.payload[1]]), // time
                dx: u16::from_le_bytes([r.payload[2], r.payload[3]]), // date
                di: u16::from_le_bytes([r.payload[4], r.payload[5]]), // size low
                bx: u16::from_le_bytes([r.payload[6], r.payload[7]]), // size high
                ax: r.payload[8] as u16,                              // attributes
                carry: false,
            },
        }
    }

    fn op_rename(&mut self, call: &mut HostCall, remote: u8) -> HostRegs {
        // both operands must live on the same drive
        if call.sda.fn1[0] != call.sda.fn2[0] {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        }
        let l1 = cstr_len(&call.sda.fn1);
        if l1 < 2 {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        }
        let old = l1 - 2;
        // the target name may not carry wildcards; the source may
        let l2 = match len_if_no_wildcards(&call.sda.fn2) {
            Some(n) if n >= 2 => n,
            _ => return HostRegs::fail(ERR_PATH_NOT_FOUND),
        };
        let new = l2 - 2;
        let payload = self.transport.payload_mut();
        payload[0] = old as u8;
        payload[1..1 + old].copy_from_slice(&call.sda.fn1[2..l1]);
        payload[1 + old..1 + old + new].copy_from_slice(&call.sda.fn2[2..l2]);
        match self.transport.request(OP_RENAME, remote, 1 + old + new, false) {
            None => HostRegs::fail(ERR_FILE_NOT_FOUND),
            Some(r) if r.payload.is_empty() => {
                if r.ax != 0 {
                    HostRegs::fail(r.ax)
                } else {
                    HostRegs::success()
                }
            }
            // AX is only meaningful on an empty reply
            Some(_) => HostRegs::fail(ERR_FILE_NOT_FOUND),
        }
    }

    fn op_delete(&mut self, call: &mut HostCall, remote: u8) -> HostRegs {
        let l = cstr_len(&call.sda.fn1);
        if l < 2 {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        }
        let tail = l - 2;
        self.transport.payload_mut()[..tail].copy_from_slice(&call.sda.fn1[2..l]);
        match self.transport.request(OP_DELETE, remote, tail, false) {
            None => HostRegs::fail(ERR_FILE_NOT_FOUND),
            Some(r) if !r.payload.is_empty() || r.ax != 0 => HostRegs::fail(shape_err(r.ax)),
            Some(_) => HostRegs::success(),
        }
    }

    fn op_open(&mut self, op: u8, call: &mut HostCall, local: u8, remote: u8) -> HostRegs {
        let HostCall { sft, sda, stack_word, .. } = call;
        let sda = &mut **sda;
        let l = match len_if_no_wildcards(&sda.fn1) {
            Some(n) if n >= 2 => n,
            _ => return HostRegs::fail(ERR_PATH_NOT_FOUND),
        };
        let tail = l - 2;
        let act = sda.spop_act;
        let mode = sda.spop_mode;
        let payload = self.transport.payload_mut();
        // action and mode matter only to SPOPNFIL but always travel
        payload[..2].copy_from_slice(&stack_word.to_le_bytes());
        payload[2..4].copy_from_slice(&act.to_le_bytes());
        payload[4..6].copy_from_slice(&mode.to_le_bytes());
        payload[6..6 + tail].copy_from_slice(&sda.fn1[2..l]);
        let parsed = match self.transport.request(op, remote, 6 + tail, false) {
            None => return HostRegs::fail(ERR_FILE_NOT_FOUND),
            Some(r) if r.payload.len() != 25 || r.ax != 0 => {
                return HostRegs::fail(shape_err(r.ax))
            }
            Some(r) => {
                let p = r.payload;
                let mut name = [0u8; 11];
                name.copy_from_slice(&p[1..12]);
                (
                    p[0],                                            // attributes
                    name,                                            // 8+3 name
                    u32::from_le_bytes(p[12..16].try_into().unwrap()), // time+date
                    u32::from_le_bytes(p[16..20].try_into().unwrap()), // size
                    u16::from_le_bytes([p[20], p[21]]),              // fileid
                    u16::from_le_bytes([p[22], p[23]]),              // SPOP result
                    p[24],                                           // open mode low
                )
            }
        };
        let (attr, name, time, size, fileid, spop_cx, mode_low) = parsed;
        let Some(bytes) = sft.as_deref_mut() else {
            return HostRegs::fail(ERR_FILE_NOT_FOUND);
        };
        let sft = sft_view(bytes);
        let mut regs = HostRegs::success();
        if op == OP_SPOPNFIL {
            regs.cx = spop_cx;
        }
        // TODO: FCB opens (open_mode bit 15) additionally need the host's
        // set-handle-owner service wired through the call interface.
        sft.file_attr = attr;
        sft.dev_info_word = 0x8040 | local as u16; // network drive, unwritten
        sft.dev_drvr_ptr = 0;
        sft.start_sector = fileid;
        sft.file_time = time;
        sft.file_size = size;
        sft.file_pos = 0;
        sft.open_mode = (sft.open_mode & 0xFF00) | mode_low as u16;
        sft.rel_sector = 0xFFFF;
        sft.abs_sector = 0xFFFF;
        sft.dir_sector = 0;
        sft.dir_entry_no = 0xFF;
        sft.file_name = name;
        regs
    }

    fn op_find(&mut self, op: u8, call: &mut HostCall, local: u8, remote: u8) -> HostRegs {
        let HostCall { sda, dta, .. } = call;
        let sda = &mut **sda;
        let dta = &mut **dta;
        let miss = if op == OP_FINDFIRST { ERR_FILE_NOT_FOUND } else { ERR_NO_MORE_FILES };
        if dta.len() < FIND_DTA_SIZE {
            return HostRegs::fail(miss);
        }
        let plen = if op == OP_FINDFIRST {
            let l = cstr_len(&sda.fn1);
            let tail = l.saturating_sub(2);
            let payload = self.transport.payload_mut();
            payload[0] = sda.srch_attr;
            if tail > 0 {
                payload[1..1 + tail].copy_from_slice(&sda.fn1[2..l]);
            }
            1 + tail
        } else {
            let cur = cursor_view(dta);
            let par = cur.par_clstr;
            let entry = cur.dir_entry;
            let attr = cur.srch_attr;
            let tmpl = cur.srch_tmpl;
            let payload = self.transport.payload_mut();
            payload[..2].copy_from_slice(&par.to_le_bytes());
            payload[2..4].copy_from_slice(&entry.to_le_bytes());
            payload[4] = attr;
            payload[5..16].copy_from_slice(&tmpl);
            16
        };
        let (found, par, entry) = match self.transport.request(op, remote, plen, false) {
            None => return HostRegs::fail(miss),
            Some(r) if r.ax != 0 || r.payload.len() != 24 => {
                return HostRegs::fail(shape_err(r.ax))
            }
            Some(r) => {
                let p = r.payload;
                let mut fname = [0u8; 11];
                fname.copy_from_slice(&p[1..12]);
                let found = FoundFile {
                    fname,
                    fattr: p[0],
                    reserved: [0; 10],
                    time_lstupd: u16::from_le_bytes([p[12], p[13]]),
                    date_lstupd: u16::from_le_bytes([p[14], p[15]]),
                    start_clstr: 0,
                    fsize: u32::from_le_bytes(p[16..20].try_into().unwrap()),
                };
                (found, u16::from_le_bytes([p[20], p[21]]), u16::from_le_bytes([p[22], p[23]]))
            }
        };
        sda.found_file = found;
        let cur = cursor_view(dta);
        if op == OP_FINDFIRST {
            cur.drv_lett = local | 0x80; // bit 7: network drive
            cur.srch_tmpl = sda.fcb_fn1;
            cur.srch_attr = sda.srch_attr;
        }
        cur.par_clstr = par;
        cur.dir_entry = entry;
        dta[FOUND_OFFSET..FIND_DTA_SIZE].copy_from_slice(bytemuck::bytes_of(&found));
        HostRegs::success()
    }
}

// ============================================================================
// TESTS
// ============================================================================
