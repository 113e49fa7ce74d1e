// ETHDFS — ENGINE: TRANSPORT MODULE
// The request/response engine: owns the single send buffer and the
// single-slot receive inbox, frames and checksums each request, and runs
// the retry/timeout loop until a validated reply arrives.
//
// Exactly one request is in flight at any time. Retransmissions of a
// request carry the same sequence byte; the first valid reply wins, and
// stale replies die on the sequence check.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::engine::protocol::*;
use crate::engine::runtime::tick8;

/// Ticks of the 55 ms clock after which a reply wait expires (~100 ms).
const REPLY_TIMEOUT_TICKS: u8 = 2;
/// Total transmit attempts per request before giving up.
const SEND_ATTEMPTS: u32 = 5;

// ============================================================================
// LINK DRIVER SEAM
// ============================================================================

/// The transmit side of the link driver. Best-effort: no confirmation, no
/// error reporting — a lost frame is indistinguishable from a lost reply
/// and the retry loop covers both.
pub trait Link {
    fn send(&mut self, frame: &[u8]);
}

// ============================================================================
// INBOX — single-slot receive buffer
// ============================================================================

/// Shared receive slot between the engine and the link driver.
///
/// The state word is the whole protocol:
///   0         empty — the driver may claim the slot
///   negative  reserved — the driver is filling it (value = -length)
///   positive  ready — a frame of that length awaits the engine
///
/// One producer (the driver's receive context), one consumer (the engine).
/// Only the driver moves empty→reserved→ready; only the engine moves
/// ready→empty (or empty→empty when arming a new request).
pub struct Inbox {
    state: AtomicI32,
    buf: UnsafeCell<[u8; FRAME_SIZE]>,
}

// SAFETY: access to `buf` is mediated by `state`: the driver writes only
// while the slot is reserved (which it can only reach from empty via CAS),
// the engine reads only while it is ready. The two never hold the buffer at
// the same time.
unsafe impl Sync for Inbox {}
unsafe impl Send for Inbox {}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox {
    pub fn new() -> Self {
        Inbox { state: AtomicI32::new(0), buf: UnsafeCell::new([0u8; FRAME_SIZE]) }
    }

    /// Engine: discard whatever the slot holds and mark it empty.
    pub fn clear(&self) {
        self.state.store(0, Ordering::Release);
    }

    /// Driver, phase 1: claim the slot for an incoming frame of `len` bytes.
    /// Returns the fill pointer, or None when the frame is oversized or the
    /// slot is busy — in both cases the driver must drop the frame.
    pub fn begin_fill(&self, len: usize) -> Option<*mut u8> {
        if len == 0 || len > FRAME_SIZE {
            return None;
        }
        if self
            .state
            .compare_exchange(0, -(len as i32), Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        Some(self.buf.get() as *mut u8)
    }

    /// Driver, phase 2: the frame has been copied in; publish it.
    pub fn commit_fill(&self) {
        let v = self.state.load(Ordering::Relaxed);
        if v < 0 {
            self.state.store(-v, Ordering::Release);
        }
    }

    /// Engine: length of a ready frame, if one is waiting.
    pub fn ready_len(&self) -> Option<usize> {
        let v = self.state.load(Ordering::Acquire);
        if v > 0 {
            Some(v as usize)
        } else {
            None
        }
    }

    /// Engine-side view of the first `len` bytes of a ready frame.
    ///
    /// # Safety contract (internal)
    /// Callers only invoke this after `ready_len()` returned `Some`, and the
    /// engine keeps the slot in the ready state while the slice is alive.
    fn frame(&self, len: usize) -> &[u8] {
        // SAFETY: slot is ready, so the driver will not touch the buffer
        // until the engine clears it; len was bounded at begin_fill time.
        unsafe { &(&*self.buf.get())[..len] }
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// A validated reply: the payload past the fixed header, and the protocol
/// result word from bytes 58..59. Nonzero AX and unexpected payload lengths
/// are judged by the dispatcher, not here.
pub struct Reply<'a> {
    pub payload: &'a [u8],
    pub ax: u16,
}

pub struct Transport<L: Link> {
    pub link: L,
    inbox: Arc<Inbox>,
    sndbuff: Box<[u8; FRAME_SIZE]>,
    seq: u8,
}

impl<L: Link> Transport<L> {
    /// The Ethernet header, protocol version and checksum flag are written
    /// once here; requests only ever touch bytes 52..60 and the payload.
    pub fn new(link: L, inbox: Arc<Inbox>, local_mac: [u8; 6], cksum: bool) -> Self {
        let mut sndbuff = Box::new([0u8; FRAME_SIZE]);
        sndbuff[OFF_SRC..OFF_SRC + 6].copy_from_slice(&local_mac);
        sndbuff[OFF_ETHERTYPE..OFF_ETHERTYPE + 2].copy_from_slice(&ETHERTYPE);
        sndbuff[OFF_PROTO] = if cksum { PROTO_VER | CKSUM_FLAG } else { PROTO_VER };
        Transport { link, inbox, sndbuff, seq: 0 }
    }

    /// The peer MAC lives in the send buffer's destination field.
    pub fn peer_mac(&self) -> [u8; 6] {
        self.sndbuff[OFF_DST..OFF_DST + 6].try_into().unwrap()
    }

    pub fn set_peer_mac(&mut self, mac: [u8; 6]) {
        self.sndbuff[OFF_DST..OFF_DST + 6].copy_from_slice(&mac);
    }

    pub fn local_mac(&self) -> [u8; 6] {
        self.sndbuff[OFF_SRC..OFF_SRC + 6].try_into().unwrap()
    }

    /// Marshaling area: callers place request arguments here (offset 60
    /// onward) before invoking `request`.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.sndbuff[OFF_PAYLOAD..]
    }

    /// Emit the request currently marshaled in the send buffer and wait for
    /// a matching reply. Up to five transmissions, each waited on for about
    /// 100 ms. None = no valid reply (network error).
    ///
    /// With `accept_any_peer` (discovery), the source-MAC check is skipped
    /// and the replying server becomes the peer for all later requests.
    pub fn request(
        &mut self,
        op: u8,
        rdrive: u8,
        payload_len: usize,
        accept_any_peer: bool,
    ) -> Option<Reply<'_>> {
        let flen = HDR_LEN + payload_len;
        if flen > FRAME_SIZE {
            return None;
        }
        self.seq = self.seq.wrapping_add(1);
        self.sndbuff[OFF_FRAME_LEN..OFF_FRAME_LEN + 2]
            .copy_from_slice(&(flen as u16).to_le_bytes());
        self.sndbuff[OFF_SEQ] = self.seq;
        self.sndbuff[OFF_DRIVE] = rdrive;
        self.sndbuff[OFF_OP] = op;
        if self.sndbuff[OFF_PROTO] & CKSUM_FLAG != 0 {
            let ck = bsd_sum(&self.sndbuff[OFF_PROTO..flen]);
            self.sndbuff[OFF_CKSUM..OFF_CKSUM + 2].copy_from_slice(&ck.to_le_bytes());
        }

        self.inbox.clear();
        for _attempt in 0..SEND_ATTEMPTS {
            self.link.send(&self.sndbuff[..flen]);
            let start = tick8();
            loop {
                if tick8().wrapping_sub(start) >= REPLY_TIMEOUT_TICKS {
                    break; // timeout, retransmit
                }
                let Some(rlen) = self.inbox.ready_len() else {
                    std::thread::yield_now();
                    continue;
                };
                match self.validate(rlen, accept_any_peer) {
                    Some(alen) => {
                        if accept_any_peer {
                            let mut peer = [0u8; 6];
                            peer.copy_from_slice(&self.inbox.frame(alen)[OFF_SRC..OFF_SRC + 6]);
                            self.set_peer_mac(peer);
                        }
                        let frame = self.inbox.frame(alen);
                        return Some(Reply {
                            payload: &frame[OFF_PAYLOAD..],
                            ax: reply_ax(frame),
                        });
                    }
                    None => self.inbox.clear(), // not ours; keep waiting
                }
            }
        }
        None
    }

    /// All checks a candidate frame must pass. Returns the announced length
    /// (which replaces the received length) on success.
    fn validate(&self, rlen: usize, accept_any_peer: bool) -> Option<usize> {
        if rlen < HDR_LEN {
            return None;
        }
        let frame = self.inbox.frame(rlen);
        if frame[OFF_DST..OFF_DST + 6] != self.sndbuff[OFF_SRC..OFF_SRC + 6] {
            return None;
        }
        if !accept_any_peer && frame[OFF_SRC..OFF_SRC + 6] != self.sndbuff[OFF_DST..OFF_DST + 6] {
            return None;
        }
        if frame[OFF_ETHERTYPE..OFF_ETHERTYPE + 2] != ETHERTYPE {
            return None;
        }
        if frame[OFF_SEQ] != self.seq {
            return None;
        }
        let alen = frame_len(frame) as usize;
        if alen < HDR_LEN || alen > rlen {
            return None; // malformed or truncated
        }
        if self.sndbuff[OFF_PROTO] & CKSUM_FLAG != 0
            && bsd_sum(&frame[OFF_PROTO..alen]) != frame_cksum(frame)
        {
            return None;
        }
        Some(alen)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const LOCAL: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
    const PEER: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01];

    /// Copy a fully-built frame into the inbox via the two-phase protocol,
    /// exactly as a link driver would.
    fn deliver(inbox: &Inbox, frame: &[u8]) -> bool {
        match inbox.begin_fill(frame.len()) {
            Some(ptr) => {
                // SAFETY: begin_fill bounded the length against the slot size.
                unsafe { std::ptr::copy_nonoverlapping(frame.as_ptr(), ptr, frame.len()) };
                inbox.commit_fill();
                true
            }
            None => false,
        }
    }

    /// Build a valid reply for a captured request frame.
    fn make_reply(req: &[u8], ax: u16, payload: &[u8]) -> Vec<u8> {
        let len = HDR_LEN + payload.len();
        let mut f = vec![0u8; len];
        f[OFF_DST..OFF_DST + 6].copy_from_slice(&req[OFF_SRC..OFF_SRC + 6]);
        f[OFF_SRC..OFF_SRC + 6].copy_from_slice(&req[OFF_DST..OFF_DST + 6]);
        f[OFF_ETHERTYPE..OFF_ETHERTYPE + 2].copy_from_slice(&ETHERTYPE);
        f[OFF_FRAME_LEN..OFF_FRAME_LEN + 2].copy_from_slice(&(len as u16).to_le_bytes());
        f[OFF_PROTO] = req[OFF_PROTO];
        f[OFF_SEQ] = req[OFF_SEQ];
        f[OFF_DRIVE..OFF_DRIVE + 2].copy_from_slice(&ax.to_le_bytes());
        f[OFF_PAYLOAD..].copy_from_slice(payload);
        if f[OFF_PROTO] & CKSUM_FLAG != 0 {
            let ck = bsd_sum(&f[OFF_PROTO..len]);
            f[OFF_CKSUM..OFF_CKSUM + 2].copy_from_slice(&ck.to_le_bytes());
        }
        f
    }

    enum Action {
        Reply { ax: u16, payload: Vec<u8> },
        /// Reply, then flip one payload byte without fixing the checksum.
        Corrupt { ax: u16, payload: Vec<u8> },
        /// Reply with this sequence byte instead of the request's.
        StaleSeq { ax: u16 },
        /// Reply from an unexpected source MAC.
        WrongPeer,
        Silence,
    }

    struct ScriptLink {
        inbox: Arc<Inbox>,
        script: VecDeque<Action>,
        sent: Vec<Vec<u8>>,
    }

    impl ScriptLink {
        fn new(inbox: Arc<Inbox>, script: Vec<Action>) -> Self {
            ScriptLink { inbox, script: script.into(), sent: Vec::new() }
        }
    }

    impl Link for ScriptLink {
        fn send(&mut self, frame: &[u8]) {
            self.sent.push(frame.to_vec());
            match self.script.pop_front() {
                Some(Action::Reply { ax, payload }) => {
                    let f = make_reply(frame, ax, &payload);
                    deliver(&self.inbox, &f);
                }
                Some(Action::Corrupt { ax, payload }) => {
                    let mut f = make_reply(frame, ax, &payload);
                    f[OFF_PAYLOAD] ^= 0xFF;
                    deliver(&self.inbox, &f);
                }
                Some(Action::StaleSeq { ax }) => {
                    let mut f = make_reply(frame, ax, &[]);
                    f[OFF_SEQ] = frame[OFF_SEQ].wrapping_sub(1);
                    let ck = bsd_sum(&f[OFF_PROTO..]);
                    f[OFF_CKSUM..OFF_CKSUM + 2].copy_from_slice(&ck.to_le_bytes());
                    deliver(&self.inbox, &f);
                }
                Some(Action::WrongPeer) => {
                    let mut f = make_reply(frame, 0, &[]);
                    f[OFF_SRC..OFF_SRC + 6].copy_from_slice(&[0x66; 6]);
                    deliver(&self.inbox, &f);
                }
                Some(Action::Silence) | None => {}
            }
        }
    }

    fn transport(script: Vec<Action>) -> Transport<ScriptLink> {
        let inbox = Arc::new(Inbox::new());
        let link = ScriptLink::new(inbox.clone(), script);
        let mut t = Transport::new(link, inbox, LOCAL, true);
        t.set_peer_mac(PEER);
        t
    }

    #[test]
    fn inbox_two_phase_protocol() {
        let inbox = Inbox::new();
        assert!(inbox.ready_len().is_none());
        let p = inbox.begin_fill(64).unwrap();
        // reserved: no second claim, not ready yet
        assert!(inbox.begin_fill(64).is_none());
        assert!(inbox.ready_len().is_none());
        // SAFETY: pointer from begin_fill, length within the claimed 64.
        unsafe { std::ptr::write_bytes(p, 0xEE, 64) };
        inbox.commit_fill();
        assert_eq!(inbox.ready_len(), Some(64));
        // ready: still no claim until the engine clears it
        assert!(inbox.begin_fill(64).is_none());
        inbox.clear();
        assert!(inbox.begin_fill(64).is_some());
    }

    #[test]
    fn inbox_rejects_oversized() {
        let inbox = Inbox::new();
        assert!(inbox.begin_fill(FRAME_SIZE + 1).is_none());
        assert!(inbox.begin_fill(0).is_none());
        assert!(inbox.begin_fill(FRAME_SIZE).is_some());
    }

    #[test]
    fn request_round_trip() {
        let mut t = transport(vec![Action::Reply { ax: 0, payload: b"abcdef".to_vec() }]);
        t.payload_mut()[..2].copy_from_slice(&[0x11, 0x22]);
        let r = t.request(OP_GETATTR, 3, 2, false).expect("reply");
        assert_eq!(r.ax, 0);
        assert_eq!(r.payload, b"abcdef");
        let sent = &t.link.sent[0];
        assert_eq!(sent.len(), 62);
        assert_eq!(sent[OFF_DST..OFF_DST + 6], PEER);
        assert_eq!(sent[OFF_SRC..OFF_SRC + 6], LOCAL);
        assert_eq!(sent[OFF_ETHERTYPE..OFF_ETHERTYPE + 2], ETHERTYPE);
        assert_eq!(frame_len(sent), 62);
        assert_eq!(sent[OFF_DRIVE], 3);
        assert_eq!(sent[OFF_OP], OP_GETATTR);
        assert_eq!(sent[OFF_PROTO], PROTO_VER | CKSUM_FLAG);
        assert_eq!(bsd_sum(&sent[OFF_PROTO..62]), frame_cksum(sent));
    }

    #[test]
    fn sequence_increments_per_request_not_per_attempt() {
        let mut t = transport(vec![
            Action::Reply { ax: 0, payload: vec![] },
            Action::Silence,
            Action::Reply { ax: 0, payload: vec![] },
        ]);
        assert!(t.request(OP_DISKSPACE, 0, 0, false).is_some());
        let s1 = t.link.sent[0][OFF_SEQ];
        assert!(t.request(OP_DISKSPACE, 0, 0, false).is_some());
        let s2 = t.link.sent[1][OFF_SEQ];
        let s3 = t.link.sent[2][OFF_SEQ];
        assert_eq!(s2, s1.wrapping_add(1));
        assert_eq!(s3, s2); // retransmission, same sequence
    }

    #[test]
    fn corrupted_reply_retries_then_fails() {
        let corrupt = || Action::Corrupt { ax: 0, payload: vec![1, 2, 3] };
        let mut t = transport(vec![corrupt(), corrupt(), corrupt(), corrupt(), corrupt()]);
        assert!(t.request(OP_DISKSPACE, 0, 0, false).is_none());
        assert_eq!(t.link.sent.len(), 5);
    }

    #[test]
    fn corrupted_then_clean_reply_succeeds() {
        let mut t = transport(vec![
            Action::Corrupt { ax: 0, payload: vec![9, 9] },
            Action::Reply { ax: 0, payload: vec![7] },
        ]);
        let r = t.request(OP_DISKSPACE, 0, 0, false).expect("second attempt");
        assert_eq!(r.payload, &[7]);
        assert_eq!(t.link.sent.len(), 2);
    }

    #[test]
    fn stale_sequence_is_ignored() {
        let mut t = transport(vec![
            Action::StaleSeq { ax: 0 },
            Action::Reply { ax: 0, payload: vec![] },
        ]);
        assert!(t.request(OP_DISKSPACE, 0, 0, false).is_some());
        assert_eq!(t.link.sent.len(), 2);
    }

    #[test]
    fn wrong_peer_is_ignored_unless_discovering() {
        let mut t = transport(vec![Action::WrongPeer, Action::Reply { ax: 0, payload: vec![] }]);
        assert!(t.request(OP_DISKSPACE, 0, 0, false).is_some());
        assert_eq!(t.link.sent.len(), 2);
    }

    #[test]
    fn discovery_adopts_replying_peer() {
        let mut t = transport(vec![Action::WrongPeer]);
        t.set_peer_mac([0xFF; 6]);
        assert!(t.request(OP_DISKSPACE, 0, 0, true).is_some());
        assert_eq!(t.peer_mac(), [0x66; 6]);
    }

    #[test]
    fn truncated_announcement_is_dropped() {
        struct TruncLink {
            inbox: Arc<Inbox>,
        }
        impl Link for TruncLink {
            fn send(&mut self, frame: &[u8]) {
                let mut f = make_reply(frame, 0, &[1, 2, 3, 4]);
                // announce more bytes than actually delivered
                f[OFF_FRAME_LEN..OFF_FRAME_LEN + 2].copy_from_slice(&200u16.to_le_bytes());
                let ck = bsd_sum(&f[OFF_PROTO..]);
                f[OFF_CKSUM..OFF_CKSUM + 2].copy_from_slice(&ck.to_le_bytes());
                deliver(&self.inbox, &f);
            }
        }
        let inbox = Arc::new(Inbox::new());
        let mut t = Transport::new(TruncLink { inbox: inbox.clone() }, inbox, LOCAL, true);
        t.set_peer_mac(PEER);
        assert!(t.request(OP_DISKSPACE, 0, 0, false).is_none());
    }

    #[test]
    fn announced_length_truncates_reply() {
        // server padded the frame to Ethernet minimum; announced length wins
        struct PadLink {
            inbox: Arc<Inbox>,
        }
        impl Link for PadLink {
            fn send(&mut self, frame: &[u8]) {
                let mut f = make_reply(frame, 0, &[0xAB, 0xCD]);
                f.resize(HDR_LEN + 40, 0); // pad past the announced 62
                deliver(&self.inbox, &f);
            }
        }
        let inbox = Arc::new(Inbox::new());
        let mut t = Transport::new(PadLink { inbox: inbox.clone() }, inbox, LOCAL, true);
        t.set_peer_mac(PEER);
        let r = t.request(OP_DISKSPACE, 0, 0, false).expect("reply");
        assert_eq!(r.payload, &[0xAB, 0xCD]);
    }

    #[test]
    fn oversized_payload_refused() {
        let mut t = transport(vec![]);
        assert!(t.request(OP_WRITEFIL, 0, FRAME_SIZE - 59, false).is_none());
        assert!(t.link.sent.is_empty());
    }
}
