// ETHDFS — NETWORK: DATAPATH MODULE
// Raw-socket link driver. Binds an AF_PACKET socket to the EtherDFS
// EtherType on one interface, transmits best-effort, and runs a receive
// thread that offers every incoming frame to the engine's inbox through
// the two-phase claim/commit protocol.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::engine::protocol::FRAME_SIZE;
use crate::engine::transport::{Inbox, Link};

/// EtherDFS EtherType as the kernel wants it: network byte order, so the
/// wire carries the bytes ED F5.
const ETH_P_EDFS: u16 = 0xEDF5;

/// Driver slot numbers presented on the CLI map into the interface scan
/// list starting here (the historic packet-driver vector range).
pub const SLOT_BASE: u8 = 0x60;
pub const SLOT_MAX: u8 = 0x80;

// ============================================================================
// INTERFACE SCAN
// ============================================================================

/// Candidate interfaces in scan order: every non-loopback device the kernel
/// knows, sorted by name so slot numbers are stable across runs.
pub fn list_interfaces() -> Vec<String> {
    let mut names = Vec::new();
    if let Ok(dir) = std::fs::read_dir("/sys/class/net") {
        for entry in dir.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if name != "lo" {
                    names.push(name.to_string());
                }
            }
        }
    }
    names.sort();
    names
}

/// Read the hardware MAC address of an interface from sysfs.
pub fn detect_mac(iface: &str) -> Option<[u8; 6]> {
    let text = std::fs::read_to_string(format!("/sys/class/net/{}/address", iface)).ok()?;
    crate::engine::protocol::parse_mac(text.trim())
}

// ============================================================================
// PACKET LINK
// ============================================================================

pub struct PacketLink {
    fd: RawFd,
    ifindex: i32,
    iface: String,
    mac: [u8; 6],
    stop: Arc<AtomicBool>,
    rx: Option<std::thread::JoinHandle<()>>,
}

impl PacketLink {
    /// Open the link on the pinned slot, or auto-scan the interface list.
    pub fn open(slot: Option<u8>, inbox: Arc<Inbox>, quiet: bool) -> Option<PacketLink> {
        let candidates = list_interfaces();
        let picks: Vec<&String> = match slot {
            Some(s) => {
                if !(SLOT_BASE..=SLOT_MAX).contains(&s) {
                    return None;
                }
                let idx = (s - SLOT_BASE) as usize;
                candidates.get(idx).into_iter().collect()
            }
            None => candidates.iter().collect(),
        };
        for iface in picks {
            if let Some(link) = Self::try_open(iface, inbox.clone(), quiet) {
                return Some(link);
            }
        }
        None
    }

    fn try_open(iface: &str, inbox: Arc<Inbox>, quiet: bool) -> Option<PacketLink> {
        let mac = detect_mac(iface)?;
        // SAFETY: plain socket(2) call; the fd is checked before use.
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, ETH_P_EDFS.to_be() as i32) };
        if fd < 0 {
            if !quiet {
                eprintln!("[ETHDFS-PKT] {}: raw socket refused (need CAP_NET_RAW?)", iface);
            }
            return None;
        }
        let c_name = std::ffi::CString::new(iface).ok()?;
        // SAFETY: c_name is a valid NUL-terminated string.
        let ifindex = unsafe { libc::if_nametoindex(c_name.as_ptr()) } as i32;
        if ifindex == 0 {
            // SAFETY: fd came from socket() above.
            unsafe { libc::close(fd) };
            return None;
        }
        // SAFETY: Type is repr(C) and all-zeroes is a valid bit pattern.
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = ETH_P_EDFS.to_be();
        addr.sll_ifindex = ifindex;
        // SAFETY: addr is a fully initialized sockaddr_ll for this fd's family.
        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            // SAFETY: fd came from socket() above.
            unsafe { libc::close(fd) };
            return None;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let rx = spawn_receiver(fd, inbox, stop.clone());
        if !quiet {
            eprintln!("[ETHDFS-PKT] bound to {} ({})", iface, crate::engine::protocol::fmt_mac(&mac));
        }
        Some(PacketLink { fd, ifindex, iface: iface.to_string(), mac, stop, rx: Some(rx) })
    }

    pub fn local_mac(&self) -> [u8; 6] {
        self.mac
    }

    pub fn iface(&self) -> &str {
        &self.iface
    }
}

impl Link for PacketLink {
    fn send(&mut self, frame: &[u8]) {
        // SAFETY: Type is repr(C) and all-zeroes is a valid bit pattern.
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = ETH_P_EDFS.to_be();
        addr.sll_ifindex = self.ifindex;
        addr.sll_halen = 6;
        addr.sll_addr[..6].copy_from_slice(&frame[..6]);
        // SAFETY: frame points to valid bytes; addr is initialized. Emit is
        // best-effort, the transport's retry loop covers losses.
        unsafe {
            libc::sendto(
                self.fd,
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            );
        }
    }
}

impl Drop for PacketLink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(rx) = self.rx.take() {
            let _ = rx.join();
        }
        // SAFETY: fd is owned by this struct and closed exactly once.
        unsafe { libc::close(self.fd) };
    }
}

/// Receive loop. Mirrors the packet-driver contract: learn the frame's size
/// first, claim the inbox for exactly that size, then fill and publish.
/// Frames the inbox refuses (busy, oversized) are drained and dropped.
fn spawn_receiver(fd: RawFd, inbox: Arc<Inbox>, stop: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut scratch = [0u8; 2048];
        while !stop.load(Ordering::Relaxed) {
            let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
            // SAFETY: pfd references a live fd; 50 ms timeout bounds the wait.
            let ready = unsafe { libc::poll(&mut pfd, 1, 50) };
            if ready <= 0 {
                continue;
            }
            // phase 1: how large is the pending frame?
            // SAFETY: scratch is a valid buffer; PEEK|TRUNC returns the real size.
            let peeked = unsafe {
                libc::recv(
                    fd,
                    scratch.as_mut_ptr() as *mut libc::c_void,
                    1,
                    libc::MSG_PEEK | libc::MSG_TRUNC,
                )
            };
            if peeked <= 0 {
                continue;
            }
            match inbox.begin_fill(peeked as usize) {
                Some(ptr) => {
                    // SAFETY: begin_fill granted `peeked` bytes of the slot;
                    // recv writes at most FRAME_SIZE (it refused larger).
                    let got = unsafe {
                        libc::recv(fd, ptr as *mut libc::c_void, FRAME_SIZE, 0)
                    };
                    if got == peeked {
                        inbox.commit_fill();
                    } else {
                        inbox.clear(); // size changed under us; drop it
                    }
                }
                None => {
                    // phase 1 refused: consume and drop the frame
                    // SAFETY: scratch bounds the read; TRUNC discards the rest.
                    unsafe {
                        libc::recv(
                            fd,
                            scratch.as_mut_ptr() as *mut libc::c_void,
                            scratch.len(),
                            libc::MSG_TRUNC,
                        )
                    };
                }
            }
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_scan_excludes_loopback() {
        assert!(!list_interfaces().iter().any(|n| n == "lo"));
    }

    #[test]
    fn detect_mac_unknown_interface() {
        assert!(detect_mac("no-such-if0").is_none());
    }

    #[test]
    fn slot_range_is_the_historic_vector_window() {
        assert_eq!(SLOT_BASE, 0x60);
        assert_eq!(SLOT_MAX, 0x80);
    }
}
