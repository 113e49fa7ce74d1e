// ETHDFS — CLI / LIFECYCLE
// Usage: ethdfs SRVMAC rdrv-ldrv [rdrv2-ldrv2 ...] [/p=HH] [/n] [/q] [/u]
//
// Installs the redirector engine as a resident service: claims the
// single-instance lock, opens the packet link, resolves the server (fixed
// MAC or broadcast discovery), then parks until unloaded. `/u` asks a
// resident instance to shut down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ethdfs::engine::protocol::{drive_to_num, fmt_mac, parse_mac};
use ethdfs::engine::redirector::{DriveMap, Redirector};
use ethdfs::engine::runtime::{
    fatal, InstanceLock, E_ALREADY_LOADED, E_LOCK_FAIL, E_NOT_LOADED, E_NO_MAC, E_NO_PKTDRV,
    E_NO_SERVER, E_UNLOAD_FAIL,
};
use ethdfs::engine::transport::{Inbox, Transport};
use ethdfs::network::datapath::PacketLink;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: i32) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

// ============================================================================
// ARGUMENTS
// ============================================================================

#[derive(Default)]
struct Args {
    peer_mac: Option<[u8; 6]>,
    /// `::` on the command line: find the server by broadcast.
    auto: bool,
    /// (local, remote) ordinal pairs, local letters unique.
    mappings: Vec<(u8, u8)>,
    pktslot: Option<u8>,
    quiet: bool,
    nocksum: bool,
    unload: bool,
}

fn parse_args(argv: &[String]) -> Result<Args, &'static str> {
    let mut args = Args::default();
    let mut taken = [false; 26];
    for arg in &argv[1..] {
        let b = arg.as_bytes();
        // a drive mapping, like "C-F"? (remote letter first)
        if b.len() == 3 && b[1] == b'-' && b[0].is_ascii_alphabetic() && b[2].is_ascii_alphabetic()
        {
            let remote = drive_to_num(b[0]);
            let local = drive_to_num(b[2]);
            if local > 25 || remote > 25 || taken[local as usize] {
                return Err("bad drive mapping");
            }
            taken[local as usize] = true;
            args.mappings.push((local, remote));
            continue;
        }
        // an option?
        if let Some(opt) = arg.strip_prefix('/') {
            let (letter, value) = match opt.split_once('=') {
                Some((l, v)) => (l, Some(v)),
                None => (opt, None),
            };
            match (letter.to_ascii_lowercase().as_str(), value) {
                ("q", None) => args.quiet = true,
                ("n", None) => args.nocksum = true,
                ("u", None) => args.unload = true,
                ("p", Some(v)) => {
                    if v.len() != 2 {
                        return Err("/p wants exactly two hex digits");
                    }
                    let slot = u8::from_str_radix(v, 16).map_err(|_| "bad /p value")?;
                    if slot == 0 {
                        return Err("bad /p value");
                    }
                    args.pktslot = Some(slot);
                }
                _ => return Err("unknown option"),
            }
            continue;
        }
        // otherwise it must be the server MAC (or "::" for discovery)
        if args.peer_mac.is_some() || args.auto {
            return Err("more than one server address");
        }
        if arg == "::" {
            args.auto = true;
        } else {
            args.peer_mac = Some(parse_mac(arg).ok_or("bad server MAC")?);
        }
    }

    if args.unload {
        // unload goes alone
        if args.peer_mac.is_some() || args.auto || !args.mappings.is_empty() {
            return Err("/u cannot be combined with a MAC or mappings");
        }
        return Ok(args);
    }
    if args.mappings.is_empty() || (args.peer_mac.is_none() && !args.auto) {
        return Err("need a server MAC and at least one drive mapping");
    }
    Ok(args)
}

fn print_help() {
    eprintln!("EtherDFS client v{} - network drives over raw Ethernet", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("usage: ethdfs SRVMAC rdrv-ldrv [rdrv2-ldrv2 ...] [options]");
    eprintln!("       ethdfs /u [/q]");
    eprintln!();
    eprintln!("  SRVMAC      server MAC (xx:xx:xx:xx:xx:xx), or :: to discover it");
    eprintln!("  rdrv-ldrv   map remote drive to local letter, e.g. C-F");
    eprintln!("  /p=HH       pin the packet-driver slot (hex, else auto-scan 60..80)");
    eprintln!("  /n          disable the frame checksum");
    eprintln!("  /q          quiet: suppress non-error output");
    eprintln!("  /u          unload the resident instance");
}

// ============================================================================
// LIFECYCLE
// ============================================================================

fn unload(quiet: bool) -> ! {
    let path = InstanceLock::default_path();
    let Some(pid) = InstanceLock::owner(&path) else {
        fatal(E_NOT_LOADED, "no resident instance found");
    };
    // SAFETY: probe + terminate of a pid we read from our own lock file.
    unsafe {
        if libc::kill(pid, 0) != 0 {
            let _ = std::fs::remove_file(&path);
            fatal(E_NOT_LOADED, "stale instance lock removed; nothing resident");
        }
        libc::kill(pid, libc::SIGTERM);
    }
    // give the resident instance a moment to tear down and drop the lock
    for _ in 0..40 {
        if InstanceLock::owner(&path).is_none() {
            if !quiet {
                eprintln!("[ETHDFS] unloaded");
            }
            std::process::exit(0);
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    fatal(E_UNLOAD_FAIL, "resident instance did not shut down");
}

fn main() {
    let argv: Vec<String> = std::env::args().collect();
    let args = match parse_args(&argv) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("[ETHDFS] {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if args.unload {
        unload(args.quiet);
    }

    // one resident engine per machine
    if InstanceLock::owner(&InstanceLock::default_path())
        .map(|pid| unsafe { libc::kill(pid, 0) } == 0) // SAFETY: existence probe only
        .unwrap_or(false)
    {
        fatal(E_ALREADY_LOADED, "an instance is already resident (use /u first)");
    }
    let Some(lock) = InstanceLock::acquire(&InstanceLock::default_path()) else {
        fatal(E_LOCK_FAIL, "cannot claim the instance lock");
    };

    // bring up the packet link and the engine
    let inbox = Arc::new(Inbox::new());
    let Some(link) = PacketLink::open(args.pktslot, inbox.clone(), args.quiet) else {
        fatal(E_NO_PKTDRV, "no usable packet interface found");
    };
    let local_mac = link.local_mac();
    if local_mac == [0u8; 6] {
        fatal(E_NO_MAC, "interface reports a null MAC");
    }
    let iface = link.iface().to_string();
    let mut transport = Transport::new(link, inbox, local_mac, !args.nocksum);
    if let Some(mac) = args.peer_mac {
        transport.set_peer_mac(mac);
    }
    let mut drives = DriveMap::new();
    for &(local, remote) in &args.mappings {
        // parse_args already rejected duplicates
        drives.map(local, remote);
    }
    let mut engine = Redirector::new(drives, transport);

    if args.auto {
        match engine.discover() {
            Some(mac) => {
                if !args.quiet {
                    eprintln!("[ETHDFS-NET] discovered server at {}", fmt_mac(&mac));
                }
            }
            None => fatal(E_NO_SERVER, "no server answered the discovery broadcast"),
        }
    }

    if !args.quiet {
        eprintln!("[ETHDFS] installed, local MAC {} (link {})", fmt_mac(&local_mac), iface);
        let peer = engine.transport.peer_mac();
        for (local, remote) in engine.drives.iter_mapped() {
            eprintln!(
                " {}: -> [{}:] on {}",
                (b'A' + local) as char,
                (b'A' + remote) as char,
                fmt_mac(&peer)
            );
        }
    }

    // SAFETY: installing simple flag-setting handlers for INT/TERM.
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as *const () as libc::sighandler_t);
    }

    // resident until unloaded
    while !SHUTDOWN.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    engine.drives.clear();
    drop(engine); // closes the packet link and joins the receive thread
    lock.release();
    if !args.quiet {
        eprintln!("[ETHDFS] shut down");
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        std::iter::once("ethdfs")
            .chain(parts.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn full_command_line() {
        let a = parse_args(&argv(&["AA:BB:CC:DD:EE:01", "C-F", "D-G", "/p=65", "/n", "/q"]))
            .unwrap();
        assert_eq!(a.peer_mac, Some([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]));
        assert_eq!(a.mappings, vec![(5, 2), (6, 3)]);
        assert_eq!(a.pktslot, Some(0x65));
        assert!(a.nocksum && a.quiet && !a.auto && !a.unload);
    }

    #[test]
    fn discovery_address() {
        let a = parse_args(&argv(&["::", "C-F"])).unwrap();
        assert!(a.auto);
        assert!(a.peer_mac.is_none());
    }

    #[test]
    fn lowercase_mapping_letters() {
        let a = parse_args(&argv(&["::", "c-f"])).unwrap();
        assert_eq!(a.mappings, vec![(5, 2)]);
    }

    #[test]
    fn duplicate_local_letter_rejected() {
        assert!(parse_args(&argv(&["::", "C-F", "D-F"])).is_err());
    }

    #[test]
    fn unload_must_stand_alone() {
        assert!(parse_args(&argv(&["/u"])).is_ok());
        assert!(parse_args(&argv(&["/u", "/q"])).is_ok());
        assert!(parse_args(&argv(&["/u", "C-F"])).is_err());
        assert!(parse_args(&argv(&["/u", "AA:BB:CC:DD:EE:01"])).is_err());
    }

    #[test]
    fn missing_pieces_rejected() {
        assert!(parse_args(&argv(&[])).is_err());
        assert!(parse_args(&argv(&["AA:BB:CC:DD:EE:01"])).is_err());
        assert!(parse_args(&argv(&["C-F"])).is_err());
    }

    #[test]
    fn bad_tokens_rejected() {
        assert!(parse_args(&argv(&["AA:BB:CC:DD:EE", "C-F"])).is_err());
        assert!(parse_args(&argv(&["::", "C-F", "/x"])).is_err());
        assert!(parse_args(&argv(&["::", "C-F", "/p=XY"])).is_err());
        assert!(parse_args(&argv(&["::", "C-F", "/p=123"])).is_err());
        assert!(parse_args(&argv(&["::", "::", "C-F"])).is_err());
    }
}
