//! Transport-level serial tests against a loopback FIFO: the transport
//! opens it read-write, so bytes it transmits come back on its own read
//! side, and a second handle can feed or observe the line.

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use glowd::serial::{CommandGroup, CommandSink, FRAME_MAX, SerialTransport};

fn fifo_path(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("glowd-fifo-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(cpath.as_ptr(), 0o600) }, 0);
    path
}

fn transport(tag: &str) -> (SerialTransport, PathBuf, mio::Poll) {
    let poll = mio::Poll::new().unwrap();
    let path = fifo_path(tag);
    let port = SerialTransport::open(&path, poll.registry().try_clone().unwrap()).unwrap();
    (port, path, poll)
}

fn open_peer(path: &Path) -> File {
    File::options()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .unwrap()
}

fn drain(peer: &mut File) -> Vec<u8> {
    let mut chunk = [0u8; 64];
    let mut out = Vec::new();
    loop {
        match peer.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(err) => panic!("peer read failed: {err}"),
        }
    }
    out
}

#[test]
fn test_newer_unsent_command_supersedes_same_group() {
    let (mut port, path, _poll) = transport("supersede");
    // First command commits to the wire; the next two share a group, so
    // only the newer of them may ever be transmitted.
    port.send_command(CommandGroup::Video, b"V00000000\n".to_vec());
    port.send_command(CommandGroup::Speed, b"S0101\n".to_vec());
    port.send_command(CommandGroup::Speed, b"S0202\n".to_vec());

    for _ in 0..40 {
        sleep(Duration::from_millis(12));
        port.write_tick();
    }

    let mut frames = Vec::new();
    for _ in 0..64 {
        if let Some(frame) = port.read_byte() {
            frames.push(frame);
        }
    }
    assert_eq!(frames, vec![b"V00000000\n".to_vec(), b"S0202\n".to_vec()]);
    assert!(port.read_byte().is_none(), "nothing further on the line");
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_oversized_partial_frame_is_discarded() {
    let (mut port, path, _poll) = transport("overflow");
    let mut feeder = open_peer(&path);
    // Terminator arrives only after the accumulator limit was blown.
    let mut noise = vec![b'a'; FRAME_MAX + 4];
    noise.push(b'\n');
    feeder.write_all(&noise).unwrap();

    let mut frame = None;
    for _ in 0..64 {
        if let Some(done) = port.read_byte() {
            frame = Some(done);
            break;
        }
    }
    // Only the bytes after the discard survive into the frame.
    assert_eq!(frame.unwrap(), b"aaa\n");
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_one_byte_per_wake_with_pacing() {
    let (mut port, path, _poll) = transport("pacing");
    let mut peer = open_peer(&path);
    port.send_command(CommandGroup::Speed, b"S0102\n".to_vec());

    sleep(Duration::from_millis(15));
    port.write_tick();
    assert_eq!(drain(&mut peer).len(), 1, "exactly one byte per wake");

    // Immediately again: still inside the inter-byte gap.
    port.write_tick();
    assert_eq!(drain(&mut peer).len(), 0, "gap not yet elapsed");

    sleep(Duration::from_millis(15));
    port.write_tick();
    assert_eq!(drain(&mut peer).len(), 1);
    std::fs::remove_file(&path).ok();
}
