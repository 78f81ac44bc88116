//! Captive-portal DNS responder.
//!
//! One UDP socket, stateless across datagrams. Queries for the known
//! connectivity-probe domains get a single A record pointing at the
//! device's own address so client OSes open their sign-in UI; everything
//! else is answered with NOTIMP or "not authoritative, zero answers".

use std::io;
use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use mio::Interest;
use mio::net::UdpSocket;
use tracing::{debug, info};

use crate::app::AppContext;
use crate::reactor::{EventHandler, Flow, Reactor};

/// Length-prefixed encodings of the probe names client OSes query to
/// detect restricted access.
const PROBE_DOMAINS: &[&[u8]] = &[
    b"\x11connectivitycheck\x07gstatic\x03com",
    b"\x11connectivitycheck\x07android\x03com",
    b"\x08clients3\x06google\x03com",
    b"\x08clients1\x06google\x03com",
    b"\x07clients\x01l\x06google\x03com",
    b"\x07captive\x05apple\x03com",
    b"\x04camp",
];

/// Answer record appended for a matched probe: compression pointer to
/// the question name, type A, class IN, TTL 2048, the device address.
/// The address is the fixed AP address regardless of actual binding.
const PROBE_ANSWER: &[u8] = b"\xc0\x0c\x00\x01\x00\x01\x00\x00\x08\x00\x00\x04\xc0\xa8\x04\x01";

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Build the response for one datagram, or `None` when the datagram is
/// too mangled to answer at all.
pub fn build_response(req: &[u8]) -> Option<Vec<u8>> {
    if req.len() <= 16 {
        return None;
    }
    let name_end = req[12..].iter().position(|&b| b == 0)? + 12;
    let question_end = name_end + 5;
    if req.len() < question_end {
        return None;
    }

    let mut resp = req[..question_end].to_vec();
    resp[2] = 0b1000_0001; // response, recursion desired
    resp[3] = 0b1000_0000; // recursion available
    for counter in &mut resp[6..12] {
        *counter = 0; // no answers, nameservers or additionals yet
    }

    let qr = req[2] & 0x80;
    // Odd mask is intentional: opcodes 2 and 8 also pass as standard
    // queries, which is harmless here.
    let opcode = (req[2] >> 3) & 0x15;
    let question_count = u16::from_be_bytes([req[4], req[5]]);
    let qtype = u16::from_be_bytes([req[name_end + 1], req[name_end + 2]]);
    let qclass = u16::from_be_bytes([req[name_end + 3], req[name_end + 4]]);

    if qr != 0 || opcode != 0 || question_count != 1 || qtype != 1 || qclass != 1 {
        resp[3] |= 4; // Not Implemented
        return Some(resp);
    }

    let matched = PROBE_DOMAINS.iter().any(|domain| {
        find_subsequence(req, domain).is_some_and(|at| at + domain.len() == name_end)
    });
    if !matched {
        resp[3] |= 9; // Not Authoritative for zone
        return Some(resp);
    }

    resp[7] = 1; // one answer
    resp.extend_from_slice(PROBE_ANSWER);
    Some(resp)
}

pub struct DnsResponder {
    socket: UdpSocket,
}

impl DnsResponder {
    pub fn spawn(addr: SocketAddr, reactor: &mut Reactor) -> Result<SocketAddr> {
        let socket = UdpSocket::bind(addr).with_context(|| format!("binding DNS on {addr}"))?;
        let local_addr = socket.local_addr()?;
        info!(addr = %local_addr, "dns responder listening");
        let mut responder = Box::new(Self { socket });
        let token = reactor.register(&mut responder.socket, Interest::READABLE)?;
        reactor.attach(token, responder);
        Ok(local_addr)
    }
}

impl EventHandler for DnsResponder {
    fn on_readable(&mut self, _app: &mut AppContext, _reactor: &mut Reactor) -> Result<Flow> {
        let mut buf = [0u8; 512];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    if let Some(resp) = build_response(&buf[..len]) {
                        if let Err(err) = self.socket.send_to(&resp, peer) {
                            // UDP; the prober will retry.
                            debug!(%err, %peer, "dns send failed");
                        }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Continue),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err).context("dns socket read"),
            }
        }
    }

    fn on_error(&mut self, _app: &mut AppContext, _reactor: &mut Reactor) -> Result<Flow> {
        bail!("error condition on DNS socket")
    }

    fn on_hangup(&mut self, _app: &mut AppContext, _reactor: &mut Reactor) -> Result<Flow> {
        bail!("hangup on DNS socket")
    }
}
