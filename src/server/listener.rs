use std::io;
use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use mio::Interest;
use mio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::app::AppContext;
use crate::http::connection::HttpConnection;
use crate::reactor::{EventHandler, Flow, Reactor};

/// Accepts browser connections and hands each one to an
/// [`HttpConnection`]. A fault on the listening socket itself is
/// escalated, not recovered.
pub struct HttpListener {
    listener: TcpListener,
}

impl HttpListener {
    pub fn spawn(addr: SocketAddr, reactor: &mut Reactor) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).with_context(|| format!("binding HTTP on {addr}"))?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "http listening");
        let mut handler = Box::new(Self { listener });
        let token = reactor.register(&mut handler.listener, Interest::READABLE)?;
        reactor.attach(token, handler);
        Ok(local_addr)
    }
}

impl EventHandler for HttpListener {
    fn on_readable(&mut self, app: &mut AppContext, reactor: &mut Reactor) -> Result<Flow> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    app.stats.http_conns += 1;
                    debug!(%peer, "accepted connection");
                    if let Err(err) = HttpConnection::spawn(stream, reactor) {
                        warn!(%err, %peer, "failed to register connection");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Continue),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err).context("accepting connection"),
            }
        }
    }

    fn on_error(&mut self, _app: &mut AppContext, _reactor: &mut Reactor) -> Result<Flow> {
        bail!("error condition on HTTP listening socket")
    }

    fn on_hangup(&mut self, _app: &mut AppContext, _reactor: &mut Reactor) -> Result<Flow> {
        bail!("hangup on HTTP listening socket")
    }
}
