use anyhow::Result;
use mio::Interest;
use mio::unix::SourceFd;

use glowd::app::{AppContext, maybe_notify_waiters};
use glowd::config::Config;
use glowd::dns::DnsResponder;
use glowd::reactor::Reactor;
use glowd::serial::{SerialHandler, SerialTransport};
use glowd::server::listener::HttpListener;

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    // Supervisor boundary: expected failures never reach here; anything
    // that does is persisted for `GET /err.log` and the process exits
    // for the outer supervisor to restart.
    if let Err(err) = run() {
        tracing::error!(error = format!("{err:#}"), "fatal fault");
        let path = std::env::var("ERR_LOG").unwrap_or_else(|_| "err.log".to_string());
        let _ = std::fs::write(path, format!("{err:#}\n"));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = Config::load()?;
    let mut reactor = Reactor::new()?;

    let serial = SerialTransport::open(&config.serial_dev, reactor.registry().try_clone()?)?;
    let mut app = AppContext::new(config, serial);

    let fd = app.serial.raw_fd();
    let token = reactor.register(&mut SourceFd(&fd), Interest::READABLE)?;
    app.serial.bind(token);
    reactor.attach(token, Box::new(SerialHandler));

    HttpListener::spawn(app.config.http_listen, &mut reactor)?;
    DnsResponder::spawn(app.config.dns_listen, &mut reactor)?;

    reactor.register_periodic(Box::new(|app, reactor| {
        maybe_notify_waiters(app, reactor);
        Ok(())
    }));

    reactor.run(&mut app)
}
