//! Per-connection request handling.
//!
//! Each accepted socket gets one `HttpConnection`, which feeds the
//! incremental parser from small reads, routes complete requests, and
//! drains responses under writable interest. A `GET /next_params` parks
//! the connection in the waiters set until a settings change (or the
//! periodic sweep) wakes it with a fresh snapshot.

use std::fs::{self, File};
use std::io::{self, Read, Write};

use anyhow::Result;
use mio::net::TcpStream;
use mio::{Interest, Token};
use tracing::debug;

use crate::app::{AppContext, notify_waiters};
use crate::http::parser::{Method, ParseOutcome, Request, RequestParser};
use crate::http::response::{Response, ResponseWriter, StatusCode};
use crate::reactor::{EventHandler, Flow, Reactor};
use crate::settings::ParamUpdate;

/// Bytes pulled from the socket per read.
const RECV_CHUNK: usize = 64;
/// Bytes pulled from a streamed body source as the buffer drains.
const FILE_CHUNK: usize = 512;

enum RouteAction {
    Respond(Response),
    /// Long-poll: leave the reactor and join the waiters set.
    Park,
}

enum Pump {
    Progress,
    Blocked,
    Idle,
    Finished,
    PeerLost,
}

pub struct HttpConnection {
    stream: TcpStream,
    token: Token,
    parser: RequestParser,
    writer: Option<ResponseWriter>,
    body_source: Option<File>,
    keep_alive: bool,
}

impl HttpConnection {
    /// Construct a connection for an accepted socket and register it
    /// with the reactor under read interest.
    pub fn spawn(stream: TcpStream, reactor: &mut Reactor) -> io::Result<()> {
        let mut conn = Box::new(Self {
            stream,
            token: Token(usize::MAX),
            parser: RequestParser::new(),
            writer: None,
            body_source: None,
            keep_alive: true,
        });
        let token = reactor.register(&mut conn.stream, Interest::READABLE)?;
        conn.token = token;
        reactor.attach(token, conn);
        Ok(())
    }

    /// Queue a response without touching the registration; used when the
    /// connection is not currently registered (waking from a park).
    fn queue_response(&mut self, mut response: Response) {
        if !response.keeps_alive() {
            self.keep_alive = false;
        }
        self.writer = Some(ResponseWriter::new(&response));
        self.body_source = response.take_stream();
    }

    fn start_response(&mut self, response: Response, reactor: &mut Reactor) -> io::Result<()> {
        self.queue_response(response);
        reactor.reregister(&mut self.stream, self.token, Interest::WRITABLE)
    }

    /// Feed bytes through the parser; returns a flow decision once a
    /// request was routed or the input was rejected.
    fn consume(
        &mut self,
        chunk: &[u8],
        app: &mut AppContext,
        reactor: &mut Reactor,
    ) -> Result<Option<Flow>> {
        match self.parser.feed(chunk) {
            None => Ok(None),
            Some(ParseOutcome::Reject(status)) => {
                // Malformed input still gets a response before the close.
                match self.start_response(Response::status(status), reactor) {
                    Ok(()) => Ok(Some(Flow::Continue)),
                    Err(_) => Ok(Some(Flow::Close)),
                }
            }
            Some(ParseOutcome::Request(request)) => match self.route(request, app, reactor)? {
                RouteAction::Respond(response) => match self.start_response(response, reactor) {
                    Ok(()) => Ok(Some(Flow::Continue)),
                    Err(_) => Ok(Some(Flow::Close)),
                },
                RouteAction::Park => {
                    reactor.unregister(&mut self.stream, self.token)?;
                    Ok(Some(Flow::Park))
                }
            },
        }
    }

    fn route(
        &mut self,
        request: Request,
        app: &mut AppContext,
        reactor: &mut Reactor,
    ) -> Result<RouteAction> {
        app.stats.http_reqs += 1;
        match (request.uri.as_slice(), request.method) {
            (b"/params", Method::Put) => self.set_params(&request.body, app, reactor),
            (b"/params", Method::Get) => Ok(RouteAction::Respond(params_response(app)?)),
            (b"/next_params", Method::Get) => Ok(RouteAction::Park),
            (b"/err.log", Method::Get) => Ok(RouteAction::Respond(take_err_log(app))),
            (b"/debug", Method::Get) => Ok(RouteAction::Respond(Response::ok(
                serde_json::to_vec(&app.stats)?,
            ))),
            (_, Method::Get) => Ok(RouteAction::Respond(serve_static(app))),
            _ => Ok(RouteAction::Respond(Response::status(
                StatusCode::MethodNotAllowed,
            ))),
        }
    }

    fn set_params(
        &mut self,
        body: &[u8],
        app: &mut AppContext,
        reactor: &mut Reactor,
    ) -> Result<RouteAction> {
        let update = match ParamUpdate::from_json(body) {
            Ok(update) => update,
            Err(err) => {
                debug!(?err, "rejecting params update");
                return Ok(RouteAction::Respond(Response::status(
                    StatusCode::BadRequest,
                )));
            }
        };
        {
            let AppContext {
                settings, serial, ..
            } = app;
            settings.apply(&update, serial);
        }
        notify_waiters(app, reactor);
        Ok(RouteAction::Respond(params_response(app)?))
    }

    /// Move one step of the response out the socket.
    fn pump(&mut self) -> io::Result<Pump> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(Pump::Idle);
        };
        if writer.is_empty() {
            match self.body_source.as_mut() {
                None => return Ok(Pump::Finished),
                Some(file) => {
                    let mut chunk = [0u8; FILE_CHUNK];
                    let n = file.read(&mut chunk)?;
                    if n == 0 {
                        self.body_source = None;
                        return Ok(Pump::Finished);
                    }
                    writer.extend(&chunk[..n]);
                    return Ok(Pump::Progress);
                }
            }
        }
        match self.stream.write(writer.chunk()) {
            Ok(0) => Ok(Pump::PeerLost),
            Ok(n) => {
                writer.advance(n);
                Ok(Pump::Progress)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Pump::Blocked),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Pump::Progress),
            Err(_) => Ok(Pump::PeerLost),
        }
    }

    fn finish_response(&mut self, app: &mut AppContext, reactor: &mut Reactor) -> Result<Flow> {
        self.writer = None;
        if !self.keep_alive {
            return Ok(Flow::Close);
        }
        if self.start_reading(reactor).is_err() {
            return Ok(Flow::Close);
        }
        // Pipelined bytes may already hold the next request.
        match self.consume(&[], app, reactor)? {
            Some(flow) => Ok(flow),
            None => Ok(Flow::Continue),
        }
    }

    fn start_reading(&mut self, reactor: &mut Reactor) -> io::Result<()> {
        reactor.reregister(&mut self.stream, self.token, Interest::READABLE)
    }
}

impl EventHandler for HttpConnection {
    fn on_readable(&mut self, app: &mut AppContext, reactor: &mut Reactor) -> Result<Flow> {
        if self.writer.is_some() {
            // A response is in flight; new bytes wait in the kernel.
            return Ok(Flow::Continue);
        }
        let mut chunk = [0u8; RECV_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    if self.parser.mid_request() {
                        // More bytes were required, but never came.
                        return match self
                            .start_response(Response::status(StatusCode::BadRequest), reactor)
                        {
                            Ok(()) => Ok(Flow::Continue),
                            Err(_) => Ok(Flow::Close),
                        };
                    }
                    return Ok(Flow::Close);
                }
                Ok(n) => {
                    if let Some(flow) = self.consume(&chunk[..n], app, reactor)? {
                        return Ok(flow);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Continue),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Ok(Flow::Close),
            }
        }
    }

    fn on_writable(&mut self, app: &mut AppContext, reactor: &mut Reactor) -> Result<Flow> {
        loop {
            match self.pump() {
                Ok(Pump::Progress) => continue,
                Ok(Pump::Blocked) | Ok(Pump::Idle) => return Ok(Flow::Continue),
                Ok(Pump::Finished) => return self.finish_response(app, reactor),
                // Transport fault: tear down without attempting a
                // response.
                Ok(Pump::PeerLost) | Err(_) => return Ok(Flow::Close),
            }
        }
    }

    fn wake(mut self: Box<Self>, app: &mut AppContext, reactor: &mut Reactor) {
        let body = match serde_json::to_vec(&app.settings.snapshot()) {
            Ok(body) => body,
            Err(_) => return,
        };
        self.queue_response(Response::ok(body));
        match reactor.register(&mut self.stream, Interest::WRITABLE) {
            Ok(token) => {
                self.token = token;
                reactor.attach(token, self);
            }
            Err(err) => {
                // The peer is gone; the connection drops here and never
                // rejoins the waiters.
                debug!(%err, "dropping dead long-poll connection");
            }
        }
    }
}

fn params_response(app: &AppContext) -> Result<Response> {
    Ok(Response::ok(serde_json::to_vec(&app.settings.snapshot())?))
}

fn take_err_log(app: &AppContext) -> Response {
    match fs::read(&app.config.err_log_path) {
        Ok(body) => {
            let _ = fs::remove_file(&app.config.err_log_path);
            Response::ok(body)
        }
        Err(_) => Response::ok(&b"<none>\n"[..]),
    }
}

fn serve_static(app: &AppContext) -> Response {
    match File::open(&app.config.static_path).and_then(Response::stream_file) {
        Ok(response) => response,
        Err(_) => Response::status(StatusCode::NotFound),
    }
}
