//! POSIX transport backend: UDP broadcast for discovery, non-blocking TCP
//! for streams.
//!
//! Nothing here runs at interrupt time, so "completions" are synthesized
//! during `poll`: sockets are scanned and progress is reported through the
//! engine's notifier exactly as an interrupt-driven backend would.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use peertalk_core::notify::{Datagram, Notifier, TransportEvent, DATAGRAM_MAX};
use peertalk_core::transport::{ConnId, Tick, Transport, TransportError, BROADCAST_ADDR};

/// Cap on a blocking connect to an unresponsive peer.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

struct Stream {
    sock: TcpStream,
    /// Remainder of the frame queued by `send_stream`, flushed in `poll`.
    pending_out: Vec<u8>,
    /// A queued send exists and `SendComplete` has not been raised yet.
    sending: bool,
}

pub struct PosixTransport {
    discovery_port: u16,
    listen_port: u16,
    started: Instant,
    notifier: Option<Notifier>,
    udp: Option<UdpSocket>,
    listener: Option<TcpListener>,
    streams: HashMap<ConnId, Stream>,
    next_conn: u32,
}

impl PosixTransport {
    pub fn new(discovery_port: u16, listen_port: u16) -> Self {
        PosixTransport {
            discovery_port,
            listen_port,
            started: Instant::now(),
            notifier: None,
            udp: None,
            listener: None,
            streams: HashMap::new(),
            next_conn: 1,
        }
    }

    fn notify(&self, event: TransportEvent) {
        if let Some(n) = &self.notifier {
            n.push(event);
        }
    }

    fn alloc_conn(&mut self) -> ConnId {
        let id = ConnId(self.next_conn);
        self.next_conn = self.next_conn.wrapping_add(1).max(1);
        id
    }

    fn register(&mut self, sock: TcpStream) -> Result<ConnId, TransportError> {
        sock.set_nonblocking(true)?;
        sock.set_nodelay(true)?;
        let conn = self.alloc_conn();
        self.streams.insert(
            conn,
            Stream {
                sock,
                pending_out: Vec::new(),
                sending: false,
            },
        );
        Ok(conn)
    }

    fn pump_udp(&mut self) {
        let Some(udp) = &self.udp else { return };
        let mut buf = [0u8; DATAGRAM_MAX];
        loop {
            match udp.recv_from(&mut buf) {
                Ok((n, SocketAddr::V4(from))) => {
                    let addr = u32::from(*from.ip());
                    self.notify(TransportEvent::Datagram(Datagram::new(
                        addr,
                        from.port(),
                        &buf[..n],
                    )));
                }
                Ok((_, SocketAddr::V6(_))) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "discovery socket read failed");
                    break;
                }
            }
        }
    }

    fn pump_accept(&mut self) {
        loop {
            let accepted = match &self.listener {
                Some(l) => l.accept(),
                None => return,
            };
            match accepted {
                Ok((sock, SocketAddr::V4(from))) => {
                    let addr = u32::from(*from.ip());
                    let port = from.port();
                    match self.register(sock) {
                        Ok(conn) => {
                            debug!(%conn, %from, "accepted stream");
                            self.notify(TransportEvent::Accepted { conn, addr, port });
                        }
                        Err(e) => warn!(error = %e, "accepted stream setup failed"),
                    }
                }
                Ok((_, SocketAddr::V6(from))) => {
                    debug!(%from, "dropping non-IPv4 connection");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn pump_streams(&mut self) {
        let mut raised = Vec::new();
        for (&conn, stream) in &mut self.streams {
            // Flush any partially written frame.
            if stream.sending {
                while !stream.pending_out.is_empty() {
                    match stream.sock.write(&stream.pending_out) {
                        Ok(0) => break,
                        Ok(n) => {
                            stream.pending_out.drain(..n);
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                        Err(e) => {
                            debug!(%conn, error = %e, "stream write failed");
                            raised.push(TransportEvent::Error { conn });
                            stream.pending_out.clear();
                            break;
                        }
                    }
                }
                if stream.sending && stream.pending_out.is_empty() {
                    stream.sending = false;
                    raised.push(TransportEvent::SendComplete { conn });
                }
            }

            // Readability and remote close.
            let mut probe = [0u8; 1];
            match stream.sock.peek(&mut probe) {
                Ok(0) => raised.push(TransportEvent::Closed { conn }),
                Ok(_) => raised.push(TransportEvent::Readable { conn }),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    debug!(%conn, error = %e, "stream failed");
                    raised.push(TransportEvent::Error { conn });
                }
            }
        }
        for event in raised {
            self.notify(event);
        }
    }
}

impl Transport for PosixTransport {
    fn init(&mut self, notifier: Notifier) -> Result<(), TransportError> {
        let udp = UdpSocket::bind(("0.0.0.0", self.discovery_port))
            .map_err(|e| TransportError::Init(format!("discovery bind: {e}")))?;
        udp.set_broadcast(true)
            .map_err(|e| TransportError::Init(format!("broadcast flag: {e}")))?;
        udp.set_nonblocking(true)
            .map_err(|e| TransportError::Init(format!("nonblocking udp: {e}")))?;

        let listener = TcpListener::bind(("0.0.0.0", self.listen_port))
            .map_err(|e| TransportError::Init(format!("listen bind: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| TransportError::Init(format!("nonblocking listener: {e}")))?;

        self.udp = Some(udp);
        self.listener = Some(listener);
        self.notifier = Some(notifier);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.streams.clear();
        self.listener = None;
        self.udp = None;
        self.notifier = None;
    }

    fn poll(&mut self) {
        self.pump_udp();
        self.pump_accept();
        self.pump_streams();
    }

    fn get_ticks(&self) -> Tick {
        self.started.elapsed().as_millis() as Tick
    }

    fn send_udp(&mut self, addr: u32, port: u16, data: &[u8]) -> Result<(), TransportError> {
        let udp = self
            .udp
            .as_ref()
            .ok_or_else(|| TransportError::Send("transport not initialized".into()))?;
        let ip = if addr == BROADCAST_ADDR {
            Ipv4Addr::BROADCAST
        } else {
            Ipv4Addr::from(addr)
        };
        udp.send_to(data, SocketAddrV4::new(ip, port))?;
        Ok(())
    }

    fn open(&mut self, addr: u32, port: u16) -> Result<ConnId, TransportError> {
        let target = SocketAddrV4::new(Ipv4Addr::from(addr), port);
        // Connect completes (or fails) synchronously, bounded by
        // OPEN_TIMEOUT; the Opened flag is still delivered through the
        // ring so the engine sees the same sequence as on an
        // asynchronous backend.
        let sock = TcpStream::connect_timeout(&SocketAddr::V4(target), OPEN_TIMEOUT)?;
        let conn = self.register(sock)?;
        debug!(%conn, %target, "opened stream");
        self.notify(TransportEvent::Opened { conn });
        Ok(conn)
    }

    fn close(&mut self, conn: ConnId) {
        let Some(mut stream) = self.streams.remove(&conn) else {
            return;
        };
        // Push out whatever is still queued, typically an orderly
        // goodbye frame, before the socket drops.
        while !stream.pending_out.is_empty() {
            match stream.sock.write(&stream.pending_out) {
                Ok(0) => break,
                Ok(n) => {
                    stream.pending_out.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    fn send_stream(&mut self, conn: ConnId, data: &[u8]) -> Result<(), TransportError> {
        let stream = self
            .streams
            .get_mut(&conn)
            .ok_or(TransportError::UnknownConn(conn))?;
        stream.pending_out.extend_from_slice(data);
        stream.sending = true;
        Ok(())
    }

    fn recv_stream(&mut self, conn: ConnId, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self
            .streams
            .get_mut(&conn)
            .ok_or(TransportError::UnknownConn(conn))?;
        match stream.sock.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
