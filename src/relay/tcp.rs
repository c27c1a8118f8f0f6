//! The relay over plain TCP, one connection per mirror.
//!
//! The host side accepts connections, checks the [Frame::Join] against its own
//! code and the identities already connected, and hands accepted peers to the
//! session as [Event::PeerJoined]. The mirror side joins a host and turns
//! every [Frame::Update] it receives into [Event::MirrorData].

use super::{
    canonical_code, generate_code, with_identity_fallback, Frame, IdentityRegistry, LocalRegistry,
    PeerLink, Refusal, RelayError, RelayPeer,
};
use crate::session::Event;
use log::{debug, info, warn};
use rand::thread_rng;
use std::{
    io::{self, BufRead, BufReader, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_millis(50);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// The sending half of an accepted mirror connection.
#[derive(Debug)]
pub struct TcpPeerLink {
    stream: TcpStream,
    open: Arc<AtomicBool>,
}

impl PeerLink for TcpPeerLink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send(&mut self, frame: &Frame) -> Result<(), RelayError> {
        if !self.is_open() {
            return Err(RelayError::Closed);
        }
        let line = frame.encode()?;
        if let Err(e) = self.stream.write_all(line.as_bytes()) {
            // A partial line may be on the wire; hang up so the mirror sees EOF
            self.close();
            return Err(e.into());
        }
        Ok(())
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::Release);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn write_frame(stream: &mut TcpStream, frame: &Frame) -> Result<(), RelayError> {
    stream.write_all(frame.encode()?.as_bytes())?;
    Ok(())
}

fn read_frame(reader: &mut BufReader<TcpStream>) -> Result<Frame, RelayError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(RelayError::Handshake("connection closed".to_owned()));
    }
    Frame::decode(&line)
}

/// A listening relay host. Stops accepting when dropped.
pub struct RelayHost {
    code: String,
    local_addr: SocketAddr,
    registry: LocalRegistry,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RelayHost {
    /// Claims a code in `registry` (retrying once with a fresh one if taken),
    /// binds `addr`, and starts accepting mirrors in the background.
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        registry: LocalRegistry,
        events: Sender<Event>,
    ) -> Result<Self, RelayError> {
        let (code, ()) = with_identity_fallback(
            generate_code(&mut thread_rng()),
            || generate_code(&mut thread_rng()),
            |c| registry.claim(c),
        )?;

        let listener = match TcpListener::bind(addr) {
            Ok(listener) => listener,
            Err(e) => {
                registry.release(&code);
                return Err(e.into());
            }
        };
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("Relay host {} listening on {}", code, local_addr);

        let running = Arc::new(AtomicBool::new(true));
        let th_running = Arc::clone(&running);
        let th_code = code.clone();
        let th_registry = registry.clone();

        let handle = thread::spawn(move || {
            while th_running.load(Ordering::Acquire) {
                match listener.accept() {
                    Ok((stream, peer_addr)) => {
                        debug!("Relay connection from {}", peer_addr);
                        let code = th_code.clone();
                        let registry = th_registry.clone();
                        let events = events.clone();
                        thread::spawn(move || {
                            if let Err(e) = serve_peer(stream, &code, &registry, &events) {
                                warn!("Relay peer {} dropped: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_POLL);
                    }
                    Err(e) => warn!("Relay accept failed: {}", e),
                }
            }
        });

        Ok(Self {
            code,
            local_addr,
            registry,
            running,
            handle: Some(handle),
        })
    }

    /// The code mirrors must quote to join.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.handle.take() {
            let _ = thread.join();
            self.registry.release(&self.code);
        }
    }
}

impl Drop for RelayHost {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handshake with one mirror, then watch its connection until it closes.
fn serve_peer(
    mut stream: TcpStream,
    host_code: &str,
    registry: &LocalRegistry,
    events: &Sender<Event>,
) -> Result<(), RelayError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let from = match read_frame(&mut reader)? {
        Frame::Join { from, to } => {
            if canonical_code(&to) != host_code {
                write_frame(&mut stream, &Frame::Refused(Refusal::UnknownCode))?;
                return Err(RelayError::UnknownCode(to));
            }
            canonical_code(&from)
        }
        other => return Err(RelayError::Handshake(format!("expected Join, got {:?}", other))),
    };

    if let Err(e) = registry.claim(&from) {
        write_frame(&mut stream, &Frame::Refused(Refusal::IdentityTaken))?;
        return Err(e);
    }
    if let Err(e) = write_frame(&mut stream, &Frame::Accepted) {
        registry.release(&from);
        return Err(e);
    }

    stream.set_read_timeout(None)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    let open = Arc::new(AtomicBool::new(true));
    let link = TcpPeerLink {
        stream,
        open: Arc::clone(&open),
    };
    if events
        .send(Event::PeerJoined(RelayPeer::new(from.clone(), Box::new(link))))
        .is_err()
    {
        registry.release(&from);
        return Ok(());
    }

    // Mirrors have nothing to say after joining; we only wait for the close.
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => debug!("Ignoring frame from mirror {}", from),
        }
    }

    open.store(false, Ordering::Release);
    info!("Mirror {} left", from);
    // Queue the close before the code can be reused by a new peer
    let _ = events.send(Event::PeerClosed(from.clone()));
    registry.release(&from);
    Ok(())
}

/// One join attempt under the identity `from`.
fn join_as(
    addrs: &[SocketAddr],
    from: &str,
    host_code: &str,
) -> Result<(TcpStream, BufReader<TcpStream>), RelayError> {
    let mut stream = TcpStream::connect(addrs)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    write_frame(
        &mut stream,
        &Frame::Join {
            from: from.to_owned(),
            to: host_code.to_owned(),
        },
    )?;

    match read_frame(&mut reader)? {
        Frame::Accepted => {
            stream.set_read_timeout(None)?;
            Ok((stream, reader))
        }
        Frame::Refused(Refusal::IdentityTaken) => Err(RelayError::IdentityTaken(from.to_owned())),
        Frame::Refused(Refusal::UnknownCode) => Err(RelayError::UnknownCode(host_code.to_owned())),
        other => Err(RelayError::Handshake(format!("unexpected {:?}", other))),
    }
}

/// Joins the host at `addr` that answers to `host_code`, under a random
/// identity. If that identity is already connected, tries once more with a
/// fresh one. Returns the identity used and the connection.
pub fn join<A: ToSocketAddrs>(
    addr: A,
    host_code: &str,
) -> Result<(String, TcpStream, BufReader<TcpStream>), RelayError> {
    let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
    let host_code = canonical_code(host_code);
    let (code, (stream, reader)) = with_identity_fallback(
        generate_code(&mut thread_rng()),
        || generate_code(&mut thread_rng()),
        |from| join_as(&addrs, from, &host_code),
    )?;
    Ok((code, stream, reader))
}

/// A mirror connection running in the background.
#[derive(Debug, Default)]
pub struct MirrorHandle {
    stream: Arc<Mutex<Option<TcpStream>>>,
    closed: Arc<AtomicBool>,
}

impl MirrorHandle {
    /// Closes the connection; the reader thread then posts
    /// [Event::MirrorClosed]. A join still in progress is abandoned.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut stream) = self.stream.lock() {
            if let Some(s) = stream.take() {
                let _ = s.shutdown(Shutdown::Both);
            }
        }
    }
}

/// Joins a host in the background and relays its updates as events.
/// Posts [Event::MirrorOpened] or [Event::MirrorFailed], then
/// [Event::MirrorData] per update, then [Event::MirrorClosed].
pub fn spawn_mirror(addr: String, host_code: String, events: Sender<Event>) -> MirrorHandle {
    let handle = MirrorHandle::default();
    let th_stream = Arc::clone(&handle.stream);
    let th_closed = Arc::clone(&handle.closed);

    thread::spawn(move || {
        let (code, stream, mut reader) = match join(addr.as_str(), &host_code) {
            Ok(joined) => joined,
            Err(e) => {
                warn!("Could not join {} at {}: {}", host_code, addr, e);
                let _ = events.send(Event::MirrorFailed(e.to_string()));
                return;
            }
        };
        if let Ok(mut slot) = th_stream.lock() {
            // Checked under the lock so a concurrent close either sees the
            // stream or is seen here
            if th_closed.load(Ordering::Acquire) {
                debug!("Mirror closed during join");
                let _ = stream.shutdown(Shutdown::Both);
                let _ = events.send(Event::MirrorClosed);
                return;
            }
            if let Ok(clone) = stream.try_clone() {
                *slot = Some(clone);
            }
        }
        info!("Mirroring {} as {}", host_code, code);
        if events.send(Event::MirrorOpened(code)).is_err() {
            return;
        }

        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => match Frame::decode(&line) {
                    Ok(Frame::Update(msg)) => {
                        if events.send(Event::MirrorData(msg)).is_err() {
                            break;
                        }
                    }
                    Ok(other) => debug!("Ignoring {:?} from host", other),
                    Err(e) => warn!("Undecodable frame from host: {}", e),
                },
                Err(e) => {
                    warn!("Mirror connection failed: {}", e);
                    break;
                }
            }
        }
        let _ = events.send(Event::MirrorClosed);
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{RelayBroadcaster, RelayMessage};
    use std::sync::mpsc::{channel, Receiver};

    const WAIT: Duration = Duration::from_secs(5);

    fn next_event(rx: &Receiver<Event>) -> Event {
        rx.recv_timeout(WAIT).expect("no event within timeout")
    }

    fn start_host() -> (RelayHost, Receiver<Event>) {
        let (tx, rx) = channel();
        let host = RelayHost::bind("127.0.0.1:0", LocalRegistry::new(), tx).unwrap();
        (host, rx)
    }

    #[test]
    fn joined_mirror_receives_broadcasts() {
        let (host, rx) = start_host();

        let (code, stream, mut reader) = join(host.local_addr(), host.code()).unwrap();
        let peer = match next_event(&rx) {
            Event::PeerJoined(peer) => peer,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(peer.code(), code);

        let mut broadcaster = RelayBroadcaster::new();
        broadcaster.add(peer);
        let msg = RelayMessage {
            angle: Some(33.0),
            raw: Some(210),
            offset: Some(100.0),
            bends: None,
        };
        assert_eq!(broadcaster.broadcast(&msg), 1);
        assert_eq!(read_frame(&mut reader).unwrap(), Frame::Update(msg));

        stream.shutdown(Shutdown::Both).unwrap();
        match next_event(&rx) {
            Event::PeerClosed(closed) => assert_eq!(closed, code),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn wrong_code_is_refused() {
        let (host, _rx) = start_host();
        let wrong = if host.code() == "0000" { "0001" } else { "0000" };

        let res = join(host.local_addr(), wrong);
        assert!(matches!(res, Err(RelayError::UnknownCode(_))));
    }

    #[test]
    fn duplicate_identity_is_refused() {
        let (host, rx) = start_host();
        let addrs = [host.local_addr()];

        let _first = join_as(&addrs, "DUPE", host.code()).unwrap();
        assert!(matches!(next_event(&rx), Event::PeerJoined(_)));

        let second = join_as(&addrs, "DUPE", host.code());
        assert!(matches!(second, Err(RelayError::IdentityTaken(_))));
    }

    #[test]
    fn spawned_mirror_posts_lifecycle() {
        let (host, host_rx) = start_host();
        let (tx, rx) = channel();

        let handle = spawn_mirror(host.local_addr().to_string(), host.code().to_owned(), tx);
        assert!(matches!(next_event(&rx), Event::MirrorOpened(_)));

        let mut peer = match next_event(&host_rx) {
            Event::PeerJoined(peer) => peer,
            other => panic!("unexpected {:?}", other),
        };
        peer.link
            .send(&Frame::Update(RelayMessage::offset_only(5.0)))
            .unwrap();
        match next_event(&rx) {
            Event::MirrorData(msg) => assert_eq!(msg, RelayMessage::offset_only(5.0)),
            other => panic!("unexpected {:?}", other),
        }

        handle.close();
        assert!(matches!(next_event(&rx), Event::MirrorClosed));
    }

    #[test]
    fn stalled_mirror_is_hung_up_on() {
        let (host, rx) = start_host();

        let (_code, stream, mut reader) = join(host.local_addr(), host.code()).unwrap();
        let mut peer = match next_event(&rx) {
            Event::PeerJoined(peer) => peer,
            other => panic!("unexpected {:?}", other),
        };

        // The mirror never reads, so the socket buffers fill and a write
        // eventually times out.
        let big = Frame::Update(RelayMessage {
            bends: Some(vec![12.345; 10_000]),
            ..Default::default()
        });
        let mut failed = false;
        for _ in 0..10_000 {
            if peer.link.send(&big).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
        assert!(!peer.link.is_open());

        match next_event(&rx) {
            Event::PeerClosed(closed) => assert_eq!(closed, peer.code()),
            other => panic!("unexpected {:?}", other),
        }

        // Whatever was buffered drains, then the mirror sees EOF
        stream.set_read_timeout(Some(WAIT)).unwrap();
        io::copy(&mut reader, &mut io::sink()).unwrap();
    }

    #[test]
    fn rejoin_under_same_code_keeps_new_peer() {
        let (host, rx) = start_host();
        let addrs = [host.local_addr()];

        let (first, _) = join_as(&addrs, "SAME", host.code()).unwrap();
        assert!(matches!(next_event(&rx), Event::PeerJoined(_)));
        first.shutdown(Shutdown::Both).unwrap();

        let deadline = std::time::Instant::now() + WAIT;
        let _second = loop {
            match join_as(&addrs, "SAME", host.code()) {
                Ok(joined) => break joined,
                Err(RelayError::IdentityTaken(_)) if std::time::Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => panic!("rejoin failed: {}", e),
            }
        };

        // The old close is queued ahead of the new join
        let mut broadcaster = RelayBroadcaster::new();
        match next_event(&rx) {
            Event::PeerClosed(code) => assert!(!broadcaster.remove(&code)),
            other => panic!("unexpected {:?}", other),
        }
        match next_event(&rx) {
            Event::PeerJoined(peer) => broadcaster.add(peer),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(broadcaster.len(), 1);
    }

    #[test]
    fn close_during_join_skips_open() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (got_join, join_seen) = channel();
        let (release, wait_release) = channel::<()>();

        let fake_host = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let join = read_frame(&mut reader).unwrap();
            got_join.send(join).unwrap();
            wait_release.recv().unwrap();
            let _ = write_frame(&mut stream, &Frame::Accepted);
            stream
        });

        let (tx, rx) = channel();
        let handle = spawn_mirror(addr.to_string(), "ABCD".to_owned(), tx);
        assert!(matches!(
            join_seen.recv_timeout(WAIT).unwrap(),
            Frame::Join { .. }
        ));

        handle.close();
        release.send(()).unwrap();
        assert!(matches!(next_event(&rx), Event::MirrorClosed));
        drop(fake_host.join().unwrap());
    }

    #[test]
    fn unreachable_host_fails_mirror() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let (tx, rx) = channel();
        spawn_mirror(addr.to_string(), "ABCD".to_owned(), tx);
        assert!(matches!(next_event(&rx), Event::MirrorFailed(_)));
    }
}
