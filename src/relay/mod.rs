//! Fan-out of pose updates to remote mirrors.
//!
//! A source keeps a [RelayBroadcaster] of every mirror that has joined it and
//! pushes each new pose to the ones whose links are still open. Delivery is
//! best effort: a peer that is closed, or whose send fails, simply misses the
//! update. Peers leave the set when their link reports a close.

pub mod message;
pub mod tcp;

pub use message::{Frame, Refusal, RelayMessage};

use log::{debug, info, warn};
use rand::Rng;
use std::{
    borrow::Cow,
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex},
};

/// Peer codes are this many characters of [CODE_ALPHABET].
pub const CODE_LEN: usize = 4;
const CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A short, human typeable identity, like `"7KQ2"`.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Normalizes a code typed by a user.
pub fn canonical_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// One direction of a connection to a remote viewer.
pub trait PeerLink: Send {
    fn is_open(&self) -> bool;

    /// Sends one frame. Must not block for long; there is no retry.
    fn send(&mut self, frame: &Frame) -> Result<(), RelayError>;

    fn close(&mut self);
}

/// A connected mirror.
pub struct RelayPeer {
    code: String,
    link: Box<dyn PeerLink>,
}

impl RelayPeer {
    pub fn new(code: impl Into<String>, link: Box<dyn PeerLink>) -> Self {
        Self {
            code: code.into(),
            link,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }
}

impl fmt::Debug for RelayPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayPeer")
            .field("code", &self.code)
            .field("open", &self.link.is_open())
            .finish()
    }
}

/// The set of mirrors a source is feeding.
#[derive(Debug, Default)]
pub struct RelayBroadcaster {
    peers: Vec<RelayPeer>,
}

impl RelayBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `peer`. A peer with the same code replaces the old one, whose
    /// link is closed.
    pub fn add(&mut self, peer: RelayPeer) {
        self.remove(peer.code());
        info!("Mirror {} joined", peer.code());
        self.peers.push(peer);
    }

    /// Drops the peer with `code`, returning whether it was present.
    pub fn remove(&mut self, code: &str) -> bool {
        let before = self.peers.len();
        self.peers.retain_mut(|p| {
            if p.code == code {
                p.link.close();
                false
            } else {
                true
            }
        });
        before != self.peers.len()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Sends `msg` to every open peer and returns how many accepted it.
    pub fn broadcast(&mut self, msg: &RelayMessage) -> usize {
        if self.peers.is_empty() {
            return 0;
        }
        let frame = Frame::Update(msg.clone());

        let mut reached = 0;
        for peer in self.peers.iter_mut().filter(|p| p.link.is_open()) {
            match peer.link.send(&frame) {
                Ok(()) => reached += 1,
                Err(e) => warn!("Mirror {} missed an update: {}", peer.code, e),
            }
        }
        debug!("Broadcast reached {}/{} mirrors", reached, self.peers.len());
        reached
    }

    pub fn close_all(&mut self) {
        for peer in self.peers.iter_mut() {
            peer.link.close();
        }
        self.peers.clear();
    }
}

/// Somewhere identities are registered, so that two parties cannot hold the
/// same code at once.
pub trait IdentityRegistry {
    /// Fails with [RelayError::IdentityTaken] if `code` is already held.
    fn claim(&self, code: &str) -> Result<(), RelayError>;

    fn release(&self, code: &str);
}

/// A process-wide registry. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct LocalRegistry {
    held: Arc<Mutex<HashSet<String>>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(code))
            .unwrap_or(false)
    }
}

impl IdentityRegistry for LocalRegistry {
    fn claim(&self, code: &str) -> Result<(), RelayError> {
        let mut held = self.held.lock().map_err(|_| RelayError::Poisoned)?;
        if held.insert(code.to_owned()) {
            Ok(())
        } else {
            Err(RelayError::IdentityTaken(code.to_owned()))
        }
    }

    fn release(&self, code: &str) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(code);
        }
    }
}

/// Runs `attempt` with `first`. If that identity turns out to be taken, runs
/// it exactly once more with a code from `fresh`. Any other error, or a
/// second collision, is returned as is.
pub fn with_identity_fallback<T, A, G>(
    first: String,
    fresh: G,
    mut attempt: A,
) -> Result<(String, T), RelayError>
where
    A: FnMut(&str) -> Result<T, RelayError>,
    G: FnOnce() -> String,
{
    match attempt(&first) {
        Ok(v) => Ok((first, v)),
        Err(RelayError::IdentityTaken(taken)) => {
            let retry = fresh();
            info!("Identity {} is taken, retrying as {}", taken, retry);
            attempt(&retry).map(|v| (retry, v))
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug)]
pub enum RelayError {
    /// Another party already holds this code.
    IdentityTaken(String),

    /// Nobody answers to this code.
    UnknownCode(String),

    /// The link was already closed when we tried to use it.
    Closed,

    /// The other side said something unexpected during the handshake.
    Handshake(String),

    /// A lock around shared relay state was poisoned.
    Poisoned,

    IoError(std::io::Error),

    RonError(ron::Error),

    RonSpannedError(ron::de::SpannedError),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RelayError as RE;
        let msg = match self {
            RE::IdentityTaken(code) => Cow::from(format!("identity {} is already taken", code)),
            RE::UnknownCode(code) => Cow::from(format!("no host answers to {}", code)),
            RE::Closed => Cow::from("link is closed"),
            RE::Handshake(reason) => Cow::from(format!("handshake failed: {}", reason)),
            RE::Poisoned => Cow::from("relay state lock poisoned"),
            RE::IoError(error) => Cow::from(format!("io error: {}", error)),
            RE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            RE::RonSpannedError(error) => Cow::from(format!("ron parse error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for RelayError {}

impl From<std::io::Error> for RelayError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<ron::Error> for RelayError {
    fn from(value: ron::Error) -> Self {
        Self::RonError(value)
    }
}

impl From<ron::de::SpannedError> for RelayError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

/// An in-memory [PeerLink] that records what it was sent.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, Default)]
    pub struct MemoryLink {
        pub sent: Arc<Mutex<Vec<Frame>>>,
        pub open: Arc<Mutex<bool>>,
    }

    impl MemoryLink {
        pub fn open() -> Self {
            Self {
                sent: Arc::default(),
                open: Arc::new(Mutex::new(true)),
            }
        }

        pub fn closed() -> Self {
            Self::default()
        }

        pub fn updates(&self) -> Vec<RelayMessage> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|f| match f {
                    Frame::Update(msg) => Some(msg.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl PeerLink for MemoryLink {
        fn is_open(&self) -> bool {
            *self.open.lock().unwrap()
        }

        fn send(&mut self, frame: &Frame) -> Result<(), RelayError> {
            if !self.is_open() {
                return Err(RelayError::Closed);
            }
            self.sent.lock().unwrap().push(frame.clone());
            Ok(())
        }

        fn close(&mut self) {
            *self.open.lock().unwrap() = false;
        }
    }
}
