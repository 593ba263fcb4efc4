//! Peer-to-peer networking engine for host applications.
//!
//! The crate does no I/O and spawns no threads: a host supplies a
//! [`Transport`] backend, then drives an [`Engine`] from its main loop by
//! calling [`Engine::poll`]. Polls return the events that occurred since
//! the previous call: peers appearing and disappearing on the local
//! network, connections completing their capability handshake, and
//! reassembled application messages.
//!
//! ```no_run
//! # use peertalk_core::{Config, Engine, Event};
//! # fn run<T: peertalk_core::Transport>(transport: T) -> Result<(), peertalk_core::Error> {
//! let mut engine = Engine::new(&Config::default(), transport)?;
//! engine.start_discovery()?;
//! loop {
//!     for event in engine.poll() {
//!         match event {
//!             Event::PeerDiscovered { peer } => engine.connect(peer)?,
//!             Event::Message { peer, data } => println!("{peer}: {} bytes", data.len()),
//!             _ => {}
//!         }
//!     }
//! }
//! # }
//! ```

pub mod caps;
pub mod config;
pub mod engine;
pub mod error;
pub mod frag;
pub mod notify;
pub mod peer;
pub mod transport;
pub mod wire;

pub use caps::{Capabilities, Negotiated};
pub use config::Config;
pub use engine::{Engine, Event, Stats};
pub use error::{DisconnectReason, Error};
pub use notify::{Drain, Notifier, TransportEvent};
pub use peer::{PeerId, PeerRecord, PeerState};
pub use transport::{ConnId, Tick, Transport, TransportError};
