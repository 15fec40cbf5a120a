#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # zk-conn
//!
//! Client connection engine for the ZooKeeper wire protocol: a long-lived,
//! single-session TCP client that multiplexes requests onto one server
//! connection, preserves strict request/reply ordering, keeps the session
//! alive through transparent reconnection, and delivers watch notifications.
//!
//! ## Feature
//!
//! - One session over one connection at a time, with round-robin failover
//!   across the configured server list
//! - FIFO reply matching on strictly increasing xids; reserved xids for
//!   protocol traffic (notifications, pings, auth, watch replay)
//! - Session handshake with optional inline SASL, credential replay, and
//!   automatic watch reset after a reconnect
//! - Ping-based liveness bound to the negotiated session timeout
//!
//! The high-level operation surface (create/get/set/...), watch bookkeeping
//! and SASL mechanisms live outside this crate; the engine consumes opaque
//! request bodies via [`ZkConn::submit`], hands back completed packets, and
//! talks to its collaborators through the [`watch::WatchManager`],
//! [`watch::WatchRegistration`] and [`sasl::SaslClient`] seams.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use zk_conn::{Config, Options, ZkConn, proto};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), zk_conn::ZkError> {
//!     let config = Config::new(Duration::from_secs(30));
//!     let (conn, events) = ZkConn::start(config, "10.0.0.1:2181/app", Options::default())?;
//!     // request bodies are produced by the API layer; opaque here
//!     let reply = conn.request(proto::OP_GET_DATA, Vec::new()).await?;
//!     println!("err={} zxid={}", reply.err(), reply.zxid());
//!     while let Ok(ev) = events.recv().await {
//!         println!("event: {:?}", ev);
//!     }
//!     conn.close().await
//! }
//! ```

#[macro_use]
extern crate captains_log;

mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod net;
pub mod packet;
pub mod proto;
mod queue;
pub mod sasl;
pub mod session;
pub mod watch;

pub use client::{Options, ZkConn};
pub use config::Config;
pub use error::ZkError;
pub use packet::{Packet, PacketHandle};
pub use sasl::SaslClient;
pub use session::{SessionState, ZkEvent};
pub use watch::{WatchManager, WatchRegistration, WatchSnapshot, WatchedEvent};
