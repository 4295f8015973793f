//! # mqtt-ws
//!
//! An MQTT v3.1.1 client that tunnels the protocol through WebSocket binary
//! frames inside TLS.
//!
//! The connection is owned by a single service task spawned by
//! [`client::connect`]; applications interact with it through the cloneable
//! [`Client`] handle and per-subscription message channels.
//!
pub mod client;
mod filter;
mod misc;
mod packet;
pub mod packets;
mod qos;
mod serde;
mod topic;
mod ws;

pub use self::{
	client::{Client, ClientError, ConnectError, Message, Options, ServiceError, Subscription},
	filter::{Filter, FilterBuf, InvalidFilter, Matches},
	misc::{Credentials, Will},
	packet::{Packet, PacketType},
	qos::{InvalidQoS, QoS},
	topic::{InvalidTopic, Topic, TopicBuf},
};

/// Identifier assigned to in-flight Publish, Subscribe and Unsubscribe
/// requests. Zero is not a valid packet id on the wire.
pub type PacketId = std::num::NonZeroU16;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
