//! MQTT v3.1.1 control packets.
//!
//! Parsing and serialization for every packet the protocol defines. The
//! engine only ever *sends* Connect, Publish, Subscribe, Unsubscribe,
//! PingReq and Disconnect, but both directions are implemented so a scripted
//! peer can be driven in tests.

use crate::{
	misc::{Credentials, Will},
	serde, InvalidFilter, InvalidQoS, InvalidTopic, FilterBuf, Packet, PacketId, QoS, TopicBuf,
};
use bytes::{Buf, BufMut, Bytes};
use std::{fmt, io, str::Utf8Error};

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

pub trait SerializePacket {
	fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError>;
}

/// Marker for a filter the Server rejected in a [`SubAck`].
#[derive(Debug)]
pub struct SubscribeFailed;

//
// Packet Types
//

/// A `Connect` packet is sent by the Client to the Server to initialise a
/// session.
#[derive(Clone, Debug)]
pub struct Connect {
	/// Client ID.
	///
	/// The Server _may_ accept an empty client ID.
	pub client_id: String,

	/// Keep-alive timeout in seconds.
	pub keep_alive: u16,

	/// Request a clean session.
	pub clean_session: bool,

	/// Last will and testament for the Client.
	pub will: Option<Will>,

	/// Login credentials.
	pub credentials: Option<Credentials>,
}

/// A ConnAck packet is sent by the Server to the Client to acknowledge a
/// new session.
///
/// The Client may send packets to the Server before receiving ConnAck,
/// however the Server shouldn't send any packets to the Client before
/// ConnAck.
#[derive(Debug)]
pub struct ConnAck {
	/// Indicates that the Server has existing state from a previous session
	/// for the client.
	pub session_present: bool,

	/// Status code. Zero means the connection was accepted.
	pub code: u8,
}

pub enum Publish {
	AtMostOnce {
		retain: bool,
		topic: TopicBuf,
		payload: Bytes,
	},
	AtLeastOnce {
		id: PacketId,
		retain: bool,
		duplicate: bool,
		topic: TopicBuf,
		payload: Bytes,
	},
	ExactlyOnce {
		id: PacketId,
		retain: bool,
		duplicate: bool,
		topic: TopicBuf,
		payload: Bytes,
	},
}

id_packet!(PubAck, Packet::PubAck, 0x40);
id_packet!(PubRec, Packet::PubRec, 0x50);
id_packet!(PubRel, Packet::PubRel, 0x62);
id_packet!(PubComp, Packet::PubComp, 0x70);

#[derive(Debug)]
pub struct Subscribe {
	pub id: PacketId,
	pub filters: Vec<(FilterBuf, QoS)>,
}

#[derive(Debug)]
pub struct SubAck {
	pub id: PacketId,
	pub result: Vec<Result<QoS, SubscribeFailed>>,
}

#[derive(Debug)]
pub struct Unsubscribe {
	pub id: PacketId,
	pub filters: Vec<FilterBuf>,
}

id_packet!(UnsubAck, Packet::UnsubAck, 0xb0);
nul_packet!(PingReq, Packet::PingReq, 0xc0);
nul_packet!(PingResp, Packet::PingResp, 0xd0);
nul_packet!(Disconnect, Packet::Disconnect, 0xe0);

impl Default for Connect {
	fn default() -> Self {
		Self {
			client_id: String::new(),
			keep_alive: 0,
			clean_session: true,
			will: None,
			credentials: None,
		}
	}
}

impl Connect {
	pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
		let mut cursor = io::Cursor::new(payload);
		if serde::get_str(&mut cursor)? != PROTOCOL_NAME {
			return Err(ParseError::MalformedPacket("invalid protocol name"));
		}

		if serde::get_u8(&mut cursor)? != PROTOCOL_LEVEL {
			return Err(ParseError::MalformedPacket("unsupported protocol level"));
		}

		let flags = serde::get_u8(&mut cursor)?;
		let keep_alive = serde::get_u16(&mut cursor)?;
		let client_id = String::from(serde::get_str(&mut cursor)?);

		let clean_session = flags & 0x02 == 0x02;
		let will = if flags & 0x04 == 0x04 {
			let topic = TopicBuf::new(serde::get_str(&mut cursor)?)?;
			let len = serde::get_u16(&mut cursor)?;
			let payload = Bytes::from(serde::get_slice(&mut cursor, len as usize)?.to_vec());
			let qos = ((flags & 0x18) >> 3).try_into()?;
			let retain = flags & 0x20 == 0x20;

			Some(Will {
				topic,
				payload,
				qos,
				retain,
			})
		} else {
			None
		};

		let credentials = if flags & 0x80 == 0x80 {
			let username = String::from(serde::get_str(&mut cursor)?);
			let password = if flags & 0x40 == 0x40 {
				Some(String::from(serde::get_str(&mut cursor)?))
			} else {
				None
			};
			Some(Credentials { username, password })
		} else {
			None
		};

		Ok(Self {
			client_id,
			keep_alive,
			clean_session,
			will,
			credentials,
		})
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
		// Write the packet type and length.
		serde::put_u8(dst, 0x10)?;
		serde::put_var(dst, self.payload_len())?;

		// Write the protocol name and level.
		serde::put_str(dst, PROTOCOL_NAME)?;
		serde::put_u8(dst, PROTOCOL_LEVEL)?;

		// Write the flags and keep alive.
		serde::put_u8(dst, self.flags())?;
		serde::put_u16(dst, self.keep_alive)?;

		// Write the client ID.
		serde::put_str(dst, &self.client_id)?;

		// Write the will.
		if let Some(will) = &self.will {
			serde::put_str(dst, will.topic.as_str())?;
			serde::put_u16(dst, will.payload.len() as u16)?;
			serde::put_slice(dst, &will.payload)?;
		}

		// Write the credentials.
		if let Some(credentials) = &self.credentials {
			serde::put_str(dst, &credentials.username)?;
			if let Some(password) = &credentials.password {
				serde::put_str(dst, password)?;
			}
		}

		Ok(())
	}

	#[inline(always)]
	fn payload_len(&self) -> usize {
		let mut len = (2 + PROTOCOL_NAME.len())
			+ 4 // protocol level, flags, and keep alive
			+ (2 + self.client_id.len());

		if let Some(will) = &self.will {
			len += 2 + will.topic.len() + 2 + will.payload.len();
		}

		if let Some(credentials) = &self.credentials {
			len += 2 + credentials.username.len();
			if let Some(password) = &credentials.password {
				len += 2 + password.len();
			}
		}

		len
	}

	fn flags(&self) -> u8 {
		let mut flags = 0;

		if self.clean_session {
			flags |= 0x02;
		}

		if let Some(will) = &self.will {
			flags |= 0x04;
			flags |= (will.qos as u8) << 3;
			if will.retain {
				flags |= 0x20;
			}
		}

		if let Some(credentials) = &self.credentials {
			flags |= 0x80;
			if credentials.password.is_some() {
				flags |= 0x40;
			}
		}

		flags
	}
}

impl ConnAck {
	/// Parses the payload of a ConnAck packet.
	pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
		if payload.len() != 2 {
			return Err(ParseError::MalformedPacket(
				"ConnAck packet must have length 2",
			));
		}

		let mut cursor = io::Cursor::new(payload);
		let flags = serde::get_u8(&mut cursor)?;
		let code = serde::get_u8(&mut cursor)?;

		if flags & 0xfe != 0 {
			return Err(ParseError::MalformedPacket(
				"upper 7 bits in ConnAck flags must be zero",
			));
		}

		let session_present = flags & 0x01 == 0x01;

		Ok(Self {
			session_present,
			code,
		})
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
		let Self {
			session_present,
			code,
		} = self;
		serde::put_u8(dst, 0x20)?;
		serde::put_var(dst, 2)?;
		serde::put_u8(dst, if *session_present { 0x01 } else { 0x00 })?;
		serde::put_u8(dst, *code)?;
		Ok(())
	}
}

const PUBLISH_HEADER_CONTROL: u8 = 0x30;
const PUBLISH_HEADER_RETAIN_FLAG: u8 = 0x01;
const PUBLISH_HEADER_DUPLICATE_FLAG: u8 = 0x08;
const PUBLISH_HEADER_QOS_MASK: u8 = 0x06;

impl Publish {
	pub fn parse(payload: &[u8], flags: u8) -> Result<Self, ParseError> {
		let mut cursor = io::Cursor::new(payload);
		// Extract properties from the header flags.
		let retain = flags & PUBLISH_HEADER_RETAIN_FLAG == PUBLISH_HEADER_RETAIN_FLAG;
		let duplicate = flags & PUBLISH_HEADER_DUPLICATE_FLAG == PUBLISH_HEADER_DUPLICATE_FLAG;
		let qos: QoS = ((flags & PUBLISH_HEADER_QOS_MASK) >> 1).try_into()?;

		let topic = TopicBuf::new(serde::get_str(&mut cursor)?)?;

		// The interpretation of the remaining bytes depends on the QoS.
		match qos {
			QoS::AtMostOnce => {
				if duplicate {
					return Err(ParseError::MalformedPacket(
						"duplicate flag must be 0 for Publish packets with QoS of AtMostOnce",
					));
				}
				let remaining = cursor.remaining();
				let payload = Bytes::from(serde::get_slice(&mut cursor, remaining)?.to_vec());

				Ok(Self::AtMostOnce {
					retain,
					topic,
					payload,
				})
			}
			QoS::AtLeastOnce => {
				let id = serde::get_id(&mut cursor)?;
				let remaining = cursor.remaining();
				let payload = Bytes::from(serde::get_slice(&mut cursor, remaining)?.to_vec());

				Ok(Self::AtLeastOnce {
					id,
					retain,
					duplicate,
					topic,
					payload,
				})
			}
			QoS::ExactlyOnce => {
				let id = serde::get_id(&mut cursor)?;
				let remaining = cursor.remaining();
				let payload = Bytes::from(serde::get_slice(&mut cursor, remaining)?.to_vec());

				Ok(Self::ExactlyOnce {
					id,
					retain,
					duplicate,
					topic,
					payload,
				})
			}
		}
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
		let mut flags = PUBLISH_HEADER_CONTROL | (self.qos() as u8) << 1;
		if self.retain() {
			flags |= PUBLISH_HEADER_RETAIN_FLAG;
		}
		if self.duplicate() {
			flags |= PUBLISH_HEADER_DUPLICATE_FLAG;
		}

		let id_len = if self.id().is_some() { 2 } else { 0 };
		serde::put_u8(dst, flags)?;
		serde::put_var(dst, 2 + self.topic().len() + id_len + self.payload().len())?;
		serde::put_str(dst, self.topic().as_str())?;
		if let Some(id) = self.id() {
			serde::put_u16(dst, id.get())?;
		}
		serde::put_slice(dst, self.payload())?;
		Ok(())
	}

	/// Returns the topic of the Publish packet.
	#[inline]
	pub fn topic(&self) -> &TopicBuf {
		match self {
			Self::AtMostOnce { topic, .. } => topic,
			Self::AtLeastOnce { topic, .. } => topic,
			Self::ExactlyOnce { topic, .. } => topic,
		}
	}

	/// Returns the payload of the Publish packet.
	#[inline]
	pub fn payload(&self) -> &Bytes {
		match self {
			Self::AtMostOnce { payload, .. } => payload,
			Self::AtLeastOnce { payload, .. } => payload,
			Self::ExactlyOnce { payload, .. } => payload,
		}
	}

	/// Returns the QoS of the Publish packet.
	#[inline]
	pub fn qos(&self) -> QoS {
		match self {
			Self::AtMostOnce { .. } => QoS::AtMostOnce,
			Self::AtLeastOnce { .. } => QoS::AtLeastOnce,
			Self::ExactlyOnce { .. } => QoS::ExactlyOnce,
		}
	}

	/// Returns the retain flag of the Publish packet.
	#[inline]
	pub fn retain(&self) -> bool {
		match self {
			Self::AtMostOnce { retain, .. } => *retain,
			Self::AtLeastOnce { retain, .. } => *retain,
			Self::ExactlyOnce { retain, .. } => *retain,
		}
	}

	/// Returns the Packet ID of the Publish packet.
	///
	/// This will always return `None` for Publish packets with [`QoS`] of
	/// [`AtMostOnce`](QoS#variant.AtMostOnce).
	#[inline]
	pub fn id(&self) -> Option<PacketId> {
		match self {
			Self::AtMostOnce { .. } => None,
			Self::AtLeastOnce { id, .. } => Some(*id),
			Self::ExactlyOnce { id, .. } => Some(*id),
		}
	}

	/// Returns the duplicate flag of the Publish packet.
	///
	/// This will always return `false` for Publish packets with [`QoS`] of
	/// [`AtMostOnce`](QoS#variant.AtMostOnce).
	#[inline]
	pub fn duplicate(&self) -> bool {
		match self {
			Self::AtMostOnce { .. } => false,
			Self::AtLeastOnce { duplicate, .. } => *duplicate,
			Self::ExactlyOnce { duplicate, .. } => *duplicate,
		}
	}
}

impl fmt::Debug for Publish {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Publish")
			.field("id", &self.id())
			.field("qos", &self.qos())
			.field("retain", &self.retain())
			.field("duplicate", &self.duplicate())
			.field("topic", &self.topic())
			.field("payload length", &self.payload().len())
			.finish()
	}
}

impl Subscribe {
	/// Parses the payload of a [`Subscribe`] packet.
	pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
		let mut cursor = io::Cursor::new(payload);
		let id = serde::get_id(&mut cursor)?;

		let mut filters = Vec::new();
		while cursor.has_remaining() {
			let filter = FilterBuf::new(serde::get_str(&mut cursor)?)?;
			let qos: QoS = serde::get_u8(&mut cursor)?.try_into()?;
			filters.push((filter, qos));
		}

		Ok(Self { id, filters })
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
		let Self { id, filters } = self;
		serde::put_u8(dst, 0x82)?;

		let len = 2 + filters
			.iter()
			.fold(0usize, |acc, (filter, _)| acc + 3 + filter.len());

		serde::put_var(dst, len)?;
		serde::put_u16(dst, id.get())?;
		for (filter, qos) in filters {
			serde::put_str(dst, filter.as_str())?;
			serde::put_u8(dst, *qos as u8)?;
		}

		Ok(())
	}
}

impl SubAck {
	pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
		let mut cursor = io::Cursor::new(payload);
		let id = serde::get_id(&mut cursor)?;

		let mut result = Vec::new();
		while cursor.has_remaining() {
			let return_code = serde::get_u8(&mut cursor)?;
			let qos: Result<QoS, SubscribeFailed> = match return_code.try_into() {
				Ok(qos) => Ok(qos),
				Err(_) => {
					if return_code == 0x80 {
						Err(SubscribeFailed)
					} else {
						return Err(ParseError::MalformedPacket("invalid return code in SubAck"));
					}
				}
			};

			result.push(qos);
		}

		Ok(Self { id, result })
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
		let Self { id, result } = self;
		serde::put_u8(dst, 0x90)?;

		let len = 2 + result.len();

		serde::put_var(dst, len)?;
		serde::put_u16(dst, id.get())?;
		for qos in result {
			serde::put_u8(dst, qos.as_ref().map(|qos| *qos as u8).unwrap_or(0x80))?;
		}

		Ok(())
	}
}

impl Unsubscribe {
	/// Parses the payload of an [`Unsubscribe`] packet.
	pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
		let mut cursor = io::Cursor::new(payload);
		let id = serde::get_id(&mut cursor)?;

		let mut filters = Vec::new();
		while cursor.has_remaining() {
			filters.push(FilterBuf::new(serde::get_str(&mut cursor)?)?);
		}

		Ok(Self { id, filters })
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
		let Self { id, filters } = self;
		serde::put_u8(dst, 0xa2)?;

		let len = 2 + filters
			.iter()
			.fold(0usize, |acc, filter| acc + 2 + filter.len());

		serde::put_var(dst, len)?;
		serde::put_u16(dst, id.get())?;
		for filter in filters {
			serde::put_str(dst, filter.as_str())?;
		}

		Ok(())
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
	#[error("incomplete packet")]
	Incomplete,
	#[error(transparent)]
	InvalidQoS(#[from] InvalidQoS),
	#[error("invalid filter: {0}")]
	InvalidFilter(#[from] InvalidFilter),
	#[error("invalid topic: {0}")]
	InvalidTopic(#[from] InvalidTopic),
	#[error("invalid packet header")]
	InvalidHeader,
	#[error("packet id cannot be zero")]
	ZeroPacketId,
	#[error("malformed remaining length")]
	MalformedLength,
	#[error("malformed packet: {0}")]
	MalformedPacket(&'static str),
	#[error("invalid utf-8 in packet: {0}")]
	Utf8Error(#[from] Utf8Error),
}

macro_rules! impl_serialize {
	($name:tt) => {
		impl SerializePacket for $name {
			fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
				Self::serialize_to_bytes(&self, dst)
			}
		}
	};
}

impl_serialize!(Connect);
impl_serialize!(ConnAck);
impl_serialize!(Publish);
impl_serialize!(PubAck);
impl_serialize!(PubRec);
impl_serialize!(PubRel);
impl_serialize!(PubComp);
impl_serialize!(Subscribe);
impl_serialize!(SubAck);
impl_serialize!(Unsubscribe);
impl_serialize!(UnsubAck);
impl_serialize!(PingReq);
impl_serialize!(PingResp);
impl_serialize!(Disconnect);

macro_rules! id_packet {
	($name:tt,$variant:expr,$header:literal) => {
		#[derive(Debug, PartialEq, Eq)]
		pub struct $name {
			pub id: crate::PacketId,
		}

		impl $name {
			pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
				if payload.len() != 2 {
					return Err(ParseError::MalformedPacket("packet must have length 2"));
				}

				let mut buf = std::io::Cursor::new(payload);
				let id = crate::serde::get_id(&mut buf)?;
				Ok(Self { id })
			}

			pub fn serialize_to_bytes(
				&self,
				dst: &mut impl bytes::BufMut,
			) -> Result<(), crate::serde::WriteError> {
				let Self { id } = self;
				crate::serde::put_u8(dst, $header)?;
				crate::serde::put_var(dst, 2)?;
				crate::serde::put_u16(dst, id.get())?;
				Ok(())
			}
		}

		impl From<$name> for Packet {
			#[inline]
			fn from(value: $name) -> Packet {
				$variant(value)
			}
		}
	};
}
use id_packet;

macro_rules! nul_packet {
	($name:tt,$variant:expr,$header:literal) => {
		#[derive(Debug)]
		pub struct $name;

		impl $name {
			pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
				if !payload.is_empty() {
					return Err(ParseError::MalformedPacket("packet must have length 0"));
				}
				Ok(Self)
			}

			pub fn serialize_to_bytes(
				&self,
				dst: &mut impl bytes::BufMut,
			) -> Result<(), crate::serde::WriteError> {
				crate::serde::put_u8(dst, $header)?;
				crate::serde::put_var(dst, 0)?;
				Ok(())
			}
		}

		impl From<$name> for Packet {
			#[inline]
			fn from(_: $name) -> Packet {
				$variant
			}
		}
	};
}
use nul_packet;

#[cfg(test)]
mod tests {
	use super::{ConnAck, Connect, Publish, SubAck};
	use crate::{Packet, QoS, TopicBuf};
	use bytes::BytesMut;
	use std::io::Cursor;

	fn parse_one(bytes: &[u8]) -> Packet {
		let mut cursor = Cursor::new(bytes);
		Packet::parse(&mut cursor).unwrap()
	}

	#[test]
	fn serializes_minimal_connect() {
		let connect = Connect {
			client_id: String::from("a"),
			keep_alive: 60,
			..Default::default()
		};

		let mut buffer = BytesMut::new();
		connect.serialize_to_bytes(&mut buffer).unwrap();
		assert_eq!(
			&buffer[..],
			&[
				0x10, 0x0d, // header, remaining length
				0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, // protocol name and level
				0x02, // clean session
				0x00, 0x3c, // keep alive
				0x00, 0x01, b'a', // client id
			]
		);
	}

	#[test]
	fn connect_flags_cover_will_and_credentials() {
		let connect = Connect {
			client_id: String::from("c"),
			keep_alive: 400,
			will: Some(crate::Will {
				topic: TopicBuf::new("dead/c").unwrap(),
				payload: bytes::Bytes::from_static(b"gone"),
				qos: QoS::AtLeastOnce,
				retain: true,
			}),
			credentials: Some(crate::Credentials::from(("user", "pass"))),
			..Default::default()
		};

		let mut buffer = BytesMut::new();
		connect.serialize_to_bytes(&mut buffer).unwrap();

		// flags: username | password | will retain | will qos 1 | will | clean session
		assert_eq!(buffer[9], 0x80 | 0x40 | 0x20 | 0x08 | 0x04 | 0x02);

		// The test broker reads its own writing.
		let parsed = Connect::parse(&buffer[2..]).unwrap();
		assert_eq!(parsed.client_id, "c");
		assert_eq!(parsed.keep_alive, 400);
		let will = parsed.will.unwrap();
		assert_eq!(will.topic.as_str(), "dead/c");
		assert!(will.retain);
		assert_eq!(parsed.credentials.unwrap().password.as_deref(), Some("pass"));
	}

	#[test]
	fn parses_connack() {
		let Packet::ConnAck(ConnAck {
			session_present,
			code,
		}) = parse_one(&[0x20, 0x02, 0x01, 0x00])
		else {
			panic!("expected ConnAck");
		};
		assert!(session_present);
		assert_eq!(code, 0);

		// Refused: bad credentials.
		let Packet::ConnAck(connack) = parse_one(&[0x20, 0x02, 0x00, 0x04]) else {
			panic!("expected ConnAck");
		};
		assert_eq!(connack.code, 4);
	}

	#[test]
	fn publish_qos1_carries_packet_id() {
		let publish = Publish::AtLeastOnce {
			id: crate::PacketId::new(7).unwrap(),
			retain: false,
			duplicate: false,
			topic: TopicBuf::new("a/b").unwrap(),
			payload: bytes::Bytes::from_static(b"hi"),
		};

		let mut buffer = BytesMut::new();
		publish.serialize_to_bytes(&mut buffer).unwrap();
		assert_eq!(
			&buffer[..],
			&[
				0x32, 0x09, // header (qos 1), remaining length
				0x00, 0x03, b'a', b'/', b'b', // topic
				0x00, 0x07, // packet id
				b'h', b'i', // payload
			]
		);

		let Packet::Publish(parsed) = parse_one(&buffer[..]) else {
			panic!("expected Publish");
		};
		assert_eq!(parsed.id().map(|id| id.get()), Some(7));
		assert_eq!(parsed.qos(), QoS::AtLeastOnce);
		assert_eq!(&parsed.payload()[..], b"hi");
	}

	#[test]
	fn suback_records_failures() {
		let Packet::SubAck(SubAck { id, result }) =
			parse_one(&[0x90, 0x04, 0x00, 0x01, 0x01, 0x80])
		else {
			panic!("expected SubAck");
		};
		assert_eq!(id.get(), 1);
		assert_eq!(result.len(), 2);
		assert_eq!(*result[0].as_ref().unwrap(), QoS::AtLeastOnce);
		assert!(result[1].is_err());
	}
}
