//! WebSocket transport for MQTT packets.
//!
//! MQTT bytes travel inside WebSocket binary frames, but the two protocols
//! frame independently: a single WebSocket frame may carry several MQTT
//! packets, and one MQTT packet may arrive split across frames. [`WsStream`]
//! owns that coordination: outbound packet bytes are wrapped into one
//! binary frame per flush, and inbound binary payloads accumulate in a
//! reassembly buffer that complete packets are parsed out of.

use crate::{packets::ParseError, Packet};
use bytes::{Buf, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::{
	client_async,
	tungstenite::{
		client::IntoClientRequest,
		http::HeaderValue,
		protocol::{frame::coding::CloseCode, CloseFrame, Message},
		Error as WsError,
	},
	WebSocketStream,
};

/// Streams the WebSocket layer can run over.
pub(crate) trait AsyncReadWrite: AsyncRead + AsyncWrite + Send {}
impl AsyncReadWrite for TcpStream {}
impl AsyncReadWrite for tokio_rustls::client::TlsStream<TcpStream> {}
#[cfg(test)]
impl AsyncReadWrite for tokio::io::DuplexStream {}

pub(crate) type BoxedStream = Box<dyn AsyncReadWrite + Unpin>;

const READ_BUFFER_CAPACITY: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub(crate) enum TransportError {
	#[error("connection reset by peer")]
	ConnectionReset,
	#[error("websocket error: {0}")]
	Ws(#[from] WsError),
	#[error("received a text frame on a binary tunnel")]
	UnexpectedText,
	#[error("mqtt parse error: {0}")]
	Mqtt(#[from] ParseError),
}

pub(crate) struct WsStream {
	stream: WebSocketStream<BoxedStream>,
	buffer: BytesMut,
}

impl WsStream {
	/// Performs the WebSocket client handshake over an established stream,
	/// offering the `mqtt` subprotocol.
	pub async fn connect(
		stream: BoxedStream,
		host: &str,
		port: u16,
		path: &str,
		tls: bool,
	) -> Result<Self, WsError> {
		let scheme = if tls { "wss" } else { "ws" };
		let mut request = format!("{scheme}://{host}:{port}{path}").into_client_request()?;
		request
			.headers_mut()
			.insert("sec-websocket-protocol", HeaderValue::from_static("mqtt"));

		let (stream, response) = client_async(request, stream).await?;
		tracing::debug!(status = ?response.status(), "websocket handshake complete");

		Ok(Self::from_upgraded(stream))
	}

	/// Wraps an already-upgraded WebSocket stream.
	pub fn from_upgraded(stream: WebSocketStream<BoxedStream>) -> Self {
		Self {
			stream,
			buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
		}
	}

	/// Attempt to parse a single [`Packet`] from the reassembly buffer.
	fn parse_packet(&mut self) -> Result<Option<Packet>, ParseError> {
		use ParseError::Incomplete;

		let mut buf = Cursor::new(&self.buffer[..]);
		match Packet::check(&mut buf) {
			Ok(extent) => {
				// Rewind the cursor and parse the packet.
				buf.set_position(0);
				let packet = Packet::parse(&mut buf)?;

				// Advance the read buffer.
				self.buffer.advance(extent);
				Ok(Some(packet))
			}
			Err(Incomplete) => Ok(None),
			Err(error) => Err(error),
		}
	}

	/// Read a single MQTT [`Packet`], pulling WebSocket frames as needed.
	///
	/// Returns `Ok(None)` when the peer has closed the connection cleanly
	/// (a close frame or end-of-stream with an empty buffer).
	pub async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
		loop {
			// Attempt to parse a packet from the buffered data.
			if let Some(packet) = self.parse_packet()? {
				return Ok(Some(packet));
			}

			// There is not enough buffered data to read a packet. Pull the
			// next WebSocket frame.
			let Some(message) = self.stream.next().await else {
				if self.buffer.is_empty() {
					return Ok(None);
				} else {
					return Err(TransportError::ConnectionReset);
				}
			};

			match message? {
				Message::Binary(payload) => self.buffer.extend_from_slice(&payload),
				Message::Ping(_) | Message::Pong(_) => {
					// The protocol layer queues the pong reply; push it out.
					self.stream.flush().await?;
				}
				Message::Close(frame) => {
					tracing::debug!(frame = ?frame, "close frame received");
					return Ok(None);
				}
				Message::Text(_) => return Err(TransportError::UnexpectedText),
				Message::Frame(_) => unreachable!("raw frames are not produced by the stream"),
			}
		}
	}

	/// Write `payload` to the peer as a single WebSocket binary frame.
	pub async fn write(&mut self, payload: Bytes) -> Result<(), TransportError> {
		tracing::trace!("writing {} bytes as a binary frame", payload.len());
		self.stream.send(Message::Binary(payload.to_vec())).await?;
		Ok(())
	}

	/// Send a close frame with status 1000 (normal closure).
	pub async fn close(&mut self) -> Result<(), TransportError> {
		self.stream
			.close(Some(CloseFrame {
				code: CloseCode::Normal,
				reason: "".into(),
			}))
			.await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::{BoxedStream, WsStream};
	use crate::{
		packets::{PingResp, PubAck, Publish, SerializePacket},
		Packet, PacketId, TopicBuf,
	};
	use bytes::{Bytes, BytesMut};
	use futures_util::SinkExt;
	use tokio_tungstenite::{
		tungstenite::protocol::{Message, Role},
		WebSocketStream,
	};

	async fn pair() -> (WsStream, WebSocketStream<BoxedStream>) {
		let (client_end, server_end) = tokio::io::duplex(4096);
		let client = WebSocketStream::from_raw_socket(
			Box::new(client_end) as BoxedStream,
			Role::Client,
			None,
		)
		.await;
		let server = WebSocketStream::from_raw_socket(
			Box::new(server_end) as BoxedStream,
			Role::Server,
			None,
		)
		.await;
		(WsStream::from_upgraded(client), server)
	}

	fn serialize(packet: &impl SerializePacket) -> BytesMut {
		let mut buffer = BytesMut::new();
		packet.serialize_to_bytes(&mut buffer).unwrap();
		buffer
	}

	#[tokio::test]
	async fn one_frame_may_carry_several_packets() {
		let (mut client, mut server) = pair().await;

		let mut buffer = serialize(&PingResp);
		PubAck {
			id: PacketId::new(3).unwrap(),
		}
		.serialize_to_bytes(&mut buffer)
		.unwrap();

		server.send(Message::Binary(buffer.to_vec())).await.unwrap();

		assert!(matches!(
			client.read_packet().await.unwrap(),
			Some(Packet::PingResp)
		));
		let Some(Packet::PubAck(puback)) = client.read_packet().await.unwrap() else {
			panic!("expected PubAck");
		};
		assert_eq!(puback.id.get(), 3);
	}

	#[tokio::test]
	async fn one_packet_may_span_several_frames() {
		let (mut client, mut server) = pair().await;

		let publish = Publish::AtMostOnce {
			retain: false,
			topic: TopicBuf::new("a/b").unwrap(),
			payload: Bytes::from_static(b"split across frames"),
		};
		let buffer = serialize(&publish);
		let (head, tail) = buffer.split_at(5);

		server.send(Message::Binary(head.to_vec())).await.unwrap();
		server.send(Message::Binary(tail.to_vec())).await.unwrap();

		let Some(Packet::Publish(parsed)) = client.read_packet().await.unwrap() else {
			panic!("expected Publish");
		};
		assert_eq!(parsed.topic().as_str(), "a/b");
		assert_eq!(&parsed.payload()[..], b"split across frames");
	}

	#[tokio::test]
	async fn close_frame_ends_the_stream() {
		let (mut client, mut server) = pair().await;

		server.send(Message::Close(None)).await.unwrap();
		assert!(client.read_packet().await.unwrap().is_none());
	}
}
