//! The MQTT-over-WebSocket client.
//!
//! [`connect`] establishes the full `TCP → TLS → WebSocket → MQTT` stack
//! and resolves once the Server has accepted the session with ConnAck. The
//! connection is then owned by a single service task which all [`Client`]
//! handles submit to through a command channel.

mod command;
mod conv;
mod handle;
mod state;
mod subscription;
mod task;

use crate::{
	misc::{Credentials, Will},
	packets::{self, ParseError},
	ws::{BoxedStream, TransportError, WsStream},
	Packet, PacketType,
};
use bytes::BytesMut;
use std::{io, time::Duration};
use tokio::{
	net::{self, TcpStream},
	sync::mpsc,
	task::JoinHandle,
	time,
};
use tokio_rustls::{rustls::ServerName, TlsConnector};
use tokio_tungstenite::tungstenite::Error as WsError;

pub use self::{
	conv::{Filters, FiltersWithQoS},
	handle::{Client, ClientError},
	state::StateError,
	subscription::{Message, Subscription},
};

/// Bound on the ConnAck wait when the keep-alive timer is disabled.
const DEFAULT_CONNACK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct Options {
	/// Host name of the broker.
	pub host: String,

	/// Port of the broker's WebSocket listener.
	pub port: u16,

	/// HTTP resource the WebSocket handshake requests.
	pub path: String,

	/// Tunnel the WebSocket connection through TLS.
	pub tls: bool,

	/// Skip server certificate verification.
	///
	/// Verification is on by default; this is an explicit opt-out for
	/// brokers with self-signed certificates.
	pub accept_invalid_certs: bool,

	/// Keep-alive interval in seconds. Zero disables the client-side ping
	/// timer.
	pub keep_alive: u16,

	/// Client ID. The Server may accept an empty one.
	pub client_id: String,

	/// Login credentials.
	pub credentials: Option<Credentials>,

	/// Last will and testament.
	pub will: Option<Will>,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			host: Default::default(),
			port: 443,
			path: String::from("/mqtt"),
			tls: true,
			accept_invalid_certs: false,
			keep_alive: 400,
			client_id: Default::default(),
			credentials: Default::default(),
			will: Default::default(),
		}
	}
}

impl<H: AsRef<str>> From<(H, u16)> for Options {
	#[inline]
	fn from(value: (H, u16)) -> Self {
		let (host, port) = value;
		Self {
			host: host.as_ref().into(),
			port,
			..Default::default()
		}
	}
}

/// Errors establishing a session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
	#[error("failed to resolve {0}")]
	Resolve(String),
	#[error("transport error: {0}")]
	Transport(#[from] io::Error),
	#[error("invalid server name for tls: {0}")]
	ServerName(String),
	#[error("websocket handshake failed: {0}")]
	Handshake(#[from] WsError),
	#[error("connect parameters could not be encoded")]
	Params,
	#[error("connection closed before ConnAck")]
	Closed,
	#[error("timed out waiting for ConnAck")]
	TimedOut,
	#[error("server sent {0:?} before ConnAck")]
	UnexpectedPacket(PacketType),
	#[error("mqtt protocol error: {0}")]
	Protocol(#[from] ParseError),
	#[error("connection refused by server (code {0})")]
	Refused(u8),
	#[error("received a text frame on a binary tunnel")]
	UnexpectedTextFrame,
}

/// Terminal outcomes of the service task.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
	#[error("connection dropped")]
	ConnectionDropped,
	#[error("websocket protocol error: {0}")]
	WsProtocol(WsError),
	#[error("received a text frame on a binary tunnel")]
	UnexpectedTextFrame,
	#[error("mqtt protocol error: {0}")]
	MqttProtocol(#[from] ParseError),
	#[error("mqtt session error: {0}")]
	MqttSession(#[from] StateError),
}

impl From<TransportError> for ConnectError {
	fn from(error: TransportError) -> Self {
		match error {
			TransportError::ConnectionReset => Self::Closed,
			TransportError::Ws(error) => Self::Handshake(error),
			TransportError::UnexpectedText => Self::UnexpectedTextFrame,
			TransportError::Mqtt(error) => Self::Protocol(error),
		}
	}
}

impl From<TransportError> for ServiceError {
	fn from(error: TransportError) -> Self {
		match error {
			TransportError::ConnectionReset => Self::ConnectionDropped,
			TransportError::Ws(error) => match error {
				// I/O failures and post-close traffic are a dead peer, not
				// a protocol violation.
				WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_) => {
					Self::ConnectionDropped
				}
				error => Self::WsProtocol(error),
			},
			TransportError::UnexpectedText => Self::UnexpectedTextFrame,
			TransportError::Mqtt(error) => Self::MqttProtocol(error),
		}
	}
}

/// Establishes a session with the broker.
///
/// Resolves the host, connects with `TCP_NODELAY`, brings up TLS (unless
/// disabled) and the WebSocket tunnel, sends Connect and waits for the
/// Server's ConnAck. On success the connection is handed to a spawned
/// service task and a [`Client`] handle is returned alongside the task's
/// join handle.
pub async fn connect(
	options: Options,
) -> Result<(Client, JoinHandle<Result<(), ServiceError>>), ConnectError> {
	let address = match net::lookup_host((options.host.as_str(), options.port)).await {
		Ok(mut addresses) => addresses
			.next()
			.ok_or_else(|| ConnectError::Resolve(options.host.clone()))?,
		Err(error) => {
			tracing::debug!(error = %error, "name resolution failed");
			return Err(ConnectError::Resolve(options.host.clone()));
		}
	};

	let stream = TcpStream::connect(address).await?;
	stream.set_nodelay(true)?;

	let stream: BoxedStream = if options.tls {
		tracing::debug!(host = %options.host, "starting tls handshake");
		let connector = TlsConnector::from(tls::configure(options.accept_invalid_certs));
		let server_name = ServerName::try_from(options.host.as_str())
			.map_err(|_| ConnectError::ServerName(options.host.clone()))?;

		Box::new(connector.connect(server_name, stream).await?)
	} else {
		Box::new(stream)
	};

	let connection = WsStream::connect(
		stream,
		&options.host,
		options.port,
		&options.path,
		options.tls,
	)
	.await?;

	establish(connection, &options).await
}

/// Sends Connect over an upgraded WebSocket stream, waits for ConnAck and
/// spawns the service task.
pub(crate) async fn establish(
	mut connection: WsStream,
	options: &Options,
) -> Result<(Client, JoinHandle<Result<(), ServiceError>>), ConnectError> {
	let connect = packets::Connect {
		client_id: options.client_id.clone(),
		keep_alive: options.keep_alive,
		// A fresh session every time; state is not carried across
		// connections.
		clean_session: true,
		will: options.will.clone(),
		credentials: options.credentials.clone(),
	};

	let mut buffer = BytesMut::new();
	connect
		.serialize_to_bytes(&mut buffer)
		.map_err(|_| ConnectError::Params)?;
	connection.write(buffer.freeze()).await?;

	let keep_alive = Duration::from_secs(options.keep_alive.into());
	let wait = if keep_alive.is_zero() {
		DEFAULT_CONNACK_TIMEOUT
	} else {
		keep_alive
	};

	let connack = match time::timeout(wait, connection.read_packet()).await {
		Err(_) => return Err(ConnectError::TimedOut),
		Ok(Ok(Some(Packet::ConnAck(connack)))) => connack,
		Ok(Ok(Some(packet))) => return Err(ConnectError::UnexpectedPacket(packet.packet_type())),
		Ok(Ok(None)) => return Err(ConnectError::Closed),
		Ok(Err(error)) => return Err(error.into()),
	};

	if connack.code != 0 {
		tracing::error!(code = connack.code, "connection refused by server");
		return Err(ConnectError::Refused(connack.code));
	}

	tracing::debug!(
		session_present = connack.session_present,
		"mqtt session established"
	);

	let state = state::SessionState::new(keep_alive);
	let (tx, rx) = mpsc::unbounded_channel();
	let handle = tokio::spawn(task::client_task(state, rx, connection));

	Ok((Client::new(tx), handle))
}

mod tls {
	use std::{sync::Arc, time::SystemTime};
	use tokio_rustls::rustls::{
		client::{ServerCertVerified, ServerCertVerifier},
		Certificate, ClientConfig, Error, OwnedTrustAnchor, RootCertStore, ServerName,
	};

	pub(super) fn configure(accept_invalid_certs: bool) -> Arc<ClientConfig> {
		let builder = ClientConfig::builder().with_safe_defaults();

		let config = if accept_invalid_certs {
			tracing::warn!("server certificate verification is disabled");
			builder
				.with_custom_certificate_verifier(Arc::new(NoVerification))
				.with_no_client_auth()
		} else {
			let mut root_cert_store = RootCertStore::empty();
			root_cert_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
				OwnedTrustAnchor::from_subject_spki_name_constraints(
					ta.subject,
					ta.spki,
					ta.name_constraints,
				)
			}));

			builder
				.with_root_certificates(root_cert_store)
				.with_no_client_auth()
		};

		Arc::new(config)
	}

	/// Accepts any certificate. Only installed when the caller explicitly
	/// opted out of verification.
	struct NoVerification;

	impl ServerCertVerifier for NoVerification {
		fn verify_server_cert(
			&self,
			_end_entity: &Certificate,
			_intermediates: &[Certificate],
			_server_name: &ServerName,
			_scts: &mut dyn Iterator<Item = &[u8]>,
			_ocsp_response: &[u8],
			_now: SystemTime,
		) -> Result<ServerCertVerified, Error> {
			Ok(ServerCertVerified::assertion())
		}
	}
}
