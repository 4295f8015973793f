use super::{
	command::{Command, CommandRx, DisconnectCommand},
	state::SessionState,
	Message, ServiceError,
};
use crate::{
	packets::{self, Publish},
	ws::WsStream,
	Packet, QoS,
};
use std::time::Duration;
use tokio::time::{self, Instant};

/// Shutdown budget used when every [`Client`](super::Client) handle is
/// dropped without an explicit disconnect.
const DROP_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Drives the connection until it ends.
///
/// Each loop iteration is one forward service pass: wait for a command, an
/// inbound packet or the keep-alive deadline, process whichever is ready
/// first, then flush whatever the pass staged for the wire. The
/// command channel doubles as the wake-up: a publish submitted from another
/// task makes the `select!` immediately ready.
pub(crate) async fn client_task(
	mut state: SessionState,
	mut rx: CommandRx,
	mut connection: WsStream,
) -> Result<(), ServiceError> {
	// The Connect packet has just been flushed by the caller.
	let mut last_send = Instant::now();

	loop {
		// MQTT requires a packet at most every keep-alive interval; leave
		// some slack by pinging at 0.75x idle time.
		let keepalive_deadline = last_send + state.keep_alive.mul_f64(0.75);

		tokio::select! {
			command = rx.recv() => {
				match command {
					None => {
						tracing::debug!("all client handles dropped");
						shutdown(&mut state, &mut rx, &mut connection, DROP_DISCONNECT_TIMEOUT).await;
						return Ok(());
					}
					Some(Command::Disconnect(DisconnectCommand { timeout, response })) => {
						shutdown(&mut state, &mut rx, &mut connection, timeout).await;
						let _ = response.send(());
						return Ok(());
					}
					Some(command) => {
						tracing::debug!(command = ?command, "processing command");
						process_command(&mut state, command);
					}
				}
			}
			result = connection.read_packet() => {
				match result {
					Ok(Some(packet)) => {
						tracing::debug!(packet = ?packet, "read from stream");
						process_packet(&mut state, packet).await?;
					}
					Ok(None) => {
						tracing::warn!("connection closed by peer");
						return Err(ServiceError::ConnectionDropped);
					}
					Err(error) => return Err(error.into()),
				}
			}
			_ = time::sleep_until(keepalive_deadline), if state.keep_alive_enabled() => {
				if state.pingreq_sent.is_some() {
					tracing::error!("PingResp not received within the keep-alive window");
					return Err(ServiceError::ConnectionDropped);
				}

				// If this pass is already sending a packet there is no need
				// for a PingReq.
				if state.outgoing.is_empty() {
					state.pingreq_sent = Some(Instant::now());
					state.enqueue_packet(&packets::PingReq);
				}
			}
		}

		// Flush stage: everything the pass staged goes out as one binary
		// frame, and the keep-alive clock restarts.
		if let Some(buffer) = state.buffer() {
			connection.write(buffer).await?;
			last_send = Instant::now();
		}
	}
}

fn process_command(state: &mut SessionState, command: Command) {
	match command {
		Command::Publish(command) => {
			state.publish(
				command.topic,
				command.payload,
				command.qos,
				command.retain,
				command.response,
			);
		}
		Command::Subscribe(command) => {
			state.subscribe(command.filters, command.channel, command.response);
		}
		Command::Unsubscribe(command) => {
			state.unsubscribe(command.filters, command.response);
		}
		// Handled by the service loop before dispatch.
		Command::Disconnect(_) => unreachable!("disconnect is handled by the service loop"),
	}
}

async fn process_packet(state: &mut SessionState, packet: Packet) -> Result<(), ServiceError> {
	match packet {
		Packet::Publish(publish) => match publish.qos() {
			QoS::AtMostOnce | QoS::AtLeastOnce => {
				let ack = publish.id();
				deliver(state, publish).await;
				if let Some(id) = ack {
					state.enqueue_packet(&packets::PubAck { id });
				}
				Ok(())
			}
			// QoS 2 messages are held back until the Server releases them
			// with PubRel.
			QoS::ExactlyOnce => Ok(state.store_exactly_once(publish)?),
		},
		Packet::PubAck(packets::PubAck { id }) => Ok(state.puback(id)?),
		Packet::PubRec(packets::PubRec { id }) => Ok(state.pubrec(id)?),
		Packet::PubRel(packets::PubRel { id }) => {
			let publish = state.pubrel(id)?;
			deliver(state, publish).await;
			Ok(())
		}
		Packet::PubComp(packets::PubComp { id }) => Ok(state.pubcomp(id)?),
		Packet::SubAck(ack) => Ok(state.suback(ack)?),
		Packet::UnsubAck(ack) => Ok(state.unsuback(ack)?),
		Packet::PingResp => Ok(state.pingresp()?),
		Packet::ConnAck(_) => Err(crate::client::StateError::ProtocolError(
			"duplicate ConnAck after session establishment",
		)
		.into()),
		packet => Err(crate::client::StateError::InvalidPacket(packet.packet_type()).into()),
	}
}

/// Hands an inbound message to the most specific matching subscription.
async fn deliver(state: &SessionState, publish: Publish) {
	let qos = publish.qos();
	let retain = publish.retain();
	let (topic, payload) = match publish {
		Publish::AtMostOnce { topic, payload, .. } => (topic, payload),
		Publish::AtLeastOnce { topic, payload, .. } => (topic, payload),
		Publish::ExactlyOnce { topic, payload, .. } => (topic, payload),
	};

	let Some(channel) = state.route(&topic) else {
		tracing::warn!(topic = %topic, "no subscription matches topic");
		return;
	};

	let message = Message {
		topic,
		payload,
		qos,
		retain,
	};

	if channel.send(message).await.is_err() {
		tracing::warn!("subscription dropped before delivery");
	}
}

/// Four-stage graceful shutdown, each stage bounded by a quarter of the
/// budget: flush in-flight data, send the MQTT Disconnect, send the
/// WebSocket close frame, then drain until the peer hangs up.
async fn shutdown(
	state: &mut SessionState,
	rx: &mut CommandRx,
	connection: &mut WsStream,
	budget: Duration,
) {
	state.disconnecting = true;

	// Reject everything still sitting in the command channel. Submissions
	// racing the disconnect get a distinct error instead of silence.
	rx.close();
	while let Ok(command) = rx.try_recv() {
		match command {
			Command::Disconnect(command) => {
				let _ = command.response.send(());
			}
			command => process_command(state, command),
		}
	}

	let quarter = budget / 4;

	// Stage 1: application data already staged for the wire.
	flush(state, connection, quarter, "in-flight data").await;

	// Stage 2: the MQTT Disconnect packet.
	state.enqueue_packet(&packets::Disconnect);
	flush(state, connection, quarter, "Disconnect packet").await;

	// Stage 3: the WebSocket close frame. Many servers tear the connection
	// down as soon as they see the MQTT Disconnect, so failures here are
	// expected and only logged.
	match time::timeout(quarter, connection.close()).await {
		Ok(Ok(())) => {}
		Ok(Err(error)) => tracing::warn!(error = %error, "failed to send close frame"),
		Err(_) => tracing::warn!("timed out sending close frame"),
	}

	// Stage 4: drain until the peer closes or the budget runs out; the
	// socket is dropped either way.
	let deadline = Instant::now() + quarter;
	loop {
		match time::timeout_at(deadline, connection.read_packet()).await {
			Ok(Ok(Some(packet))) => {
				tracing::debug!(packet = ?packet, "discarding packet during shutdown")
			}
			Ok(Ok(None)) | Ok(Err(_)) => break,
			Err(_) => {
				tracing::debug!("peer did not close the connection within the budget");
				break;
			}
		}
	}
}

async fn flush(
	state: &mut SessionState,
	connection: &mut WsStream,
	budget: Duration,
	what: &str,
) {
	let Some(buffer) = state.buffer() else {
		return;
	};

	match time::timeout(budget, connection.write(buffer)).await {
		Ok(Ok(())) => {}
		Ok(Err(error)) => tracing::warn!(error = %error, "failed to flush {what}"),
		Err(_) => tracing::warn!("timed out flushing {what}"),
	}
}

#[cfg(test)]
mod tests {
	use crate::{
		client::{establish, Client, Options, ServiceError},
		packets::{ConnAck, Connect, PingResp, PubAck, Publish, SerializePacket, SubAck},
		ws::{BoxedStream, WsStream},
		Packet, QoS, TopicBuf,
	};
	use bytes::{Bytes, BytesMut};
	use std::time::Duration;
	use tokio::{task::JoinHandle, time::Instant};
	use tokio_tungstenite::{tungstenite::protocol::Role, WebSocketStream};

	async fn ws_pair() -> (WsStream, WsStream) {
		let (client_end, server_end) = tokio::io::duplex(16 * 1024);
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
		(
			WsStream::from_upgraded(client),
			WsStream::from_upgraded(server),
		)
	}

	async fn send_packet(server: &mut WsStream, packet: &impl SerializePacket) {
		let mut buffer = BytesMut::new();
		packet.serialize_to_bytes(&mut buffer).unwrap();
		server.write(buffer.freeze()).await.unwrap();
	}

	/// Establishes a session against a scripted peer, returning the
	/// Connect packet the peer observed.
	async fn connect_pair(
		options: Options,
	) -> (
		Client,
		JoinHandle<Result<(), ServiceError>>,
		WsStream,
		Connect,
	) {
		let (client_ws, mut server) = ws_pair().await;

		let establish_task = establish(client_ws, &options);
		let server_task = async {
			let Some(Packet::Connect(connect)) = server.read_packet().await.unwrap() else {
				panic!("expected Connect");
			};
			send_packet(
				&mut server,
				&ConnAck {
					session_present: false,
					code: 0,
				},
			)
			.await;
			connect
		};

		let (established, connect) = tokio::join!(establish_task, server_task);
		let (client, handle) = established.unwrap();
		(client, handle, server, connect)
	}

	fn options() -> Options {
		Options {
			client_id: String::from("test"),
			..Options::from(("localhost", 443))
		}
	}

	#[tokio::test]
	async fn connect_requests_a_clean_session() {
		let (_client, _handle, _server, connect) = connect_pair(options()).await;
		assert!(connect.clean_session);
		assert_eq!(connect.client_id, "test");
		assert_eq!(connect.keep_alive, 400);
	}

	#[tokio::test]
	async fn rejected_connack_fails_the_connect() {
		let (client_ws, mut server) = ws_pair().await;

		let opts = options();
		let establish_task = establish(client_ws, &opts);
		let server_task = async {
			let _ = server.read_packet().await.unwrap();
			send_packet(
				&mut server,
				&ConnAck {
					session_present: false,
					code: 5,
				},
			)
			.await;
		};

		let (established, ()) = tokio::join!(establish_task, server_task);
		assert!(matches!(
			established,
			Err(crate::ConnectError::Refused(5))
		));
	}

	#[tokio::test]
	async fn qos1_publish_resolves_with_the_acked_packet_id() {
		let (client, _handle, mut server, _) = connect_pair(options()).await;

		// Submit from another task while the service loop is parked in its
		// select; the command-channel send is the wake-up.
		let publisher = tokio::spawn({
			let client = client.clone();
			async move {
				client
					.publish("a/b", "hi", QoS::AtLeastOnce, false)
					.await
			}
		});

		let Some(Packet::Publish(publish)) = server.read_packet().await.unwrap() else {
			panic!("expected Publish");
		};
		assert_eq!(publish.topic().as_str(), "a/b");
		let id = publish.id().unwrap();
		assert_eq!(id.get(), 1);

		send_packet(&mut server, &PubAck { id }).await;
		assert_eq!(publisher.await.unwrap().unwrap(), Some(id));
	}

	#[tokio::test]
	async fn qos0_publish_completes_without_an_ack() {
		let (client, _handle, mut server, _) = connect_pair(options()).await;

		let id = client
			.publish("a/b", "fire and forget", QoS::AtMostOnce, false)
			.await
			.unwrap();
		assert_eq!(id, None);

		let Some(Packet::Publish(publish)) = server.read_packet().await.unwrap() else {
			panic!("expected Publish");
		};
		assert_eq!(&publish.payload()[..], b"fire and forget");
	}

	#[tokio::test]
	async fn subscription_receives_matching_publishes() {
		let (client, _handle, mut server, _) = connect_pair(options()).await;

		let subscriber = tokio::spawn({
			let client = client.clone();
			async move { client.subscribe(("s/#", QoS::AtLeastOnce), 8).await }
		});

		let Some(Packet::Subscribe(subscribe)) = server.read_packet().await.unwrap() else {
			panic!("expected Subscribe");
		};
		send_packet(
			&mut server,
			&SubAck {
				id: subscribe.id,
				result: vec![Ok(QoS::AtLeastOnce)],
			},
		)
		.await;

		let mut subscription = subscriber.await.unwrap().unwrap();
		assert_eq!(subscription.filters()[0].0.as_str(), "s/#");

		let id = crate::PacketId::new(9).unwrap();
		send_packet(
			&mut server,
			&Publish::AtLeastOnce {
				id,
				retain: false,
				duplicate: false,
				topic: TopicBuf::new("s/x").unwrap(),
				payload: Bytes::from_static(b"42"),
			},
		)
		.await;

		let message = subscription.recv().await.unwrap();
		assert_eq!(message.topic.as_str(), "s/x");
		assert_eq!(&message.payload[..], b"42");
		assert_eq!(message.qos, QoS::AtLeastOnce);

		// The engine acknowledges the delivery on our behalf.
		let Some(Packet::PubAck(puback)) = server.read_packet().await.unwrap() else {
			panic!("expected PubAck");
		};
		assert_eq!(puback.id, id);
	}

	#[tokio::test(start_paused = true)]
	async fn pingreq_is_sent_after_three_quarters_of_the_keep_alive() {
		let (_client, _handle, mut server, _) = connect_pair(Options {
			keep_alive: 10,
			..options()
		})
		.await;

		let started = Instant::now();
		let Some(Packet::PingReq) = server.read_packet().await.unwrap() else {
			panic!("expected PingReq");
		};

		let elapsed = started.elapsed();
		assert!(elapsed >= Duration::from_secs_f64(7.49), "{elapsed:?}");
		assert!(elapsed <= Duration::from_secs(10), "{elapsed:?}");

		// Answering keeps the session alive for another interval.
		send_packet(&mut server, &PingResp).await;
		let Some(Packet::PingReq) = server.read_packet().await.unwrap() else {
			panic!("expected a second PingReq");
		};
	}

	#[tokio::test(start_paused = true)]
	async fn unanswered_pingreq_drops_the_connection() {
		let (_client, handle, mut server, _) = connect_pair(Options {
			keep_alive: 10,
			..options()
		})
		.await;

		let Some(Packet::PingReq) = server.read_packet().await.unwrap() else {
			panic!("expected PingReq");
		};

		// Never answer; the service task gives up at the next deadline.
		assert!(matches!(
			handle.await.unwrap(),
			Err(ServiceError::ConnectionDropped)
		));
	}

	#[tokio::test]
	async fn disconnect_sends_mqtt_disconnect_then_closes() {
		let (client, handle, mut server, _) = connect_pair(options()).await;
		let second = client.clone();

		let disconnecting =
			tokio::spawn(async move { client.disconnect(Duration::from_secs(4)).await });

		let Some(Packet::Disconnect) = server.read_packet().await.unwrap() else {
			panic!("expected Disconnect");
		};

		// The close frame follows; the scripted peer then hangs up.
		assert!(server.read_packet().await.unwrap().is_none());
		drop(server);

		disconnecting.await.unwrap().unwrap();
		handle.await.unwrap().unwrap();

		// A second disconnect after the task has ended is a quiet no-op.
		second.disconnect(Duration::from_secs(1)).await.unwrap();
	}

	#[tokio::test]
	async fn server_to_client_only_packets_end_the_session() {
		let (_client, handle, mut server, _) = connect_pair(options()).await;

		send_packet(
			&mut server,
			&Connect {
				client_id: String::from("bogus"),
				..Default::default()
			},
		)
		.await;

		assert!(matches!(
			handle.await.unwrap(),
			Err(ServiceError::MqttSession(_))
		));
	}
}
