use super::Message;
use crate::{
	misc::WrappingNonZeroU16,
	packets::{self, Publish, SerializePacket, SubAck, UnsubAck},
	FilterBuf, PacketId, PacketType, QoS, Topic,
};
use bytes::{Bytes, BytesMut};
use tokio::{sync::{mpsc, oneshot}, time::Instant};
use std::{collections::HashMap, time::Duration};

pub(crate) type PublishResponse = oneshot::Sender<Result<Option<PacketId>, StateError>>;
pub(crate) type SubscribeResponse = oneshot::Sender<Result<Vec<(FilterBuf, QoS)>, StateError>>;
pub(crate) type UnsubscribeResponse = oneshot::Sender<Result<(), StateError>>;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
	#[error("unsolicited {0:?}")]
	Unsolicited(PacketType),
	/// The Client received a packet that the Server should not send.
	#[error("the server may not send {0:?}")]
	InvalidPacket(PacketType),
	#[error("protocol error: {0}")]
	ProtocolError(&'static str),
	#[error("client is disconnecting")]
	Disconnecting,
}

/// Session state owned by the service task.
///
/// Tracks in-flight requests by packet id, the active subscriptions inbound
/// Publish packets are routed against, and the staging buffer outbound
/// packets are encoded into before the transport flush.
#[derive(Debug)]
pub(crate) struct SessionState {
	/// Active subscriptions. All incoming Publish packets are matched
	/// against these filters.
	subscriptions: Vec<Subscription>,

	/// Encoded outbound packets awaiting the next transport flush.
	pub outgoing: BytesMut,

	/// Incoming QoS 2 Publish packets held until the Server releases them
	/// with PubRel.
	incoming: HashMap<PacketId, Publish>,

	publish_state: HashMap<PacketId, PublishState>,
	subscribe_state: HashMap<PacketId, SubscribeState>,
	unsubscribe_state: HashMap<PacketId, UnsubscribeState>,

	publish_packet_id: WrappingNonZeroU16,
	subscribe_packet_id: WrappingNonZeroU16,
	unsubscribe_packet_id: WrappingNonZeroU16,

	pub keep_alive: Duration,

	// This is Some if there is an unanswered PingReq.
	pub pingreq_sent: Option<Instant>,

	/// Set once a disconnect has begun. New publishes and subscribes are
	/// rejected from that point on.
	pub disconnecting: bool,
}

#[derive(Debug)]
struct Subscription {
	filter: FilterBuf,
	qos: QoS,
	channel: mpsc::Sender<Message>,
}

#[derive(Debug)]
enum PublishState {
	Ack { response: PublishResponse },
	Rec { response: PublishResponse },
	Comp { response: PublishResponse },
}

#[derive(Debug)]
struct SubscribeState {
	filters: Vec<(FilterBuf, QoS)>,
	channel: mpsc::Sender<Message>,
	response: SubscribeResponse,
}

#[derive(Debug)]
struct UnsubscribeState {
	filters: Vec<FilterBuf>,
	response: UnsubscribeResponse,
}

impl SessionState {
	pub fn new(keep_alive: Duration) -> Self {
		Self {
			subscriptions: Vec::new(),
			outgoing: BytesMut::new(),
			incoming: HashMap::new(),
			publish_state: HashMap::new(),
			subscribe_state: HashMap::new(),
			unsubscribe_state: HashMap::new(),
			publish_packet_id: WrappingNonZeroU16::MAX,
			subscribe_packet_id: WrappingNonZeroU16::MAX,
			unsubscribe_packet_id: WrappingNonZeroU16::MAX,
			keep_alive,
			pingreq_sent: None,
			disconnecting: false,
		}
	}

	pub fn enqueue_packet(&mut self, packet: &impl SerializePacket) {
		packet
			.serialize_to_bytes(&mut self.outgoing)
			.expect("serializing to BytesMut should not fail");
	}

	/// Takes the staged outbound bytes, if any.
	pub fn buffer(&mut self) -> Option<Bytes> {
		(!self.outgoing.is_empty()).then(|| self.outgoing.split().freeze())
	}

	#[inline]
	pub fn keep_alive_enabled(&self) -> bool {
		!self.keep_alive.is_zero()
	}

	/// Generates an outgoing Publish packet.
	///
	/// QoS 0 completes immediately; QoS 1 and 2 park the response until the
	/// matching PubAck or PubComp arrives.
	pub fn publish(
		&mut self,
		topic: crate::TopicBuf,
		payload: Bytes,
		qos: QoS,
		retain: bool,
		response: PublishResponse,
	) {
		if self.disconnecting {
			let _ = response.send(Err(StateError::Disconnecting));
			return;
		}

		match qos {
			QoS::AtMostOnce => {
				self.enqueue_packet(&Publish::AtMostOnce {
					retain,
					topic,
					payload,
				});
				let _ = response.send(Ok(None));
			}
			QoS::AtLeastOnce => {
				let id = self.generate_publish_id();
				self.enqueue_packet(&Publish::AtLeastOnce {
					id,
					retain,
					duplicate: false,
					topic,
					payload,
				});
				self.publish_state
					.insert(id, PublishState::Ack { response });
			}
			QoS::ExactlyOnce => {
				let id = self.generate_publish_id();
				self.enqueue_packet(&Publish::ExactlyOnce {
					id,
					retain,
					duplicate: false,
					topic,
					payload,
				});
				self.publish_state
					.insert(id, PublishState::Rec { response });
			}
		}
	}

	/// Handles an incoming PubAck packet.
	pub fn puback(&mut self, id: PacketId) -> Result<(), StateError> {
		let Some(PublishState::Ack { response }) = self.publish_state.remove(&id) else {
			return Err(StateError::Unsolicited(PacketType::PubAck));
		};

		let _ = response.send(Ok(Some(id)));
		Ok(())
	}

	/// Handles an incoming PubRec packet.
	pub fn pubrec(&mut self, id: PacketId) -> Result<(), StateError> {
		let Some(PublishState::Rec { response }) = self.publish_state.remove(&id) else {
			return Err(StateError::Unsolicited(PacketType::PubRec));
		};

		self.publish_state
			.insert(id, PublishState::Comp { response });

		// Queue the outgoing PubRel packet.
		self.enqueue_packet(&packets::PubRel { id });
		Ok(())
	}

	/// Handles an incoming PubComp packet.
	pub fn pubcomp(&mut self, id: PacketId) -> Result<(), StateError> {
		let Some(PublishState::Comp { response }) = self.publish_state.remove(&id) else {
			return Err(StateError::Unsolicited(PacketType::PubComp));
		};

		let _ = response.send(Ok(Some(id)));
		Ok(())
	}

	/// Stores an incoming QoS 2 Publish and queues the PubRec reply. The
	/// message is not delivered until the Server sends PubRel.
	pub fn store_exactly_once(&mut self, publish: Publish) -> Result<(), StateError> {
		let Some(id) = publish.id() else {
			return Err(StateError::ProtocolError(
				"Publish with QoS of ExactlyOnce must carry a packet id",
			));
		};

		self.incoming.insert(id, publish);
		self.enqueue_packet(&packets::PubRec { id });
		Ok(())
	}

	/// Handles an incoming PubRel packet, releasing the held message.
	pub fn pubrel(&mut self, id: PacketId) -> Result<Publish, StateError> {
		let Some(publish) = self.incoming.remove(&id) else {
			return Err(StateError::Unsolicited(PacketType::PubRel));
		};

		self.enqueue_packet(&packets::PubComp { id });
		Ok(publish)
	}

	pub fn subscribe(
		&mut self,
		filters: Vec<(FilterBuf, QoS)>,
		channel: mpsc::Sender<Message>,
		response: SubscribeResponse,
	) {
		if self.disconnecting {
			let _ = response.send(Err(StateError::Disconnecting));
			return;
		}

		let id = self.generate_subscribe_id();
		self.enqueue_packet(&packets::Subscribe {
			id,
			filters: filters.clone(),
		});

		self.subscribe_state.insert(
			id,
			SubscribeState {
				filters,
				channel,
				response,
			},
		);
	}

	/// Handles an incoming SubAck packet.
	pub fn suback(&mut self, ack: SubAck) -> Result<(), StateError> {
		let SubAck { id, result } = ack;

		// Confirm we have an active subscribe request for the SubAck id.
		let Some(SubscribeState {
			filters,
			channel,
			response,
		}) = self.subscribe_state.remove(&id)
		else {
			return Err(StateError::Unsolicited(PacketType::SubAck));
		};

		if result.len() != filters.len() {
			return Err(StateError::ProtocolError(
				"SubAck payload length does not correspond to Subscribe payload length",
			));
		}

		let granted: Vec<_> = result
			.into_iter()
			.zip(filters)
			.filter_map(|(result_qos, (filter, _))| {
				let qos = result_qos.ok()?;
				Some((filter, qos))
			})
			.collect();

		'outer: for (filter, qos) in &granted {
			// If the filter matches an already subscribed filter, replace it.
			for subscription in self.subscriptions.iter_mut() {
				if &subscription.filter == filter {
					tracing::warn!(filter = %filter, "replacing existing filter subscription");
					subscription.qos = *qos;
					subscription.channel = channel.clone();
					continue 'outer;
				}
			}

			// Otherwise, append to the set of active subscriptions.
			self.subscriptions.push(Subscription {
				filter: filter.clone(),
				qos: *qos,
				channel: channel.clone(),
			});
		}

		let _ = response.send(Ok(granted));
		Ok(())
	}

	pub fn unsubscribe(&mut self, filters: Vec<FilterBuf>, response: UnsubscribeResponse) {
		if self.disconnecting {
			let _ = response.send(Err(StateError::Disconnecting));
			return;
		}

		let id = self.generate_unsubscribe_id();
		self.enqueue_packet(&packets::Unsubscribe {
			id,
			filters: filters.clone(),
		});

		self.unsubscribe_state
			.insert(id, UnsubscribeState { filters, response });
	}

	/// Handles an incoming UnsubAck packet.
	pub fn unsuback(&mut self, ack: UnsubAck) -> Result<(), StateError> {
		let UnsubAck { id } = ack;

		let Some(UnsubscribeState { filters, response }) = self.unsubscribe_state.remove(&id)
		else {
			return Err(StateError::Unsolicited(PacketType::UnsubAck));
		};

		// Remove the filters from the active subscriptions.
		self.subscriptions
			.retain(|subscription| !filters.contains(&subscription.filter));

		let _ = response.send(Ok(()));
		Ok(())
	}

	/// Handles an incoming PingResp packet.
	pub fn pingresp(&mut self) -> Result<(), StateError> {
		let Some(sent) = self.pingreq_sent.take() else {
			return Err(StateError::Unsolicited(PacketType::PingResp));
		};

		tracing::debug!(elapsed = ?sent.elapsed(), "PingResp received");
		Ok(())
	}

	/// Finds the channel of the most specific subscription matching `topic`.
	pub fn route(&self, topic: &Topic) -> Option<&mpsc::Sender<Message>> {
		self.subscriptions
			.iter()
			.filter_map(|Subscription { filter, channel, .. }| {
				filter
					.matches_topic(topic)
					.map(|matches| (matches.score(), channel))
			})
			.max_by_key(|(score, _)| *score)
			.map(|(_, channel)| channel)
	}

	fn generate_publish_id(&mut self) -> PacketId {
		loop {
			self.publish_packet_id += 1;
			if !self
				.publish_state
				.contains_key(&self.publish_packet_id.get())
			{
				break;
			}
		}
		self.publish_packet_id.get()
	}

	fn generate_subscribe_id(&mut self) -> PacketId {
		loop {
			self.subscribe_packet_id += 1;
			if !self
				.subscribe_state
				.contains_key(&self.subscribe_packet_id.get())
			{
				break;
			}
		}
		self.subscribe_packet_id.get()
	}

	fn generate_unsubscribe_id(&mut self) -> PacketId {
		loop {
			self.unsubscribe_packet_id += 1;
			if !self
				.unsubscribe_state
				.contains_key(&self.unsubscribe_packet_id.get())
			{
				break;
			}
		}
		self.unsubscribe_packet_id.get()
	}
}

#[cfg(test)]
mod tests {
	use super::{SessionState, StateError};
	use crate::{packets::SubAck, FilterBuf, QoS, Topic, TopicBuf};
	use bytes::Bytes;
	use std::time::Duration;
	use tokio::sync::{mpsc, oneshot};

	fn state() -> SessionState {
		SessionState::new(Duration::from_secs(400))
	}

	fn topic(s: &str) -> TopicBuf {
		TopicBuf::new(s).unwrap()
	}

	#[test]
	fn qos0_publish_completes_immediately() {
		let mut state = state();
		let (tx, mut rx) = oneshot::channel();

		state.publish(topic("a/b"), Bytes::from_static(b"x"), QoS::AtMostOnce, false, tx);

		assert!(matches!(rx.try_recv(), Ok(Ok(None))));
		assert!(state.buffer().is_some());
	}

	#[test]
	fn qos1_publish_completes_on_puback() {
		let mut state = state();
		let (tx, mut rx) = oneshot::channel();

		state.publish(topic("a/b"), Bytes::from_static(b"x"), QoS::AtLeastOnce, false, tx);

		// Nothing resolved until the ack arrives; the first id is 1.
		assert!(rx.try_recv().is_err());
		let id = crate::PacketId::new(1).unwrap();
		state.puback(id).unwrap();
		assert_eq!(rx.try_recv().unwrap().unwrap(), Some(id));
	}

	#[test]
	fn unsolicited_acks_are_errors() {
		let mut state = state();
		let id = crate::PacketId::new(9).unwrap();

		assert!(matches!(
			state.puback(id),
			Err(StateError::Unsolicited(crate::PacketType::PubAck))
		));
		assert!(matches!(
			state.pubrel(id),
			Err(StateError::Unsolicited(crate::PacketType::PubRel))
		));
	}

	#[test]
	fn qos2_publish_runs_the_rec_comp_exchange() {
		let mut state = state();
		let (tx, mut rx) = oneshot::channel();

		state.publish(topic("a"), Bytes::from_static(b"x"), QoS::ExactlyOnce, false, tx);
		let id = crate::PacketId::new(1).unwrap();

		state.pubrec(id).unwrap();
		assert!(rx.try_recv().is_err());

		state.pubcomp(id).unwrap();
		assert_eq!(rx.try_recv().unwrap().unwrap(), Some(id));
	}

	#[test]
	fn disconnecting_rejects_submissions() {
		let mut state = state();
		state.disconnecting = true;

		let (tx, mut rx) = oneshot::channel();
		state.publish(topic("a"), Bytes::new(), QoS::AtMostOnce, false, tx);
		assert!(matches!(rx.try_recv(), Ok(Err(StateError::Disconnecting))));

		let (tx, mut rx) = oneshot::channel();
		let (channel, _keep) = mpsc::channel(1);
		state.subscribe(vec![(FilterBuf::new("a/#").unwrap(), QoS::AtMostOnce)], channel, tx);
		assert!(matches!(rx.try_recv(), Ok(Err(StateError::Disconnecting))));

		let (tx, mut rx) = oneshot::channel();
		state.unsubscribe(vec![FilterBuf::new("a/#").unwrap()], tx);
		assert!(matches!(rx.try_recv(), Ok(Err(StateError::Disconnecting))));

		// Nothing was staged for the wire.
		assert!(state.buffer().is_none());
	}

	#[test]
	fn suback_activates_granted_filters_only() {
		let mut state = state();
		let (tx, mut rx) = oneshot::channel();
		let (channel, _keep) = mpsc::channel(1);

		state.subscribe(
			vec![
				(FilterBuf::new("s/#").unwrap(), QoS::AtLeastOnce),
				(FilterBuf::new("t/+").unwrap(), QoS::AtLeastOnce),
			],
			channel,
			tx,
		);

		let id = crate::PacketId::new(1).unwrap();
		state
			.suback(SubAck {
				id,
				result: vec![Ok(QoS::AtLeastOnce), Err(crate::packets::SubscribeFailed)],
			})
			.unwrap();

		let granted = rx.try_recv().unwrap().unwrap();
		assert_eq!(granted.len(), 1);
		assert_eq!(granted[0].0.as_str(), "s/#");

		assert!(state.route(Topic::from_static("s/x")).is_some());
		assert!(state.route(Topic::from_static("t/x")).is_none());
	}

	#[test]
	fn route_prefers_the_most_specific_filter() {
		let mut state = state();
		let (wide_tx, _wide_rx) = mpsc::channel(1);
		let (narrow_tx, _narrow_rx) = mpsc::channel::<super::Message>(1);

		for (filter, channel) in [("s/#", wide_tx), ("s/x", narrow_tx.clone())] {
			let (tx, _rx) = oneshot::channel();
			state.subscribe(
				vec![(FilterBuf::new(filter).unwrap(), QoS::AtMostOnce)],
				channel,
				tx,
			);
		}

		for id in 1..=2u16 {
			state
				.suback(SubAck {
					id: crate::PacketId::new(id).unwrap(),
					result: vec![Ok(QoS::AtMostOnce)],
				})
				.unwrap();
		}

		let channel = state.route(Topic::from_static("s/x")).unwrap();
		assert!(channel.same_channel(&narrow_tx));
	}
}
