use super::{
	command::{
		Command, CommandTx, DisconnectCommand, PublishCommand, SubscribeCommand,
		UnsubscribeCommand,
	},
	conv::{Filters, FiltersWithQoS},
	state::StateError,
	Subscription,
};
use crate::{InvalidFilter, InvalidTopic, PacketId, QoS, TopicBuf};
use bytes::Bytes;
use core::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Handle to a connected MQTT session.
///
/// The handle is cheap to clone and may be used from any task or thread;
/// submissions are serialized onto the service task through its command
/// channel.
#[derive(Clone, Debug)]
pub struct Client {
	tx: CommandTx,
}

#[derive(Debug, Error)]
pub enum ClientError {
	#[error("client task closed")]
	ClientTaskClosed,
	#[error("request rejected: {0}")]
	Rejected(#[from] StateError),
	#[error("invalid filter(s): {0}")]
	InvalidFilter(#[from] InvalidFilter),
	#[error("invalid topic: {0}")]
	InvalidTopic(#[from] InvalidTopic),
}

impl Client {
	pub(crate) fn new(tx: CommandTx) -> Self {
		Self { tx }
	}

	/// Sends a Publish packet with the provided topic and payload to the
	/// Server.
	///
	/// With a QoS of [`AtMostOnce`] the call returns `None` as soon as the
	/// packet has been handed to the service task for transmission. With
	/// [`AtLeastOnce`] it returns the assigned packet id once the matching
	/// PubAck has arrived, and with [`ExactlyOnce`] once the exchange has
	/// completed with PubComp.
	///
	/// # Example
	/// ```no_run
	/// # tokio_test::block_on(async {
	/// use mqtt_ws::{client, QoS};
	/// let (client, handle) = client::connect(("broker.example", 443).into()).await.unwrap();
	///
	/// let packet_id = client
	/// 	.publish("a/b", "Hello, world!", QoS::AtLeastOnce, false)
	/// 	.await
	/// 	.unwrap();
	/// println!("acknowledged as {packet_id:?}");
	/// # })
	/// ```
	///
	/// [`AtMostOnce`]: QoS#variant.AtMostOnce
	/// [`AtLeastOnce`]: QoS#variant.AtLeastOnce
	/// [`ExactlyOnce`]: QoS#variant.ExactlyOnce
	#[inline]
	pub async fn publish<T, E>(
		&self,
		topic: T,
		payload: impl Into<Bytes> + fmt::Debug,
		qos: QoS,
		retain: bool,
	) -> Result<Option<PacketId>, ClientError>
	where
		T: TryInto<TopicBuf, Error = E>,
		ClientError: From<E>,
	{
		self.publish_impl(topic.try_into()?, payload.into(), qos, retain)
			.await
	}

	async fn publish_impl(
		&self,
		topic: TopicBuf,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	) -> Result<Option<PacketId>, ClientError> {
		let (response, response_rx) = oneshot::channel();

		self.tx.send(Command::Publish(PublishCommand {
			topic,
			payload,
			qos,
			retain,
			response,
		}))?;

		Ok(response_rx.await??)
	}

	/// Sends a Subscribe packet with the requested filters to the Server.
	///
	/// Upon receiving the corresponding SubAck, returns a [`Subscription`]
	/// yielding the messages received for the granted filters. The
	/// subscription buffers up to `buffer` undelivered messages.
	///
	/// # Example
	/// ```no_run
	/// # tokio_test::block_on(async {
	/// # use core::str::from_utf8;
	/// use mqtt_ws::client;
	/// let (client, handle) = client::connect(("broker.example", 443).into()).await.unwrap();
	///
	/// let mut subscription = client.subscribe("a/b", 8).await.unwrap();
	/// while let Some(message) = subscription.recv().await {
	/// 	println!(
	/// 		"{}: {}",
	/// 		message.topic,
	/// 		from_utf8(&message.payload).unwrap_or_default()
	/// 	);
	/// }
	/// # })
	/// ```
	#[inline]
	pub async fn subscribe<T, E>(
		&self,
		filters: T,
		buffer: usize,
	) -> Result<Subscription, ClientError>
	where
		T: TryInto<FiltersWithQoS, Error = E>,
		ClientError: From<E>,
	{
		self.subscribe_impl(filters.try_into()?, buffer).await
	}

	async fn subscribe_impl(
		&self,
		filters: FiltersWithQoS,
		buffer: usize,
	) -> Result<Subscription, ClientError> {
		let FiltersWithQoS(filters) = filters;

		let (response, response_rx) = oneshot::channel();
		let (publish_tx, publish_rx) = mpsc::channel(buffer);

		self.tx.send(Command::Subscribe(SubscribeCommand {
			filters,
			channel: publish_tx,
			response,
		}))?;

		let granted = response_rx.await??;
		Ok(Subscription::new(granted, publish_rx, self.tx.clone()))
	}

	/// Sends an Unsubscribe packet with `filters` to the Server and waits
	/// for the corresponding UnsubAck.
	#[inline]
	pub async fn unsubscribe<T, E>(&self, filters: T) -> Result<(), ClientError>
	where
		T: TryInto<Filters, Error = E>,
		ClientError: From<E>,
	{
		self.unsubscribe_impl(filters.try_into()?).await
	}

	async fn unsubscribe_impl(&self, filters: Filters) -> Result<(), ClientError> {
		let Filters(filters) = filters;

		let (response, response_rx) = oneshot::channel();
		self.tx.send(Command::Unsubscribe(UnsubscribeCommand {
			filters,
			response,
		}))?;

		response_rx.await??;
		Ok(())
	}

	/// Disconnects from the Server gracefully.
	///
	/// The service task flushes in-flight data, sends the MQTT Disconnect
	/// packet followed by a WebSocket close frame, and waits for the Server
	/// to hang up, with each stage bounded by a quarter of `timeout`.
	///
	/// Disconnecting is idempotent: once the session has ended, further
	/// calls return without error.
	pub async fn disconnect(self, timeout: std::time::Duration) -> Result<(), ClientError> {
		let (response, response_rx) = oneshot::channel();

		if self
			.tx
			.send(Command::Disconnect(DisconnectCommand { timeout, response }))
			.is_err()
		{
			// The service task has already ended.
			return Ok(());
		}

		let _ = response_rx.await;
		Ok(())
	}
}

// Lets infallible conversions satisfy the TryInto bounds.
impl From<std::convert::Infallible> for ClientError {
	fn from(_: std::convert::Infallible) -> Self {
		unreachable!()
	}
}

impl<T> From<mpsc::error::SendError<T>> for ClientError {
	fn from(_: mpsc::error::SendError<T>) -> Self {
		Self::ClientTaskClosed
	}
}

impl From<oneshot::error::RecvError> for ClientError {
	fn from(_: oneshot::error::RecvError) -> Self {
		Self::ClientTaskClosed
	}
}
