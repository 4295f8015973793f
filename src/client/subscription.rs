use super::command::{Command, CommandTx, UnsubscribeCommand};
use crate::{FilterBuf, QoS, TopicBuf};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

/// A published message received from the Server.
#[derive(Debug)]
pub struct Message {
	/// The topic the message was published to.
	pub topic: TopicBuf,

	/// The payload of the published message.
	pub payload: Bytes,

	/// The quality of service the message was delivered with.
	pub qos: QoS,

	/// Whether the message was a retained message.
	pub retain: bool,
}

/// An active subscription.
///
/// Yields the messages matching the subscription's filters. Dropping the
/// Subscription unsubscribes the filters from the Server.
#[derive(Debug)]
pub struct Subscription {
	tx: CommandTx,
	rx: mpsc::Receiver<Message>,
	filters: Vec<(FilterBuf, QoS)>,
}

impl Subscription {
	pub(crate) fn new(
		filters: Vec<(FilterBuf, QoS)>,
		rx: mpsc::Receiver<Message>,
		tx: CommandTx,
	) -> Self {
		Self { tx, rx, filters }
	}

	/// Receive the next message from the Subscription.
	///
	/// Returns `None` when the session has ended and no further messages
	/// will arrive.
	#[inline]
	pub async fn recv(&mut self) -> Option<Message> {
		let Some(message) = self.rx.recv().await else {
			// The sender half has gone: the session is over. Drain the
			// filters so the Drop impl does nothing.
			self.filters.clear();
			return None;
		};

		Some(message)
	}

	/// Unsubscribe all the filters associated with the Subscription.
	///
	/// This sends an Unsubscribe packet to the Server and waits for the
	/// corresponding UnsubAck.
	pub async fn unsubscribe(mut self) -> Result<(), super::ClientError> {
		let (response, response_rx) = oneshot::channel();

		// Drain the filters so the Drop impl does nothing.
		let filters = self.filters.drain(..).map(|(filter, _)| filter).collect();
		self.tx.send(Command::Unsubscribe(UnsubscribeCommand {
			filters,
			response,
		}))?;

		response_rx.await??;
		Ok(())
	}

	/// Returns a slice of the filters associated with the Subscription.
	#[inline]
	pub fn filters(&self) -> &[(FilterBuf, QoS)] {
		&self.filters
	}
}

impl Drop for Subscription {
	#[inline]
	fn drop(&mut self) {
		if !self.filters.is_empty() {
			let (response, _) = oneshot::channel();
			let _ = self.tx.send(Command::Unsubscribe(UnsubscribeCommand {
				filters: self.filters.drain(..).map(|(filter, _)| filter).collect(),
				response,
			}));
		}
	}
}
