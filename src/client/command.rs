use super::{
	state::{PublishResponse, SubscribeResponse, UnsubscribeResponse},
	Message,
};
use crate::{FilterBuf, QoS, TopicBuf};
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub(crate) type CommandTx = mpsc::UnboundedSender<Command>;
pub(crate) type CommandRx = mpsc::UnboundedReceiver<Command>;

/// Requests submitted to the service task.
///
/// Sending on the command channel is also the wake-up mechanism: it makes
/// the service task's `select!` immediately ready, however long it has been
/// parked waiting for socket traffic.
#[derive(Debug)]
pub(crate) enum Command {
	Publish(PublishCommand),
	Subscribe(SubscribeCommand),
	Unsubscribe(UnsubscribeCommand),
	Disconnect(DisconnectCommand),
}

#[derive(Debug)]
pub(crate) struct PublishCommand {
	pub topic: TopicBuf,
	pub payload: Bytes,
	pub qos: QoS,
	pub retain: bool,
	pub response: PublishResponse,
}

#[derive(Debug)]
pub(crate) struct SubscribeCommand {
	pub filters: Vec<(FilterBuf, QoS)>,
	pub channel: mpsc::Sender<Message>,
	pub response: SubscribeResponse,
}

#[derive(Debug)]
pub(crate) struct UnsubscribeCommand {
	pub filters: Vec<FilterBuf>,
	pub response: UnsubscribeResponse,
}

#[derive(Debug)]
pub(crate) struct DisconnectCommand {
	pub timeout: Duration,
	pub response: oneshot::Sender<()>,
}
