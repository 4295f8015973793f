use clap::{Parser, Subcommand, ValueEnum};
use mqtt_ws::{client, Credentials, Options, QoS};
use std::{io::stdin, process, str::from_utf8, time::Duration};
use tokio::{io, signal, task::JoinHandle};
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main(flavor = "current_thread")]
async fn main() -> mqtt_ws::Result<()> {
	setup_tracing()?;

	let arguments = Arguments::parse();
	let Arguments { command, qos, .. } = arguments;

	let options = Options {
		host: arguments.host,
		port: arguments.port.unwrap_or(443),
		path: arguments.path,
		tls: !arguments.no_tls,
		accept_invalid_certs: arguments.insecure,
		keep_alive: arguments.keep_alive,
		client_id: arguments.id.unwrap_or_else(build_client_id),
		credentials: arguments.username.map(|username| Credentials {
			username,
			password: arguments.password,
		}),
		will: None,
	};

	// Establish the session; this resolves once the broker has accepted
	// the connection with ConnAck.
	let (client, handle) = client::connect(options).await?;

	match command {
		Commands::Sub { topics, .. } => {
			let qos: QoS = qos.into();

			// Create a subscription to the provided topics.
			let mut subscription = client.subscribe((topics, qos), 8).await?;

			let signal_handler: JoinHandle<io::Result<()>> = {
				let client = client.clone();
				tokio::spawn(async move {
					signal::ctrl_c().await?;
					let timeout = tokio::time::sleep(EXIT_TIMEOUT);
					tokio::pin!(timeout);
					tokio::select! {
						_ = timeout => {
							tracing::warn!("disconnect timed-out, exiting");
							process::exit(1);
						}
						_ = client.disconnect(EXIT_TIMEOUT) => {}
					};
					Ok(())
				})
			};

			// Receive messages ... until the session ends.
			while let Some(message) = subscription.recv().await {
				println!(
					"{}: {}",
					message.topic,
					from_utf8(&message.payload).unwrap_or_default()
				);
			}

			signal_handler.await??;
		}
		Commands::Pub {
			count,
			retain,
			topic,
			payload,
			..
		} => {
			match payload {
				Some(payload) => {
					// The user has supplied the payload as a command-line
					// argument. Publish the payload `count` times.
					let payload = payload.into_bytes();
					for _ in 0..count.unwrap_or(1) {
						client
							.publish(topic.as_str(), payload.clone(), qos.into(), retain)
							.await?;
					}
				}
				None => {
					// The user has *not* supplied a payload on the
					// command-line. Read lines from stdin, and publish upto
					// `count` times if specified or until end-of-stream.
					for (n, line) in stdin().lines().enumerate() {
						if let Some(max) = count {
							if n == max {
								break;
							}
						}
						let buffer = line?.trim_end_matches('\n').as_bytes().to_vec();
						client
							.publish(topic.as_str(), buffer, qos.into(), retain)
							.await?;
					}
				}
			}

		}
	}

	client.disconnect(EXIT_TIMEOUT).await?;
	handle.await??;

	Ok(())
}

fn setup_tracing() -> Result<(), SetGlobalDefaultError> {
	let filter = EnvFilter::builder()
		.with_default_directive(LevelFilter::ERROR.into())
		.with_env_var("MQTT_WS_LOG")
		.try_from_env();

	let subscriber = tracing_subscriber::fmt()
		.with_file(true)
		.with_target(false)
		.with_env_filter(filter.unwrap_or_default())
		.finish();

	tracing::subscriber::set_global_default(subscriber)
}

fn build_client_id() -> String {
	format!(
		"{}/{}:{}",
		env!("CARGO_PKG_NAME"),
		env!("CARGO_PKG_VERSION"),
		process::id()
	)
}

#[derive(Debug, Parser)]
#[clap(version, author)]
struct Arguments {
	#[command(subcommand)]
	command: Commands,

	/// MQTT broker to connect to.
	#[arg(
		long,
		short = 'H',
		global = true,
		default_value = "localhost",
		env = "MQTT_HOST"
	)]
	host: String,

	/// Port of the broker's WebSocket listener.
	#[arg(long, short, global = true, env = "MQTT_PORT")]
	port: Option<u16>,

	/// HTTP resource the WebSocket handshake requests.
	#[arg(long, global = true, default_value = "/mqtt")]
	path: String,

	/// ID to use for this client.
	#[arg(long, short = 'i', global = true, env = "MQTT_ID")]
	id: Option<String>,

	/// Username to authenticate with.
	#[arg(long, short = 'u', global = true, env = "MQTT_USERNAME")]
	username: Option<String>,

	/// Password to authenticate with.
	#[arg(long, global = true, env = "MQTT_PASSWORD", hide_env_values = true)]
	password: Option<String>,

	/// Keep-alive timeout, in seconds.
	#[arg(short = 'k', global = true, default_value = "400")]
	keep_alive: u16,

	#[arg(
		long,
		value_enum,
		global = true,
		default_value = "qos0",
		rename_all = "lower"
	)]
	qos: InputQoS,

	/// Connect over plain TCP instead of TLS.
	#[arg(long, global = true)]
	no_tls: bool,

	/// Skip server certificate verification.
	#[arg(long, global = true)]
	insecure: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Subscribe to a topic
	Sub {
		#[arg(from_global)]
		host: String,

		#[arg(from_global)]
		port: Option<u16>,

		#[arg(from_global)]
		id: Option<String>,

		#[arg(from_global)]
		keep_alive: u16,

		#[arg(from_global)]
		qos: InputQoS,

		#[clap(default_value = "#")]
		topics: Vec<String>,
	},
	/// Publish to a topic
	Pub {
		#[arg(from_global)]
		host: String,

		#[arg(from_global)]
		port: Option<u16>,

		#[arg(from_global)]
		id: Option<String>,

		#[arg(from_global)]
		keep_alive: u16,

		#[arg(from_global)]
		qos: InputQoS,

		/// Publish the message as retained.
		#[arg(long)]
		retain: bool,

		#[arg(long, short = 'C')]
		count: Option<usize>,

		topic: String,

		payload: Option<String>,
	},
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InputQoS {
	Qos0,
	Qos1,
	Qos2,
}

impl From<InputQoS> for QoS {
	fn from(value: InputQoS) -> Self {
		match value {
			InputQoS::Qos0 => QoS::AtMostOnce,
			InputQoS::Qos1 => QoS::AtLeastOnce,
			InputQoS::Qos2 => QoS::ExactlyOnce,
		}
	}
}
