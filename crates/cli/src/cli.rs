use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand};
use wamp_pool::{PoolKey, TlsOptions};

const HELP_STYLES: Styles = Styles::styled()
	.header(AnsiColor::Green.on_default().bold())
	.usage(AnsiColor::Green.on_default().bold())
	.literal(AnsiColor::Cyan.on_default())
	.placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "wamp-pool")]
#[command(about = "Pooled WAMP sessions from the command line")]
#[command(version)]
#[command(styles = HELP_STYLES)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Pool configuration file (JSON, durations in milliseconds)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(flatten)]
	pub connection: ConnectionArgs,

	#[command(subcommand)]
	pub command: Commands,
}

/// Identity of the session to open.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
	/// Router WebSocket address
	#[arg(long, global = true, env = "WAMP_ENDPOINT", default_value = "ws://localhost:8080/ws")]
	pub endpoint: String,

	/// Realm to join
	#[arg(long, global = true, env = "WAMP_REALM", default_value = "realm1")]
	pub realm: String,

	/// Principal used for ticket authentication
	#[arg(long, global = true, env = "WAMP_AUTHID", default_value = "admin")]
	pub authid: String,

	/// Secret exchanged for a ticket at the login endpoint
	#[arg(long, global = true, env = "WAMP_SECRET", hide_env_values = true, default_value = "")]
	pub secret: String,

	/// Seconds to wait for the session before giving up
	#[arg(long, global = true, value_name = "SECS", default_value_t = 15)]
	pub wait: u64,

	/// Extra PEM trust anchors for wss:// and the login endpoint
	#[arg(long, global = true, env = "WAMP_CA_FILE", value_name = "FILE")]
	pub ca_file: Option<PathBuf>,

	/// Skip server certificate verification (self-signed devices)
	#[arg(long, global = true)]
	pub accept_invalid_certs: bool,
}

impl ConnectionArgs {
	pub fn key(&self) -> PoolKey {
		PoolKey::new(&self.endpoint, &self.realm, &self.authid, &self.secret)
	}

	/// Layers the TLS flags over the options from the config file.
	pub fn tls(&self, mut tls: TlsOptions) -> TlsOptions {
		if let Some(ca_file) = &self.ca_file {
			tls.ca_file = Some(ca_file.clone());
		}
		tls.accept_invalid_certs |= self.accept_invalid_certs;
		tls
	}
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Print events from one or more topics as JSON lines until interrupted
	Subscribe {
		#[arg(required = true)]
		topics: Vec<String>,
	},

	/// Call a procedure and print its result
	Call {
		procedure: String,
		/// JSON payload: an array for positional args, an object for keyword args
		payload: Option<String>,
	},

	/// Publish one event
	Publish {
		topic: String,
		/// JSON payload; non-JSON text is sent as a string
		payload: String,
	},

	/// Fetch a ticket from the login endpoint and print it
	Token,
}
