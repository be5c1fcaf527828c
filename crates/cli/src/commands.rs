use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use tracing::info;
use wamp_pool::{
	ConnectionState, EventArgs, HandlerError, HttpTokenProvider, PoolConfig, SessionManager, SessionPool,
	TokenProvider,
};

use crate::cli::{Cli, Commands, ConnectionArgs};

pub async fn dispatch(cli: Cli) -> Result<()> {
	let mut config = load_config(cli.config.as_deref())?;
	let connection = cli.connection;
	config.tls = connection.tls(config.tls);

	match cli.command {
		Commands::Token => token(&config, &connection).await,
		Commands::Subscribe { topics } => {
			with_session(config, &connection, |manager| subscribe(manager, topics)).await
		}
		Commands::Call { procedure, payload } => {
			let payload = payload.as_deref().map(parse_payload);
			with_session(config, &connection, |manager| call(manager, procedure, payload)).await
		}
		Commands::Publish { topic, payload } => {
			let payload = parse_payload(&payload);
			with_session(config, &connection, |manager| async move {
				manager.publish(&topic, payload);
				Ok(())
			})
			.await
		}
	}
}

fn load_config(path: Option<&std::path::Path>) -> Result<PoolConfig> {
	let Some(path) = path else {
		return Ok(PoolConfig::default());
	};
	let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
	serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// JSON when it parses, otherwise the raw text as a string.
pub fn parse_payload(raw: &str) -> Value {
	serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Runs `body` against a connected manager, then shuts the pool down.
async fn with_session<F, Fut>(config: PoolConfig, connection: &ConnectionArgs, body: F) -> Result<()>
where
	F: FnOnce(SessionManager) -> Fut,
	Fut: Future<Output = Result<()>>,
{
	let pool = SessionPool::websocket(config).context("configuring TLS")?;
	let lease = pool.acquire(&connection.key());
	let outcome = match wait_connected(&lease, Duration::from_secs(connection.wait)).await {
		Ok(()) => body(lease.manager().clone()).await,
		Err(err) => Err(err),
	};
	lease.release().await;
	pool.shutdown().await;
	outcome
}

async fn wait_connected(manager: &SessionManager, timeout: Duration) -> Result<()> {
	let mut states = manager.state_changes();
	let reached = tokio::time::timeout(
		timeout,
		states.wait_for(|state| matches!(state, ConnectionState::Connected | ConnectionState::AuthFailed)),
	)
	.await
	.map_err(|_| anyhow!("no session with {} after {}s", manager.key(), timeout.as_secs()))?
	.map(|state| *state)
	.context("session manager stopped")?;

	if reached == ConnectionState::AuthFailed {
		bail!("credentials rejected for {}", manager.key());
	}
	info!(target = "wamp.cli", key = %manager.key(), "connected");
	Ok(())
}

async fn subscribe(manager: SessionManager, topics: Vec<String>) -> Result<()> {
	let handles: Vec<_> = topics
		.into_iter()
		.map(|topic| {
			manager.subscribe(topic, |event: &EventArgs| -> Result<(), HandlerError> {
				println!("{}", serde_json::to_string(&event_line(event))?);
				Ok(())
			})
		})
		.collect();

	tokio::signal::ctrl_c().await.context("waiting for interrupt")?;
	for handle in handles {
		handle.unsubscribe();
	}
	Ok(())
}

fn event_line(event: &EventArgs) -> Value {
	json!({
		"topic": event.topic,
		"args": event.args(),
		"kwargs": event.kwargs(),
	})
}

async fn call(manager: SessionManager, procedure: String, payload: Option<Value>) -> Result<()> {
	let result = manager.call_procedure(&procedure, payload).await?;
	let output = json!({ "args": result.args, "kwargs": result.kwargs });
	println!("{}", serde_json::to_string_pretty(&output)?);
	Ok(())
}

async fn token(config: &PoolConfig, connection: &ConnectionArgs) -> Result<()> {
	let token = HttpTokenProvider::new()
		.with_tls(&config.tls)
		.context("configuring TLS")?
		.fetch_token(&connection.authid, &connection.secret, &connection.endpoint)
		.await?;
	println!("{token}");
	Ok(())
}
