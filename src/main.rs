//! Subline CLI - publish, subscribe and send requests from the shell.
//!
//! This is the main binary entry point. See the `subline` library for the
//! client itself.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use subline::{Client, ClientOptions, Message, SubscribeOptions, TimeoutOptions};
use tokio::sync::mpsc;

/// Server used when neither `--server` nor `SUBLINE_SERVER` is given.
const DEFAULT_SERVER: &str = "nats://127.0.0.1:4222";

/// Deadline for the initial handshake and publish acknowledgements.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

// CLI
#[derive(Parser)]
#[command(name = "subline")]
#[command(version)]
#[command(about = "Publish/subscribe client for line-protocol message servers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Connection flags shared by every subcommand.
#[derive(Args)]
struct ServerArgs {
    /// Server URI (scheme://[user[:pass]@]host[:port])
    #[arg(long, env = "SUBLINE_SERVER", default_value = DEFAULT_SERVER)]
    server: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one message
    Pub {
        /// Subject to publish on
        subject: String,
        /// Message body
        #[arg(default_value = "")]
        payload: String,
        /// Reply subject attached to the message
        #[arg(long)]
        reply: Option<String>,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Print messages received on a subject
    Sub {
        /// Subject to subscribe to (wildcards allowed)
        subject: String,
        /// Join a queue group
        #[arg(long)]
        queue: Option<String>,
        /// Exit after this many messages
        #[arg(long)]
        count: Option<u64>,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Send a request and print the first reply
    Request {
        /// Subject to send the request to
        subject: String,
        /// Request body
        #[arg(default_value = "")]
        payload: String,
        /// Give up after this many milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
        #[command(flatten)]
        server: ServerArgs,
    },
}

/// Things the client reports back to the command loop.
enum Event {
    Message(Message),
    Failed(String),
    TimedOut,
}

/// Create a client whose errors are forwarded to `events`, and connect it.
async fn connect(server: &ServerArgs, events: &mpsc::UnboundedSender<Event>) -> Result<Client> {
    let client = Client::new(ClientOptions::from_env());

    let errors = events.clone();
    client.on_error(move |err| {
        log::error!("{}", err);
        if err.is_connection() {
            let _ = errors.send(Event::Failed(err.to_string()));
        }
    });

    client
        .start(&server.server)
        .await
        .with_context(|| format!("Failed to connect to {}", server.server))?;
    Ok(client)
}

/// Wait until the server has processed everything sent so far.
async fn round_trip(client: &Client) -> Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    client.flush(move || {
        let _ = tx.send(());
    });
    tokio::time::timeout(ACK_TIMEOUT, rx)
        .await
        .context("Timed out waiting for the server")?
        .context("Connection closed before the server answered")
}

fn print_message(message: &Message) {
    match &message.reply {
        Some(reply) => println!(
            "[{}] (reply: {}) {}",
            message.subject,
            reply,
            message.payload_str()
        ),
        None => println!("[{}] {}", message.subject, message.payload_str()),
    }
}

async fn run_pub(subject: &str, payload: &str, reply: Option<&str>, server: &ServerArgs) -> Result<()> {
    let (events, _rx) = mpsc::unbounded_channel();
    let client = connect(server, &events).await?;

    match reply {
        Some(reply) => client.publish_with_reply(subject, reply, payload),
        None => client.publish(subject, payload),
    }
    round_trip(&client).await?;

    println!("Published [{}] : '{}'", subject, payload);
    client.stop();
    Ok(())
}

async fn run_sub(
    subject: &str,
    queue: Option<String>,
    count: Option<u64>,
    server: &ServerArgs,
) -> Result<()> {
    let (events, mut rx) = mpsc::unbounded_channel();
    let client = connect(server, &events).await?;

    let options = SubscribeOptions { queue, max: count };
    let messages = events.clone();
    client.subscribe_with(subject, options, move |message| {
        let _ = messages.send(Event::Message(message));
    });
    round_trip(&client).await?;
    log::info!("Listening on [{}]", subject);

    let mut received = 0u64;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(Event::Message(message)) => {
                    received += 1;
                    print_message(&message);
                    if count.is_some_and(|count| received >= count) {
                        break;
                    }
                }
                Some(Event::Failed(reason)) => {
                    client.stop();
                    anyhow::bail!(reason);
                }
                Some(Event::TimedOut) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
        }
    }

    client.stop();
    Ok(())
}

async fn run_request(subject: &str, payload: &str, timeout_ms: u64, server: &ServerArgs) -> Result<()> {
    anyhow::ensure!(!subject.is_empty(), "Subject must not be empty");
    let (events, mut rx) = mpsc::unbounded_channel();
    let client = connect(server, &events).await?;

    let replies = events.clone();
    let sid = client.request(subject, payload, SubscribeOptions::max(1), move |message| {
        let _ = replies.send(Event::Message(message));
    });

    let timeouts = events.clone();
    client.timeout(
        sid,
        Duration::from_millis(timeout_ms),
        TimeoutOptions::default(),
        move |_| {
            let _ = timeouts.send(Event::TimedOut);
        },
    );

    let outcome = match rx.recv().await {
        Some(Event::Message(message)) => {
            print_message(&message);
            Ok(())
        }
        Some(Event::TimedOut) => Err(anyhow::anyhow!(
            "No reply on [{}] within {}ms",
            subject,
            timeout_ms
        )),
        Some(Event::Failed(reason)) => Err(anyhow::anyhow!(reason)),
        None => Err(anyhow::anyhow!("Client shut down")),
    };

    client.stop();
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Pub {
            subject,
            payload,
            reply,
            server,
        } => run_pub(&subject, &payload, reply.as_deref(), &server).await,
        Commands::Sub {
            subject,
            queue,
            count,
            server,
        } => run_sub(&subject, queue, count, &server).await,
        Commands::Request {
            subject,
            payload,
            timeout_ms,
            server,
        } => run_request(&subject, &payload, timeout_ms, &server).await,
    }
}
