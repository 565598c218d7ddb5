//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "binary"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Publish, subscribe and echo commands."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use ezmb_bus::topic::subscriber_id;
use ezmb_bus::{Endpoint, EndpointHandle, Frame, FrameHandler, Publisher, Subscriber};
use ezmb_common::{shutdown_signal, BusAddresses};
use ezmb_logging::hex_dump;
use tracing::{info, warn};

/// Subscriptions need a moment to reach the relay before the first send.
const CONNECT_GRACE: Duration = Duration::from_millis(200);
const RECV_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Args)]
pub struct PublishArgs {
    #[arg(short, long, help = "Topic to publish under, e.g. `ttyusb0_south_topic`")]
    topic: String,

    #[arg(help = "Payload; interpreted as hex with --hex")]
    payload: String,

    #[arg(long, help = "Decode the payload from hex")]
    hex: bool,

    #[arg(short = 'n', long, default_value_t = 1, help = "Number of times to publish")]
    count: u32,

    #[arg(long, default_value_t = 1000, help = "Delay between repeated publishes, ms")]
    interval_ms: u64,

    #[command(flatten)]
    bus: BusAddresses,
}

#[derive(Debug, Args)]
pub struct SubscribeArgs {
    #[arg(short, long = "topic", help = "Topic prefix to follow; repeatable, all traffic when omitted")]
    topics: Vec<String>,

    #[arg(short = 'n', long, help = "Exit after this many frames")]
    count: Option<u64>,

    #[command(flatten)]
    bus: BusAddresses,
}

#[derive(Debug, Args)]
pub struct EchoArgs {
    #[arg(short, long, default_value = "mon1", help = "Endpoint uid")]
    uid: String,

    #[command(flatten)]
    bus: BusAddresses,
}

pub fn decode_payload(payload: &str, is_hex: bool) -> Result<Vec<u8>> {
    let bytes = if is_hex {
        let compact: String = payload.split_whitespace().collect();
        hex::decode(compact).context("payload is not valid hex")?
    } else {
        payload.as_bytes().to_vec()
    };
    if bytes.is_empty() {
        bail!("payload must not be empty");
    }
    Ok(bytes)
}

/// Explanation to print when `topic` is not delivered to any endpoint.
pub fn topic_warning(topic: &str) -> Option<String> {
    match subscriber_id(topic) {
        Some(_) => None,
        None => Some(format!(
            "topic '{topic}' is not an endpoint subscribe-topic (`<uid>_south_topic`); \
             endpoints will not receive it"
        )),
    }
}

pub async fn publish(args: PublishArgs) -> Result<()> {
    let payload = decode_payload(&args.payload, args.hex)?;
    if let Some(message) = topic_warning(&args.topic) {
        warn!("{message}");
    }
    let publisher = Publisher::connect(&args.bus.north)
        .with_context(|| format!("failed to connect to {}", args.bus.north))?;
    tokio::time::sleep(CONNECT_GRACE).await;

    for sent in 1..=args.count {
        publisher
            .publish(args.topic.as_bytes(), &payload)
            .context("publish failed")?;
        info!(topic = %args.topic, bytes = payload.len(), sent, "published");
        if sent < args.count {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }
    // Give the transport a chance to flush before the socket is dropped.
    tokio::time::sleep(CONNECT_GRACE).await;
    Ok(())
}

fn print_frame(frame: &Frame) {
    println!(
        "[{}] {} bytes\n{}",
        frame.topic_str(),
        frame.payload.len(),
        hex_dump(&frame.payload)
    );
}

pub async fn subscribe(args: SubscribeArgs) -> Result<()> {
    let topics: Vec<String> = if args.topics.is_empty() {
        vec![String::new()]
    } else {
        args.topics
    };
    let subscriber = Subscriber::connect(&args.bus.south, &topics[..])
        .with_context(|| format!("failed to connect to {}", args.bus.south))?;
    let running = Arc::new(AtomicBool::new(true));
    let limit = args.count;

    let flag = Arc::clone(&running);
    let mut receiver = tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut received = 0u64;
        while flag.load(Ordering::Acquire) && limit.map_or(true, |limit| received < limit) {
            if let Some(frame) = subscriber.recv_timeout(RECV_SLICE)? {
                print_frame(&frame);
                received += 1;
            }
        }
        Ok(received)
    });

    let received = tokio::select! {
        joined = &mut receiver => joined.context("subscriber task failed")??,
        _ = shutdown_signal() => {
            running.store(false, Ordering::Release);
            receiver.await.context("subscriber task failed")??
        }
    };
    info!(received, "subscriber finished");
    Ok(())
}

fn echo_handler() -> FrameHandler {
    Arc::new(|frame: &Frame, endpoint: &EndpointHandle| {
        print_frame(frame);
        if let Err(err) = endpoint.send(&frame.payload) {
            warn!(error = %err, "echo send failed");
        }
    })
}

pub async fn echo(args: EchoArgs) -> Result<()> {
    let mut endpoint = Endpoint::create(&args.uid, &args.bus, Some(echo_handler()))
        .with_context(|| format!("failed to create endpoint {}", args.uid))?;
    endpoint.listen()?;
    info!(
        uid = %args.uid,
        listening = %endpoint.topics().subscribe,
        replying = %endpoint.topics().publish,
        "echo endpoint running"
    );
    shutdown_signal().await;
    tokio::task::spawn_blocking(move || endpoint.stop())
        .await
        .context("echo shutdown failed")?;
    Ok(())
}
