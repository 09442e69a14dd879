// src/conductor/inbound.rs

//! Inbound stream adapter.
//!
//! Opens a dedicated channel and consumer on one queue and bridges its
//! deliveries into an `mpsc` stream of raw payloads. The bridge task owns the
//! channel and closes it, together with the output stream, on every exit path:
//! cancellation, broker-side consumer loss, or the reader going away.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    // ---
    log_debug,
    log_error,
    ChannelPtr,
    ConnectionPtr,
    ConsumeOptions,
    Deliveries,
    QueueOptions,
    Result,
};

/// Prefetch limit applied to every conductor consumer.
pub(crate) const PREFETCH: u16 = 1;

/// Raw payload stream produced by [`open_inbound`].
pub(crate) type PayloadStream = mpsc::Receiver<Bytes>;

/// Open a consumer on `queue` and stream its payloads until `ctx` is cancelled.
///
/// Any failure while setting up the consumer yields a stream that is already
/// closed, so readers see end-of-stream instead of waiting forever.
pub(crate) async fn open_inbound(
    connection: &ConnectionPtr,
    ctx: CancellationToken,
    queue: &str,
) -> PayloadStream {
    // ---
    match try_open_inbound(connection, ctx, queue).await {
        Ok(stream) => stream,
        Err(e) => {
            log_error!("unable to open consumer on {queue}: {e}");
            let (_, rx) = mpsc::channel(1);
            rx
        }
    }
}

/// Like [`open_inbound`], but reports setup failures to the caller.
pub(crate) async fn try_open_inbound(
    connection: &ConnectionPtr,
    ctx: CancellationToken,
    queue: &str,
) -> Result<PayloadStream> {
    // ---
    let channel = connection.open_channel().await?;

    let deliveries = match register_consumer(&channel, queue).await {
        Ok(deliveries) => deliveries,
        Err(e) => {
            let _ = channel.close().await;
            return Err(e);
        }
    };

    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(bridge(ctx, channel, deliveries, tx, queue.to_string()));
    Ok(rx)
}

async fn register_consumer(channel: &ChannelPtr, queue: &str) -> Result<Deliveries> {
    // ---
    channel.declare_queue(queue, QueueOptions::durable()).await?;
    channel.set_prefetch(PREFETCH).await?;
    channel.consume(queue, ConsumeOptions::auto_ack()).await
}

async fn bridge(
    ctx: CancellationToken,
    channel: ChannelPtr,
    mut deliveries: Deliveries,
    out: mpsc::Sender<Bytes>,
    queue: String,
) {
    // ---
    log_debug!("inbound bridge started for {queue}");

    loop {
        let delivery = tokio::select! {
            _ = ctx.cancelled() => break,
            delivery = deliveries.inbox.recv() => delivery,
        };

        // Upstream closed: consumer cancelled or connection lost.
        let Some(delivery) = delivery else {
            log_debug!("deliveries on {queue} ended");
            break;
        };

        tokio::select! {
            _ = ctx.cancelled() => break,
            sent = out.send(delivery.body) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    if let Err(_e) = channel.close().await {
        log_debug!("closing channel for {queue}: {_e}");
    }
    drop(out);
    log_debug!("inbound bridge stopped for {queue}");
}
