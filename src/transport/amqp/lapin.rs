//! AMQP broker implementation using `lapin`.
//!
//! This module maps the domain-level `BrokerConnection` and `BrokerChannel`
//! traits one-to-one onto a lapin `Connection` and its `Channel`s.
//!
//! ## Concurrency model
//!
//! lapin connections and channels are internally synchronized, so the
//! conductor components call into them directly from their own tasks. The
//! only background work added here is one bridge task per consumer, which
//! moves lapin deliveries into the `Deliveries` inbox and stops when either
//! side goes away.
//!
//! ## Message semantics
//!
//! - Publishes go through the default exchange with the queue name as the
//!   routing key.
//! - The content type of each publish is carried in the basic properties and
//!   surfaced again on delivery.
//! - Acknowledgement mode is whatever the caller asks for in
//!   `ConsumeOptions`; the conductor always uses auto-ack.

use lapin::{
    //
    options::{
        //
        BasicConsumeOptions,
        BasicPublishOptions,
        BasicQosOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties,
    Channel,
    Connection,
    ConnectionProperties,
};

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    BrokerChannel,
    BrokerConnection,
    ChannelPtr,
    ConductorError,
    ConnectionPtr,
    ConsumeOptions,
    Deliveries,
    Delivery,
    Publishing,
    QueueOptions,
    Result,
};

const NORMAL_SHUTDOWN: u16 = 200;

/// AMQP connection backed by lapin.
struct LapinConnection {
    // ---
    connection: Connection,
}

/// AMQP channel backed by lapin.
struct LapinChannel {
    // ---
    channel: Channel,
}

#[async_trait::async_trait]
impl BrokerConnection for LapinConnection {
    // ---
    async fn open_channel(&self) -> Result<ChannelPtr> {
        // ---
        let channel = self.connection.create_channel().await.map_err(|e| {
            let msg = format!("amqp: channel creation failed: {e}");
            log_error!("{msg}");
            ConductorError::Broker(msg)
        })?;

        log_debug!("Created AMQP channel {}", channel.id());
        Ok(Arc::new(LapinChannel { channel }))
    }

    async fn close(&self) -> Result<()> {
        // ---
        if !self.connection.status().connected() {
            return Ok(());
        }

        self.connection
            .close(NORMAL_SHUTDOWN, "Normal shutdown".into())
            .await
            .map_err(|e| ConductorError::Broker(format!("amqp: connection close failed: {e}")))?;

        log_info!("Closed AMQP connection");
        Ok(())
    }
}

#[async_trait::async_trait]
impl BrokerChannel for LapinChannel {
    // ---
    async fn declare_queue(&self, queue: &str, opts: QueueOptions) -> Result<()> {
        // ---
        let queue_opts = QueueDeclareOptions {
            passive: false,
            durable: opts.durable,
            exclusive: opts.exclusive,
            auto_delete: opts.auto_delete,
            nowait: false,
        };

        self.channel
            .queue_declare(queue.into(), queue_opts, FieldTable::default())
            .await
            .map_err(|e| ConductorError::Broker(format!("amqp: queue declare failed: {e}")))?;

        log_debug!("Declared queue: {queue}");
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        // ---
        self.channel
            .basic_qos(count, BasicQosOptions { global: false })
            .await
            .map_err(|e| ConductorError::Broker(format!("amqp: qos failed: {e}")))
    }

    async fn consume(&self, queue: &str, opts: ConsumeOptions) -> Result<Deliveries> {
        // ---
        let consume_opts = BasicConsumeOptions {
            no_ack: opts.auto_ack,
            exclusive: opts.exclusive,
            ..BasicConsumeOptions::default()
        };

        let consumer = self
            .channel
            .basic_consume(
                queue.into(),
                "".into(), // broker-generated consumer tag
                consume_opts,
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConductorError::Broker(format!("amqp: consume failed: {e}")))?;

        log_info!("Started consuming queue: {queue}");

        let (tx, rx) = mpsc::unbounded_channel();
        let queue = queue.to_string();

        tokio::spawn(async move {
            use futures_lite::stream::StreamExt;

            let mut consumer = consumer;
            loop {
                let next = tokio::select! {
                    next = consumer.next() => next,
                    _ = tx.closed() => break,
                };

                match next {
                    Some(Ok(delivery)) => {
                        let content_type = delivery
                            .properties
                            .content_type()
                            .as_ref()
                            .map(|ct| Arc::from(ct.as_str()));

                        let forwarded = Delivery {
                            body: delivery.data.into(),
                            content_type,
                        };
                        if tx.send(forwarded).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        log_error!("Consumer error on {queue}: {e}");
                        break;
                    }
                    None => break,
                }
            }

            log_debug!("Consumer task ended for queue: {queue}");
        });

        Ok(Deliveries { inbox: rx })
    }

    async fn publish(&self, queue: &str, msg: Publishing) -> Result<()> {
        // ---
        let publish_opts = BasicPublishOptions {
            mandatory: msg.mandatory,
            immediate: msg.immediate,
        };
        let properties =
            BasicProperties::default().with_content_type(msg.content_type.to_string().into());

        self.channel
            .basic_publish(
                "".into(),    // default exchange
                queue.into(), // routing key = queue name
                publish_opts,
                &msg.body,
                properties,
            )
            .await
            .map_err(|e| ConductorError::Broker(format!("amqp: publish failed: {e}")))?;

        log_debug!("Published to queue: {queue}");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        if !self.channel.status().connected() {
            return Ok(());
        }

        self.channel
            .close(NORMAL_SHUTDOWN, "Normal shutdown".into())
            .await
            .map_err(|e| ConductorError::Broker(format!("amqp: channel close failed: {e}")))
    }
}

/// Dial an AMQP broker.
///
/// # Errors
///
/// Returns [`ConductorError::Connection`] if the URI cannot be parsed or the
/// broker cannot be reached.
pub async fn connect(uri: &str) -> Result<ConnectionPtr> {
    // ---
    log_info!("Connecting to AMQP broker");

    let connection = Connection::connect(uri, ConnectionProperties::default())
        .await
        .map_err(|e| {
            let msg = format!("amqp: connection failed: {e}");
            log_error!("{msg}");
            ConductorError::Connection(msg)
        })?;

    log_info!("Connected to AMQP broker");

    Ok(Arc::new(LapinConnection { connection }))
}
