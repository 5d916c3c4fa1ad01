//! # Conveyor broker
//!
//! Thin wrapper around an AMQP broker implementing the topology in spec
//! §4.2: a durable direct `new-jobs` exchange feeding one durable work
//! queue (round-robin across workers, prefetch 1, manual ack), and a
//! non-durable topic `completed-jobs` exchange each subscriber binds its own
//! exclusive, auto-delete queue to with key `#`.

mod config;

pub use config::BrokerConfig;

use anyhow::{Context, Result};
use async_trait::async_trait;
use conveyor_core::{topology, JobStatus, UnprocessedJob};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use tokio::sync::watch;

/// Which role a connection plays — consumers declare and bind their own
/// queues, publishers only need a channel to publish on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Consumer,
    Publisher,
}

/// A single AMQP connection plus the channel, queues and close-notification
/// plumbing Conveyor needs.
pub struct BrokerClient {
    connection: Connection,
    channel: Channel,
    new_job_queue_name: Option<String>,
    completed_job_queue_name: Option<String>,
    closed: watch::Receiver<bool>,
}

impl BrokerClient {
    /// Connects to the broker, declares both exchanges, and — for
    /// [`ConnectionRole::Consumer`] — declares and binds the new-jobs work
    /// queue and a fresh exclusive completed-jobs queue.
    pub async fn connect(cfg: &BrokerConfig, role: ConnectionRole) -> Result<Self> {
        cfg.validate().map_err(|e| anyhow::anyhow!(e))?;

        let connection =
            Connection::connect(&cfg.connection_url(), ConnectionProperties::default())
                .await
                .context("could not open AMQP connection")?;

        let (tx, rx) = watch::channel(false);
        connection.on_error(move |_err| {
            let _ = tx.send(true);
        });

        let channel = connection
            .create_channel()
            .await
            .context("could not open AMQP channel")?;
        channel
            .basic_qos(1, Default::default())
            .await
            .context("could not set channel QoS")?;

        channel
            .exchange_declare(
                topology::NEW_JOB_EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("could not declare new-jobs exchange")?;

        channel
            .exchange_declare(
                topology::COMPLETED_JOB_EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("could not declare completed-jobs exchange")?;

        let mut new_job_queue_name = None;
        let mut completed_job_queue_name = None;

        if role == ConnectionRole::Consumer {
            let new_job_queue = channel
                .queue_declare(
                    topology::NEW_JOB_QUEUE,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .context("could not declare new-jobs queue")?;
            channel
                .queue_bind(
                    new_job_queue.name().as_str(),
                    topology::NEW_JOB_EXCHANGE,
                    "",
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .context("could not bind new-jobs queue")?;
            new_job_queue_name = Some(new_job_queue.name().to_string());

            let completed_job_queue = channel
                .queue_declare(
                    "",
                    QueueDeclareOptions {
                        durable: false,
                        exclusive: true,
                        auto_delete: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .context("could not declare completed-jobs queue")?;
            channel
                .queue_bind(
                    completed_job_queue.name().as_str(),
                    topology::COMPLETED_JOB_EXCHANGE,
                    "#",
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .context("could not bind completed-jobs queue")?;
            completed_job_queue_name = Some(completed_job_queue.name().to_string());
        }

        Ok(Self {
            connection,
            channel,
            new_job_queue_name,
            completed_job_queue_name,
            closed: rx,
        })
    }

    /// Resolves when the underlying AMQP connection closes unexpectedly.
    /// The owning component is expected to treat this as fatal and exit
    /// (spec §4.2, §5) — the supervising environment restarts it.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    pub async fn close(&self) -> Result<()> {
        self.connection
            .close(0, "shutting down")
            .await
            .context("closing AMQP connection failed")
    }

    /// Publishes `job` to `new-jobs` with persistent delivery and `mandatory=true`.
    pub async fn publish_new_job(&self, job: &UnprocessedJob) -> Result<()> {
        self.publish(topology::NEW_JOB_EXCHANGE, "", job).await
    }

    /// Publishes `status` to `completed-jobs`, routed by outcome.
    pub async fn publish_completion(&self, status: &JobStatus) -> Result<()> {
        self.publish(
            topology::COMPLETED_JOB_EXCHANGE,
            status.routing_key(),
            status,
        )
        .await
    }

    async fn publish<T: serde::Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        data: &T,
    ) -> Result<()> {
        let body = serde_json::to_vec(data).context("could not serialize message body")?;
        let properties = BasicProperties::default()
            .with_delivery_mode(2) // persistent
            .with_content_type("application/json".into())
            .with_timestamp(chrono::Utc::now().timestamp() as u64);

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    immediate: false,
                },
                &body,
                properties,
            )
            .await
            .context("AMQP publish failed")?
            .await
            .context("AMQP publish was not confirmed")?;

        Ok(())
    }

    /// Starts consuming from the durable `new-jobs` work queue with manual
    /// ack (prefetch is fixed at 1 for the whole channel, see `connect`).
    pub async fn consume_new_jobs(&self, consumer_tag: &str) -> Result<Consumer> {
        let queue = self
            .new_job_queue_name
            .as_deref()
            .context("new-jobs queue is only available on consumer connections")?;
        self.channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("could not start consuming new jobs")
    }

    /// Starts consuming from this connection's exclusive `completed-jobs`
    /// subscription.
    pub async fn consume_completions(&self, consumer_tag: &str) -> Result<Consumer> {
        let queue = self
            .completed_job_queue_name
            .as_deref()
            .context("completed-jobs queue is only available on consumer connections")?;
        self.channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("could not start consuming completions")
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .context("ack failed")
    }

    pub async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.channel
            .basic_nack(delivery_tag, BasicNackOptions { requeue, multiple: false })
            .await
            .context("nack failed")
    }
}

/// The publishing half of [`BrokerClient`], abstracted so the server
/// backend can be driven by an in-memory double in tests (spec §8).
#[async_trait]
pub trait JobBus: Send + Sync {
    async fn publish_new_job(&self, job: &UnprocessedJob) -> Result<()>;
    async fn publish_completion(&self, status: &JobStatus) -> Result<()>;
}

#[async_trait]
impl JobBus for BrokerClient {
    async fn publish_new_job(&self, job: &UnprocessedJob) -> Result<()> {
        BrokerClient::publish_new_job(self, job).await
    }

    async fn publish_completion(&self, status: &JobStatus) -> Result<()> {
        BrokerClient::publish_completion(self, status).await
    }
}
