// ============================================================================
// Kafka Transport Adapter
// ============================================================================
//
// Broker-backed implementation of the Transport trait.
//
// Producer settings follow the reliability profile used across the platform:
// - acks=all, enable.idempotence=true: at-least-once without producer dupes
// - bounded publish timeout: a publish while disconnected fails fast
// - snappy compression, small linger window for low latency
//
// Subscriptions use one StreamConsumer each with manual offset commits:
// the offset is committed only after the handler future completes, so a
// crash mid-handling redelivers the message (at-least-once).
//
// ============================================================================

use anyhow::{Context, Result};
use fleet_config::BrokerConfig;
use fleet_error::CoreError;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::Message;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{MessageHandler, Transport};
use crate::metrics;

/// Kafka-backed transport adapter.
pub struct KafkaTransport {
    producer: FutureProducer,
    config: BrokerConfig,
}

/// Build a client config shared by producers and consumers: bootstrap
/// servers plus optional SSL/SASL.
fn create_client_config(config: &BrokerConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &config.brokers);
    client_config.set("security.protocol", "plaintext");

    if config.ssl_enabled {
        info!("Enabling SSL/TLS for broker connection");
        client_config.set("security.protocol", "ssl");
    }

    if let (Some(mechanism), Some(username), Some(password)) = (
        &config.sasl_mechanism,
        &config.sasl_username,
        &config.sasl_password,
    ) {
        info!(sasl_mechanism = %mechanism, "Configuring SASL authentication");
        client_config
            .set("sasl.mechanism", mechanism)
            .set("sasl.username", username)
            .set("sasl.password", password);
        client_config.set(
            "security.protocol",
            if config.ssl_enabled {
                "sasl_ssl"
            } else {
                "sasl_plaintext"
            },
        );
    }

    client_config
}

impl KafkaTransport {
    /// Connect to the broker with bounded retries.
    ///
    /// Each attempt creates the producer and fetches cluster metadata to
    /// verify the broker is actually reachable; attempts are separated by a
    /// fixed delay. After `connect_max_attempts` failures the service is
    /// declared unreachable and construction fails.
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match Self::try_connect(config) {
                Ok(transport) => {
                    info!(brokers = %config.brokers, attempt, "Connected to broker");
                    return Ok(transport);
                }
                Err(e) if attempt < config.connect_max_attempts => {
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts = config.connect_max_attempts,
                        "Broker connection attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(config.connect_retry_delay_ms)).await;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        attempts = attempt,
                        "Broker unreachable, giving up"
                    );
                    return Err(e).context("broker unreachable after bounded retries");
                }
            }
        }
    }

    fn try_connect(config: &BrokerConfig) -> Result<Self> {
        let producer: FutureProducer = create_client_config(config)
            .set("acks", &config.producer_acks)
            .set(
                "enable.idempotence",
                if config.producer_enable_idempotence {
                    "true"
                } else {
                    "false"
                },
            )
            .set("compression.type", &config.producer_compression)
            .set("linger.ms", config.producer_linger_ms.to_string())
            .set(
                "request.timeout.ms",
                config.producer_request_timeout_ms.to_string(),
            )
            .create()
            .context("Failed to create broker producer")?;

        // Reachability check: metadata fetch fails when no broker answers.
        producer
            .client()
            .fetch_metadata(None, Duration::from_secs(5))
            .context("Failed to fetch broker metadata")?;

        Ok(Self {
            producer,
            config: config.clone(),
        })
    }

    /// Flush in-flight publishes (graceful shutdown).
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer
            .flush(Timeout::After(timeout))
            .context("Failed to flush producer")?;
        info!("Producer flushed");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for KafkaTransport {
    async fn publish(&self, destination: &str, payload: Vec<u8>) -> Result<(), CoreError> {
        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(destination).payload(&payload);

        let start = std::time::Instant::now();
        let send = self.producer.send(
            record,
            Timeout::After(Duration::from_millis(self.config.publish_timeout_ms)),
        );

        match send.await {
            Ok((partition, offset)) => {
                metrics::PUBLISH_SUCCESS.inc();
                metrics::PUBLISH_LATENCY.observe(start.elapsed().as_secs_f64());
                tracing::debug!(
                    destination = %destination,
                    partition,
                    offset,
                    "Envelope published"
                );
                Ok(())
            }
            Err((kafka_err, _)) => {
                metrics::PUBLISH_FAILURE.inc();
                error!(
                    error = %kafka_err,
                    destination = %destination,
                    latency_ms = start.elapsed().as_millis(),
                    "Publish failed"
                );
                Err(CoreError::transport(format!(
                    "publish to '{}' failed: {}",
                    destination, kafka_err
                )))
            }
        }
    }

    async fn subscribe(&self, destination: &str, handler: MessageHandler) -> Result<(), CoreError> {
        let consumer: StreamConsumer = create_client_config(&self.config)
            .set("group.id", &self.config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("allow.auto.create.topics", "true")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .create()
            .map_err(|e| CoreError::transport(format!("failed to create consumer: {}", e)))?;

        consumer
            .subscribe(&[destination])
            .map_err(|e| CoreError::transport(format!("failed to subscribe: {}", e)))?;

        info!(
            destination = %destination,
            group = %self.config.consumer_group,
            "Subscribed to destination"
        );

        let destination = destination.to_string();
        tokio::spawn(async move {
            loop {
                match consumer.recv().await {
                    Ok(message) => {
                        let payload = message.payload().map(|p| p.to_vec()).unwrap_or_default();
                        // Ack only after the handler finishes, so a crash
                        // mid-handling redelivers the message.
                        handler(payload).await;
                        if let Err(e) = consumer.commit_consumer_state(CommitMode::Async) {
                            warn!(error = %e, destination = %destination, "Offset commit failed");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, destination = %destination, "Consumer error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(())
    }
}
