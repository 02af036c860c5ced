use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use metrics::{counter, gauge};
use rdkafka::error::KafkaError;
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::config::KafkaConfig;
use crate::event::LogEvent;
use crate::sinks::BrokerSink;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("failed to serialize event: {error}")]
    SerializationError { error: serde_json::Error },
    #[error("failed to produce to kafka: {error}")]
    ProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    ProduceCanceled,
}

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();

        gauge!("audit_log_kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("audit_log_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("audit_log_kafka_producer_queue_bytes").set(stats.msg_size as f64);
    }
}

pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
}

impl KafkaSink {
    pub fn new(config: &KafkaConfig, liveness: HealthHandle) -> Result<KafkaSink, KafkaError> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set(
                "compression.codec",
                config.kafka_compression_codec.to_owned(),
            )
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            )
            .set(
                "queue.buffering.max.messages",
                config.kafka_producer_queue_messages.to_string(),
            );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext { liveness })?;

        // Ping the cluster to make sure we can reach brokers, fail after 10 seconds
        drop(
            producer
                .client()
                .fetch_metadata(None, Timeout::After(Duration::from_secs(10)))?,
        );
        info!("connected to Kafka brokers");

        Ok(KafkaSink { producer })
    }

    async fn process_ack(delivery: DeliveryFuture) -> Result<(), BrokerError> {
        match delivery.await {
            Err(_) => {
                // Cancelled due to timeout while retrying
                counter!("audit_log_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka before write timeout");
                Err(BrokerError::ProduceCanceled)
            }
            Ok(Err((error, _))) => {
                counter!("audit_log_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka: {}", error);
                Err(BrokerError::ProduceError { error })
            }
            Ok(Ok(_)) => {
                counter!("audit_log_events_published_total").increment(1);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl BrokerSink for KafkaSink {
    #[instrument(skip_all, fields(topic = %event.topic, action = %event.action))]
    async fn publish(&self, event: &LogEvent) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(&event.broker_message())
            .map_err(|error| BrokerError::SerializationError { error })?;

        let ack = match self.producer.send_result(FutureRecord {
            topic: event.topic.as_str(),
            payload: Some(&payload),
            partition: None,
            key: None::<&str>,
            timestamp: None,
            headers: None,
        }) {
            Ok(ack) => ack,
            Err((error, _)) => {
                error!("failed to produce event: {}", error);
                return Err(BrokerError::ProduceError { error });
            }
        };

        Self::process_ack(ack).await
    }

    fn flush(&self) -> Result<(), BrokerError> {
        self.producer
            .flush(Duration::from_secs(30))
            .map_err(|error| BrokerError::ProduceError { error })
    }
}
