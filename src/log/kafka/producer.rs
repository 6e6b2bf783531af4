use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseRecord, DefaultProducerContext, Producer as RdProducer, ThreadedProducer};
use std::time::Duration;

use super::{Forwarder, KafkaConfig, Producer, ProducerError};

/// rdkafka-backed producer polled on its own background thread
pub struct KafkaProducer {
    inner: ThreadedProducer<DefaultProducerContext>,
}

impl KafkaProducer {
    pub fn new(addrs: &[String]) -> Result<Self, ProducerError> {
        let inner: ThreadedProducer<DefaultProducerContext> = ClientConfig::new()
            .set("bootstrap.servers", addrs.join(","))
            .set("acks", "0")
            .set("compression.codec", "snappy")
            .set("queue.buffering.max.messages", "1024")
            .create()
            .map_err(|e| ProducerError::Transport(e.to_string()))?;
        Ok(KafkaProducer { inner })
    }
}

/// Connects to the configured brokers and wraps the producer in a hook
pub fn connect(config: &KafkaConfig) -> Result<Forwarder<KafkaProducer>, ProducerError> {
    let producer = KafkaProducer::new(&config.addrs)?;
    Ok(Forwarder::new(producer, config))
}

impl Producer for KafkaProducer {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ProducerError> {
        let record = BaseRecord::<(), [u8]>::to(topic).payload(&payload[..]);
        self.inner.send(record).map_err(|(err, _)| match err {
            KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => ProducerError::QueueFull,
            other => ProducerError::Transport(other.to_string()),
        })
    }

    fn flush(&self, timeout: Duration) -> Result<(), ProducerError> {
        self.inner
            .flush(timeout)
            .map_err(|e| ProducerError::Transport(e.to_string()))
    }

    fn close(&self) -> Result<(), ProducerError> {
        // the background poll thread stops when the producer is dropped
        Ok(())
    }
}
