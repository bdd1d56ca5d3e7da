//! Topic provisioning.
//!
//! Administrative setup, not part of the runtime hot path: make sure the
//! input topic and the changelog topic exist before the pipeline starts.
//! Partition count fixes the unit of parallelism and of key affinity,
//! so it is explicit per topic.

use keyfold_core::log::LogError;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::types::RDKafkaErrorCode;

/// Shape of one topic to provision.
#[derive(Clone, Debug)]
pub struct TopicSpec {
    /// Topic name.
    pub name: String,
    /// Number of partitions.
    pub partitions: i32,
    /// Replication factor.
    pub replication: i32,
}

impl TopicSpec {
    /// Describe a topic.
    #[must_use]
    pub fn new(name: impl Into<String>, partitions: i32, replication: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication,
        }
    }
}

/// Create the given topics if they do not exist yet.
///
/// An already-existing topic is not an error; its existing partition
/// count and replication are left untouched.
///
/// # Errors
///
/// Returns [`LogError::ConnectionFailed`] if the admin client cannot be
/// created or the broker rejects the request for any reason other than
/// the topic already existing.
pub async fn ensure_topics(brokers: &str, topics: &[TopicSpec]) -> Result<(), LogError> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .create()
        .map_err(|e| LogError::ConnectionFailed(format!("failed to create admin client: {e}")))?;

    let new_topics: Vec<NewTopic<'_>> = topics
        .iter()
        .map(|spec| {
            NewTopic::new(
                &spec.name,
                spec.partitions,
                TopicReplication::Fixed(spec.replication),
            )
        })
        .collect();

    let results = admin
        .create_topics(&new_topics, &AdminOptions::new())
        .await
        .map_err(|e| LogError::ConnectionFailed(format!("topic creation failed: {e}")))?;

    for result in results {
        match result {
            Ok(name) => {
                tracing::info!(topic = %name, "topic created");
            }
            Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                tracing::debug!(topic = %name, "topic already exists");
            }
            Err((name, code)) => {
                return Err(LogError::ConnectionFailed(format!(
                    "failed to create topic '{name}': {code}"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_spec_carries_shape() {
        let spec = TopicSpec::new("observations", 8, 1);
        assert_eq!(spec.name, "observations");
        assert_eq!(spec.partitions, 8);
        assert_eq!(spec.replication, 1);
    }
}
