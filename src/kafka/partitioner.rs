//! Kafka-compatible partitioner
//!
//! Picks the partition for a message published to the in-memory broker.
//! Keyed messages hash with `murmur2` and `KAFKA_SEED`, which is what the
//! Java client and librdkafka's `murmur2_random` partitioner do, so a key
//! lands on the same partition no matter which transport produced it.

use murmur2::{murmur2, KAFKA_SEED};
use rand::Rng;

/// Compute the target partition for a message.
///
/// # Arguments
/// * `key` - Optional message key (if Some, used for hash-based routing)
/// * `partition_count` - Number of partitions for the topic (must be > 0)
///
/// # Behavior
/// - If key is Some: murmur2 hash, so equal keys always share a partition
/// - If key is None: random partition
pub fn compute_partition(key: Option<&[u8]>, partition_count: i32) -> i32 {
    debug_assert!(partition_count > 0, "partition_count must be positive");

    match key {
        Some(k) => {
            let hash = murmur2(k, KAFKA_SEED);
            // Utils.toPositive(Utils.murmur2(key)) % numPartitions
            ((hash & 0x7fffffff) as i32) % partition_count
        }
        None => {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..partition_count)
        }
    }
}
