//! Buffer pool configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_common::constants::{
    DEFAULT_BACKOFF_SLEEP, DEFAULT_BLOCK_SIZE, DEFAULT_COLD_PERCENT, DEFAULT_PARTITION_COUNT,
    DEFAULT_PREFLUSH_BATCH, DEFAULT_PREFLUSH_THRESHOLD, DEFAULT_SLOT_COUNT,
    DEFAULT_SPIN_ATTEMPTS, DEFAULT_VICTIM_PERCENT, DEFAULT_YIELD_ATTEMPTS, MAX_BLOCK_SIZE,
    MIN_BLOCK_SIZE,
};

use super::error::{BufferError, BufferResult};

/// Configuration for the buffer pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Number of slots in the pool.
    pub num_slots: usize,
    /// Block size in bytes.
    pub block_size: usize,
    /// Number of independent eviction partitions.
    pub num_partitions: usize,
    /// Number of hash buckets (0 derives it from `num_slots`).
    pub num_buckets: usize,
    /// Cold list size as a percentage of a partition's hot + cold population.
    pub cold_percent: u8,
    /// Victim area minimum as a percentage of the slots a partition owns.
    pub victim_percent: u8,
    /// Next-flush-batch length per partition that fires the preflush callback.
    pub preflush_threshold: usize,
    /// Addresses harvested per partition by one preflush scan.
    pub preflush_batch: usize,
    /// Failed second-bucket lock attempts that busy-spin.
    pub spin_attempts: u32,
    /// Failed attempts that yield before backoff sleeps.
    pub yield_attempts: u32,
    /// Sleep unit for backoff, scaled by the attempt count.
    #[serde(with = "duration_micros")]
    pub backoff_sleep: Duration,
}

impl BufferPoolConfig {
    /// Creates a new configuration with the specified number of slots.
    pub fn new(num_slots: usize) -> Self {
        Self {
            num_slots,
            block_size: DEFAULT_BLOCK_SIZE,
            num_partitions: DEFAULT_PARTITION_COUNT.min(num_slots.max(1)),
            num_buckets: 0,
            cold_percent: DEFAULT_COLD_PERCENT,
            victim_percent: DEFAULT_VICTIM_PERCENT,
            preflush_threshold: DEFAULT_PREFLUSH_THRESHOLD,
            preflush_batch: DEFAULT_PREFLUSH_BATCH,
            spin_attempts: DEFAULT_SPIN_ATTEMPTS,
            yield_attempts: DEFAULT_YIELD_ATTEMPTS,
            backoff_sleep: DEFAULT_BACKOFF_SLEEP,
        }
    }

    /// Creates a configuration from a memory size in bytes.
    pub fn from_memory_size(memory_bytes: usize, block_size: usize) -> Self {
        let num_slots = (memory_bytes / block_size.max(1)).max(1);
        Self::new(num_slots).with_block_size(block_size)
    }

    /// Sets the block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the number of partitions.
    pub fn with_partitions(mut self, num_partitions: usize) -> Self {
        self.num_partitions = num_partitions;
        self
    }

    /// Sets the number of hash buckets.
    pub fn with_buckets(mut self, num_buckets: usize) -> Self {
        self.num_buckets = num_buckets;
        self
    }

    /// Sets the cold list percentage.
    pub fn with_cold_percent(mut self, percent: u8) -> Self {
        self.cold_percent = percent;
        self
    }

    /// Sets the victim area percentage.
    pub fn with_victim_percent(mut self, percent: u8) -> Self {
        self.victim_percent = percent;
        self
    }

    /// Sets the preflush trigger threshold and harvest batch size.
    pub fn with_preflush(mut self, threshold: usize, batch: usize) -> Self {
        self.preflush_threshold = threshold;
        self.preflush_batch = batch;
        self
    }

    /// Sets the lock backoff schedule.
    pub fn with_backoff(mut self, spins: u32, yields: u32, sleep: Duration) -> Self {
        self.spin_attempts = spins;
        self.yield_attempts = yields;
        self.backoff_sleep = sleep;
        self
    }

    /// Returns the effective number of hash buckets.
    pub fn bucket_count(&self) -> usize {
        if self.num_buckets == 0 {
            self.num_slots.max(1).next_power_of_two()
        } else {
            self.num_buckets
        }
    }

    /// Returns the total memory used by slot buffers.
    pub fn memory_usage(&self) -> usize {
        self.num_slots * self.block_size
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.num_slots == 0 {
            return Err("num_slots must be > 0");
        }
        if u32::try_from(self.num_slots).is_err() {
            return Err("num_slots must fit in u32");
        }
        if !self.block_size.is_power_of_two() {
            return Err("block_size must be a power of 2");
        }
        if self.block_size < MIN_BLOCK_SIZE || self.block_size > MAX_BLOCK_SIZE {
            return Err("block_size out of range");
        }
        if self.num_partitions == 0 {
            return Err("num_partitions must be > 0");
        }
        if self.num_partitions > self.num_slots {
            return Err("num_partitions must not exceed num_slots");
        }
        if self.cold_percent > 100 || self.victim_percent > 100 {
            return Err("percentages must be <= 100");
        }
        Ok(())
    }

    /// Parses a configuration from TOML.
    pub fn from_toml_str(content: &str) -> BufferResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| BufferError::config(e.to_string()))?;
        config.validate().map_err(BufferError::config)?;
        Ok(config)
    }

    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> BufferResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BufferError::config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Converts configuration to TOML string.
    pub fn to_toml(&self) -> BufferResult<String> {
        toml::to_string_pretty(self).map_err(|e| BufferError::config(e.to_string()))
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SLOT_COUNT)
    }
}

mod duration_micros {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let micros = u64::try_from(value.as_micros()).unwrap_or(u64::MAX);
        serializer.serialize_u64(micros)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new() {
        let config = BufferPoolConfig::new(1000);
        assert_eq!(config.num_slots, 1000);
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.bucket_count(), 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_small_pool_caps_partitions() {
        let config = BufferPoolConfig::new(4);
        assert_eq!(config.num_partitions, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_memory() {
        let config = BufferPoolConfig::from_memory_size(64 * 1024, 4096);
        assert_eq!(config.num_slots, 16);
        assert_eq!(config.memory_usage(), 64 * 1024);
    }

    #[test]
    fn test_config_builder() {
        let config = BufferPoolConfig::new(100)
            .with_block_size(16)
            .with_partitions(2)
            .with_buckets(7)
            .with_cold_percent(50)
            .with_victim_percent(20)
            .with_preflush(4, 8)
            .with_backoff(1, 2, Duration::from_micros(10));

        assert_eq!(config.block_size, 16);
        assert_eq!(config.num_partitions, 2);
        assert_eq!(config.bucket_count(), 7);
        assert_eq!(config.cold_percent, 50);
        assert_eq!(config.victim_percent, 20);
        assert_eq!(config.preflush_threshold, 4);
        assert_eq!(config.preflush_batch, 8);
        assert_eq!(config.backoff_sleep, Duration::from_micros(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(BufferPoolConfig::new(0).validate().is_err());
        assert!(BufferPoolConfig::new(10).with_partitions(0).validate().is_err());
        assert!(BufferPoolConfig::new(10).with_partitions(11).validate().is_err());
        assert!(BufferPoolConfig::new(10).with_block_size(24).validate().is_err());
        assert!(BufferPoolConfig::new(10).with_block_size(8).validate().is_err());
        assert!(BufferPoolConfig::new(10).with_cold_percent(101).validate().is_err());
    }

    #[test]
    fn test_toml_defaults_and_overrides() {
        let config = BufferPoolConfig::from_toml_str(
            "num_slots = 64\nblock_size = 512\nbackoff_sleep = 25\n",
        )
        .unwrap();
        assert_eq!(config.num_slots, 64);
        assert_eq!(config.block_size, 512);
        assert_eq!(config.backoff_sleep, Duration::from_micros(25));
        assert_eq!(config.cold_percent, DEFAULT_COLD_PERCENT);

        let toml = config.to_toml().unwrap();
        assert!(toml.contains("num_slots = 64"));
    }

    #[test]
    fn test_toml_rejects_invalid() {
        let err = BufferPoolConfig::from_toml_str("num_slots = 0\n").unwrap_err();
        assert!(matches!(err, BufferError::Config { .. }));
    }
}
