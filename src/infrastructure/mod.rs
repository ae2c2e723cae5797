pub mod connection;
pub mod local_store;
pub mod memory;
pub mod redis;
pub mod redis_pubsub;

pub use connection::{ConnectionPolicy, ConnectionState, ConnectionStatus, RedisConnection};
pub use local_store::{Dataset, LocalSnapshotStore, PairRecord};
pub use memory::{InMemoryCache, InMemoryPubSub};
pub use redis::RedisRepository;
pub use redis_pubsub::RedisPubSub;
