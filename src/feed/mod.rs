// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Message feed clients.
//!
//! - [`RedisStreamFeed`]: Redis Streams consumer group, the production feed
//! - [`MemoryFeed`]: in-process, for tests and embedding

pub mod memory;
pub mod redis;
pub mod traits;

pub use self::memory::MemoryFeed;
pub use self::redis::RedisStreamFeed;
pub use self::traits::{AckToken, FeedClient, FeedError, FeedMessage, MessageStream};
