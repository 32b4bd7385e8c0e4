//! Defaults shared by configuration, the service façade and the dev tool

/// Commands that may wait in the queue before producers are suspended
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Events a lagging bus subscriber may fall behind before it skips
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

pub const DEFAULT_DATABASE_PATH: &str = "./data/outline.db";

/// Environment variable overriding the database location
pub const ENV_DATABASE_PATH: &str = "OUTLINE_DATABASE_PATH";

pub const ENV_QUEUE_CAPACITY: &str = "OUTLINE_QUEUE_CAPACITY";

pub const ENV_EVENT_CAPACITY: &str = "OUTLINE_EVENT_CAPACITY";
