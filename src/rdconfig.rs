// src/rdconfig.rs
use redis::{aio::MultiplexedConnection, Client};
use crate::config::ConnectionOptions;

pub async fn get_redis_conn(options: &ConnectionOptions) -> redis::RedisResult<MultiplexedConnection> {
    // Client::open will auto-handle rediss:// if TLS feature is enabled
    let client = Client::open(options.url.as_str())?;
    client.get_multiplexed_async_connection().await
}
