use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{cmd, Client, RedisError};
use tokio::sync::RwLock;

const KEY_PREFIX: &str = "bandscore";

/// Shared Redis connection. Used for short-lived submission guards only, so every
/// caller treats a missing connection as "no guard" rather than an error.
#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        *self.manager.write().await = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        *self.manager.write().await = None;
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let Some(mut manager) = self.manager().await else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    /// Claims `key` for `ttl_seconds`. Returns `false` when another caller holds it.
    pub(crate) async fn acquire_guard(
        &self,
        key: &str,
        ttl_seconds: u64,
    ) -> Result<bool, RedisError> {
        let Some(mut manager) = self.manager().await else {
            return Ok(true);
        };

        let reply: Option<String> = cmd("SET")
            .arg(namespaced(key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut manager)
            .await?;

        Ok(reply.is_some())
    }

    pub(crate) async fn release_guard(&self, key: &str) -> Result<(), RedisError> {
        let Some(mut manager) = self.manager().await else {
            return Ok(());
        };

        cmd("DEL").arg(namespaced(key)).query_async::<_, i64>(&mut manager).await?;
        Ok(())
    }

    async fn manager(&self) -> Option<ConnectionManager> {
        self.manager.read().await.clone()
    }
}

fn namespaced(key: &str) -> String {
    format!("{KEY_PREFIX}:{key}")
}

#[cfg(test)]
mod tests {
    use super::RedisHandle;
    use crate::core::config::Settings;
    use crate::test_support;
    use uuid::Uuid;

    #[tokio::test]
    async fn disconnected_handle_never_blocks() {
        let redis = RedisHandle::new("redis://127.0.0.1:9/0".to_string());
        assert!(redis.acquire_guard("free-form-submit:a", 5).await.expect("guard"));
        assert!(redis.acquire_guard("free-form-submit:a", 5).await.expect("guard"));
        redis.release_guard("free-form-submit:a").await.expect("release");
    }

    #[tokio::test]
    async fn guard_is_exclusive_until_released() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        let redis = RedisHandle::new(settings.redis().redis_url());
        if let Err(err) = redis.connect().await {
            eprintln!("skipping redis test: {err}");
            return;
        }

        let key = format!("free-form-submit:{}", Uuid::new_v4());
        assert!(redis.acquire_guard(&key, 5).await.expect("first claim"));
        assert!(!redis.acquire_guard(&key, 5).await.expect("second claim"));

        redis.release_guard(&key).await.expect("release");
        assert!(redis.acquire_guard(&key, 5).await.expect("claim after release"));
        redis.release_guard(&key).await.expect("cleanup");
    }
}
