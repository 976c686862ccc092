//! Redis客户端封装
//!
//! 实现基于Redis的 [`KeyValueStore`]，提供连接管理、重试机制和Lua脚本支持。
//!
//! # 特性
//!
//! - **连接管理**: 使用ConnectionManager管理连接，连接错误时重建
//! - **重试机制**: 指数退避重试，次数可配置
//! - **Lua脚本**: 预加载脚本，窗口计数和索引淘汰在服务端原子完成
//!
//! 重试总耗时受上层 [`KeyValueBackend`](crate::backend::KeyValueBackend)
//! 的单次操作超时约束，默认只重试一次。

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, IntoConnectionInfo};
use secrecy::{ExposeSecret, Secret};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::error::StorageError;
use crate::lua_scripts::{LuaScriptManager, LuaScriptType};
use crate::storage::{IndexSweep, KeyValueStore, WindowHit};

/// 验证完整键
fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::QueryError("键不能为空".to_string()));
    }
    Ok(())
}

/// Redis配置
#[derive(Clone)]
pub struct RedisConfig {
    /// Redis连接URL
    pub url: String,
    /// 数据库索引（0 表示沿用 URL 中的设置）
    pub db: i64,
    /// 密码（使用 Secret 包装以防止意外泄露）
    pub password: Option<Secret<String>>,
    /// 连接超时
    pub connection_timeout: Duration,
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试初始退避时间
    pub retry_initial_backoff: Duration,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.url)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connection_timeout", &self.connection_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_initial_backoff", &self.retry_initial_backoff)
            .finish()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            password: None,
            connection_timeout: Duration::from_secs(2),
            max_retries: 1,
            retry_initial_backoff: Duration::from_millis(20),
        }
    }
}

impl RedisConfig {
    /// 创建新的Redis配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置数据库索引
    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// 设置密码
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password.into()));
        self
    }

    /// 设置密码（使用 Secret）
    pub fn password_secret(mut self, password: Secret<String>) -> Self {
        self.password = Some(password);
        self
    }

    /// 设置连接超时
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// 设置最大重试次数
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// 设置重试初始退避时间
    pub fn retry_initial_backoff(mut self, backoff: Duration) -> Self {
        self.retry_initial_backoff = backoff;
        self
    }
}

/// 重试统计
#[derive(Debug, Default, Clone)]
pub struct RetryStats {
    /// 总重试次数
    pub total_retries: Arc<AtomicU64>,
    /// 成功重试次数
    pub successful_retries: Arc<AtomicU64>,
    /// 失败重试次数
    pub failed_retries: Arc<AtomicU64>,
}

impl RetryStats {
    /// 获取总重试次数
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// 获取成功重试次数
    pub fn successful_retries(&self) -> u64 {
        self.successful_retries.load(Ordering::Relaxed)
    }

    /// 获取失败重试次数
    pub fn failed_retries(&self) -> u64 {
        self.failed_retries.load(Ordering::Relaxed)
    }

    /// 记录重试成功
    pub fn record_success(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
        self.successful_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录重试失败
    pub fn record_failure(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
        self.failed_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// 重置统计
    pub fn reset(&self) {
        self.total_retries.store(0, Ordering::Relaxed);
        self.successful_retries.store(0, Ordering::Relaxed);
        self.failed_retries.store(0, Ordering::Relaxed);
    }
}

/// Redis存储实现
#[derive(Clone)]
pub struct RedisStorage {
    /// 连接管理器
    conn_manager: Arc<Mutex<Option<ConnectionManager>>>,
    /// 配置
    config: RedisConfig,
    /// Lua脚本管理器
    lua_manager: Arc<LuaScriptManager>,
    /// 重试统计
    retry_stats: RetryStats,
}

impl RedisStorage {
    /// 创建新的Redis存储，连接并预加载脚本
    pub async fn new(config: RedisConfig) -> Result<Self, StorageError> {
        info!("创建Redis存储, URL: {}", config.url);

        let storage = Self::unconnected(config);
        storage.connect().await?;

        let mut conn = storage.connection().await?;
        storage.lua_manager.preload_all_scripts(&mut conn).await?;

        info!("Redis存储创建成功");
        Ok(storage)
    }

    fn unconnected(config: RedisConfig) -> Self {
        Self {
            conn_manager: Arc::new(Mutex::new(None)),
            config,
            lua_manager: Arc::new(LuaScriptManager::new()),
            retry_stats: RetryStats::default(),
        }
    }

    /// 建立连接
    async fn connect(&self) -> Result<(), StorageError> {
        debug!("建立Redis连接");

        // URL 中可能带认证信息，密码以配置为准
        let mut client_info = self.config.url.as_str().into_connection_info().map_err(|e| {
            error!("解析Redis URL失败: {}", e);
            StorageError::ConnectionError(format!("解析Redis URL失败: {}", e))
        })?;
        if self.config.db != 0 {
            client_info.redis.db = self.config.db;
        }
        if let Some(password) = &self.config.password {
            client_info.redis.password = Some(password.expose_secret().clone());
        }

        let client = Client::open(client_info).map_err(|e| {
            error!("创建Redis客户端失败: {}", e);
            StorageError::ConnectionError(format!("创建Redis客户端失败: {}", e))
        })?;

        let conn_manager =
            tokio::time::timeout(self.config.connection_timeout, ConnectionManager::new(client))
                .await
                .map_err(|_| {
                    error!("创建Redis连接管理器超时: {:?}", self.config.connection_timeout);
                    StorageError::TimeoutError("创建Redis连接管理器超时".to_string())
                })?
                .map_err(|e| {
                    error!("创建Redis连接管理器失败: {}", e);
                    StorageError::ConnectionError(format!("创建Redis连接管理器失败: {}", e))
                })?;

        *self.conn_manager.lock().await = Some(conn_manager);

        info!("Redis连接建立成功");
        Ok(())
    }

    /// 重新连接
    async fn reconnect(&self) -> Result<(), StorageError> {
        debug!("尝试重新连接Redis");

        *self.conn_manager.lock().await = None;
        // 新连接可能指向已重启的实例，脚本需要重新加载
        self.lua_manager.clear_sha_cache();

        self.connect().await
    }

    async fn connection(&self) -> Result<ConnectionManager, StorageError> {
        self.conn_manager
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| StorageError::ConnectionError("连接未初始化".to_string()))
    }

    /// 带重试的执行
    async fn execute_with_retry<F, Fut, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StorageError>>,
    {
        let mut last_error = None;
        let mut backoff = self.config.retry_initial_backoff;

        for attempt in 0..=self.config.max_retries {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        self.retry_stats.record_success();
                        debug!("重试成功，尝试次数: {}", attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    last_error = Some(e.clone());

                    if attempt < self.config.max_retries {
                        warn!(
                            "操作失败，将在 {:?} 后重试 (尝试 {}/{}): {}",
                            backoff,
                            attempt + 1,
                            self.config.max_retries,
                            e
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.mul_f32(2.0);

                        if matches!(e, StorageError::ConnectionError(_)) {
                            if let Err(reconnect_err) = self.reconnect().await {
                                error!("重新连接失败: {}", reconnect_err);
                            }
                        }
                    }
                }
            }
        }

        if self.config.max_retries > 0 {
            self.retry_stats.record_failure();
        }
        Err(last_error.unwrap_or_else(|| StorageError::TimeoutError("操作超时".to_string())))
    }

    async fn run_script<T>(
        &self,
        script_type: LuaScriptType,
        key: &str,
        args: &[String],
    ) -> Result<T, StorageError>
    where
        T: redis::FromRedisValue + Send,
    {
        validate_key(key)?;
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            self.lua_manager
                .execute_script(&mut conn, script_type, &[key], args)
                .await
        })
        .await
    }

    /// 获取重试统计
    pub fn retry_stats(&self) -> &RetryStats {
        &self.retry_stats
    }

    /// 获取Lua脚本管理器
    pub fn lua_manager(&self) -> &Arc<LuaScriptManager> {
        &self.lua_manager
    }
}

#[async_trait]
impl KeyValueStore for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        validate_key(key)?;
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let result: Option<String> = conn.get(key).await?;

            trace!("GET key={}, hit={}", key, result.is_some());
            Ok(result)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StorageError> {
        validate_key(key)?;
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;

            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("EX").arg(ttl.max(1));
            }
            let _: () = cmd.query_async(&mut conn).await?;

            trace!("SET key={}, ttl={:?}", key, ttl);
            Ok(())
        })
        .await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool, StorageError> {
        validate_key(key)?;
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;

            // SET NX 未写入时返回 nil
            let result: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(ttl.max(1))
                .query_async(&mut conn)
                .await?;

            trace!("SET NX key={}, acquired={}", key, result.is_some());
            Ok(result.is_some())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let removed: u64 = conn.del(key).await?;

            trace!("DEL key={}", key);
            Ok(removed > 0)
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let exists: bool = conn.exists(key).await?;
            Ok(exists)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, StorageError> {
        validate_key(key)?;
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let refreshed: bool = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl.max(1))
                .query_async(&mut conn)
                .await?;

            trace!("EXPIRE key={}, ttl={}, refreshed={}", key, ttl, refreshed);
            Ok(refreshed)
        })
        .await
    }

    async fn window_hit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
    ) -> Result<WindowHit, StorageError> {
        let window_ms = (window.as_millis() as u64).max(1);
        let (allowed, count, ttl_ms): (i64, i64, i64) = self
            .run_script(
                LuaScriptType::FixedWindow,
                key,
                &[window_ms.to_string(), max_requests.to_string()],
            )
            .await?;

        Ok(WindowHit {
            allowed: allowed == 1,
            count: count.max(0) as u64,
            ttl: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn window_refund(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let remaining: i64 = self
            .run_script(LuaScriptType::WindowRefund, key, &[])
            .await?;
        Ok((remaining >= 0).then_some(remaining as u64))
    }

    async fn index_add(&self, index: &str, member: &str, score: i64) -> Result<(), StorageError> {
        validate_key(index)?;
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let _: i64 = conn.zadd(index, member, score).await?;
            Ok(())
        })
        .await
    }

    async fn index_remove(&self, index: &str, member: &str) -> Result<(), StorageError> {
        validate_key(index)?;
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let _: i64 = conn.zrem(index, member).await?;
            Ok(())
        })
        .await
    }

    async fn index_len(&self, index: &str) -> Result<u64, StorageError> {
        validate_key(index)?;
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let len: u64 = conn.zcard(index).await?;
            Ok(len)
        })
        .await
    }

    async fn index_trim(&self, index: &str, max_entries: u64) -> Result<u64, StorageError> {
        self.run_script(LuaScriptType::IndexTrim, index, &[max_entries.to_string()])
            .await
    }

    async fn index_sweep(
        &self,
        index: &str,
        offset: u64,
        batch: u64,
    ) -> Result<IndexSweep, StorageError> {
        let (scanned, removed): (u64, u64) = self
            .run_script(
                LuaScriptType::IndexSweep,
                index,
                &[offset.to_string(), batch.max(1).to_string()],
            )
            .await?;
        Ok(IndexSweep { scanned, removed })
    }

    async fn index_clear(&self, index: &str) -> Result<u64, StorageError> {
        self.run_script(LuaScriptType::IndexClear, index, &[]).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    fn name(&self) -> &str {
        "redis"
    }
}
