//! Lua脚本管理器
//!
//! 提供Redis Lua脚本的预加载、SHA缓存和版本管理功能。
//!
//! # 特性
//!
//! - **脚本预加载**: 避免重复传输脚本
//! - **SHA缓存**: 缓存脚本SHA避免重复计算
//! - **原子性操作**: 计数检查与递增、索引淘汰都在单个脚本内完成
//!
//! 索引脚本会访问索引成员对应的键，这些键没有在 `KEYS` 中声明，
//! 因此只适用于单机或主从部署。

use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

use crate::error::StorageError;

/// Lua脚本类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaScriptType {
    /// 固定窗口计数
    FixedWindow,
    /// 固定窗口退还
    WindowRefund,
    /// 索引淘汰
    IndexTrim,
    /// 索引清扫
    IndexSweep,
    /// 索引清空
    IndexClear,
}

impl LuaScriptType {
    /// 获取脚本名称
    pub fn name(&self) -> &str {
        match self {
            LuaScriptType::FixedWindow => "fixed_window",
            LuaScriptType::WindowRefund => "window_refund",
            LuaScriptType::IndexTrim => "index_trim",
            LuaScriptType::IndexSweep => "index_sweep",
            LuaScriptType::IndexClear => "index_clear",
        }
    }

    /// 获取脚本版本
    pub fn version(&self) -> &str {
        match self {
            LuaScriptType::FixedWindow => "2.0",
            LuaScriptType::WindowRefund => "1.0",
            LuaScriptType::IndexTrim => "1.0",
            LuaScriptType::IndexSweep => "1.0",
            LuaScriptType::IndexClear => "1.0",
        }
    }

    fn all() -> [LuaScriptType; 5] {
        [
            LuaScriptType::FixedWindow,
            LuaScriptType::WindowRefund,
            LuaScriptType::IndexTrim,
            LuaScriptType::IndexSweep,
            LuaScriptType::IndexClear,
        ]
    }

    fn source(&self) -> &'static str {
        match self {
            LuaScriptType::FixedWindow => FIXED_WINDOW_SCRIPT,
            LuaScriptType::WindowRefund => WINDOW_REFUND_SCRIPT,
            LuaScriptType::IndexTrim => INDEX_TRIM_SCRIPT,
            LuaScriptType::IndexSweep => INDEX_SWEEP_SCRIPT,
            LuaScriptType::IndexClear => INDEX_CLEAR_SCRIPT,
        }
    }
}

/// 固定窗口Lua脚本
///
/// 使用Redis String + PTTL实现固定窗口算法，过期时间只在计数从0变为1时设置。
/// 参数: KEYS[1] - key, ARGV[1] - window_size (ms), ARGV[2] - max_requests
/// 返回: (allowed: 0/1, current_count: int, ttl_ms: int)
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local window_size = tonumber(ARGV[1])
local max_requests = tonumber(ARGV[2])

local current_count = tonumber(redis.call('GET', key)) or 0

-- 已达上限，不递增
if current_count >= max_requests then
    local ttl = redis.call('PTTL', key)
    if ttl < 0 then
        redis.call('PEXPIRE', key, window_size)
        ttl = window_size
    end
    return {0, current_count, ttl}
end

local count = redis.call('INCR', key)
if count == 1 then
    redis.call('PEXPIRE', key, window_size)
end

-- 没有过期时间的计数器会永久阻塞，补设窗口
local ttl = redis.call('PTTL', key)
if ttl < 0 then
    redis.call('PEXPIRE', key, window_size)
    ttl = window_size
end

return {1, count, ttl}
"#;

/// 窗口退还Lua脚本
///
/// 参数: KEYS[1] - key
/// 返回: 退还后的计数，窗口不存在时返回 -1
pub const WINDOW_REFUND_SCRIPT: &str = r#"
local key = KEYS[1]
local current_count = tonumber(redis.call('GET', key))
if not current_count then
    return -1
end
if current_count <= 0 then
    return 0
end
return redis.call('DECR', key)
"#;

/// 索引淘汰Lua脚本
///
/// 按写入时间从旧到新删除超出上限的成员及其键。
/// 参数: KEYS[1] - index, ARGV[1] - max_entries
/// 返回: 淘汰数量
pub const INDEX_TRIM_SCRIPT: &str = r#"
local index = KEYS[1]
local max_entries = tonumber(ARGV[1])

local excess = redis.call('ZCARD', index) - max_entries
if excess <= 0 then
    return 0
end

local victims = redis.call('ZRANGE', index, 0, excess - 1)
for _, member in ipairs(victims) do
    redis.call('DEL', member)
end
redis.call('ZREMRANGEBYRANK', index, 0, excess - 1)

return #victims
"#;

/// 索引清扫Lua脚本
///
/// 参数: KEYS[1] - index, ARGV[1] - offset, ARGV[2] - batch
/// 返回: {检查的成员数, 移除的失效成员数}
pub const INDEX_SWEEP_SCRIPT: &str = r#"
local index = KEYS[1]
local offset = tonumber(ARGV[1])
local batch = tonumber(ARGV[2])

local members = redis.call('ZRANGE', index, offset, offset + batch - 1)
local removed = 0
for _, member in ipairs(members) do
    if redis.call('EXISTS', member) == 0 then
        redis.call('ZREM', index, member)
        removed = removed + 1
    end
end

return {#members, removed}
"#;

/// 索引清空Lua脚本
///
/// 参数: KEYS[1] - index
/// 返回: 删除的键数量
pub const INDEX_CLEAR_SCRIPT: &str = r#"
local index = KEYS[1]

local members = redis.call('ZRANGE', index, 0, -1)
for _, member in ipairs(members) do
    redis.call('DEL', member)
end
redis.call('DEL', index)

return #members
"#;

/// Lua脚本信息
#[derive(Debug, Clone)]
pub struct LuaScriptInfo {
    /// 脚本类型
    pub script_type: LuaScriptType,
    /// 脚本内容
    pub script: &'static str,
    /// SHA哈希（计算后填充）
    pub sha: Arc<parking_lot::Mutex<Option<String>>>,
}

impl LuaScriptInfo {
    /// 创建新的脚本信息
    pub fn new(script_type: LuaScriptType, script: &'static str) -> Self {
        Self {
            script_type,
            script,
            sha: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// 获取脚本SHA，如果未计算则返回None
    pub fn get_sha(&self) -> Option<String> {
        self.sha.lock().clone()
    }

    /// 设置脚本SHA
    pub fn set_sha(&self, sha: String) {
        *self.sha.lock() = Some(sha);
    }
}

/// Lua脚本管理器
pub struct LuaScriptManager {
    scripts: HashMap<LuaScriptType, LuaScriptInfo>,
}

impl LuaScriptManager {
    /// 创建新的脚本管理器
    pub fn new() -> Self {
        let scripts = LuaScriptType::all()
            .into_iter()
            .map(|script_type| {
                (
                    script_type,
                    LuaScriptInfo::new(script_type, script_type.source()),
                )
            })
            .collect();

        Self { scripts }
    }

    /// 获取脚本信息
    pub fn get_script(&self, script_type: LuaScriptType) -> Option<&LuaScriptInfo> {
        self.scripts.get(&script_type)
    }

    /// 获取所有脚本
    pub fn get_all_scripts(&self) -> Vec<&LuaScriptInfo> {
        self.scripts.values().collect()
    }

    /// 预加载所有脚本到Redis
    pub async fn preload_all_scripts<C>(&self, conn: &mut C) -> Result<(), StorageError>
    where
        C: AsyncCommands + redis::aio::ConnectionLike,
    {
        info!("开始预加载Lua脚本到Redis");

        for script_info in self.get_all_scripts() {
            self.preload_script(conn, script_info).await?;
        }

        info!("Lua脚本预加载完成");
        Ok(())
    }

    /// 预加载单个脚本
    pub async fn preload_script<C>(
        &self,
        conn: &mut C,
        script_info: &LuaScriptInfo,
    ) -> Result<(), StorageError>
    where
        C: AsyncCommands + redis::aio::ConnectionLike,
    {
        let sha = Script::new(script_info.script).get_hash().to_string();
        script_info.set_sha(sha.clone());

        let _: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(script_info.script)
            .query_async(conn)
            .await
            .map_err(|e| {
                error!("预加载脚本失败: {:?}, 错误: {}", script_info.script_type, e);
                StorageError::from(e)
            })?;

        debug!(
            "脚本预加载成功: {} v{}, SHA: {}",
            script_info.script_type.name(),
            script_info.script_type.version(),
            sha
        );

        Ok(())
    }

    /// 执行脚本（使用SHA），SHA 未知或被服务端清除时自动重新加载
    pub async fn execute_script<C, T>(
        &self,
        conn: &mut C,
        script_type: LuaScriptType,
        keys: &[&str],
        args: &[String],
    ) -> Result<T, StorageError>
    where
        C: AsyncCommands + redis::aio::ConnectionLike,
        T: redis::FromRedisValue,
    {
        let script_info = self
            .get_script(script_type)
            .ok_or_else(|| StorageError::QueryError(format!("未找到脚本: {:?}", script_type)))?;

        if script_info.get_sha().is_none() {
            self.preload_script(conn, script_info).await?;
        }
        let sha = script_info
            .get_sha()
            .ok_or_else(|| StorageError::QueryError("脚本SHA未初始化".to_string()))?;

        trace!("执行脚本: {:?}, SHA: {}", script_type, sha);

        match Self::evalsha::<C, T>(conn, &sha, keys, args).await {
            Ok(result) => Ok(result),
            Err(e) if e.kind() == redis::ErrorKind::NoScriptError => {
                debug!("脚本SHA不存在，重新加载: {:?}", script_type);
                self.preload_script(conn, script_info).await?;

                Self::evalsha::<C, T>(conn, &sha, keys, args)
                    .await
                    .map_err(|e| {
                        error!("脚本执行失败: {:?}, 错误: {}", script_type, e);
                        StorageError::from(e)
                    })
            }
            Err(e) => {
                error!("脚本执行失败: {:?}, 错误: {}", script_type, e);
                Err(StorageError::from(e))
            }
        }
    }

    async fn evalsha<C, T>(
        conn: &mut C,
        sha: &str,
        keys: &[&str],
        args: &[String],
    ) -> redis::RedisResult<T>
    where
        C: AsyncCommands + redis::aio::ConnectionLike,
        T: redis::FromRedisValue,
    {
        redis::cmd("EVALSHA")
            .arg(sha)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async::<_, T>(conn)
            .await
    }

    /// 清除所有脚本的SHA缓存
    ///
    /// 连接重建后调用，下次执行时会重新加载。
    pub fn clear_sha_cache(&self) {
        for script_info in self.get_all_scripts() {
            *script_info.sha.lock() = None;
        }
        debug!("已清除所有脚本的SHA缓存");
    }
}

impl Default for LuaScriptManager {
    fn default() -> Self {
        Self::new()
    }
}
