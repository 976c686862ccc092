//! 缓存载荷编解码
//!
//! 载荷为 JSON 文本。启用压缩且载荷超过阈值时，JSON 经 lz4 压缩后
//! base64 编码，并加上 `lz4:` 标记。JSON 文本不会以该标记开头。

use crate::constants::COMPRESSION_THRESHOLD_BYTES;
use crate::error::GuardError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// 压缩载荷标记
pub const COMPRESSED_MARKER: &str = "lz4:";

/// 序列化值
pub fn encode<T: Serialize + ?Sized>(value: &T, compress: bool) -> Result<String, GuardError> {
    let json = serde_json::to_string(value)?;
    if compress && json.len() >= COMPRESSION_THRESHOLD_BYTES {
        return compress_payload(&json);
    }
    Ok(json)
}

/// 反序列化载荷
pub fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, GuardError> {
    match payload.strip_prefix(COMPRESSED_MARKER) {
        Some(body) => {
            let json = decompress_payload(body)?;
            Ok(serde_json::from_str(&json)?)
        }
        None => Ok(serde_json::from_str(payload)?),
    }
}

#[cfg(feature = "compression")]
fn compress_payload(json: &str) -> Result<String, GuardError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let compressed = lz4_flex::compress_prepend_size(json.as_bytes());
    Ok(format!("{}{}", COMPRESSED_MARKER, STANDARD.encode(compressed)))
}

#[cfg(not(feature = "compression"))]
fn compress_payload(json: &str) -> Result<String, GuardError> {
    Ok(json.to_string())
}

#[cfg(feature = "compression")]
fn decompress_payload(body: &str) -> Result<String, GuardError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let compressed = STANDARD
        .decode(body)
        .map_err(|e| GuardError::CodecError(format!("base64解码失败: {}", e)))?;
    let bytes = lz4_flex::decompress_size_prepended(&compressed)
        .map_err(|e| GuardError::CodecError(format!("lz4解压失败: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| GuardError::CodecError(format!("载荷不是UTF-8: {}", e)))
}

#[cfg(not(feature = "compression"))]
fn decompress_payload(_body: &str) -> Result<String, GuardError> {
    Err(GuardError::CodecError(
        "压缩载荷需要启用 compression 特性".to_string(),
    ))
}
