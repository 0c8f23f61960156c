//! 状态指纹与环路检测
//!
//! 指纹只由快照内容决定：SHA-256 取前 16 字节（32 位十六进制）。
//! 截断后碰撞概率约为 2^-64（生日界），对单次会话的状态规模可忽略；需要更强保证时调大 FINGERPRINT_BYTES 即可。

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 保留的摘要字节数
pub const FINGERPRINT_BYTES: usize = 16;

/// 状态指纹（不透明 id）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志用的短前缀
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 纯函数：同一快照永远得到同一指纹
pub fn fingerprint(snapshot: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(snapshot.as_bytes());
    let digest = hasher.finalize();
    Fingerprint(hex::encode(&digest[..FINGERPRINT_BYTES]))
}

pub fn is_cycle<'a, I>(id: &Fingerprint, visited: I) -> bool
where
    I: IntoIterator<Item = &'a Fingerprint>,
{
    visited.into_iter().any(|v| v == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let a = fingerprint("[#login] button: \"Sign in\"");
        let b = fingerprint("[#login] button: \"Sign in\"");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), FINGERPRINT_BYTES * 2);
    }

    #[test]
    fn test_fingerprint_content_sensitive() {
        let a = fingerprint("page A");
        let b = fingerprint("page B");
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_cycle() {
        let x = fingerprint("x");
        let y = fingerprint("y");
        let visited = vec![x.clone()];
        assert!(is_cycle(&x, &visited));
        assert!(!is_cycle(&y, &visited));
        assert!(!is_cycle(&x, &Vec::new()));
    }

    #[test]
    fn test_short_prefix() {
        let x = fingerprint("x");
        assert_eq!(x.short().len(), 8);
        assert!(x.as_str().starts_with(x.short()));
    }
}
