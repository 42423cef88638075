//! 플랫폼 키: 릴리스 에셋 이름을 결정하는 유일한 입력
//!
//! 호스트 OS 식별 문자열에서 한 번 계산되며 프로세스 수명 동안 바뀌지 않습니다.
//! 지원하지 않는 값은 에러 대신 `linux-ubuntu`로 떨어집니다.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformKey {
    #[serde(rename = "windows")]
    Windows,
    #[serde(rename = "macos")]
    MacOs,
    #[serde(rename = "linux-ubuntu")]
    LinuxUbuntu,
}

impl PlatformKey {
    pub const ALL: [PlatformKey; 3] = [
        PlatformKey::Windows,
        PlatformKey::MacOs,
        PlatformKey::LinuxUbuntu,
    ];

    /// Detect the key for the running host.
    pub fn detect() -> Self {
        Self::from_os_name(std::env::consts::OS)
    }

    /// Map an operating-system identifier ("Windows 10", "Mac OS X", "linux", ...)
    /// onto a platform key. Anything unrecognized is treated as linux-ubuntu.
    pub fn from_os_name(os: &str) -> Self {
        let os = os.to_lowercase();
        // "darwin"에도 "win"이 들어 있으므로 mac 먼저 검사
        if os.contains("mac") || os.contains("darwin") {
            PlatformKey::MacOs
        } else if os.contains("win") {
            PlatformKey::Windows
        } else {
            PlatformKey::LinuxUbuntu
        }
    }

    /// Parse a configured key. Unknown keys fail closed to linux-ubuntu.
    pub fn from_key(key: &str) -> Self {
        match key.trim().to_lowercase().as_str() {
            "windows" => PlatformKey::Windows,
            "macos" => PlatformKey::MacOs,
            "linux-ubuntu" => PlatformKey::LinuxUbuntu,
            other => {
                tracing::warn!("Unsupported platform key '{}', using linux-ubuntu", other);
                PlatformKey::LinuxUbuntu
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKey::Windows => "windows",
            PlatformKey::MacOs => "macos",
            PlatformKey::LinuxUbuntu => "linux-ubuntu",
        }
    }

    /// Release asset filename for this platform. Exactly one per key.
    pub fn asset_name(&self) -> &'static str {
        match self {
            PlatformKey::Windows => "server-windows.exe",
            PlatformKey::MacOs => "server-macos",
            PlatformKey::LinuxUbuntu => "server-linux-ubuntu",
        }
    }

    /// Whether downloaded artifacts need the executable bit set.
    pub fn needs_exec_bit(&self) -> bool {
        !matches!(self, PlatformKey::Windows)
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
