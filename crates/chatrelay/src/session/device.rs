//! User-agent classification.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

const UNKNOWN: &str = "unknown";

/// Broad device class derived from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Desktop,
    Tablet,
    Phone,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Desktop => "desktop",
            DeviceKind::Tablet => "tablet",
            DeviceKind::Phone => "phone",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What we know about the caller's device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    pub os: String,
    pub browser: String,
    pub model: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            kind: DeviceKind::Desktop,
            os: UNKNOWN.to_string(),
            browser: UNKNOWN.to_string(),
            model: UNKNOWN.to_string(),
        }
    }
}

struct Patterns {
    android_version: Regex,
    android_model: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                android_version: Regex::new(r"android (\d+(?:\.\d+)?)").ok()?,
                android_model: Regex::new(r";\s*([^;]+?)\s+build/").ok()?,
            })
        })
        .as_ref()
}

impl DeviceInfo {
    /// Classify a raw `User-Agent` header value.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        let kind = if ua.contains("ipad") {
            DeviceKind::Tablet
        } else if ua.contains("mobile") || ua.contains("android") || ua.contains("iphone") {
            DeviceKind::Phone
        } else {
            DeviceKind::Desktop
        };
        let mut info = DeviceInfo {
            kind,
            ..DeviceInfo::default()
        };

        // Mobile agents also mention "linux" / "mac os", so they go first.
        if ua.contains("android") {
            info.os = "Android".to_string();
            if let Some(version) = patterns()
                .and_then(|p| p.android_version.captures(&ua))
                .and_then(|c| c.get(1))
            {
                info.os = format!("Android {}", version.as_str());
            }
        } else if ua.contains("iphone") || ua.contains("ipad") {
            info.os = "iOS".to_string();
        } else if ua.contains("windows") {
            info.os = if ua.contains("windows nt 10") {
                "Windows 10".to_string()
            } else if ua.contains("windows nt 6.3") {
                "Windows 8.1".to_string()
            } else {
                "Windows".to_string()
            };
        } else if ua.contains("mac os") {
            info.os = "macOS".to_string();
        } else if ua.contains("linux") {
            info.os = "Linux".to_string();
        }

        info.browser = if ua.contains("edg") {
            "Edge"
        } else if ua.contains("chrome") {
            "Chrome"
        } else if ua.contains("firefox") {
            "Firefox"
        } else if ua.contains("safari") {
            "Safari"
        } else {
            UNKNOWN
        }
        .to_string();

        if ua.contains("iphone") {
            info.model = "iPhone".to_string();
        } else if ua.contains("ipad") {
            info.model = "iPad".to_string();
        } else if ua.contains("android")
            && let Some(found) = patterns()
                .and_then(|p| p.android_model.captures(&ua))
                .and_then(|c| c.get(1))
        {
            info.model = found.as_str().trim().to_string();
        }

        info
    }

    /// Display model; desktops have no meaningful model name.
    pub fn model_label(&self) -> &str {
        if self.kind == DeviceKind::Desktop {
            "PC"
        } else {
            &self.model
        }
    }

    /// Stable device fingerprint used to name interaction log files.
    pub fn feature_key(&self) -> String {
        [
            self.kind.as_str(),
            self.os.as_str(),
            self.browser.as_str(),
            self.model_label(),
        ]
        .iter()
        .map(|part| part.replace(' ', "").to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
    }
}
