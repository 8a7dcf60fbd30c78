use std::{collections::HashMap, fs, path::Path, time::Duration};

use tracing::warn;

pub const SETTINGS_FILE: &str = "ortho_viewer.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct WidgetSettings {
    pub poll_interval_ms: u64,
    pub hover_throttle_ms: u64,
    pub frame_interval_ms: u64,
    pub animation_duration_ms: f64,
    pub keyboard_step: f64,
    pub keyboard_fast_step: f64,
    pub command_message: String,
    pub event_capacity: usize,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            hover_throttle_ms: 150,
            frame_interval_ms: 16,
            animation_duration_ms: 500.0,
            keyboard_step: 1.0,
            keyboard_fast_step: 5.0,
            command_message: "ortho-viewer-command".into(),
            event_capacity: 256,
        }
    }
}

impl WidgetSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn hover_throttle(&self) -> Duration {
        Duration::from_millis(self.hover_throttle_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

pub fn load_settings() -> WidgetSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the flat toml table at `path` (if readable), then the environment.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> WidgetSettings {
    let mut settings = WidgetSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, String>>(&raw) {
            Ok(file_cfg) => {
                for (key, value) in &file_cfg {
                    apply(&mut settings, key, value);
                }
            }
            Err(err) => warn!(path = %path.display(), %err, "ignoring unreadable settings file"),
        }
    }

    for key in KEYS {
        let upper = key.to_ascii_uppercase();
        if let Some(v) = env(&format!("ORTHO_{upper}")) {
            apply(&mut settings, key, &v);
        }
        if let Some(v) = env(&format!("APP__{upper}")) {
            apply(&mut settings, key, &v);
        }
    }

    settings
}

const KEYS: [&str; 8] = [
    "poll_interval_ms",
    "hover_throttle_ms",
    "frame_interval_ms",
    "animation_duration_ms",
    "keyboard_step",
    "keyboard_fast_step",
    "command_message",
    "event_capacity",
];

fn apply(settings: &mut WidgetSettings, key: &str, raw: &str) {
    let raw = raw.trim();
    let parsed = match key {
        "poll_interval_ms" => raw.parse().map(|v| settings.poll_interval_ms = v).is_ok(),
        "hover_throttle_ms" => raw.parse().map(|v| settings.hover_throttle_ms = v).is_ok(),
        "frame_interval_ms" => raw.parse().map(|v| settings.frame_interval_ms = v).is_ok(),
        "animation_duration_ms" => parse_finite(raw)
            .map(|v| settings.animation_duration_ms = v)
            .is_some(),
        "keyboard_step" => parse_finite(raw).map(|v| settings.keyboard_step = v).is_some(),
        "keyboard_fast_step" => parse_finite(raw)
            .map(|v| settings.keyboard_fast_step = v)
            .is_some(),
        "command_message" if !raw.is_empty() => {
            settings.command_message = raw.to_string();
            true
        }
        "event_capacity" => raw
            .parse::<usize>()
            .ok()
            .filter(|v| *v > 0)
            .map(|v| settings.event_capacity = v)
            .is_some(),
        _ => return,
    };
    if !parsed {
        warn!(key, value = raw, "ignoring invalid setting");
    }
}

fn parse_finite(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}
