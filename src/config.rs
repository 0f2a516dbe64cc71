use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::model::{GateSettings, GateSide};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// 加载闸机参数：默认值 <- JSON 文件（可选），最后统一校验。
pub fn load_settings(side: GateSide, path: Option<&Path>) -> Result<GateSettings, ConfigError> {
    let settings = match path {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            parse_settings(side, &text)?
        }
        None => GateSettings::for_side(side),
    };
    validate(&settings)?;
    Ok(settings)
}

/// 解析 JSON 参数；缺省字段取该闸机位置的默认值，位置以命令行为准。
pub fn parse_settings(side: GateSide, text: &str) -> Result<GateSettings, ConfigError> {
    let defaults = serde_json::to_value(GateSettings::for_side(side))?;
    let overrides: serde_json::Value = serde_json::from_str(text)?;
    let serde_json::Value::Object(overrides) = overrides else {
        return Err(ConfigError::Invalid("settings must be a json object".to_string()));
    };
    let mut merged = defaults;
    if let serde_json::Value::Object(map) = &mut merged {
        for (key, value) in overrides {
            map.insert(key, value);
        }
    }
    let mut settings: GateSettings = serde_json::from_value(merged)?;
    if settings.side != side {
        log::warn!(
            "settings file declares side {} but running as {}",
            settings.side,
            side
        );
        settings.side = side;
    }
    Ok(settings)
}

pub fn validate(settings: &GateSettings) -> Result<(), ConfigError> {
    if settings.min_distance > settings.max_distance {
        return Err(ConfigError::Invalid(format!(
            "min_distance {} exceeds max_distance {}",
            settings.min_distance, settings.max_distance
        )));
    }
    if settings.capture_threshold == 0 {
        return Err(ConfigError::Invalid("capture_threshold must be >= 1".to_string()));
    }
    if !(settings.rate >= 0.0) {
        return Err(ConfigError::Invalid(format!("rate {} must be >= 0", settings.rate)));
    }
    if settings.plate_prefix.is_empty() {
        return Err(ConfigError::Invalid("plate_prefix must not be empty".to_string()));
    }
    // 轮询间隔为 0 时确认等待会空转
    if settings.ack_timeout_ms == 0 || settings.ack_poll_ms == 0 {
        return Err(ConfigError::Invalid(format!(
            "ack_timeout_ms {} and ack_poll_ms {} must both be >= 1",
            settings.ack_timeout_ms, settings.ack_poll_ms
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CooldownScope, PlateMatch};

    #[test]
    fn missing_fields_keep_side_defaults() {
        let settings = parse_settings(GateSide::Exit, r#"{"rate": 2.5}"#).unwrap();
        assert_eq!(settings.rate, 2.5);
        assert_eq!(settings.gate_location, "Exit");
        assert_eq!(settings.buzzer_secs, 5);
        assert_eq!(settings.effective_plate_match(), PlateMatch::Scan);
    }

    #[test]
    fn enums_use_snake_case() {
        let settings = parse_settings(
            GateSide::Entry,
            r#"{"plate_match": "scan", "cooldown_scope": "per_plate"}"#,
        )
        .unwrap();
        assert_eq!(settings.effective_plate_match(), PlateMatch::Scan);
        assert_eq!(settings.cooldown_scope, CooldownScope::PerPlate);
    }

    #[test]
    fn command_line_side_wins() {
        let settings = parse_settings(GateSide::Entry, r#"{"side": "exit"}"#).unwrap();
        assert_eq!(settings.side, GateSide::Entry);
    }

    #[test]
    fn inverted_distance_range_is_rejected() {
        let mut settings = GateSettings::default();
        settings.min_distance = 30.0;
        assert!(matches!(validate(&settings), Err(ConfigError::Invalid(_))));
        settings.min_distance = 0.0;
        settings.capture_threshold = 0;
        assert!(validate(&settings).is_err());
        settings.capture_threshold = 6;
        settings.rate = f64::NAN;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn zero_ack_timing_is_rejected() {
        let settings = parse_settings(GateSide::Exit, r#"{"ack_poll_ms": 0}"#).unwrap();
        assert!(matches!(validate(&settings), Err(ConfigError::Invalid(_))));
        let settings = parse_settings(GateSide::Exit, r#"{"ack_timeout_ms": 0}"#).unwrap();
        assert!(validate(&settings).is_err());
        assert!(validate(&GateSettings::for_side(GateSide::Exit)).is_ok());
    }

    #[test]
    fn non_object_json_is_rejected() {
        assert!(matches!(
            parse_settings(GateSide::Entry, "[1, 2]"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
