use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Commands accepted by the spa node. Each set command carries the raw
/// integer the hub sent; normalization happens at the device seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "value")]
pub enum SpaCommand {
    #[serde(rename = "SET_SPEED_P1")]
    SetPump1Speed(i32),
    #[serde(rename = "SET_SPEED_P2")]
    SetPump2Speed(i32),
    #[serde(rename = "SET_TEMP")]
    SetTemp(i32),
    #[serde(rename = "SET_BLOWER")]
    SetBlower(i32),
    #[serde(rename = "SET_CIRP")]
    SetCirculationPump(i32),
    #[serde(rename = "SET_LIGHT")]
    SetLight(i32),
    #[serde(rename = "QUERY")]
    Query,
}

impl SpaCommand {
    pub const NAMES: [&'static str; 7] = [
        "SET_SPEED_P1",
        "SET_SPEED_P2",
        "SET_TEMP",
        "SET_BLOWER",
        "SET_CIRP",
        "SET_LIGHT",
        "QUERY",
    ];

    pub fn parse(name: &str, payload: &[u8]) -> Result<Self, CommandError> {
        let cmd = match name {
            "SET_SPEED_P1" => SpaCommand::SetPump1Speed(coerce_value(payload)?),
            "SET_SPEED_P2" => SpaCommand::SetPump2Speed(coerce_value(payload)?),
            "SET_TEMP" => SpaCommand::SetTemp(coerce_value(payload)?),
            "SET_BLOWER" => SpaCommand::SetBlower(coerce_value(payload)?),
            "SET_CIRP" => SpaCommand::SetCirculationPump(coerce_value(payload)?),
            "SET_LIGHT" => SpaCommand::SetLight(coerce_value(payload)?),
            "QUERY" => SpaCommand::Query,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpaCommand::SetPump1Speed(_) => "SET_SPEED_P1",
            SpaCommand::SetPump2Speed(_) => "SET_SPEED_P2",
            SpaCommand::SetTemp(_) => "SET_TEMP",
            SpaCommand::SetBlower(_) => "SET_BLOWER",
            SpaCommand::SetCirculationPump(_) => "SET_CIRP",
            SpaCommand::SetLight(_) => "SET_LIGHT",
            SpaCommand::Query => "QUERY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerCommand {
    Query,
    Discover,
}

impl ControllerCommand {
    pub const NAMES: [&'static str; 2] = ["QUERY", "DISCOVER"];

    pub fn parse(name: &str) -> Result<Self, CommandError> {
        match name {
            "QUERY" => Ok(ControllerCommand::Query),
            "DISCOVER" => Ok(ControllerCommand::Discover),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControllerCommand::Query => "QUERY",
            ControllerCommand::Discover => "DISCOVER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("command value missing")]
    MissingValue,
    #[error("command value is not an integer: {0}")]
    InvalidValue(String),
}

/// Coerce an inbound command payload to an integer.
///
/// Accepts a bare number (`57`, `57.0`), a quoted string (`"57"`), or an
/// object carrying a `value` field. Fractional numbers truncate toward zero.
pub fn coerce_value(payload: &[u8]) -> Result<i32, CommandError> {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim();
    if text.is_empty() {
        return Err(CommandError::MissingValue);
    }
    match serde_json::from_str::<Value>(text) {
        Ok(v) => coerce_json(&v),
        Err(_) => text
            .parse::<i32>()
            .map_err(|_| CommandError::InvalidValue(text.to_string())),
    }
}

fn coerce_json(v: &Value) -> Result<i32, CommandError> {
    match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i32::try_from(i).map_err(|_| CommandError::InvalidValue(n.to_string()))
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.is_finite() && f.abs() <= i32::MAX as f64 {
                    Ok(f.trunc() as i32)
                } else {
                    Err(CommandError::InvalidValue(n.to_string()))
                }
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i32>()
            .map_err(|_| CommandError::InvalidValue(s.clone())),
        Value::Object(map) => match map.get("value") {
            Some(inner) => coerce_json(inner),
            None => Err(CommandError::MissingValue),
        },
        Value::Null => Err(CommandError::MissingValue),
        other => Err(CommandError::InvalidValue(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_common_payload_shapes() {
        assert_eq!(coerce_value(b"57"), Ok(57));
        assert_eq!(coerce_value(b" 100 \n"), Ok(100));
        assert_eq!(coerce_value(b"\"42\""), Ok(42));
        assert_eq!(coerce_value(br#"{"value": "3"}"#), Ok(3));
        assert_eq!(coerce_value(br#"{"value": 99.7}"#), Ok(99));
        assert_eq!(coerce_value(b"-4"), Ok(-4));
    }

    #[test]
    fn rejects_unusable_payloads() {
        assert_eq!(coerce_value(b""), Err(CommandError::MissingValue));
        assert_eq!(coerce_value(b"null"), Err(CommandError::MissingValue));
        assert_eq!(coerce_value(br#"{"uom": 4}"#), Err(CommandError::MissingValue));
        assert!(matches!(coerce_value(b"warm"), Err(CommandError::InvalidValue(_))));
        assert!(matches!(coerce_value(b"[1]"), Err(CommandError::InvalidValue(_))));
        assert!(matches!(coerce_value(b"1e12"), Err(CommandError::InvalidValue(_))));
    }

    #[test]
    fn parses_spa_commands_by_name() {
        assert_eq!(SpaCommand::parse("SET_SPEED_P1", b"1"), Ok(SpaCommand::SetPump1Speed(1)));
        assert_eq!(SpaCommand::parse("SET_CIRP", b"100"), Ok(SpaCommand::SetCirculationPump(100)));
        assert_eq!(SpaCommand::parse("QUERY", b""), Ok(SpaCommand::Query));
        assert_eq!(
            SpaCommand::parse("SET_JETS", b"1"),
            Err(CommandError::Unknown("SET_JETS".into()))
        );
        assert_eq!(SpaCommand::parse("SET_TEMP", b""), Err(CommandError::MissingValue));
    }

    #[test]
    fn names_match_parse_table() {
        for name in SpaCommand::NAMES {
            let cmd = SpaCommand::parse(name, b"0").unwrap();
            assert_eq!(cmd.name(), name);
        }
        for name in ControllerCommand::NAMES {
            assert_eq!(ControllerCommand::parse(name).unwrap().name(), name);
        }
    }

    #[test]
    fn serde_uses_hub_names() {
        let json = serde_json::to_value(SpaCommand::SetBlower(100)).unwrap();
        assert_eq!(json, serde_json::json!({"cmd": "SET_BLOWER", "value": 100}));
        let json = serde_json::to_value(ControllerCommand::Discover).unwrap();
        assert_eq!(json, "DISCOVER");
    }

    #[test]
    fn errors_describe_the_rejected_input() {
        let err = SpaCommand::parse("REBOOT", b"1").unwrap_err();
        assert_eq!(err.to_string(), "unknown command: REBOOT");
        let err = SpaCommand::parse("SET_TEMP", b"warm").unwrap_err();
        assert_eq!(err, CommandError::InvalidValue("warm".into()));
        assert_eq!(err.to_string(), "command value is not an integer: warm");
        let boxed: Box<dyn std::error::Error> = Box::new(CommandError::MissingValue);
        assert_eq!(boxed.to_string(), "command value missing");
    }
}
