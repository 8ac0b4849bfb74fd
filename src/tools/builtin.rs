use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::{FixedOffset, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolResult};
use crate::definitions::ToolKind;
use crate::error::ToolError;

pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S.%6f";

/// A zone the time tool can report in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Zone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl Zone {
    fn format_now(&self, format: &str) -> String {
        let items = StrftimeItems::new(format);
        match self {
            Zone::Named(tz) => Utc::now().with_timezone(tz).format_with_items(items).to_string(),
            Zone::Fixed(offset) => Utc::now()
                .with_timezone(offset)
                .format_with_items(items)
                .to_string(),
        }
    }
}

/// Parse an IANA name such as `America/New_York`, or `UTC`, `Z`, `GMT`,
/// `+HH:MM`, `-HH:MM` and `UTC+HH:MM` as a fixed offset.
pub fn parse_timezone(raw: &str) -> Result<Zone, ToolError> {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();
    if matches!(upper.as_str(), "UTC" | "Z" | "GMT") {
        return FixedOffset::east_opt(0)
            .map(Zone::Fixed)
            .ok_or_else(|| ToolError::InvalidInput("invalid UTC offset".to_string()));
    }
    if let Ok(tz) = trimmed.parse::<Tz>() {
        return Ok(Zone::Named(tz));
    }

    let offset = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);

    let invalid = || ToolError::InvalidInput(format!("unsupported timezone '{}'", trimmed));

    let (sign, rest) = match offset.chars().next() {
        Some('+') => (1, &offset[1..]),
        Some('-') => (-1, &offset[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .map(Zone::Fixed)
        .ok_or_else(invalid)
}

fn check_format(format: &str) -> Result<(), ToolError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ToolError::InvalidInput(format!(
            "invalid time format '{}'",
            format
        )));
    }
    Ok(())
}

pub struct CurrentTimeTool {
    default_timezone: String,
}

impl CurrentTimeTool {
    pub fn new(default_timezone: impl Into<String>) -> Result<Self, ToolError> {
        let default_timezone = default_timezone.into();
        parse_timezone(&default_timezone)?;
        Ok(Self { default_timezone })
    }
}

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        ToolKind::GetCurrentTime.as_str()
    }

    fn description(&self) -> &str {
        ToolKind::GetCurrentTime.description()
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "IANA zone name such as America/New_York, UTC, or a fixed offset such as +02:00",
                    "default": self.default_timezone
                },
                "time_format": {
                    "type": "string",
                    "description": "strftime format for the result",
                    "default": DEFAULT_TIME_FORMAT
                }
            }
        })
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let timezone = params["timezone"]
            .as_str()
            .unwrap_or(&self.default_timezone)
            .to_string();
        let format = params["time_format"]
            .as_str()
            .unwrap_or(DEFAULT_TIME_FORMAT)
            .to_string();

        let zone = parse_timezone(&timezone)?;
        check_format(&format)?;
        let formatted = zone.format_now(&format);

        Ok(ToolResult::ok(Value::String(format!(
            "Current date-time is {} in time zone {}, formatted as {}",
            formatted, timezone, format
        ))))
    }
}

/// Canned forecast, useful for demos and wiring checks.
pub struct WeatherForecastTool;

#[async_trait]
impl Tool for WeatherForecastTool {
    fn name(&self) -> &str {
        ToolKind::GetWeatherForecast.as_str()
    }

    fn description(&self) -> &str {
        ToolKind::GetWeatherForecast.description()
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": {"type": "string", "description": "The name of the city"},
                "days": {"type": "integer", "description": "Number of days for the forecast", "default": 1}
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        params["city"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidInput("Missing city parameter".to_string()))?;
        let days = params["days"].as_i64().unwrap_or(1);

        let forecast = if days == 1 {
            "Tomorrow is going to rain"
        } else {
            "I cannot tell, let's say is going to be sunny"
        };
        Ok(ToolResult::ok(Value::String(forecast.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timezone() {
        let fixed = |seconds| Zone::Fixed(FixedOffset::east_opt(seconds).unwrap());
        assert_eq!(parse_timezone("UTC").unwrap(), fixed(0));
        assert_eq!(parse_timezone("+02:00").unwrap(), fixed(7200));
        assert_eq!(parse_timezone("-05:30").unwrap(), fixed(-19800));
        assert_eq!(parse_timezone("UTC+0100").unwrap(), fixed(3600));
        assert_eq!(
            parse_timezone("America/New_York").unwrap(),
            Zone::Named(chrono_tz::America::New_York)
        );
        assert_eq!(
            parse_timezone(" Africa/Accra ").unwrap(),
            Zone::Named(chrono_tz::Africa::Accra)
        );
        assert!(parse_timezone("Mars/Olympus").is_err());
        assert!(parse_timezone("+25:00").is_err());
    }

    #[tokio::test]
    async fn test_current_time_output() {
        let tool = CurrentTimeTool::new("UTC").unwrap();
        let result = tool
            .execute(json!({"time_format": "%Y"}), &ToolContext::default())
            .await
            .unwrap();

        let text = result.to_model_text();
        assert!(text.starts_with("Current date-time is "));
        assert!(text.ends_with("in time zone UTC, formatted as %Y"));
    }

    #[tokio::test]
    async fn test_current_time_in_named_zone() {
        let tool = CurrentTimeTool::new("Europe/Berlin").unwrap();
        let result = tool
            .execute(
                json!({"timezone": "Asia/Tokyo", "time_format": "%Z"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            result.to_model_text(),
            "Current date-time is JST in time zone Asia/Tokyo, formatted as %Z"
        );
    }

    #[tokio::test]
    async fn test_current_time_rejects_bad_format() {
        let tool = CurrentTimeTool::new("UTC").unwrap();
        let result = tool
            .execute(json!({"time_format": "%Y-%Q"}), &ToolContext::default())
            .await;
        assert!(matches!(result, Err(ToolError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_weather_forecast() {
        let tool = WeatherForecastTool;
        let result = tool
            .execute(json!({"city": "Accra"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result.to_model_text(), "Tomorrow is going to rain");

        let missing = tool.execute(json!({}), &ToolContext::default()).await;
        assert!(missing.is_err());
    }
}
