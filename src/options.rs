use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::{Result, TransportError};

/// Configures retry, timeout, compression and sniffing behavior.
///
/// Can be deserialized from a config file. Duration fields accept either a
/// number of milliseconds or a string such as `"30s"` or `"500ms"`;
/// `sniffInterval` additionally accepts `false` to disable periodic sniffing.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportOptions {
    /// Number of retries after the initial attempt.
    pub max_retries: usize,
    /// Default per-request timeout.
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
    /// Advertise `Accept-Encoding: gzip,deflate` and decode compressed bodies.
    pub suggest_compression: bool,
    /// Enables periodic sniffing when set.
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub sniff_interval: Option<Duration>,
    /// Starts a sniff whenever a request fails at the network level.
    pub sniff_on_connection_fault: bool,
    /// Path queried for the cluster's node list.
    pub sniff_endpoint: String,
    /// Starts a sniff as soon as the transport is built.
    pub sniff_on_start: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            suggest_compression: false,
            sniff_interval: None,
            sniff_on_connection_fault: false,
            sniff_endpoint: "_nodes/_all/http".to_owned(),
            sniff_on_start: false,
        }
    }
}

impl TransportOptions {
    /// Sets the default retry budget.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enables periodic sniffing every `interval`.
    pub fn with_sniff_interval(mut self, interval: Duration) -> Self {
        self.sniff_interval = Some(interval);
        self
    }
}

/// Parses a duration given as bare milliseconds (`"1500"`) or with a unit
/// suffix: `ms`, `s`, `m`, `h` or `d` (`"1.5s"`, `"2m"`).
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value = number
        .parse::<f64>()
        .map_err(|err| {
            TransportError::Configuration(format!("invalid duration '{input}': {err}"))
        })?;

    let millis_per_unit = match unit.trim() {
        "" | "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        "d" => 86_400_000.0,
        other => {
            return Err(TransportError::Configuration(format!(
                "invalid duration '{input}': unknown unit '{other}'"
            )))
        }
    };

    Ok(Duration::from_millis((value * millis_per_unit).round() as u64))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Flag(bool),
    Millis(u64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match DurationRepr::deserialize(deserializer)? {
        DurationRepr::Millis(ms) => Ok(Duration::from_millis(ms)),
        DurationRepr::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
        DurationRepr::Flag(_) => Err(serde::de::Error::custom(
            "expected milliseconds or a duration string",
        )),
    }
}

fn deserialize_optional_duration<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match DurationRepr::deserialize(deserializer)? {
        DurationRepr::Flag(false) => Ok(None),
        DurationRepr::Flag(true) => Err(serde::de::Error::custom(
            "`true` is not an interval; give milliseconds or a duration string",
        )),
        DurationRepr::Millis(ms) => Ok(Some(Duration::from_millis(ms))),
        DurationRepr::Text(text) => parse_duration(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{parse_duration, TransportOptions};

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("1500").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration(" 1h ").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("10 parsecs").is_err());
    }

    #[test]
    fn options_from_json_accept_strings_and_numbers() {
        let options: TransportOptions = serde_json::from_str(
            r#"{
                "maxRetries": 5,
                "requestTimeout": "10s",
                "sniffInterval": 60000,
                "sniffOnConnectionFault": true
            }"#,
        )
        .expect("options must parse");

        assert_eq!(options.max_retries, 5);
        assert_eq!(options.request_timeout, Duration::from_secs(10));
        assert_eq!(options.sniff_interval, Some(Duration::from_secs(60)));
        assert!(options.sniff_on_connection_fault);
        assert_eq!(options.sniff_endpoint, "_nodes/_all/http");
    }

    #[test]
    fn sniff_interval_false_disables_sniffing() {
        let options: TransportOptions =
            serde_json::from_str(r#"{ "sniffInterval": false }"#).expect("options must parse");
        assert_eq!(options.sniff_interval, None);
        assert_eq!(options.request_timeout, Duration::from_secs(30));
    }
}
