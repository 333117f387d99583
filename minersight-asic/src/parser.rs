//! Normalization of raw API responses into telemetry fields.
//!
//! Everything here is pure: the same payloads always produce the same
//! sample. Vendor differences (bare object vs. single-element list, scalar
//! vs. list vs. delimited-string sensor readings, `GHS`/`MHS`/`THS` units)
//! are absorbed by [`Field`], so callers only ever see optional canonical
//! values.

use serde_json::{Map, Value};

use minersight_common::{Address, RawResponses, TelemetrySample};

/// Hash-rate keys in priority order, with the divisor that converts each
/// to TH/s. Short-window readings win over averages.
const HASH_RATE_KEYS: &[(&str, f64)] = &[
    ("GHS 5s", 1e3),
    ("MHS 5s", 1e6),
    ("THS 5s", 1.0),
    ("GHS av", 1e3),
    ("MHS av", 1e6),
    ("THS av", 1.0),
];

const POWER_KEYS: &[&str] = &["power", "power_consumption", "chain_power"];

/// Status severity from a cgminer `STATUS` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Info,
    Warning,
    Error,
    Fatal,
}

impl StatusCode {
    fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "S" => Some(StatusCode::Success),
            "I" => Some(StatusCode::Info),
            "W" => Some(StatusCode::Warning),
            "E" => Some(StatusCode::Error),
            "F" => Some(StatusCode::Fatal),
            _ => None,
        }
    }
}

/// Decoded `STATUS` block of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStatus {
    pub code: StatusCode,
    pub message: Option<String>,
    pub description: Option<String>,
}

impl CommandStatus {
    /// The device rejected the command (`E` or `F`).
    pub fn is_refusal(&self) -> bool {
        matches!(self.code, StatusCode::Error | StatusCode::Fatal)
    }
}

/// Fields extracted from a `summary` response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryFields {
    pub hash_rate_ths: Option<f64>,
    pub accepted_shares: Option<u64>,
    pub rejected_shares: Option<u64>,
    pub pool_switches: Option<u64>,
    pub temperature_c: Option<f64>,
    pub fan_speed: Option<f64>,
    pub power_watts: Option<f64>,
}

/// Fields extracted from a `stats` response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsFields {
    pub temperature_c: Option<f64>,
    pub fan_speed: Option<f64>,
    pub power_watts: Option<f64>,
}

/// Optional view of a JSON value with lenient numeric coercion.
#[derive(Debug, Clone, Copy)]
struct Field<'a>(Option<&'a Value>);

impl<'a> Field<'a> {
    fn of(object: &'a Map<String, Value>, key: &str) -> Self {
        Field(object.get(key))
    }

    /// A single finite number; numeric strings are accepted.
    fn number(&self) -> Option<f64> {
        let value = match self.0? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        value.is_finite().then_some(value)
    }

    /// A non-negative integral counter.
    fn count(&self) -> Option<u64> {
        if let Some(Value::Number(n)) = self.0 {
            if let Some(v) = n.as_u64() {
                return Some(v);
            }
        }
        let v = self.number()?;
        (v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64).then_some(v as u64)
    }

    /// Every numeric reading in the field, whatever its shape.
    fn readings(&self) -> Vec<f64> {
        let mut out = Vec::new();
        if let Some(value) = self.0 {
            collect_readings(value, &mut out);
        }
        out
    }

    fn max_reading(&self) -> Option<f64> {
        max_of(self.readings())
    }
}

fn collect_readings(value: &Value, out: &mut Vec<f64>) {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_f64().filter(|v| v.is_finite()) {
                out.push(v);
            }
        }
        Value::String(s) => out.extend(tokenize_readings(s)),
        Value::Array(items) => {
            for item in items {
                collect_readings(item, out);
            }
        }
        _ => {}
    }
}

/// Split a sensor string such as `"55 60 58"`, `"55,60"` or `"56-56-72-72"`.
///
/// Whitespace and commas separate readings; within a token `-` and `/` do
/// too, except for a leading minus sign. Trailing units (`"72C"`) are dropped.
fn tokenize_readings(s: &str) -> Vec<f64> {
    let mut out = Vec::new();
    for token in s.split(|c: char| c.is_whitespace() || c == ',') {
        if token.is_empty() {
            continue;
        }
        if let Some(v) = parse_reading(token) {
            out.push(v);
            continue;
        }
        let (sign, body) = match token.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", token),
        };
        for (i, part) in body.split(['-', '/']).enumerate() {
            let part = if i == 0 && !sign.is_empty() {
                format!("{}{}", sign, part)
            } else {
                part.to_string()
            };
            if let Some(v) = parse_reading(&part) {
                out.push(v);
            }
        }
    }
    out
}

fn parse_reading(token: &str) -> Option<f64> {
    if let Ok(v) = token.parse::<f64>() {
        return v.is_finite().then_some(v);
    }
    let numeric = token.trim_end_matches(|c: char| c.is_ascii_alphabetic() || c == '°' || c == '%');
    if numeric.is_empty() || numeric.len() == token.len() {
        return None;
    }
    numeric.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn max_of(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values.into_iter().fold(None, |acc, v| match acc {
        Some(m) if m >= v => Some(m),
        _ => Some(v),
    })
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    max_of(a.into_iter().chain(b))
}

fn non_negative(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v >= 0.0)
}

/// Locate the top-level entry for `category`.
///
/// The key is matched exactly first, then case-insensitively.
fn category<'a>(payload: &'a Value, category: &str) -> Option<&'a Value> {
    let object = payload.as_object()?;
    object.get(category).or_else(|| {
        object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(category))
            .map(|(_, v)| v)
    })
}

/// All data objects stored under `category`, accepting both the
/// single-element-list and the bare-object shapes.
fn sections<'a>(payload: &'a Value, name: &str) -> Option<Vec<&'a Map<String, Value>>> {
    match category(payload, name)? {
        Value::Object(object) => Some(vec![object]),
        Value::Array(items) => Some(items.iter().filter_map(Value::as_object).collect()),
        _ => None,
    }
}

/// The first data object stored under `category`.
pub(crate) fn section<'a>(payload: &'a Value, name: &str) -> Option<&'a Map<String, Value>> {
    sections(payload, name)?.into_iter().next()
}

fn is_temperature_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    if key == "temp" || key == "temperature" {
        return true;
    }
    if key == "temp_num" {
        return false;
    }
    let Some(rest) = key.strip_prefix("temp") else {
        return false;
    };
    let rest = ["_chip", "_pcb", "chip", "pcb", "max", "in", "out"]
        .iter()
        .find_map(|p| rest.strip_prefix(p))
        .unwrap_or(rest);
    rest.chars().all(|c| c.is_ascii_digit() || c == '_')
}

fn is_fan_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    if key == "fan" || key.starts_with("fan_speed") || key.starts_with("fan speed") {
        return true;
    }
    match key.strip_prefix("fan") {
        Some(rest) if !rest.is_empty() => {
            let rest = rest.trim_start_matches('_');
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}

fn find_power(object: &Map<String, Value>) -> Option<f64> {
    POWER_KEYS.iter().find_map(|wanted| {
        object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
            .and_then(|(_, v)| non_negative(Field(Some(v)).max_reading()))
    })
}

fn max_matching(object: &Map<String, Value>, is_key: fn(&str) -> bool) -> Option<f64> {
    max_of(
        object
            .iter()
            .filter(|(k, _)| is_key(k))
            .flat_map(|(_, v)| Field(Some(v)).readings()),
    )
}

/// Extract summary fields. `None` when the payload has no `SUMMARY` entry.
pub fn parse_summary(payload: &Value) -> Option<SummaryFields> {
    let summary = section(payload, "SUMMARY")?;

    let hash_rate_ths = HASH_RATE_KEYS.iter().find_map(|(key, divisor)| {
        Field::of(summary, key)
            .number()
            .filter(|v| *v >= 0.0)
            .map(|v| v / divisor)
    });

    Some(SummaryFields {
        hash_rate_ths,
        accepted_shares: Field::of(summary, "Accepted").count(),
        rejected_shares: Field::of(summary, "Rejected").count(),
        pool_switches: Field::of(summary, "Pool Switches").count(),
        temperature_c: max_matching(summary, is_temperature_key),
        fan_speed: non_negative(max_matching(summary, is_fan_key)),
        power_watts: find_power(summary),
    })
}

/// Extract stats fields. `None` when the payload has no `STATS` entry.
///
/// Every element of the `STATS` list is inspected; some firmwares put the
/// version banner first and the hashboard data in a later element.
pub fn parse_stats(payload: &Value) -> Option<StatsFields> {
    let stats = sections(payload, "STATS")?;

    Some(StatsFields {
        temperature_c: max_of(stats.iter().filter_map(|s| max_matching(s, is_temperature_key))),
        fan_speed: non_negative(max_of(stats.iter().filter_map(|s| max_matching(s, is_fan_key)))),
        power_watts: stats.iter().find_map(|s| find_power(s)),
    })
}

/// Hottest reading across every entry of a `devs` response.
pub fn parse_devs(payload: &Value) -> Option<f64> {
    let devs = sections(payload, "DEVS")?;
    max_of(devs.iter().filter_map(|d| max_matching(d, is_temperature_key)))
}

/// Decode the `STATUS` block of any response.
///
/// Handles the cgminer list form, a bare object, and the Whatsminer form
/// where `STATUS` is a top-level string next to a top-level `Msg`.
pub fn command_status(payload: &Value) -> Option<CommandStatus> {
    let object = payload.as_object()?;
    let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);

    match object.get("STATUS")? {
        Value::String(code) => Some(CommandStatus {
            code: StatusCode::from_code(code)?,
            message: text(object.get("Msg")),
            description: text(object.get("Description")),
        }),
        status => {
            let entry = match status {
                Value::Array(items) => items.first()?.as_object()?,
                Value::Object(entry) => entry,
                _ => return None,
            };
            Some(CommandStatus {
                code: StatusCode::from_code(entry.get("STATUS")?.as_str()?)?,
                message: text(entry.get("Msg")),
                description: text(entry.get("Description")),
            })
        }
    }
}

/// Build a telemetry sample from whatever responses were collected.
///
/// Temperature and fan speed are the maximum over stats, summary and devs
/// readings; power prefers the stats figure.
pub fn build_sample(address: Address, captured_at: i64, raw: RawResponses) -> TelemetrySample {
    let summary = raw.summary.as_ref().and_then(parse_summary).unwrap_or_default();
    let stats = raw.stats.as_ref().and_then(parse_stats).unwrap_or_default();
    let devs_temperature = raw.devs.as_ref().and_then(parse_devs);

    let mut sample = TelemetrySample::captured_at(address, captured_at);
    sample.hash_rate_ths = summary.hash_rate_ths;
    sample.accepted_shares = summary.accepted_shares;
    sample.rejected_shares = summary.rejected_shares;
    sample.pool_switches = summary.pool_switches;
    sample.temperature_c = max_opt(
        max_opt(stats.temperature_c, summary.temperature_c),
        devs_temperature,
    );
    sample.fan_speed = max_opt(stats.fan_speed, summary.fan_speed);
    sample.power_watts = stats.power_watts.or(summary.power_watts);
    sample.raw = raw;
    sample
}
