use serde::de::{self, IgnoredAny};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// One recognized line from a line-based engine. Geometry is dropped on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEngineLine")]
pub struct OcrLine {
    pub text: String,
    pub score: f64,
}

impl OcrLine {
    pub fn new(text: impl Into<String>, score: f64) -> Self {
        Self {
            text: text.into(),
            score,
        }
    }
}

/// Engine wire form of a line: `[geometry, [text, score]]`.
#[derive(Deserialize)]
struct RawEngineLine(IgnoredAny, (String, f64));

impl From<RawEngineLine> for OcrLine {
    fn from(raw: RawEngineLine) -> Self {
        let RawEngineLine(_, (text, score)) = raw;
        OcrLine { text, score }
    }
}

/// Raw output of one OCR engine run, tagged by the shape the engine produces.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum OcrResult {
    /// Parallel word / confidence arrays (confidence in [-1, 100], non-positive = unusable).
    WordConf {
        #[serde(rename = "text")]
        words: Vec<String>,
        #[serde(rename = "conf", deserialize_with = "deserialize_confidences")]
        confidences: Vec<i32>,
    },
    /// Pages of lines, each line carrying its own score in [0, 1].
    Lines {
        #[serde(deserialize_with = "deserialize_pages")]
        pages: Vec<Vec<OcrLine>>,
    },
}

fn deserialize_confidences<'de, D>(deserializer: D) -> Result<Vec<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    raw.iter()
        .enumerate()
        .map(|(i, v)| {
            confidence_from_value(v)
                .ok_or_else(|| de::Error::custom(format!("conf[{}] is not numeric: {}", i, v)))
        })
        .collect()
}

/// Word engines emit confidences as ints, floats or numeric strings depending on version.
fn confidence_from_value(value: &Value) -> Option<i32> {
    fn from_float(f: f64) -> Option<i32> {
        f.is_finite().then(|| f.trunc() as i32)
    }
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(|i| i.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
            .or_else(|| n.as_f64().and_then(from_float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i32>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(from_float))
        }
        _ => None,
    }
}

fn deserialize_pages<'de, D>(deserializer: D) -> Result<Vec<Vec<OcrLine>>, D::Error>
where
    D: Deserializer<'de>,
{
    // Blank pages come back as null.
    let raw = Vec::<Option<Vec<OcrLine>>>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(Option::unwrap_or_default).collect())
}

/// Label of the engine that produced a result, stored with the performance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OcrMethod {
    #[serde(rename = "tesseract")]
    Tesseract,
    #[serde(rename = "paddleOCR")]
    PaddleOcr,
}

impl OcrMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrMethod::Tesseract => "tesseract",
            OcrMethod::PaddleOcr => "paddleOCR",
        }
    }
}

impl fmt::Display for OcrMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tesseract" => Ok(OcrMethod::Tesseract),
            "paddleOCR" => Ok(OcrMethod::PaddleOcr),
            other => Err(format!("unknown OCR method '{}'", other)),
        }
    }
}

/// Field-parser output, kept as the raw JSON mapping so that "absent" and
/// "present but empty" stay distinguishable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParsedFields(pub Map<String, Value>);

impl ParsedFields {
    /// Look up a dotted path such as `supplier_data.ICO`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        segments.try_fold(self.0.get(first)?, |current, segment| current.get(segment))
    }

    /// True when the value at `path` exists and is truthy.
    pub fn is_set(&self, path: &str) -> bool {
        self.get_path(path).map(is_truthy).unwrap_or(false)
    }

    /// Value at `path` rendered as text; `None` when absent or null.
    pub fn text(&self, path: &str) -> Option<String> {
        self.get_path(path).and_then(value_to_text)
    }
}

/// Null, false, zero, blank strings and empty containers are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Caller identity, passed explicitly instead of read from a request session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: Option<i64>,
    pub active_organization_id: Option<i64>,
}

/// Seconds spent in recognition and field parsing for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub recognition: f64,
    pub parsing: f64,
}
