//! Prometheus text-format (v0.0.4) decoder.
//!
//! Decodes an exposition body into metric families keyed by name. Only the
//! subset the agent consumes is modeled: counters and gauges with labeled
//! samples. Histograms, summaries, and anything else decode as untyped and
//! are ignored by the extractor.

use hostlink_core::{Error, Result};
use std::collections::HashMap;

/// Declared type of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyKind {
    Counter,
    Gauge,
    Untyped,
}

/// One sample line within a family.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl Sample {
    /// Value of a label by name, if present.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A metric family: its declared kind and all its samples.
#[derive(Debug, Clone)]
pub struct MetricFamily {
    pub kind: FamilyKind,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    fn new(kind: FamilyKind) -> Self {
        Self {
            kind,
            samples: Vec::new(),
        }
    }

    /// First sample's value, for single-sample gauges.
    pub fn first_value(&self) -> Option<f64> {
        self.samples.first().map(|s| s.value)
    }

    /// Value of the sample whose `label` equals `value`.
    pub fn value_for_label(&self, label: &str, value: &str) -> Option<f64> {
        self.samples
            .iter()
            .find(|s| s.label(label) == Some(value))
            .map(|s| s.value)
    }
}

/// Decode a full exposition body into families keyed by metric name.
pub fn parse(body: &str) -> Result<HashMap<String, MetricFamily>> {
    let mut families: HashMap<String, MetricFamily> = HashMap::new();

    for (line_no, raw) in body.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('#') {
            let rest = rest.trim_start();
            if let Some(type_decl) = rest.strip_prefix("TYPE ") {
                let mut parts = type_decl.split_whitespace();
                let name = parts.next().ok_or_else(|| {
                    Error::MetricsDecode(format!("line {}: TYPE without a metric name", line_no + 1))
                })?;
                let kind = match parts.next() {
                    Some("counter") => FamilyKind::Counter,
                    Some("gauge") => FamilyKind::Gauge,
                    _ => FamilyKind::Untyped,
                };
                families
                    .entry(name.to_string())
                    .or_insert_with(|| MetricFamily::new(kind))
                    .kind = kind;
            }
            // # HELP and free-form comments are skipped.
            continue;
        }

        let (name, sample) = parse_sample(line)
            .map_err(|e| Error::MetricsDecode(format!("line {}: {e}", line_no + 1)))?;
        families
            .entry(name)
            .or_insert_with(|| MetricFamily::new(FamilyKind::Untyped))
            .samples
            .push(sample);
    }

    Ok(families)
}

/// Parse one sample line: `name{label="value",...} value [timestamp]`.
fn parse_sample(line: &str) -> std::result::Result<(String, Sample), String> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or_else(|| "sample line has no value".to_string())?;
    let name = &line[..name_end];
    if name.is_empty() {
        return Err("sample line has an empty metric name".to_string());
    }

    let rest = &line[name_end..];
    let (labels, rest) = if let Some(after_brace) = rest.strip_prefix('{') {
        parse_labels(after_brace)?
    } else {
        (Vec::new(), rest)
    };

    let mut fields = rest.split_whitespace();
    let value_text = fields
        .next()
        .ok_or_else(|| format!("metric {name} has no value"))?;
    let value = parse_value(value_text)
        .ok_or_else(|| format!("metric {name} has an unparsable value '{value_text}'"))?;
    // An optional trailing timestamp is allowed and ignored.

    Ok((
        name.to_string(),
        Sample { labels, value },
    ))
}

/// Parse the label block after the opening brace. Returns the labels and
/// the remainder of the line after the closing brace.
fn parse_labels(input: &str) -> std::result::Result<(Vec<(String, String)>, &str), String> {
    let mut labels = Vec::new();
    let mut chars = input.char_indices().peekable();

    loop {
        // Skip separators and detect the closing brace.
        while let Some(&(_, c)) = chars.peek() {
            if c == ',' || c.is_whitespace() {
                chars.next();
            } else {
                break;
            }
        }
        match chars.peek() {
            Some(&(i, '}')) => {
                return Ok((labels, &input[i + 1..]));
            }
            None => return Err("unterminated label block".to_string()),
            _ => {}
        }

        // Label name up to '='.
        let mut name = String::new();
        for (_, c) in chars.by_ref() {
            if c == '=' {
                break;
            }
            name.push(c);
        }
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err("empty label name".to_string());
        }

        // Quoted label value with escapes.
        match chars.next() {
            Some((_, '"')) => {}
            _ => return Err(format!("label {name} value is not quoted")),
        }
        let mut value = String::new();
        let mut closed = false;
        while let Some((_, c)) = chars.next() {
            match c {
                '"' => {
                    closed = true;
                    break;
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(format!("label {name} value ends mid-escape")),
                },
                other => value.push(other),
            }
        }
        if !closed {
            return Err(format!("label {name} value is unterminated"));
        }

        labels.push((name, value));
    }
}

fn parse_value(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        _ => text.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPOSITION: &str = r#"
# HELP windows_cpu_time_total Time that processor spent in different modes.
# TYPE windows_cpu_time_total counter
windows_cpu_time_total{core="0,0",mode="idle"} 3000.5
windows_cpu_time_total{core="0,0",mode="user"} 1000.25
windows_cpu_time_total{core="0,1",mode="idle"} 2999.5
windows_cpu_time_total{core="0,1",mode="user"} 999.75
# HELP windows_memory_available_bytes The amount of physical memory immediately available.
# TYPE windows_memory_available_bytes gauge
windows_memory_available_bytes 8.589934592e+09
# TYPE windows_logical_disk_free_bytes gauge
windows_logical_disk_free_bytes{volume="C:"} 2.147483648e+11
windows_logical_disk_free_bytes{volume="D:"} 1.073741824e+11
"#;

    #[test]
    fn parses_families_with_kinds() {
        let families = parse(EXPOSITION).unwrap();

        let cpu = &families["windows_cpu_time_total"];
        assert_eq!(cpu.kind, FamilyKind::Counter);
        assert_eq!(cpu.samples.len(), 4);

        let memory = &families["windows_memory_available_bytes"];
        assert_eq!(memory.kind, FamilyKind::Gauge);
        assert_eq!(memory.first_value(), Some(8.589934592e9));
    }

    #[test]
    fn looks_up_samples_by_label() {
        let families = parse(EXPOSITION).unwrap();
        let disk = &families["windows_logical_disk_free_bytes"];
        assert_eq!(disk.value_for_label("volume", "C:"), Some(2.147483648e11));
        assert_eq!(disk.value_for_label("volume", "E:"), None);

        let cpu = &families["windows_cpu_time_total"];
        let idle: f64 = cpu
            .samples
            .iter()
            .filter(|s| s.label("mode") == Some("idle"))
            .map(|s| s.value)
            .sum();
        assert_eq!(idle, 6000.0);
    }

    #[test]
    fn sample_without_labels_or_type() {
        let families = parse("plain_metric 42\n").unwrap();
        let family = &families["plain_metric"];
        assert_eq!(family.kind, FamilyKind::Untyped);
        assert_eq!(family.first_value(), Some(42.0));
    }

    #[test]
    fn label_escapes_are_decoded() {
        let families = parse(r#"m{path="C:\\logs\\a.log",desc="say \"hi\"\n"} 1"#).unwrap();
        let sample = &families["m"].samples[0];
        assert_eq!(sample.label("path"), Some("C:\\logs\\a.log"));
        assert_eq!(sample.label("desc"), Some("say \"hi\"\n"));
    }

    #[test]
    fn trailing_timestamp_is_ignored() {
        let families = parse("m{a=\"b\"} 3.5 1700000000000\n").unwrap();
        assert_eq!(families["m"].first_value(), Some(3.5));
    }

    #[test]
    fn special_float_values() {
        let families = parse("m_nan NaN\nm_inf +Inf\nm_neg -Inf\n").unwrap();
        assert!(families["m_nan"].first_value().unwrap().is_nan());
        assert_eq!(families["m_inf"].first_value(), Some(f64::INFINITY));
        assert_eq!(families["m_neg"].first_value(), Some(f64::NEG_INFINITY));
    }

    #[test]
    fn malformed_lines_error() {
        assert!(parse("broken{unclosed=\"x\" 1\n").is_err());
        assert!(parse("no_value_here\n").is_err());
        assert!(parse("m{a=\"b\"} not_a_number\n").is_err());
    }

    #[test]
    fn histograms_decode_as_untyped_and_are_harmless() {
        let body = "# TYPE h histogram\nh_bucket{le=\"1\"} 3\nh_sum 2.5\nh_count 3\n";
        let families = parse(body).unwrap();
        assert_eq!(families["h_bucket"].kind, FamilyKind::Untyped);
        assert_eq!(families["h_count"].first_value(), Some(3.0));
    }
}
