//! Turns a `LogRecord` into a newline-free UTF-8 JSON document ready for
//! the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::logship::common::Result;

/// Top-level fields a formatter may never let extras override.
pub const RESERVED_FIELDS: &[&str] = &[
    "@timestamp",
    "@version",
    "host",
    "level",
    "logsource",
    "message",
    "pid",
    "port",
    "program",
    "type",
];

/// Record attributes that must never leak into the extras namespace,
/// regardless of `extra_prefix`. Distinct from `RESERVED_FIELDS`: these are
/// input-side keys on `LogRecord::fields`, not output-side JSON keys.
pub const SKIPPED_RECORD_FIELDS: &[&str] = &["exc_info", "stack_info", "args"];

/// An unformatted application log event handed to a `Formatter`.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub message: String,
    pub level: String,
    pub timestamp: DateTime<Utc>,
    pub pid: u32,
    pub program: String,
    /// Caller-supplied key/value pairs, merged into extras subject to
    /// `extra_prefix` and the reserved/skip lists.
    pub fields: BTreeMap<String, Value>,
}

/// Options recognized by the formatter contract.
#[derive(Debug, Clone)]
pub struct FormatterOptions {
    pub message_type: Option<String>,
    pub tags: Vec<String>,
    pub fqdn: bool,
    pub extra_prefix: Option<String>,
    pub extra: BTreeMap<String, Value>,
    pub ensure_ascii: bool,
}

impl Default for FormatterOptions {
    /// Matches the original system's own default `type` field.
    fn default() -> Self {
        FormatterOptions {
            message_type: Some("python-logstash".to_string()),
            tags: Vec::new(),
            fqdn: false,
            extra_prefix: None,
            extra: BTreeMap::new(),
            ensure_ascii: false,
        }
    }
}

pub trait Formatter: Send + Sync {
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>>;
}

/// The reference formatter: a flat Logstash-style JSON event.
pub struct LogstashFormatter {
    options: FormatterOptions,
    diagnostics: crate::logship::diagnostic::TracingDiagnosticSink,
}

impl LogstashFormatter {
    pub fn new(options: FormatterOptions) -> Self {
        LogstashFormatter {
            options,
            diagnostics: crate::logship::diagnostic::TracingDiagnosticSink::new(
                crate::logship::rate_limit::RateLimiter::new(Some(
                    crate::logship::rate_limit::RateSpec::parse("1 per minute")
                        .expect("static rate spec is valid"),
                )),
            ),
        }
    }

    fn host_field(&self) -> String {
        resolve_host(self.options.fqdn)
    }

    /// Merge `fields` (minus the skip-list) plus the static `extra` map into
    /// `doc`, honoring `extra_prefix`. Reserved fields always win on
    /// collision.
    fn merge_extras(&self, doc: &mut Map<String, Value>, record: &LogRecord) {
        let mut extras = self.options.extra.clone();
        for (k, v) in &record.fields {
            if SKIPPED_RECORD_FIELDS.contains(&k.as_str()) {
                continue;
            }
            extras.insert(k.clone(), v.clone());
        }

        match self.options.extra_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => {
                if RESERVED_FIELDS.contains(&prefix) {
                    self.diagnostics.emit(
                        crate::logship::diagnostic::Severity::Warning,
                        "formatter.extra_prefix_collision",
                        &format!(
                            "extra_prefix {:?} collides with a reserved top-level field; dropping",
                            prefix
                        ),
                    );
                    return;
                }
                let nested: Map<String, Value> = extras.into_iter().collect();
                doc.insert(prefix.to_string(), Value::Object(nested));
            }
            _ => {
                for (k, v) in extras {
                    if RESERVED_FIELDS.contains(&k.as_str()) {
                        self.diagnostics.emit(
                            crate::logship::diagnostic::Severity::Warning,
                            "formatter.reserved_field_collision",
                            &format!(
                                "extra field {:?} collides with a reserved top-level field; dropping",
                                k
                            ),
                        );
                        continue;
                    }
                    doc.insert(k, v);
                }
            }
        }
    }
}

impl Formatter for LogstashFormatter {
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>> {
        let mut doc = Map::new();
        doc.insert(
            "@timestamp".to_string(),
            Value::String(record.timestamp.to_rfc3339()),
        );
        doc.insert("@version".to_string(), Value::String("1".to_string()));
        doc.insert("message".to_string(), Value::String(record.message.clone()));
        doc.insert("host".to_string(), Value::String(self.host_field()));
        doc.insert("level".to_string(), Value::String(record.level.clone()));
        doc.insert("logsource".to_string(), Value::String(self.host_field()));
        doc.insert("pid".to_string(), Value::from(record.pid));
        doc.insert("program".to_string(), Value::String(record.program.clone()));
        if let Some(message_type) = &self.options.message_type {
            doc.insert("type".to_string(), Value::String(message_type.clone()));
        }
        if !self.options.tags.is_empty() {
            doc.insert(
                "tags".to_string(),
                Value::Array(self.options.tags.iter().cloned().map(Value::String).collect()),
            );
        }

        self.merge_extras(&mut doc, record);

        let value = Value::Object(doc);
        let rendered = if self.options.ensure_ascii {
            escape_non_ascii(&serde_json::to_string(&value).map_err(|e| {
                crate::logship::common::Error::new(format!("formatter serialization failed: {}", e))
            })?)
        } else {
            serde_json::to_string(&value)
                .map_err(|e| crate::logship::common::Error::new(format!("formatter serialization failed: {}", e)))?
        };

        Ok(rendered.into_bytes())
    }
}

fn resolve_host(fqdn: bool) -> String {
    let short = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    if !fqdn {
        return short;
    }
    // hostname(3)-backed crates only ever return the short name portably;
    // a true FQDN lookup is platform-specific, so this is best-effort.
    short
}

fn escape_non_ascii(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            message: message.to_string(),
            level: "INFO".to_string(),
            timestamp: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            pid: 1234,
            program: "logship-test".to_string(),
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn emits_all_reserved_fields() {
        let fmt = LogstashFormatter::new(FormatterOptions::default());
        let bytes = fmt.format(&record("hello")).unwrap();
        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["message"], "hello");
        assert_eq!(doc["@version"], "1");
        assert!(doc.get("@timestamp").is_some());
        assert!(doc.get("host").is_some());
    }

    #[test]
    fn default_type_matches_the_original_system() {
        let fmt = LogstashFormatter::new(FormatterOptions::default());
        let bytes = fmt.format(&record("hello")).unwrap();
        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["type"], "python-logstash");
    }

    #[test]
    fn extra_prefix_nests_extras() {
        let mut options = FormatterOptions::default();
        options.extra_prefix = Some("meta".to_string());
        options.extra.insert("region".to_string(), Value::String("us-east".to_string()));
        let fmt = LogstashFormatter::new(options);
        let bytes = fmt.format(&record("hi")).unwrap();
        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["meta"]["region"], "us-east");
    }

    #[test]
    fn reserved_field_wins_over_colliding_extra_at_top_level() {
        let mut options = FormatterOptions::default();
        options.extra.insert("host".to_string(), Value::String("spoofed".to_string()));
        let fmt = LogstashFormatter::new(options);
        let bytes = fmt.format(&record("hi")).unwrap();
        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert_ne!(doc["host"], Value::String("spoofed".to_string()));
    }

    #[test]
    fn skip_list_fields_never_leak_into_extras() {
        let mut rec = record("boom");
        rec.fields.insert("exc_info".to_string(), Value::String("traceback...".to_string()));
        rec.fields.insert("custom".to_string(), Value::String("kept".to_string()));
        let fmt = LogstashFormatter::new(FormatterOptions::default());
        let bytes = fmt.format(&rec).unwrap();
        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(doc.get("exc_info").is_none());
        assert_eq!(doc["custom"], "kept");
    }

    #[test]
    fn ensure_ascii_escapes_non_ascii_message() {
        let mut options = FormatterOptions::default();
        options.ensure_ascii = true;
        let fmt = LogstashFormatter::new(options);
        let bytes = fmt.format(&record("caf\u{e9}")).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\\u00e9"));
        assert!(!text.contains('\u{e9}'));
    }

    #[test]
    fn output_never_contains_a_newline() {
        let fmt = LogstashFormatter::new(FormatterOptions::default());
        let bytes = fmt.format(&record("line one\nline two")).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        // the message's embedded newline is JSON-escaped, not literal
        assert!(!text.contains('\n'));
    }
}
