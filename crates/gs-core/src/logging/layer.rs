//! JSONL sink for tracing events, with field-name based redaction.

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::events::Level;

/// How a named field is treated before it reaches the log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    /// Attendee identity: replaced by a short stable hash.
    Identity,
    /// Credentials and session material: dropped entirely.
    Secret,
    Plain,
}

/// Classify a field by name.
pub fn classify_field(name: &str) -> FieldClass {
    match name {
        "email" | "emails" => FieldClass::Identity,
        "cookie" | "cookies" | "token" | "key" | "apikey" | "authorization" | "password" => {
            FieldClass::Secret
        }
        _ => FieldClass::Plain,
    }
}

/// Apply the redaction rule for `name` to `value`.
pub fn redact_field(name: &str, value: &str) -> String {
    match classify_field(name) {
        FieldClass::Identity => hash_identity(value),
        FieldClass::Secret => "[REDACTED]".to_string(),
        FieldClass::Plain => value.to_string(),
    }
}

/// First 12 hex chars of the SHA-256 of the value.
pub fn hash_identity(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(12);
    hex
}

/// Run context carried on events or inherited from enclosing spans.
#[derive(Debug, Clone, Default, Serialize)]
struct RunFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
}

impl RunFields {
    /// Store `value` if `name` is a context field. Returns false otherwise.
    fn absorb(&mut self, name: &str, value: &str) -> bool {
        let slot = match name {
            "run_id" => &mut self.run_id,
            "host_id" => &mut self.host_id,
            "event_id" => &mut self.event_id,
            "stage" => &mut self.stage,
            _ => return false,
        };
        // Run-level events carry an empty event_id.
        if !value.is_empty() {
            *slot = Some(value.to_string());
        }
        true
    }

    fn inherit(&mut self, outer: &RunFields) {
        for (mine, theirs) in [
            (&mut self.run_id, &outer.run_id),
            (&mut self.host_id, &outer.host_id),
            (&mut self.event_id, &outer.event_id),
            (&mut self.stage, &outer.stage),
        ] {
            if mine.is_none() {
                mine.clone_from(theirs);
            }
        }
    }
}

/// One line of JSONL output.
#[derive(Serialize)]
struct Line<'a> {
    ts: String,
    level: Level,
    event: &'a str,
    #[serde(flatten)]
    context: RunFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    fields: Map<String, Value>,
}

/// Collects span or event fields, splitting context from payload.
#[derive(Default)]
struct FieldCollector {
    context: RunFields,
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldCollector {
    fn text(&mut self, name: &str, value: &str) {
        if name == "message" {
            self.message = Some(value.to_string());
        } else if !self.context.absorb(name, value) {
            self.fields
                .insert(name.to_string(), Value::String(redact_field(name, value)));
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.text(field.name(), value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.text(field.name(), &format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = Number::from_f64(value) {
            self.fields.insert(field.name().to_string(), Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), value.into());
    }
}

/// Tracing layer writing one JSON object per event.
pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write> JsonlLayer<W> {
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        attrs.record(&mut collector);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(collector.context);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        // Innermost span first; event fields always win.
        for span in ctx.event_scope(event).into_iter().flatten() {
            if let Some(outer) = span.extensions().get::<RunFields>() {
                collector.context.inherit(outer);
            }
        }

        let line = Line {
            ts: Utc::now().to_rfc3339(),
            level: (*event.metadata().level()).into(),
            event: event.metadata().target(),
            context: collector.context,
            message: collector.message,
            fields: collector.fields,
        };
        let Ok(json) = serde_json::to_string(&line) else {
            return;
        };
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{json}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    fn make_buffer_layer() -> (Arc<Mutex<Vec<u8>>>, impl Layer<tracing_subscriber::Registry>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        struct BufWriter(Arc<Mutex<Vec<u8>>>);
        impl Write for BufWriter {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let layer = JsonlLayer::new(BufWriter(buffer.clone()));
        (buffer, layer)
    }

    fn captured(buffer: &Arc<Mutex<Vec<u8>>>) -> serde_json::Value {
        let output = buffer.lock().unwrap();
        let text = String::from_utf8_lossy(&output);
        serde_json::from_str(text.trim()).expect("valid JSON line")
    }

    #[test]
    fn test_classify_field() {
        assert_eq!(classify_field("email"), FieldClass::Identity);
        assert_eq!(classify_field("cookie"), FieldClass::Secret);
        assert_eq!(classify_field("authorization"), FieldClass::Secret);
        assert_eq!(classify_field("key"), FieldClass::Secret);
        assert_eq!(classify_field("url"), FieldClass::Plain);
    }

    #[test]
    fn test_hash_identity_is_stable_and_short() {
        let a = hash_identity("jane@example.com");
        assert_eq!(a.len(), 12);
        assert_eq!(a, hash_identity("jane@example.com"));
        assert_ne!(a, hash_identity("bob@example.com"));
    }

    #[test]
    fn layer_writes_level_and_message() {
        let (buffer, layer) = make_buffer_layer();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "export.failed", message = "gave up");
        });

        let parsed = captured(&buffer);
        assert_eq!(parsed["level"], "warn");
        assert_eq!(parsed["event"], "export.failed");
        assert_eq!(parsed["message"], "gave up");
        assert!(parsed["ts"].is_string());
    }

    #[test]
    fn layer_redacts_sensitive_fields() {
        let (buffer, layer) = make_buffer_layer();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(
                target: "test.redact",
                email = "jane@example.com",
                cookie = "session=abc",
                url = "https://luma.com/x",
                message = "hi"
            );
        });

        let parsed = captured(&buffer);
        assert_eq!(parsed["fields"]["email"], hash_identity("jane@example.com"));
        assert_eq!(parsed["fields"]["cookie"], "[REDACTED]");
        assert_eq!(parsed["fields"]["url"], "https://luma.com/x");
    }

    #[test]
    fn layer_lifts_context_fields() {
        let (buffer, layer) = make_buffer_layer();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(
                target: "sync.finished",
                run_id = "gs-1",
                host_id = "host-1",
                event_id = "evt-1",
                stage = "sync",
                rows = 3u64,
                message = "done"
            );
        });

        let parsed = captured(&buffer);
        assert_eq!(parsed["run_id"], "gs-1");
        assert_eq!(parsed["event_id"], "evt-1");
        assert_eq!(parsed["stage"], "sync");
        assert_eq!(parsed["fields"]["rows"], 3);
        assert!(parsed["fields"].get("run_id").is_none());
    }

    #[test]
    fn layer_uses_span_context() {
        let (buffer, layer) = make_buffer_layer();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("worker", run_id = "gs-2", event_id = "evt-2");
            let _guard = span.enter();
            tracing::info!(target: "export.saved", message = "saved");
        });

        let parsed = captured(&buffer);
        assert_eq!(parsed["run_id"], "gs-2");
        assert_eq!(parsed["event_id"], "evt-2");
    }
}
