//! JSONL sink for tracing events.
//!
//! One JSON object per event on stderr; stdout stays clean for command
//! payloads. Run id and stage come from the enclosing `sbc` span.

use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::events::Level;

/// Run id and stage recorded on an `sbc` span, stored in its extensions.
#[derive(Debug, Clone, Default)]
struct Scope {
    run_id: Option<String>,
    stage: Option<String>,
}

impl Scope {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "run_id" => self.run_id = Some(value),
            "stage" => self.stage = Some(value),
            _ => {}
        }
    }
}

impl Visit for Scope {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field.name(), value.to_owned());
    }

    // `%value` fields arrive here formatted with Display.
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.set(field.name(), format!("{value:?}"));
    }
}

/// Event payload split into the message and the remaining fields.
#[derive(Default)]
struct Payload {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl Payload {
    fn put(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_owned(), value);
    }

    fn put_text(&mut self, field: &Field, text: String) {
        if field.name() == "message" {
            self.message = Some(text);
        } else {
            self.put(field, Value::String(text));
        }
    }
}

impl Visit for Payload {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put_text(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put_text(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // NaN and infinities have no JSON number form.
        let v = Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.put(field, v);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }
}

#[derive(Serialize)]
struct Line<'a> {
    ts: String,
    level: Level,
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    fields: Map<String, Value>,
}

/// Writes each event as a single JSON line.
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
        let mut scope = Scope::default();
        attrs.record(&mut scope);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(scope);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let ts = Utc::now().to_rfc3339();

        // Innermost span wins for each key.
        let mut inherited = Scope::default();
        for span in ctx.event_scope(event).into_iter().flatten() {
            if let Some(scope) = span.extensions().get::<Scope>() {
                if inherited.run_id.is_none() {
                    inherited.run_id.clone_from(&scope.run_id);
                }
                if inherited.stage.is_none() {
                    inherited.stage.clone_from(&scope.stage);
                }
            }
        }

        let mut payload = Payload::default();
        event.record(&mut payload);

        let meta = event.metadata();
        let line = Line {
            ts,
            level: Level::from(*meta.level()),
            event: meta.target(),
            run_id: inherited.run_id,
            stage: inherited.stage,
            message: payload.message,
            fields: payload.fields,
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
    use crate::logging::events::{event_names, LogContext, Stage};
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    struct BufWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for BufWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<serde_json::Value> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let layer = JsonlLayer::new(BufWriter(buffer.clone()));
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
        let output = buffer.lock().unwrap();
        String::from_utf8_lossy(&output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn event_name_and_fields() {
        let lines = capture(|| {
            tracing::info!(
                target: event_names::REPLICATE_FINISHED,
                replicate = 7u64,
                max_rhat = 1.01,
                flagged = false,
                message = "replicate done"
            );
        });
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line["event"], "replicate.finished");
        assert_eq!(line["level"], "info");
        assert_eq!(line["message"], "replicate done");
        assert_eq!(line["fields"]["replicate"], 7);
        assert_eq!(line["fields"]["flagged"], false);
        assert!(line["ts"].is_string());
    }

    #[test]
    fn span_context_is_attached() {
        let lines = capture(|| {
            let ctx = LogContext::new("sbc-20260101-000000-abcdef");
            let span = ctx.span(Stage::Replicate);
            let _guard = span.enter();
            tracing::warn!(target: event_names::REPLICATE_FLAGGED, message = "rhat high");
        });
        assert_eq!(lines[0]["run_id"], "sbc-20260101-000000-abcdef");
        assert_eq!(lines[0]["stage"], "replicate");
        assert_eq!(lines[0]["level"], "warn");
    }

    #[test]
    fn non_finite_floats_become_strings() {
        let lines = capture(|| {
            tracing::info!(target: "test.nan", value = f64::NAN);
        });
        assert_eq!(lines[0]["fields"]["value"], "NaN");
    }
}
