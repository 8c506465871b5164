//! Tracing layer feeding the log ring.
//!
//! Captures every event that passes the subscriber's filter, along with the
//! fields of its enclosing spans, so a run's `session_id` and `phase` stay
//! attached to provider-level warnings.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use crate::ring::{LogEntry, LogRing, level_to_string};

/// Fields recorded on a span, stored in its extensions
#[derive(Debug, Default)]
struct SpanFields(BTreeMap<String, String>);

/// A tracing layer that copies events into a [`LogRing`]
pub struct RingLayer {
    ring: Arc<LogRing>,
}

impl RingLayer {
    pub fn new(ring: Arc<LogRing>) -> Self {
        Self { ring }
    }
}

impl<S> Layer<S> for RingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = BTreeMap::new();
        attrs.record(&mut FieldVisitor::new(&mut fields));
        span.extensions_mut().insert(SpanFields(fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id)
            && let Some(data) = span.extensions_mut().get_mut::<SpanFields>()
        {
            values.record(&mut FieldVisitor::new(&mut data.0));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = BTreeMap::new();

        // outermost span first so inner spans override
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(data) = span.extensions().get::<SpanFields>() {
                    fields.extend(data.0.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }

        let mut visitor = FieldVisitor::new(&mut fields);
        event.record(&mut visitor);
        let message = visitor.message.take().unwrap_or_default();

        let metadata = event.metadata();
        self.ring.push(LogEntry {
            timestamp: Utc::now(),
            level: level_to_string(*metadata.level()),
            target: metadata.target().to_string(),
            message,
            fields,
        });
    }
}

/// Collects fields as strings, pulling `message` out separately
struct FieldVisitor<'a> {
    fields: &'a mut BTreeMap<String, String>,
    message: Option<String>,
}

impl<'a> FieldVisitor<'a> {
    fn new(fields: &'a mut BTreeMap<String, String>) -> Self {
        Self {
            fields,
            message: None,
        }
    }

    fn insert(&mut self, field: &tracing::field::Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.insert(field, value.to_string());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.insert(field, value.to_string());
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.insert(field, value.to_string());
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.insert(field, value.to_string());
    }
}
