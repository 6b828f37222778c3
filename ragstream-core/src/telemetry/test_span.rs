#![cfg(test)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{span, Event, Subscriber};
use tracing_core::field::{Field, Visit};
use tracing_subscriber::registry;
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

/// Fields recorded on one span, stringified.
#[derive(Default, Debug)]
pub struct CapturedSpan {
    pub name: String,
    pub fields: Mutex<HashMap<String, String>>,
}

impl CapturedSpan {
    pub fn field(&self, key: &str) -> Option<String> {
        self.fields.lock().unwrap().get(key).cloned()
    }
}

#[derive(Default, Debug)]
pub struct SpanStore {
    pub spans: Mutex<Vec<Arc<CapturedSpan>>>,
    /// Log events; `name` holds the message.
    pub events: Mutex<Vec<Arc<CapturedSpan>>>,
    by_id: Mutex<HashMap<span::Id, Arc<CapturedSpan>>>,
}

impl SpanStore {
    /// Most recently created span with `name`.
    pub fn last_named(&self, name: &str) -> Option<Arc<CapturedSpan>> {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.name == name)
            .cloned()
    }

    /// Most recent event logged with `message`.
    pub fn last_event(&self, message: &str) -> Option<Arc<CapturedSpan>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|e| e.name == message)
            .cloned()
    }
}

struct FieldMap<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldMap<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn core::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

#[derive(Clone)]
pub struct CaptureLayer {
    pub store: Arc<SpanStore>,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, _ctx: Context<'_, S>) {
        let data = Arc::new(CapturedSpan {
            name: attrs.metadata().name().to_string(),
            ..Default::default()
        });
        attrs.record(&mut FieldMap(&mut data.fields.lock().unwrap()));
        self.store.spans.lock().unwrap().push(data.clone());
        self.store.by_id.lock().unwrap().insert(id.clone(), data);
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, _ctx: Context<'_, S>) {
        if let Some(data) = self.store.by_id.lock().unwrap().get(id) {
            values.record(&mut FieldMap(&mut data.fields.lock().unwrap()));
        }
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut FieldMap(&mut fields));
        let name = fields.remove("message").unwrap_or_default();
        self.store.events.lock().unwrap().push(Arc::new(CapturedSpan {
            name,
            fields: Mutex::new(fields),
        }));
    }
}

/// Install a capturing subscriber as the default for the current thread and return its store.
/// The guard is returned too; the capture ends when it is dropped.
pub fn install_capture() -> (Arc<SpanStore>, tracing::subscriber::DefaultGuard) {
    use tracing_subscriber::prelude::*;
    let store = Arc::new(SpanStore::default());
    let layer = CaptureLayer {
        store: store.clone(),
    };
    let subscriber = registry::Registry::default().with(layer);
    let guard = tracing::subscriber::set_default(subscriber);
    (store, guard)
}
