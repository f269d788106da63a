use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::Utc;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace as sdktrace;
use tokio::sync::mpsc;
use tracex_core::model::event::ErrorEvent;
use tracex_core::model::span::SpanRecord;
use tracex_core::time::epoch_secs;
use tracex_store::Store;
use tracing::{Event, Id, Subscriber};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const SELF_PROJECT: &str = "tracex";

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub self_observe: SelfObserveMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfObserveMode {
    Off,
    Store,
}

impl SelfObserveMode {
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("TRACEX_SELF_OBSERVE").unwrap_or_else(|_| "off".to_string()))
    }

    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" | "store" => Self::Store,
            _ => Self::Off,
        }
    }

    pub fn uses_store(self) -> bool {
        matches!(self, Self::Store)
    }
}

pub fn init_cli_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

pub fn init_run_tracing(cfg: TelemetryConfig, store: Option<Store>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .compact();

    let otlp_layer = build_otlp_layer();
    let store_layer = if cfg.self_observe.uses_store() {
        store.map(SelfObserveLayer::new)
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otlp_layer)
        .with(store_layer)
        .try_init();
}

pub fn shutdown_tracing() {
    if let Some(provider) = otlp_provider_slot()
        .lock()
        .ok()
        .and_then(|mut slot| slot.take())
    {
        let _ = provider.shutdown();
    }
}

fn build_otlp_layer<S>() -> Option<OpenTelemetryLayer<S, sdktrace::Tracer>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let has_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();
    if !has_endpoint {
        return None;
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .ok()?;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();
    let tracer = provider.tracer("tracex");

    if let Ok(mut slot) = otlp_provider_slot().lock() {
        *slot = Some(provider);
    }

    Some(tracing_opentelemetry::layer().with_tracer(tracer))
}

fn otlp_provider_slot() -> &'static Mutex<Option<sdktrace::SdkTracerProvider>> {
    static SLOT: OnceLock<Mutex<Option<sdktrace::SdkTracerProvider>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

#[derive(Debug, Clone)]
enum Signal {
    Error(ErrorEvent),
    Span(SpanRecord),
}

#[derive(Debug, Clone)]
struct SpanStart {
    trace_id: String,
    span_id: String,
    parent_span: Option<String>,
    name: String,
    target: String,
    /// Name of the outermost span, used as the transaction of every descendant.
    transaction: String,
    start_ts: f64,
}

/// Records tracex's own spans and error events into its store, so a running
/// server can be explored with itself.
#[derive(Clone)]
struct SelfObserveLayer {
    tx: mpsc::UnboundedSender<Signal>,
    spans: Arc<Mutex<HashMap<u64, SpanStart>>>,
}

impl SelfObserveLayer {
    fn new(store: Store) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Signal>();
        tokio::spawn(async move {
            let mut errors = Vec::new();
            let mut spans = Vec::new();
            while let Some(signal) = rx.recv().await {
                match signal {
                    Signal::Error(event) => errors.push(event),
                    Signal::Span(span) => spans.push(span),
                }

                if errors.len() >= 16 {
                    let _ = store.insert_errors(&errors);
                    errors.clear();
                }
                if spans.len() >= 128 {
                    let _ = store.insert_spans(&spans);
                    spans.clear();
                }
            }

            if !errors.is_empty() {
                let _ = store.insert_errors(&errors);
            }
            if !spans.is_empty() {
                let _ = store.insert_spans(&spans);
            }
        });

        Self {
            tx,
            spans: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lookup(&self, id: u64) -> Option<SpanStart> {
        self.spans.lock().ok().and_then(|m| m.get(&id).cloned())
    }
}

impl<S> Layer<S> for SelfObserveLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if *event.metadata().level() != tracing::Level::ERROR
            || event.metadata().target().starts_with("tracex::telemetry")
        {
            return;
        }

        // errors only count when they can be attached to a trace
        let Some(current) = ctx
            .lookup_current()
            .and_then(|span| self.lookup(span.id().into_u64()))
        else {
            return;
        };

        let _ = self.tx.send(Signal::Error(ErrorEvent {
            trace_id: current.trace_id,
            event_id: uuid::Uuid::new_v4().simple().to_string(),
            project: SELF_PROJECT.to_string(),
            ts: epoch_secs(Utc::now()),
        }));
    }

    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let id_u64 = id.into_u64();
        let span_id = format!("{id_u64:016x}");
        let name = attrs.metadata().name().to_string();

        let parent_id = attrs
            .parent()
            .map(Id::into_u64)
            .or_else(|| ctx.lookup_current().map(|s| s.id().into_u64()));

        let (trace_id, parent_span, transaction) = match parent_id.and_then(|pid| self.lookup(pid))
        {
            Some(parent) => (parent.trace_id, Some(parent.span_id), parent.transaction),
            None => (
                uuid::Uuid::new_v4().simple().to_string(),
                None,
                name.clone(),
            ),
        };

        let start = SpanStart {
            trace_id,
            span_id,
            parent_span,
            name,
            target: attrs.metadata().target().to_string(),
            transaction,
            start_ts: epoch_secs(Utc::now()),
        };

        if let Ok(mut map) = self.spans.lock() {
            map.insert(id_u64, start);
        }
    }

    fn on_close(&self, id: Id, _ctx: Context<'_, S>) {
        let Some(start) = self
            .spans
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&id.into_u64()))
        else {
            return;
        };

        let _ = self.tx.send(Signal::Span(SpanRecord {
            trace_id: start.trace_id,
            span_id: start.span_id,
            is_segment: start.parent_span.is_none(),
            parent_span: start.parent_span,
            project: SELF_PROJECT.to_string(),
            sdk_name: Some(format!("tracex/{}", env!("CARGO_PKG_VERSION"))),
            span_op: start.name,
            description: start.target,
            transaction: start.transaction,
            precise_start_ts: start.start_ts,
            precise_finish_ts: epoch_secs(Utc::now()),
        }));
    }
}
