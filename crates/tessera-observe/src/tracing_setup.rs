//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera_core::security::sanitizer::SecretSanitizer;
//!
//! let sanitizer = Arc::new(SecretSanitizer::default());
//!
//! // Structured logging only
//! tessera_observe::tracing_setup::init_tracing(false, Arc::clone(&sanitizer)).unwrap();
//!
//! // ...or with OpenTelemetry export to stdout (local development)
//! // tessera_observe::tracing_setup::init_tracing(true, sanitizer).unwrap();
//! ```

use std::sync::{Arc, OnceLock};

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tessera_core::security::sanitizer::SecretSanitizer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::sanitizing_writer::SanitizingMakeWriter;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

const DEFAULT_FILTER: &str = "info";

/// Initialize the global tracing subscriber.
///
/// - Installs a structured `fmt` layer writing to stderr through a
///   [`SanitizingMakeWriter`], so every line is scrubbed by `sanitizer`.
/// - When `enable_otel` is true, also bridges spans to OpenTelemetry using a
///   stdout exporter.
/// - Respects `RUST_LOG`; defaults to `info` when unset.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(enable_otel: bool, sanitizer: Arc<SecretSanitizer>) -> anyhow::Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(SanitizingMakeWriter::new(std::io::stderr, sanitizer));

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("tessera");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// No-op when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let sanitizer = Arc::new(SecretSanitizer::default());
        // Another test binary may not have installed one; the first call may
        // succeed or fail, but the second must fail.
        let _ = init_tracing(false, Arc::clone(&sanitizer));
        assert!(init_tracing(false, sanitizer).is_err());
        shutdown_tracing();
    }
}
