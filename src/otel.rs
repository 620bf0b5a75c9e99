// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Trace context travels in the AMQP headers of every message: senders inject
//! the active context, listeners extract it and parent their consumer span on
//! it. Helpers here also derive the W3C `traceparent` used as correlation id.

use lapin::{
    types::{AMQPValue, LongString, ShortString},
    BasicProperties,
};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, SpanRef, Status, TraceContextExt, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap, error::Error};
use tracing::warn;

/// Name of the tracer used for every span of this crate.
pub(crate) const TRACER_NAME: &str = "warren";

/// Reads and writes trace context as AMQP long-string headers.
pub(crate) struct HeaderCarrier<'h> {
    headers: &'h mut BTreeMap<ShortString, AMQPValue>,
}

impl<'h> HeaderCarrier<'h> {
    pub(crate) fn new(headers: &'h mut BTreeMap<ShortString, AMQPValue>) -> Self {
        HeaderCarrier { headers }
    }
}

impl Injector for HeaderCarrier<'_> {
    fn set(&mut self, key: &str, value: String) {
        let key = ShortString::from(key.to_ascii_lowercase());
        self.headers.insert(key, AMQPValue::LongString(LongString::from(value)));
    }
}

impl Extractor for HeaderCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        let Some(AMQPValue::LongString(value)) = self.headers.get(key) else {
            return None;
        };

        match std::str::from_utf8(value.as_bytes()) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(header = key, error = err.to_string(), "trace header is not utf-8");
                None
            }
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(ShortString::as_str).collect()
    }
}

pub(crate) fn tracer() -> BoxedTracer {
    global::tracer(TRACER_NAME)
}

/// Headers carrying the trace context of `ctx`.
pub(crate) fn inject_headers(ctx: &Context) -> BTreeMap<ShortString, AMQPValue> {
    let mut headers = BTreeMap::<ShortString, AMQPValue>::default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderCarrier::new(&mut headers))
    });

    headers
}

/// Trace context carried by the headers of a received message.
pub(crate) fn extract_context(props: &BasicProperties) -> Context {
    let mut headers = props
        .headers()
        .as_ref()
        .map(|table| table.inner().clone())
        .unwrap_or_default();

    global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderCarrier::new(&mut headers))
    })
}

/// W3C `traceparent` of the span active in `ctx`, if it is valid.
pub fn correlation_id(ctx: &Context) -> Option<String> {
    let span = ctx.span();
    let sc = span.span_context();

    if !sc.is_valid() {
        return None;
    }

    Some(format!(
        "00-{}-{}-{:02x}",
        sc.trace_id(),
        sc.span_id(),
        sc.trace_flags().to_u8()
    ))
}

/// Starts the span covering one send.
pub(crate) fn producer_span(tracer: &BoxedTracer, ctx: &Context, name: &str) -> BoxedSpan {
    tracer
        .span_builder(Cow::from(format!("{name} publish")))
        .with_kind(SpanKind::Producer)
        .start_with_context(tracer, ctx)
}

/// Creates the consumer span of a delivery, parented on the extracted context.
pub(crate) fn new_span(
    props: &BasicProperties,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let ctx = extract_context(props);

    let span = tracer
        .span_builder(Cow::from(format!("{name} receive")))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

/// Starts the span of one handler invocation under `parent`.
pub(crate) fn handler_span(tracer: &BoxedTracer, parent: &Context, name: &str) -> BoxedSpan {
    tracer
        .span_builder(Cow::from(format!("{name} handle")))
        .with_kind(SpanKind::Internal)
        .start_with_context(tracer, parent)
}

/// Marks `span` as failed with `err`.
pub(crate) fn record_failure(span: &SpanRef<'_>, err: &dyn Error, description: &str) {
    span.record_error(err);
    span.set_status(Status::Error {
        description: Cow::from(description.to_owned()),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::FieldTable;
    use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};

    #[test]
    fn should_write_and_read_headers() {
        let mut headers = BTreeMap::default();
        HeaderCarrier::new(&mut headers).set("TraceParent", "00-abc".to_owned());

        let propagator = HeaderCarrier::new(&mut headers);
        assert_eq!(propagator.get("traceparent"), Some("00-abc"));
        assert_eq!(propagator.keys(), vec!["traceparent"]);
    }

    #[test]
    fn should_ignore_non_string_headers() {
        let mut headers = BTreeMap::default();
        headers.insert(ShortString::from("traceparent"), AMQPValue::LongInt(1));

        assert_eq!(HeaderCarrier::new(&mut headers).get("traceparent"), None);
    }

    #[test]
    fn should_format_correlation_id_as_traceparent() {
        let sc = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let ctx = Context::new().with_remote_span_context(sc);

        assert_eq!(
            correlation_id(&ctx).as_deref(),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        );
    }

    #[test]
    fn should_skip_correlation_id_without_active_span() {
        assert_eq!(correlation_id(&Context::new()), None);
    }

    #[test]
    fn should_extract_from_properties_without_headers() {
        let ctx = extract_context(&BasicProperties::default());
        assert!(!ctx.span().span_context().is_valid());

        let mut table = FieldTable::default();
        table.insert(
            ShortString::from("x-tenant"),
            AMQPValue::LongString(LongString::from("acme")),
        );
        let ctx = extract_context(&BasicProperties::default().with_headers(table));
        assert!(!ctx.span().span_context().is_valid());
    }
}
