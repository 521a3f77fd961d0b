//! Terminal counter driven by the reactive runtime.
//!
//! The counter state is an observable record. A "render" reaction plays the
//! part of a UI host: it prints whenever something it displayed changes.
//!
//! Run with `RUST_LOG=trellis_core=trace` to see batches and flushes.

use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trellis_core::reactive::{
    action_named, action_with, autorun_named, batch, computed_named, observable_named,
};
use trellis_core::Runtime;

fn setup_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .init();
}

fn bump(value: Value, by: i64) -> Value {
    json!(value.as_i64().unwrap_or(0) + by)
}

fn main() {
    setup_logging();

    let state = observable_named(
        "counter",
        json!({ "count": 0, "message": "ready", "total": 0 }),
    )
    .into_object()
    .expect("a JSON object wraps as a record");

    let s = state.clone();
    let label = computed_named("label", move || {
        let count: i64 = s.get_as("count").unwrap_or_default();
        match count {
            0 => "zero".to_string(),
            n if n < 0 => "negative".to_string(),
            n if n % 2 == 0 => "even".to_string(),
            _ => "odd".to_string(),
        }
    });

    let (s, l) = (state.clone(), label.clone());
    let render = autorun_named("render", move || {
        let count: i64 = s.get_as("count").unwrap_or_default();
        let message: String = s.get_as("message").unwrap_or_default();
        let total: i64 = s.get_as("total").unwrap_or_default();
        println!("[{count:>3}] {:<8} {message} (clicks: {total})", l.get());
    });

    let s = state.clone();
    let increment_by = action_with("increment_by", move |by: i64| {
        s.update("count", |v| bump(v, by));
        s.update("total", |v| bump(v, 1));
        s.set("message", format!("added {by}"));
    });

    let s = state.clone();
    let reset = action_named("reset", move || {
        s.set("count", 0);
        s.set("message", "reset");
    });

    increment_by(1);
    increment_by(1);
    increment_by(5);

    // Three clicks in one batch render once.
    batch(|| {
        for _ in 0..3 {
            increment_by(-1);
        }
    });

    reset();
    // Nothing changes, so nothing renders.
    reset();

    info!(state = %state.to_json(), "final state");
    info!(stats = ?Runtime::stats(), "runtime");

    render.dispose();
}
