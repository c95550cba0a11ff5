use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Initialize the tracing subscriber with optional JSON output and an
/// optional JSONL telemetry datalog. The returned guard must be held
/// for the life of the process so the datalog writer flushes.
pub fn init_tracing(json_output: bool, datalog_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rig_ctl=debug,core_rig=debug"));
    let (layers, guard) = build_layers(json_output, datalog_dir);
    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .init();
    guard
}

/// Layers are boxed so the pretty, JSON, and datalog variants all fit
/// one subscriber stack type.
fn build_layers(
    json_output: bool,
    datalog_dir: Option<&Path>,
) -> (
    Vec<Box<dyn Layer<Registry> + Send + Sync>>,
    Option<WorkerGuard>,
) {
    let console = if json_output {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().pretty().boxed()
    };
    let mut layers = vec![console];

    let mut guard = None;
    if let Some(dir) = datalog_dir {
        let appender = tracing_appender::rolling::hourly(dir, "telemetry.jsonl");
        let (writer, writer_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(FilterFn::new(|meta| meta.target() == "telemetry"))
                .boxed(),
        );
        guard = Some(writer_guard);
    }
    (layers, guard)
}
