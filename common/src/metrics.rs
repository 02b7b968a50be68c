//! Process-wide engine metrics, installed once and read by whatever
//! scrapes `/metrics` on the host binary. Mirrors the teacher's
//! `ControllerMetrics` shape, generalized from per-Kubernetes-resource
//! labels to per-action-kind labels.

use std::sync::OnceLock;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global Prometheus recorder exactly once and returns a
/// handle whose `render()` can be exposed however the embedding binary wants.
pub fn install_recorder() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install global metrics recorder")
    })
}

pub fn record_action_result(action_kind: &str, result: &str) {
    counter!("engine_actions_total", "kind" => action_kind.to_string(), "result" => result.to_string())
        .increment(1);
}

pub fn record_coordinator_wait(action_kind: &str, seconds: f64) {
    histogram!("engine_coordinator_wait_seconds", "kind" => action_kind.to_string()).record(seconds);
}

pub fn record_lock_contention(cluster_id: &str) {
    counter!("engine_lock_contended_total", "cluster_id" => cluster_id.to_string()).increment(1);
}

pub fn set_active_workers(n: i64) {
    gauge!("engine_dispatcher_active_workers").set(n as f64);
}
