// In-process counters for the chat server's websocket surface, rendered in
// Prometheus text exposition format by the `/metrics` route.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

pub struct ChatMetrics {
    ws_rate_total: Mutex<HashMap<String, u64>>,
    ws_errors_total: Mutex<HashMap<String, u64>>,
    ws_duration_sum_ms: Mutex<HashMap<String, u64>>,
    ws_duration_count: Mutex<HashMap<String, u64>>,
    broadcast_deliveries_total: AtomicU64,
    connected_sessions: AtomicI64,
}

static GLOBAL_METRICS: OnceLock<Arc<ChatMetrics>> = OnceLock::new();

impl Default for ChatMetrics {
    fn default() -> Self {
        Self {
            ws_rate_total: Mutex::new(HashMap::new()),
            ws_errors_total: Mutex::new(HashMap::new()),
            ws_duration_sum_ms: Mutex::new(HashMap::new()),
            ws_duration_count: Mutex::new(HashMap::new()),
            broadcast_deliveries_total: AtomicU64::new(0),
            connected_sessions: AtomicI64::new(0),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<ChatMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<ChatMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_ws_event(event: &str, is_error: bool, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_event(event, is_error, latency_ms);
    }
}

pub fn add_broadcast_deliveries(count: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.add_broadcast_deliveries(count);
    }
}

pub fn session_connected() {
    if let Some(metrics) = global_metrics() {
        metrics.session_connected();
    }
}

pub fn session_disconnected() {
    if let Some(metrics) = global_metrics() {
        metrics.session_disconnected();
    }
}

impl ChatMetrics {
    pub fn record_ws_event(&self, event: &str, is_error: bool, latency_ms: u64) {
        increment_label_counter(&self.ws_rate_total, event, 1);
        increment_label_counter(&self.ws_duration_sum_ms, event, latency_ms);
        increment_label_counter(&self.ws_duration_count, event, 1);
        if is_error {
            increment_label_counter(&self.ws_errors_total, event, 1);
        }
    }

    pub fn add_broadcast_deliveries(&self, count: u64) {
        self.broadcast_deliveries_total.fetch_add(count, Ordering::SeqCst);
    }

    pub fn session_connected(&self) {
        self.connected_sessions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn session_disconnected(&self) {
        self.connected_sessions.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        render_label_counter(&mut output, "parley_ws_rate_total", "counter", &self.ws_rate_total);
        render_label_counter(
            &mut output,
            "parley_ws_errors_total",
            "counter",
            &self.ws_errors_total,
        );
        render_label_counter(
            &mut output,
            "parley_ws_duration_ms_sum",
            "counter",
            &self.ws_duration_sum_ms,
        );
        render_label_counter(
            &mut output,
            "parley_ws_duration_ms_count",
            "counter",
            &self.ws_duration_count,
        );

        output.push_str("# TYPE parley_broadcast_deliveries_total counter\n");
        output.push_str(&format!(
            "parley_broadcast_deliveries_total {}\n",
            self.broadcast_deliveries_total.load(Ordering::SeqCst)
        ));

        output.push_str("# TYPE parley_connected_sessions gauge\n");
        output.push_str(&format!(
            "parley_connected_sessions {}\n",
            self.connected_sessions.load(Ordering::SeqCst)
        ));

        output
    }
}

fn increment_label_counter(counter: &Mutex<HashMap<String, u64>>, label: &str, amount: u64) {
    let mut guard = counter.lock().expect("metrics mutex should not be poisoned");
    *guard.entry(label.to_string()).or_insert(0) += amount;
}

fn render_label_counter(
    output: &mut String,
    name: &str,
    kind: &str,
    counter: &Mutex<HashMap<String, u64>>,
) {
    output.push_str(&format!("# TYPE {name} {kind}\n"));
    let guard = counter.lock().expect("metrics mutex should not be poisoned");
    let mut entries: Vec<(&String, &u64)> = guard.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (label, value) in entries {
        output.push_str(&format!("{name}{{event=\"{label}\"}} {value}\n"));
    }
}
