//! Prometheus text exposition format.
//!
//! Renders a metrics snapshot into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use crate::counters::MetricsSnapshot;

/// Render a snapshot as Prometheus COUNTER metrics.
pub fn render_prometheus(s: &MetricsSnapshot) -> String {
    let counters: [(&str, &str, u64); 13] = [
        ("plans_queued_total", "Plan requests that queued at least one deployment.", s.plans_queued),
        ("plans_rejected_total", "Plan requests rejected as not found or bad request.", s.plans_rejected),
        ("deployments_queued_total", "Deployments created by the plan generator.", s.deployments_queued),
        ("deployments_scheduled_total", "Deployments handed to an executor.", s.deployments_scheduled),
        ("deployments_completed_total", "Deployments that reached the completed state.", s.deployments_completed),
        ("deployments_noop_total", "Deployments completed without an executor handoff.", s.deployments_noop),
        ("callback_failures_total", "Callback POSTs that failed.", s.callback_failures),
        ("messages_handled_total", "Queue messages handled successfully.", s.messages_handled),
        ("message_failures_total", "Queue messages whose handler returned an error.", s.message_failures),
        ("message_timeouts_total", "Queue messages whose handler timed out.", s.message_timeouts),
        ("cron_triggers_total", "Cron jobs that spawned a deployment batch.", s.cron_triggers),
        ("cron_failures_total", "Cron jobs whose trigger failed.", s.cron_failures),
        ("cron_reconciled_total", "Cron jobs returned to idle.", s.cron_reconciled),
    ];

    let mut out = String::new();
    for (name, help, value) in counters {
        out.push_str(&format!("# HELP deckhand_{name} {help}\n"));
        out.push_str(&format!("# TYPE deckhand_{name} counter\n"));
        out.push_str(&format!("deckhand_{name} {value}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Metrics;

    #[test]
    fn render_empty() {
        let output = render_prometheus(&MetricsSnapshot::default());
        assert!(output.contains("# HELP deckhand_plans_queued_total"));
        assert!(output.contains("# TYPE deckhand_plans_queued_total counter"));
        assert!(output.contains("deckhand_plans_queued_total 0\n"));
    }

    #[test]
    fn render_reflects_counters() {
        let metrics = Metrics::new();
        metrics.plan_queued(4);
        metrics.message_timed_out();
        let output = render_prometheus(&metrics.snapshot());

        assert!(output.contains("deckhand_deployments_queued_total 4\n"));
        assert!(output.contains("deckhand_message_timeouts_total 1\n"));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&MetricsSnapshot::default());
        for line in output.lines() {
            if line.starts_with('#') {
                continue;
            }
            let mut parts = line.split(' ');
            let name = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            assert!(name.starts_with("deckhand_"), "bad metric name: {line}");
            assert!(value.parse::<u64>().is_ok(), "bad value: {line}");
            assert!(parts.next().is_none(), "extra tokens: {line}");
        }
    }
}
