#![allow(clippy::format_push_string)]
#![allow(clippy::uninlined_format_args)]

use crate::metrics::MetricsSnapshot;

pub struct MetricsFormatter;

impl MetricsFormatter {
    #[must_use]
    pub fn format(metrics: &MetricsSnapshot) -> String {
        let mut output = String::new();

        output.push('\n');
        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push_str("                    SIGNAL ENGINE REPORT                       \n");
        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push('\n');

        // Input
        output.push_str("Input\n");
        output.push_str("───────────────────────────────────────────────────────────────\n");
        output.push_str(&format!("Events Accepted:       {}\n", metrics.events_accepted));
        output.push_str(&format!("Events Rejected:       {}\n", metrics.events_rejected));
        output.push_str(&format!(
            "Out of Universe:       {}\n",
            metrics.events_out_of_universe
        ));
        output.push_str(&format!("Stale:                 {}\n", metrics.events_stale));
        output.push_str(&format!("Runner Overload Drops: {}\n", metrics.runner_dropped));
        output.push('\n');

        // Candidates
        output.push_str("Candidates\n");
        output.push_str("───────────────────────────────────────────────────────────────\n");
        output.push_str(&format!("Total:                 {}\n", metrics.candidates_total));
        for (channel, count) in &metrics.candidates_by_channel {
            output.push_str(&format!("  {:<20} {}\n", channel, count));
        }
        output.push_str(&format!("Bus Drops:             {}\n", metrics.bus_dropped));
        output.push_str(&format!("Merged Into Buckets:   {}\n", metrics.candidates_merged));
        if !metrics.detector_faults.is_empty() {
            output.push_str("Detector Faults:\n");
            for (channel, count) in &metrics.detector_faults {
                output.push_str(&format!("  {:<20} {}\n", channel, count));
            }
        }
        output.push('\n');

        // Decisions
        output.push_str("Decisions\n");
        output.push_str("───────────────────────────────────────────────────────────────\n");
        output.push_str(&format!("Buckets Resolved:      {}\n", metrics.buckets_resolved));
        output.push_str(&format!("Alerts Emitted:        {}\n", metrics.alerts_emitted));
        output.push_str(&format!("Dry-Run Alerts:        {}\n", metrics.alerts_dry_run));
        output.push_str(&format!("Below Threshold:       {}\n", metrics.audit_only));
        output.push_str(&format!(
            "Suppressed:            {} (cooldown {}, minute cap {}, hour cap {})\n",
            metrics.suppressed_total(),
            metrics.suppressed_cooldown,
            metrics.suppressed_minute_cap,
            metrics.suppressed_hour_cap
        ));
        output.push_str(&format!("Decision Errors:       {}\n", metrics.decision_errors));
        output.push_str(&format!(
            "Enrichment Timeouts:   {}\n",
            metrics.enrichment_timeouts
        ));

        if metrics.decisions_timed > 0 {
            output.push_str(&format!(
                "Decision Latency:      p50 {}µs  p90 {}µs  p99 {}µs\n",
                metrics.decision_p50_us, metrics.decision_p90_us, metrics.decision_p99_us
            ));
        } else {
            output.push_str("Decision Latency:      N/A (no decisions)\n");
        }
        output.push('\n');

        // Delivery
        output.push_str("Delivery\n");
        output.push_str("───────────────────────────────────────────────────────────────\n");
        output.push_str(&format!("Routed (fast path):    {}\n", metrics.routed_fast));
        output.push_str(&format!("Routed (normal path):  {}\n", metrics.routed_normal));
        output.push_str(&format!("Router Drops:          {}\n", metrics.router_dropped));
        output.push_str(&format!("Delivery Failures:     {}\n", metrics.delivery_failures));
        output.push_str(&format!("Audit Drops:           {}\n", metrics.audit_dropped));

        output.push('\n');
        output.push_str("═══════════════════════════════════════════════════════════════\n");

        if metrics.candidates_total == 0 {
            output.push_str("\n⚠️  No candidates were produced from this input.\n");
            output.push_str("    Check channel thresholds and warm-up sample counts.\n\n");
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_channels_and_warns_when_empty() {
        let empty = MetricsFormatter::format(&MetricsSnapshot::default());
        assert!(empty.contains("SIGNAL ENGINE REPORT"));
        assert!(empty.contains("No candidates"));
        assert!(empty.contains("N/A (no decisions)"));

        let mut snap = MetricsSnapshot {
            candidates_total: 2,
            ..MetricsSnapshot::default()
        };
        snap.candidates_by_channel.insert("halt".to_string(), 2);
        let report = MetricsFormatter::format(&snap);
        assert!(report.contains("halt"));
        assert!(!report.contains("No candidates"));
    }
}
