//! Engine-owned traffic counters.
//!
//! Counters live on the engine value rather than in process globals, so two
//! engines in one process never share state and teardown is ordinary drop.

use std::collections::HashMap;

use serde::Serialize;

/// Per-template receive/send tallies.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct TemplateCounters {
    /// Messages of this template decoded and dispatched.
    pub received: u64,
    /// Bytes received for this template.
    pub received_bytes: u64,
    /// Messages of this template sent.
    pub sent: u64,
    /// Bytes sent for this template.
    pub sent_bytes: u64,
}

/// Engine-wide packet and error counters.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EngineMetrics {
    /// Datagrams read off the transport.
    pub packets_in: u64,
    /// Datagrams handed to the transport.
    pub packets_out: u64,
    /// Total bytes read.
    pub bytes_in: u64,
    /// Total bytes written.
    pub bytes_out: u64,
    /// Packets that arrived compressed.
    pub compressed_in: u64,
    /// Packets sent compressed.
    pub compressed_out: u64,
    /// Packets discarded as malformed.
    pub malformed: u64,
    /// Packets discarded for trust violations.
    pub trust_violations: u64,
    /// Packets discarded for lack of a circuit.
    pub no_circuit: u64,
    /// Duplicate reliable packets suppressed.
    pub duplicates: u64,
    /// Decoded messages with no registered handler.
    pub unhandled: u64,
    /// Reliable sends retransmitted at least once.
    pub resends: u64,
    /// Reliable sends abandoned after the retry budget.
    pub failed_sends: u64,
    per_template: HashMap<String, TemplateCounters>,
}

impl EngineMetrics {
    /// Record a message received for the named template.
    pub fn note_received(&mut self, name: &str, bytes: usize) {
        let entry = self.per_template.entry(name.to_owned()).or_default();
        entry.received += 1;
        entry.received_bytes += bytes as u64;
    }

    /// Record a message sent for the named template.
    pub fn note_sent(&mut self, name: &str, bytes: usize) {
        let entry = self.per_template.entry(name.to_owned()).or_default();
        entry.sent += 1;
        entry.sent_bytes += bytes as u64;
    }

    /// Counters for one template, if it has seen traffic.
    #[must_use]
    pub fn template(&self, name: &str) -> Option<TemplateCounters> {
        self.per_template.get(name).copied()
    }

    /// Iterate all per-template counters.
    pub fn templates(&self) -> impl Iterator<Item = (&str, TemplateCounters)> {
        self.per_template.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Drop per-template tallies, keeping engine-wide counters.
    pub fn reset_template_counts(&mut self) {
        self.per_template.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_template_tallies_accumulate() {
        let mut metrics = EngineMetrics::default();
        metrics.note_received("Ping", 8);
        metrics.note_received("Ping", 8);
        metrics.note_sent("Ping", 8);
        let ping = metrics.template("Ping").unwrap();
        assert_eq!(ping.received, 2);
        assert_eq!(ping.received_bytes, 16);
        assert_eq!(ping.sent, 1);
        assert!(metrics.template("Pong").is_none());
    }

    #[test]
    fn reset_clears_only_template_counts() {
        let mut metrics = EngineMetrics::default();
        metrics.packets_in = 5;
        metrics.note_received("Ping", 8);
        metrics.reset_template_counts();
        assert!(metrics.template("Ping").is_none());
        assert_eq!(metrics.packets_in, 5);
    }
}
