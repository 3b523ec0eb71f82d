use vigil_schema::{Alert, Insight, InsightSeverity, Severity};

/// Cumulative alert counts by severity. Raw severities that don't parse
/// into the closed set land in no bucket, by contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub critical: u64,
    pub high: u64,
    pub warning: u64,
    pub info: u64,
}

impl SeverityCounts {
    pub fn record(&mut self, raw: &str) {
        match Severity::parse(raw) {
            Some(Severity::Critical) => self.critical += 1,
            Some(Severity::High) => self.high += 1,
            Some(Severity::Warning) => self.warning += 1,
            Some(Severity::Info) => self.info += 1,
            None => {}
        }
    }

    pub fn retract(&mut self, raw: &str) {
        match Severity::parse(raw) {
            Some(Severity::Critical) => self.critical = self.critical.saturating_sub(1),
            Some(Severity::High) => self.high = self.high.saturating_sub(1),
            Some(Severity::Warning) => self.warning = self.warning.saturating_sub(1),
            Some(Severity::Info) => self.info = self.info.saturating_sub(1),
            None => {}
        }
    }

    pub fn recount<'a>(items: impl Iterator<Item = &'a Alert>) -> Self {
        let mut counts = Self::default();
        for alert in items {
            counts.record(&alert.severity);
        }
        counts
    }

    pub fn total(&self) -> u64 {
        self.critical + self.high + self.warning + self.info
    }
}

/// Blocked-vs-alerted outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCounts {
    pub blocked: u64,
    pub alerted: u64,
}

impl ActionCounts {
    pub fn record(&mut self, alert: &Alert) {
        if alert.blocked {
            self.blocked += 1;
        } else {
            self.alerted += 1;
        }
    }

    pub fn retract(&mut self, alert: &Alert) {
        if alert.blocked {
            self.blocked = self.blocked.saturating_sub(1);
        } else {
            self.alerted = self.alerted.saturating_sub(1);
        }
    }

    pub fn recount<'a>(items: impl Iterator<Item = &'a Alert>) -> Self {
        let mut counts = Self::default();
        for alert in items {
            counts.record(alert);
        }
        counts
    }
}

/// Insight counts by severity; the severity set is closed on the wire so
/// every admitted insight lands in exactly one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsightCounts {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub critical: u64,
}

impl InsightCounts {
    pub fn record(&mut self, insight: &Insight) {
        self.record_severity(insight.severity);
    }

    pub fn record_severity(&mut self, severity: InsightSeverity) {
        match severity {
            InsightSeverity::Low => self.low += 1,
            InsightSeverity::Medium => self.medium += 1,
            InsightSeverity::High => self.high += 1,
            InsightSeverity::Critical => self.critical += 1,
        }
    }

    pub fn retract(&mut self, insight: &Insight) {
        match insight.severity {
            InsightSeverity::Low => self.low = self.low.saturating_sub(1),
            InsightSeverity::Medium => self.medium = self.medium.saturating_sub(1),
            InsightSeverity::High => self.high = self.high.saturating_sub(1),
            InsightSeverity::Critical => self.critical = self.critical.saturating_sub(1),
        }
    }

    pub fn recount<'a>(items: impl Iterator<Item = &'a Insight>) -> Self {
        let mut counts = Self::default();
        for insight in items {
            counts.record(insight);
        }
        counts
    }

    pub fn total(&self) -> u64 {
        self.low + self.medium + self.high + self.critical
    }
}
