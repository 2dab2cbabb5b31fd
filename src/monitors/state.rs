use crate::monitors::fingerprint::Fingerprint;

/// What a successful check means for the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The region differs from the last stored fingerprint
    Changed,
    /// Same content, health report not due yet
    Unchanged,
    /// Same content and the health report counter reached its threshold
    HealthReportDue,
}

/// Mutable record the control loop evolves each cycle
///
/// Only exists once the first fetch succeeded, so the last fingerprint is
/// always known.
#[derive(Debug, Clone)]
pub struct MonitorState {
    last_fingerprint: Fingerprint,
    change_count: u32,
    cycles_since_health_report: u32,
}

impl MonitorState {
    pub fn new(initial: Fingerprint) -> Self {
        Self {
            last_fingerprint: initial,
            change_count: 0,
            cycles_since_health_report: 0,
        }
    }

    /// Record the fingerprint from a successful fetch
    ///
    /// A change bumps the change count and replaces the stored fingerprint but
    /// leaves the health counter alone. Only unchanged cycles advance the health
    /// counter, which resets to 0 when a report becomes due.
    pub fn observe(&mut self, current: Fingerprint, health_report_every: u32) -> Observation {
        if current != self.last_fingerprint {
            self.last_fingerprint = current;
            self.change_count += 1;
            return Observation::Changed;
        }

        self.cycles_since_health_report += 1;
        if self.cycles_since_health_report >= health_report_every {
            self.cycles_since_health_report = 0;
            Observation::HealthReportDue
        } else {
            Observation::Unchanged
        }
    }

    pub fn last_fingerprint(&self) -> Fingerprint {
        self.last_fingerprint
    }

    pub fn change_count(&self) -> u32 {
        self.change_count
    }

    pub fn cycles_since_health_report(&self) -> u32 {
        self.cycles_since_health_report
    }
}
