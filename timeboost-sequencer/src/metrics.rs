use metrics::{Counter, Gauge, Metrics, NoMetrics};

#[derive(Debug)]
#[non_exhaustive]
pub struct GateMetrics {
    /// Active express lane round.
    pub round: Box<dyn Gauge>,
    /// Controller state version.
    pub version: Box<dyn Gauge>,
    pub admitted: Box<dyn Counter>,
    pub rejected: Box<dyn Counter>,
    pub gap_timeouts: Box<dyn Counter>,
    /// Envelopes waiting for a sequence gap to fill.
    pub buffered: Box<dyn Gauge>,
    /// Ordinary transactions waiting for release.
    pub queued_regular: Box<dyn Gauge>,
    pub boosted_out: Box<dyn Counter>,
    pub regular_out: Box<dyn Counter>,
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new(&NoMetrics)
    }
}

impl GateMetrics {
    pub fn new<M: Metrics>(m: &M) -> Self {
        Self {
            round: m.create_gauge("express_lane_round", None),
            version: m.create_gauge("express_lane_version", None),
            admitted: m.create_counter("express_lane_admitted", None),
            rejected: m.create_counter("express_lane_rejected", None),
            gap_timeouts: m.create_counter("express_lane_gap_timeouts", None),
            buffered: m.create_gauge("express_lane_buffered", None),
            queued_regular: m.create_gauge("regular_queued", None),
            boosted_out: m.create_counter("boosted_transactions", None),
            regular_out: m.create_counter("regular_transactions", None),
        }
    }
}
