use serde::{Deserialize, Serialize};

use super::signal::EntrySignal;
use super::trade::Direction;

/// Which side of the trade lifecycle a region gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegionStage {
    Entry,
    Exit,
    #[default]
    Both,
}

/// Price-band shape of a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RegionKind {
    /// Static band between two prices.
    Range { low: f64, high: f64 },
    /// Band linearly interpolated from (low_a, high_a) at `start` to
    /// (low_b, high_b) at `end`.
    Trend {
        low_a: f64,
        high_a: f64,
        low_b: f64,
        high_b: f64,
        start: i64,
        end: i64,
    },
}

/// A time/price-bounded admission gate consulted for every candidate entry
/// signal. Expired regions are purged lazily during admission checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: u64,
    /// Creation timestamp (ms).
    pub created: i64,
    /// Expiry timestamp (ms), 0 = never.
    pub expiry: i64,
    /// Only admit signals in this direction; None = both.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub stage: RegionStage,
    #[serde(flatten)]
    pub kind: RegionKind,
}

impl Region {
    pub fn range(id: u64, created: i64, low: f64, high: f64) -> Self {
        Self {
            id,
            created,
            expiry: 0,
            direction: None,
            stage: RegionStage::Both,
            kind: RegionKind::Range { low, high },
        }
    }

    pub fn trend(
        id: u64,
        created: i64,
        (low_a, high_a): (f64, f64),
        (low_b, high_b): (f64, f64),
        start: i64,
        end: i64,
    ) -> Self {
        Self {
            id,
            created,
            expiry: end,
            direction: None,
            stage: RegionStage::Both,
            kind: RegionKind::Trend {
                low_a,
                high_a,
                low_b,
                high_b,
                start,
                end,
            },
        }
    }

    pub fn with_expiry(mut self, expiry: i64) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_stage(mut self, stage: RegionStage) -> Self {
        self.stage = stage;
        self
    }

    pub fn is_expired(&self, timestamp: i64) -> bool {
        self.expiry > 0 && timestamp > self.expiry
    }

    /// Price band at the given time.
    fn band(&self, timestamp: i64) -> (f64, f64) {
        match self.kind {
            RegionKind::Range { low, high } => (low, high),
            RegionKind::Trend {
                low_a,
                high_a,
                low_b,
                high_b,
                start,
                end,
            } => {
                if end <= start {
                    return (low_a, high_a);
                }
                let t = ((timestamp - start) as f64 / (end - start) as f64).clamp(0.0, 1.0);
                (low_a + (low_b - low_a) * t, high_a + (high_b - high_a) * t)
            }
        }
    }

    /// Whether the candidate signal falls inside this region.
    pub fn test(&self, timestamp: i64, signal: &EntrySignal) -> bool {
        if self.is_expired(timestamp) {
            return false;
        }
        if let Some(direction) = self.direction {
            if direction != signal.direction {
                return false;
            }
        }
        let price = if signal.order_price > 0.0 {
            signal.order_price
        } else {
            // Market entries are tested against the signal timestamp band
            // midpoint; the caller supplies a priced signal when it can.
            return true;
        };
        let (low, high) = self.band(timestamp);
        price >= low && price <= high
    }

    /// Whether this region can be garbage-collected.
    pub fn can_delete(&self, timestamp: i64, _bid: f64, _ask: f64) -> bool {
        if self.is_expired(timestamp) {
            return true;
        }
        match self.kind {
            RegionKind::Trend { end, .. } => timestamp > end,
            RegionKind::Range { .. } => false,
        }
    }
}
