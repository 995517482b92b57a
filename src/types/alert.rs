use serde::{Deserialize, Serialize};

/// Direction a price must cross the level to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossDirection {
    Up,
    Down,
}

/// Trigger condition of an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AlertKind {
    /// Fires when the relevant side of the book crosses the level:
    /// ask above for Up, bid below for Down.
    PriceCross {
        direction: CrossDirection,
        price: f64,
    },
}

/// Payload emitted when an alert fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertResult {
    pub alert_id: u64,
    pub timestamp: i64,
    /// Price that satisfied the condition.
    pub price: f64,
    pub message: String,
}

/// A standing observational trigger over (timestamp, bid, ask). Firing has
/// no trade side effect; the alert stays live until its countdown is
/// exhausted or it expires. Re-firing is throttled by `cooldown_ms`
/// (0 = re-entrant every tick).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: u64,
    /// Creation timestamp (ms).
    pub created: i64,
    /// Expiry timestamp (ms), 0 = never.
    pub expiry: i64,
    /// Remaining fires; -1 = unlimited.
    pub countdown: i32,
    /// Minimum ms between fires.
    #[serde(default)]
    pub cooldown_ms: i64,
    #[serde(default)]
    pub message: String,
    #[serde(flatten)]
    pub kind: AlertKind,
    /// Last fire timestamp (ms), 0 = never fired.
    #[serde(default)]
    pub last_triggered: i64,
}

impl Alert {
    pub fn price_cross(id: u64, created: i64, direction: CrossDirection, price: f64) -> Self {
        Self {
            id,
            created,
            expiry: 0,
            countdown: -1,
            cooldown_ms: 0,
            message: String::new(),
            kind: AlertKind::PriceCross { direction, price },
            last_triggered: 0,
        }
    }

    pub fn with_expiry(mut self, expiry: i64) -> Self {
        self.expiry = expiry;
        self
    }

    /// One-shot alert: self-expires after the first fire.
    pub fn one_shot(mut self) -> Self {
        self.countdown = 1;
        self
    }

    pub fn with_cooldown(mut self, cooldown_ms: i64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    pub fn is_expired(&self, timestamp: i64) -> bool {
        self.expiry > 0 && timestamp > self.expiry
    }

    /// Dead alerts are removed during the check pass; a fired alert with
    /// remaining countdown stays live.
    pub fn can_delete(&self, timestamp: i64) -> bool {
        self.is_expired(timestamp) || self.countdown == 0
    }

    /// Evaluate the trigger, consuming a countdown charge on fire.
    pub fn test(&mut self, timestamp: i64, bid: f64, ask: f64) -> Option<AlertResult> {
        if self.is_expired(timestamp) || self.countdown == 0 {
            return None;
        }
        if self.cooldown_ms > 0
            && self.last_triggered > 0
            && timestamp - self.last_triggered < self.cooldown_ms
        {
            return None;
        }

        let fired_price = match self.kind {
            AlertKind::PriceCross { direction, price } => match direction {
                CrossDirection::Up if ask >= price => Some(ask),
                CrossDirection::Down if bid <= price => Some(bid),
                _ => None,
            },
        }?;

        self.last_triggered = timestamp;
        if self.countdown > 0 {
            self.countdown -= 1;
        }

        Some(AlertResult {
            alert_id: self.id,
            timestamp,
            price: fired_price,
            message: self.message.clone(),
        })
    }
}
