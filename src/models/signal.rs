use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::confluence::ConfluenceFlags;
use crate::models::divergence::DivergenceDetails;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Long,
    Short,
}

impl SignalType {
    /// +1 for long, -1 for short. Used to mirror inequalities.
    pub fn sign(self) -> f64 {
        match self {
            SignalType::Long => 1.0,
            SignalType::Short => -1.0,
        }
    }

    /// True when `price` is at or beyond `level` in the profitable direction.
    pub fn reached(self, price: f64, level: f64) -> bool {
        match self {
            SignalType::Long => price >= level,
            SignalType::Short => price <= level,
        }
    }

    /// True when `price` is at or beyond `level` against the position.
    pub fn crossed_against(self, price: f64, level: f64) -> bool {
        match self {
            SignalType::Long => price <= level,
            SignalType::Short => price >= level,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    Weak,
    Moderate,
    Strong,
    Super,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Pending,
    Active,
    Partial,
    #[serde(rename = "TARGET1_HIT")]
    Target1Hit,
    #[serde(rename = "TARGET2_HIT")]
    Target2Hit,
    #[serde(rename = "TARGET3_HIT")]
    Target3Hit,
    Stopped,
    Expired,
}

impl SignalStatus {
    pub fn is_terminal(self) -> bool {
        !self.is_open()
    }

    /// Pending, active or partially exited.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            SignalStatus::Pending | SignalStatus::Active | SignalStatus::Partial
        )
    }

    /// Terminal status for the given 1-based target tier.
    pub fn target_hit(tier: usize) -> SignalStatus {
        match tier {
            0 | 1 => SignalStatus::Target1Hit,
            2 => SignalStatus::Target2Hit,
            _ => SignalStatus::Target3Hit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EntryZone {
    pub min: f64,
    pub max: f64,
    pub ideal: f64,
}

impl EntryZone {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.min && price <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TargetLevel {
    pub price: f64,
    /// Share of the original position closed at this level
    pub exit_percentage: f64,
    pub risk_reward: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StopLoss {
    pub initial: f64,
    pub breakeven: f64,
    /// Armed once the first target has been taken.
    pub trailing: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Confirmations {
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub achieved: Vec<String>,
    /// Display-only share of all confirmations achieved, 0-100
    #[serde(default)]
    #[schema(example = 60.0)]
    pub percentage: f64,
}

impl Confirmations {
    pub fn new(required: Vec<String>, optional: Vec<String>, achieved: Vec<String>) -> Self {
        let total = required.len() + optional.len();
        let percentage = if total == 0 {
            0.0
        } else {
            achieved.len() as f64 / total as f64 * 100.0
        };
        Self {
            required,
            optional,
            achieved,
            percentage,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.required
            .iter()
            .all(|name| self.achieved.iter().any(|done| done == name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TradeSignal {
    pub id: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub strength: SignalStrength,
    pub entry_zone: EntryZone,
    pub targets: Vec<TargetLevel>,
    pub stop_loss: StopLoss,
    pub confirmations: Confirmations,
    pub status: SignalStatus,
    /// Creation time (epoch seconds)
    pub timestamp: i64,
    pub valid_until: i64,
    pub confluence_score: u8,
    pub confluence: ConfluenceFlags,
    pub divergence: Option<DivergenceDetails>,
    /// Set when the higher-timeframe bias is too choppy to lock a direction.
    pub low_confidence: bool,
    pub entry_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub activated_at: Option<i64>,
    pub closed_at: Option<i64>,
    pub targets_hit: usize,
    pub remaining_position_pct: f64,
}

impl TradeSignal {
    /// Stop level in force for the current status.
    pub fn effective_stop(&self) -> f64 {
        if self.targets_hit == 0 {
            return self.stop_loss.initial;
        }
        let protective = self.stop_loss.breakeven;
        match (self.stop_loss.trailing, self.signal_type) {
            (Some(trailing), SignalType::Long) => protective.max(trailing),
            (Some(trailing), SignalType::Short) => protective.min(trailing),
            (None, _) => protective,
        }
    }

    /// Risk per unit between the ideal entry and the initial stop.
    pub fn risk(&self) -> f64 {
        (self.entry_zone.ideal - self.stop_loss.initial).abs()
    }
}

/// A status change emitted by the lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignalEvent {
    pub signal_id: String,
    pub symbol: String,
    pub from: SignalStatus,
    pub to: SignalStatus,
    pub price: f64,
    pub time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_aware_comparisons_mirror() {
        assert!(SignalType::Long.reached(101.0, 100.0));
        assert!(!SignalType::Long.reached(99.0, 100.0));
        assert!(SignalType::Short.reached(99.0, 100.0));
        assert!(SignalType::Long.crossed_against(99.0, 100.0));
        assert!(SignalType::Short.crossed_against(101.0, 100.0));
    }

    #[test]
    fn open_and_terminal_statuses_partition() {
        for status in [SignalStatus::Pending, SignalStatus::Active, SignalStatus::Partial] {
            assert!(status.is_open());
            assert!(!status.is_terminal());
        }
        for status in [
            SignalStatus::Target1Hit,
            SignalStatus::Target2Hit,
            SignalStatus::Target3Hit,
            SignalStatus::Stopped,
            SignalStatus::Expired,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn status_serializes_with_target_tier_names() {
        let json = serde_json::to_string(&SignalStatus::Target2Hit).unwrap();
        assert_eq!(json, "\"TARGET2_HIT\"");
        let json = serde_json::to_string(&SignalStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
    }

    #[test]
    fn confirmations_arm_only_when_required_achieved() {
        let mut confirmations = Confirmations::new(
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string(), "d".to_string()],
            vec!["a".to_string(), "c".to_string()],
        );
        assert!(!confirmations.is_armed());
        assert!((confirmations.percentage - 50.0).abs() < 1e-9);

        confirmations.achieved.push("b".to_string());
        assert!(confirmations.is_armed());
    }

    #[test]
    fn confirmation_percentage_is_serialized() {
        let confirmations = Confirmations::new(
            vec!["a".to_string()],
            vec!["b".to_string(), "c".to_string(), "d".to_string()],
            vec!["a".to_string()],
        );
        let json = serde_json::to_value(&confirmations).unwrap();
        assert_eq!(json["percentage"], 25.0);
        assert_eq!(Confirmations::new(Vec::new(), Vec::new(), Vec::new()).percentage, 0.0);
    }

    #[test]
    fn strength_orders_weak_to_super() {
        assert!(SignalStrength::Weak < SignalStrength::Moderate);
        assert!(SignalStrength::Strong < SignalStrength::Super);
    }
}
