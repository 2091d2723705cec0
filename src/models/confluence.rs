use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::signal::SignalType;

/// Raw confluence is capped here before signal-level augmentation.
pub const MAX_RAW_CONFLUENCE: u8 = 7;
/// Cap after divergence and strength bonuses are added.
pub const MAX_SIGNAL_CONFLUENCE: u8 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConfluenceFlags {
    pub quad_rotation: bool,
    pub channel_extreme: bool,
    pub twenty_twenty_flag: bool,
    pub vwap_confluence: bool,
    pub ma_confluence: bool,
    pub volume_spike: bool,
    pub htf_alignment: bool,
}

impl ConfluenceFlags {
    pub fn count(&self) -> u8 {
        self.as_array().iter().filter(|flag| **flag).count() as u8
    }

    /// Names of the set flags, used as optional confirmations.
    pub fn achieved(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .zip(self.as_array())
            .filter_map(|(name, set)| set.then_some(*name))
            .collect()
    }

    pub const NAMES: [&'static str; 7] = [
        "Quad rotation",
        "Channel extreme",
        "20/20 flag",
        "VWAP confluence",
        "MA confluence",
        "Volume spike",
        "HTF alignment",
    ];

    fn as_array(&self) -> [bool; 7] {
        [
            self.quad_rotation,
            self.channel_extreme,
            self.twenty_twenty_flag,
            self.vwap_confluence,
            self.ma_confluence,
            self.volume_spike,
            self.htf_alignment,
        ]
    }
}

/// Confluence scored for one candidate direction.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfluenceReport {
    pub direction: SignalType,
    pub flags: ConfluenceFlags,
    pub is_quad_aligned: bool,
    pub is_quad_rotating: bool,
    /// Flag count plus alignment/rotation bonuses, capped at `MAX_RAW_CONFLUENCE`.
    pub score: u8,
}
