use crate::business_logic::config::{SignalConfig, StopLossMethod};
use crate::business_logic::indicators::{atr_series, last_finite};
use crate::business_logic::multi_timeframe::HtfVerdict;
use crate::models::candle::Candle;
use crate::models::confluence::{ConfluenceFlags, ConfluenceReport, MAX_SIGNAL_CONFLUENCE};
use crate::models::divergence::DivergenceDetails;
use crate::models::signal::{
    Confirmations, EntryZone, SignalStatus, SignalStrength, SignalType, StopLoss, TargetLevel,
    TradeSignal,
};

pub const CONFIRM_TRIGGER: &str = "Stochastic trigger";
pub const CONFIRM_CONFLUENCE: &str = "Confluence threshold";
pub const CONFIRM_HTF: &str = "HTF not opposed";

/// Everything the builder needs to turn a qualifying confluence event into a signal.
#[derive(Debug, Clone, Copy)]
pub struct SignalCandidate<'a> {
    pub symbol: &'a str,
    pub direction: SignalType,
    pub candles: &'a [Candle],
    pub confluence: &'a ConfluenceReport,
    pub divergence: Option<&'a DivergenceDetails>,
    /// `None` when no higher timeframe had enough data
    pub htf_verdict: Option<HtfVerdict>,
    pub now: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct SignalBuilder<'a> {
    config: &'a SignalConfig,
}

impl<'a> SignalBuilder<'a> {
    pub fn new(config: &'a SignalConfig) -> Self {
        Self { config }
    }

    /// Build a fully specified signal, or `None` when the candidate is discarded.
    pub fn build(&self, candidate: &SignalCandidate) -> Option<TradeSignal> {
        let last = candidate.candles.last()?;
        let direction = candidate.direction;
        let sign = direction.sign();

        let price = last.close;
        let spread = price * self.config.entry_zone_pct / 100.0;
        let entry_zone = EntryZone {
            min: price - spread,
            max: price + spread,
            ideal: price,
        };

        let Some(initial) = self.stop_price(direction, entry_zone.ideal, candidate.candles) else {
            tracing::debug!("{}: no stop level available, discarding", candidate.symbol);
            return None;
        };
        let risk = (entry_zone.ideal - initial) * sign;
        if !risk.is_finite() || risk <= 0.0 {
            tracing::debug!(
                "{}: stop {:.4} is not behind entry {:.4}, discarding",
                candidate.symbol,
                initial,
                entry_zone.ideal
            );
            return None;
        }

        let targets = self.target_ladder(entry_zone.ideal, risk, sign);

        let divergence_bonus = candidate.divergence.map(|d| d.strength()).unwrap_or(0);
        let score = (candidate.confluence.score + divergence_bonus).min(MAX_SIGNAL_CONFLUENCE);
        let strength = if candidate.confluence.is_quad_aligned && candidate.confluence.is_quad_rotating
        {
            SignalStrength::Super
        } else {
            self.config.strength_cutoffs.classify(score)
        };

        let confirmations = self.confirmations(candidate);
        if !confirmations.is_armed() {
            tracing::debug!(
                "{}: {:?} missing required confirmations {:?}",
                candidate.symbol,
                direction,
                confirmations.achieved
            );
            return None;
        }
        if score < self.config.min_confirmation_score {
            tracing::debug!(
                "{}: {:?} score {} below minimum {}",
                candidate.symbol,
                direction,
                score,
                self.config.min_confirmation_score
            );
            return None;
        }
        if strength < self.config.min_strength {
            tracing::debug!(
                "{}: {:?} strength {:?} below minimum {:?}",
                candidate.symbol,
                direction,
                strength,
                self.config.min_strength
            );
            return None;
        }

        let id = format!(
            "{}-{}-{}",
            candidate.symbol,
            match direction {
                SignalType::Long => "LONG",
                SignalType::Short => "SHORT",
            },
            last.time
        );

        Some(TradeSignal {
            id,
            symbol: candidate.symbol.to_string(),
            signal_type: direction,
            strength,
            entry_zone,
            targets,
            stop_loss: StopLoss {
                initial,
                breakeven: entry_zone.ideal,
                trailing: None,
            },
            confirmations,
            status: SignalStatus::Pending,
            timestamp: candidate.now,
            valid_until: candidate.now + self.config.signal_expiry_secs,
            confluence_score: score,
            confluence: candidate.confluence.flags,
            divergence: candidate.divergence.cloned(),
            low_confidence: candidate.htf_verdict == Some(HtfVerdict::LowConfidence),
            entry_price: None,
            exit_price: None,
            activated_at: None,
            closed_at: None,
            targets_hit: 0,
            remaining_position_pct: 100.0,
        })
    }

    fn stop_price(&self, direction: SignalType, entry: f64, candles: &[Candle]) -> Option<f64> {
        let sign = direction.sign();
        match &self.config.stop_loss {
            StopLossMethod::Swing {
                lookback,
                buffer_pct,
            } => {
                let window = &candles[candles.len().saturating_sub(*lookback)..];
                if window.is_empty() {
                    return None;
                }
                let stop = match direction {
                    SignalType::Long => {
                        let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
                        low * (1.0 - buffer_pct / 100.0)
                    }
                    SignalType::Short => {
                        let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
                        high * (1.0 + buffer_pct / 100.0)
                    }
                };
                Some(stop)
            }
            StopLossMethod::Atr { period, multiplier } => {
                let atr = last_finite(&atr_series(candles, *period))?;
                Some(entry - sign * atr * multiplier)
            }
            StopLossMethod::Percentage { pct } => Some(entry * (1.0 - sign * pct / 100.0)),
            StopLossMethod::FixedAmount { amount } => Some(entry - sign * amount),
        }
    }

    fn target_ladder(&self, entry: f64, risk: f64, sign: f64) -> Vec<TargetLevel> {
        self.config
            .target_multiples
            .iter()
            .zip(&self.config.target_exit_pcts)
            .enumerate()
            .map(|(i, (multiple, exit))| TargetLevel {
                price: entry + sign * risk * multiple,
                exit_percentage: *exit,
                risk_reward: *multiple,
                reason: format!("Target {} ({}R)", i + 1, multiple),
            })
            .collect()
    }

    fn confirmations(&self, candidate: &SignalCandidate) -> Confirmations {
        let direction = candidate.direction;
        let triggered = candidate
            .divergence
            .map(|d| d.divergence_type.direction() == direction)
            .unwrap_or(false)
            || candidate.confluence.is_quad_rotating;
        let enough_confluence = candidate.confluence.score >= self.config.min_confluence_score;
        let htf_ok = candidate.htf_verdict != Some(HtfVerdict::Misaligned);

        let mut achieved: Vec<String> = [
            (CONFIRM_TRIGGER, triggered),
            (CONFIRM_CONFLUENCE, enough_confluence),
            (CONFIRM_HTF, htf_ok),
        ]
        .into_iter()
        .filter_map(|(name, ok)| ok.then(|| name.to_string()))
        .collect();
        achieved.extend(
            candidate
                .confluence
                .flags
                .achieved()
                .into_iter()
                .map(String::from),
        );

        Confirmations::new(
            vec![
                CONFIRM_TRIGGER.to_string(),
                CONFIRM_CONFLUENCE.to_string(),
                CONFIRM_HTF.to_string(),
            ],
            ConfluenceFlags::NAMES.iter().map(|s| s.to_string()).collect(),
            achieved,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::divergence::{DivergenceType, PivotPoint};
    use crate::models::stochastic::Band;

    fn make_candle(i: usize, close: f64) -> Candle {
        Candle {
            time: 1_700_000_000 + i as i64 * 900,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    /// Twenty candles sliding from 119 down to a last close of 100.
    fn selloff() -> Vec<Candle> {
        (0..20).map(|i| make_candle(i, 119.0 - i as f64)).collect()
    }

    fn report(direction: SignalType, aligned: bool, rotating: bool) -> ConfluenceReport {
        let flags = ConfluenceFlags {
            quad_rotation: rotating,
            channel_extreme: true,
            twenty_twenty_flag: true,
            ..Default::default()
        };
        ConfluenceReport {
            direction,
            flags,
            is_quad_aligned: aligned,
            is_quad_rotating: rotating,
            score: flags.count() + u8::from(aligned) + u8::from(rotating),
        }
    }

    fn bullish_divergence() -> DivergenceDetails {
        let point = |index: usize, price: f64, stoch_k: f64| PivotPoint {
            index,
            price,
            stoch_k,
            time: index as i64,
        };
        DivergenceDetails {
            divergence_type: DivergenceType::Bullish,
            angle: 20.0,
            price_points: vec![point(17, 99.0, 25.0), point(5, 104.0, 10.0)],
            stoch_points: vec![point(17, 99.0, 25.0), point(5, 104.0, 10.0)],
            candle_span: 12,
            band: Band::Fast,
        }
    }

    fn candidate<'a>(
        candles: &'a [Candle],
        report: &'a ConfluenceReport,
        divergence: Option<&'a DivergenceDetails>,
    ) -> SignalCandidate<'a> {
        SignalCandidate {
            symbol: "BTC",
            direction: report.direction,
            candles,
            confluence: report,
            divergence,
            htf_verdict: Some(HtfVerdict::Aligned),
            now: 1_700_020_000,
        }
    }

    #[test]
    fn builds_long_with_swing_stop_and_ladder() {
        let config = SignalConfig::default();
        let candles = selloff();
        let report = report(SignalType::Long, false, true);
        let divergence = bullish_divergence();

        let signal = SignalBuilder::new(&config)
            .build(&candidate(&candles, &report, Some(&divergence)))
            .unwrap();

        assert_eq!(signal.status, SignalStatus::Pending);
        assert!((signal.entry_zone.ideal - 100.0).abs() < 1e-9);
        assert!((signal.entry_zone.min - 99.9).abs() < 1e-9);
        assert!((signal.entry_zone.max - 100.1).abs() < 1e-9);
        // Lowest low of the last 10 candles is 99, padded by 0.1%
        assert!((signal.stop_loss.initial - 98.901).abs() < 1e-9);
        assert!((signal.stop_loss.breakeven - 100.0).abs() < 1e-9);
        assert_eq!(signal.targets.len(), 3);
        let risk = 100.0 - 98.901;
        assert!((signal.targets[0].price - (100.0 + 1.5 * risk)).abs() < 1e-9);
        assert!((signal.targets[2].price - (100.0 + 4.0 * risk)).abs() < 1e-9);
        assert_eq!(signal.targets[0].reason, "Target 1 (1.5R)");
        // raw 4 + divergence bonus 3
        assert_eq!(signal.confluence_score, 7);
        assert_eq!(signal.strength, SignalStrength::Strong);
        assert!(signal.confirmations.is_armed());
        assert_eq!(signal.valid_until, 1_700_020_000 + config.signal_expiry_secs);
        assert_eq!(signal.id, format!("BTC-LONG-{}", candles[19].time));
        assert!((signal.remaining_position_pct - 100.0).abs() < 1e-9);
    }

    #[test]
    fn aligned_and_rotating_quad_is_super() {
        let config = SignalConfig::default();
        let candles = selloff();
        let report = report(SignalType::Long, true, true);

        let signal = SignalBuilder::new(&config)
            .build(&candidate(&candles, &report, None))
            .unwrap();

        assert_eq!(signal.strength, SignalStrength::Super);
        assert_eq!(signal.confluence_score, 5);
    }

    #[test]
    fn short_mirrors_percentage_stop() {
        let config = SignalConfig {
            stop_loss: StopLossMethod::Percentage { pct: 1.0 },
            ..Default::default()
        };
        let candles = selloff();
        let report = report(SignalType::Short, false, true);

        let signal = SignalBuilder::new(&config)
            .build(&candidate(&candles, &report, None))
            .unwrap();

        assert_eq!(signal.signal_type, SignalType::Short);
        assert!((signal.stop_loss.initial - 101.0).abs() < 1e-9);
        assert!((signal.targets[0].price - 98.5).abs() < 1e-9);
        assert!(signal.targets[1].price < signal.targets[0].price);
    }

    #[test]
    fn fixed_amount_and_atr_stops() {
        let candles = selloff();
        let report = report(SignalType::Long, false, true);

        let config = SignalConfig {
            stop_loss: StopLossMethod::FixedAmount { amount: 2.5 },
            ..Default::default()
        };
        let signal = SignalBuilder::new(&config)
            .build(&candidate(&candles, &report, None))
            .unwrap();
        assert!((signal.stop_loss.initial - 97.5).abs() < 1e-9);

        let config = SignalConfig {
            stop_loss: StopLossMethod::Atr {
                period: 5,
                multiplier: 2.0,
            },
            ..Default::default()
        };
        let signal = SignalBuilder::new(&config)
            .build(&candidate(&candles, &report, None))
            .unwrap();
        // Every true range is 2 (high-low) so ATR settles at 2
        assert!((signal.stop_loss.initial - 96.0).abs() < 1e-9);

        let config = SignalConfig {
            stop_loss: StopLossMethod::Atr {
                period: 50,
                multiplier: 2.0,
            },
            ..Default::default()
        };
        assert!(SignalBuilder::new(&config)
            .build(&candidate(&candles, &report, None))
            .is_none());
    }

    #[test]
    fn missing_trigger_discards() {
        let config = SignalConfig::default();
        let candles = selloff();
        // No rotation and no divergence
        let report = report(SignalType::Long, false, false);
        assert!(SignalBuilder::new(&config)
            .build(&candidate(&candles, &report, None))
            .is_none());
    }

    #[test]
    fn opposite_divergence_is_not_a_trigger() {
        let config = SignalConfig::default();
        let candles = selloff();
        let report = report(SignalType::Short, false, false);
        let divergence = bullish_divergence();
        assert!(SignalBuilder::new(&config)
            .build(&candidate(&candles, &report, Some(&divergence)))
            .is_none());
    }

    #[test]
    fn below_minimums_discards_rather_than_degrades() {
        let candles = selloff();
        let report = report(SignalType::Long, false, true);

        let config = SignalConfig {
            min_strength: SignalStrength::Strong,
            ..Default::default()
        };
        // score 4 classifies MODERATE
        assert!(SignalBuilder::new(&config)
            .build(&candidate(&candles, &report, None))
            .is_none());

        let config = SignalConfig {
            min_confirmation_score: 5,
            ..Default::default()
        };
        assert!(SignalBuilder::new(&config)
            .build(&candidate(&candles, &report, None))
            .is_none());
    }

    #[test]
    fn htf_verdict_rejects_or_flags() {
        let config = SignalConfig::default();
        let candles = selloff();
        let report = report(SignalType::Long, false, true);
        let builder = SignalBuilder::new(&config);

        let mut misaligned = candidate(&candles, &report, None);
        misaligned.htf_verdict = Some(HtfVerdict::Misaligned);
        assert!(builder.build(&misaligned).is_none());

        let mut choppy = candidate(&candles, &report, None);
        choppy.htf_verdict = Some(HtfVerdict::LowConfidence);
        let signal = builder.build(&choppy).unwrap();
        assert!(signal.low_confidence);

        let mut unknown = candidate(&candles, &report, None);
        unknown.htf_verdict = None;
        assert!(!builder.build(&unknown).unwrap().low_confidence);
    }

    #[test]
    fn optional_confirmations_list_achieved_flags() {
        let config = SignalConfig::default();
        let candles = selloff();
        let report = report(SignalType::Long, false, true);
        let signal = SignalBuilder::new(&config)
            .build(&candidate(&candles, &report, None))
            .unwrap();

        let achieved = &signal.confirmations.achieved;
        assert!(achieved.iter().any(|a| a == "Channel extreme"));
        assert!(!achieved.iter().any(|a| a == "Volume spike"));
        // 3 required + 3 flags out of 3 + 7
        assert!((signal.confirmations.percentage - 60.0).abs() < 1e-9);
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["confirmations"]["percentage"], 60.0);
    }
}
