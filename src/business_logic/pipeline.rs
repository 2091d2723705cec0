use crate::business_logic::config::SignalConfig;
use crate::business_logic::confluence::{direction_sign, ConfluenceScorer};
use crate::business_logic::divergence::PivotDivergenceDetector;
use crate::business_logic::indicators::calculate_overlays;
use crate::business_logic::lifecycle::ExitRules;
use crate::business_logic::multi_timeframe::{self, HtfVerdict, MultiTimeframeAnalyzer};
use crate::business_logic::quad_band::QuadBandAggregator;
use crate::business_logic::signal_builder::{SignalBuilder, SignalCandidate};
use crate::models::candle::Candle;
use crate::models::divergence::DivergenceDetails;
use crate::models::messages::{
    CalculatePayload, CalculationResult, ValidationOutcome, WorkerRequest, WorkerResponse,
};
use crate::models::signal::{SignalStatus, SignalType, TradeSignal};
use crate::models::stochastic::QuadBandData;

/// Run one request to completion. This is the body of every compute worker.
pub fn handle_request(request: WorkerRequest) -> WorkerResponse {
    match request {
        WorkerRequest::CalculateSignals(payload) => {
            WorkerResponse::SignalsResult(Box::new(calculate_signals(payload)))
        }
        WorkerRequest::CalculateStochOnly { candles, config } => {
            WorkerResponse::StochResult(calculate_stochastics(&candles, &config))
        }
        WorkerRequest::ValidateSignal {
            signal,
            current_price,
            now,
            config,
        } => WorkerResponse::ValidationResult(validate_signal(
            &signal,
            current_price,
            now,
            &config,
        )),
    }
}

pub fn calculate_stochastics(candles: &[Candle], config: &SignalConfig) -> QuadBandData {
    QuadBandAggregator::new(config).calculate(candles)
}

/// Quad bands, divergences, confluence and at most one new signal for a window.
pub fn calculate_signals(payload: CalculatePayload) -> CalculationResult {
    let CalculatePayload {
        symbol,
        candles,
        config,
        higher_timeframes,
        cached_quad,
        now,
    } = payload;
    let config = config.as_ref();

    let quad = match cached_quad {
        Some(quad) => quad,
        None => QuadBandAggregator::new(config).calculate(&candles),
    };
    let divergences = PivotDivergenceDetector::new(config).detect_all(&candles, &quad);
    let htf = MultiTimeframeAnalyzer::new().analyze(&higher_timeframes);

    let scorer = ConfluenceScorer::new(config);
    let builder = SignalBuilder::new(config);
    let mut confluence = Vec::new();
    let mut signals: Vec<TradeSignal> = Vec::new();

    for direction in [SignalType::Long, SignalType::Short] {
        let divergence = recent_divergence(&divergences, direction, candles.len(), config);
        let rotating = rotation_trigger(&quad, direction);
        if divergence.is_none() && !rotating {
            continue;
        }

        let report = scorer.score(direction, &candles, &quad, htf.as_ref());
        let score = report.score;
        confluence.push(report);
        let report = &confluence[confluence.len() - 1];

        if score < config.min_confluence_score {
            tracing::debug!(
                "{}: {:?} confluence {} below {}",
                symbol,
                direction,
                score,
                config.min_confluence_score
            );
            continue;
        }

        let htf_verdict = htf
            .as_ref()
            .map(|analysis| multi_timeframe::check_alignment(analysis, direction));
        if htf_verdict == Some(HtfVerdict::Misaligned) {
            tracing::info!(
                "{}: {:?} candidate rejected, higher timeframes locked the other way",
                symbol,
                direction
            );
            continue;
        }

        let candidate = SignalCandidate {
            symbol: &symbol,
            direction,
            candles: &candles,
            confluence: report,
            divergence,
            htf_verdict,
            now,
        };
        if let Some(signal) = builder.build(&candidate) {
            signals.push(signal);
        }
    }

    // Only the strongest candidate survives a window
    signals.sort_by(|a, b| {
        (b.strength, b.confluence_score).cmp(&(a.strength, a.confluence_score))
    });
    signals.truncate(1);

    let indicators = calculate_overlays(&candles, &config.overlay_indicators);

    CalculationResult {
        symbol,
        quad,
        divergences,
        confluence,
        htf,
        signals,
        indicators,
    }
}

/// Project `signal` forward to `price` and report whether it is still live.
pub fn validate_signal(
    signal: &TradeSignal,
    price: f64,
    now: i64,
    config: &SignalConfig,
) -> ValidationOutcome {
    let mut problems = structural_problems(signal);
    let (projected, _) = ExitRules::from_config(config).advance(signal, price, now);

    match projected.status {
        SignalStatus::Expired => problems.push(format!("expired at {}", signal.valid_until)),
        SignalStatus::Stopped => problems.push(format!(
            "stop {:.4} crossed at {:.4}",
            signal.effective_stop(),
            price
        )),
        status if status.is_terminal() => {
            problems.push(format!("closed as {:?} at {:.4}", status, price))
        }
        _ => {}
    }

    let is_valid = projected.status.is_open() && problems.is_empty();
    let mut reasons = problems;
    // Waiting for entry is not a problem, only worth reporting
    if projected.status == SignalStatus::Pending && !signal.entry_zone.contains(price) {
        reasons.push(format!(
            "price {:.4} outside entry zone {:.4}-{:.4}",
            price, signal.entry_zone.min, signal.entry_zone.max
        ));
    }

    ValidationOutcome {
        is_valid,
        status: projected.status,
        signal: projected,
        reasons,
    }
}

fn structural_problems(signal: &TradeSignal) -> Vec<String> {
    let mut problems = Vec::new();
    let zone = signal.entry_zone;
    if !(zone.min <= zone.ideal && zone.ideal <= zone.max) {
        problems.push("entry zone does not contain its ideal price".to_string());
    }
    let direction = signal.signal_type;
    if direction.reached(signal.stop_loss.initial, zone.ideal) {
        problems.push("stop loss is not behind entry".to_string());
    }
    let mut previous = zone.ideal;
    for target in &signal.targets {
        if !direction.reached(target.price, previous) || target.price == previous {
            problems.push(format!("{} is not beyond the previous level", target.reason));
        }
        previous = target.price;
    }
    problems
}

/// Strongest divergence in `direction` whose recent pivot is fresh enough to act on.
fn recent_divergence<'d>(
    divergences: &'d [DivergenceDetails],
    direction: SignalType,
    len: usize,
    config: &SignalConfig,
) -> Option<&'d DivergenceDetails> {
    let last = len.checked_sub(1)?;
    divergences
        .iter()
        .filter(|d| d.divergence_type.direction() == direction)
        .filter(|d| d.recent_index() + config.divergence_recency >= last)
        .max_by_key(|d| (d.strength(), d.recent_index()))
}

/// Quad rotating in `direction` with at least one band at the matching extreme.
fn rotation_trigger(quad: &QuadBandData, direction: SignalType) -> bool {
    if quad.rotation_direction != direction_sign(direction) {
        return false;
    }
    match direction {
        SignalType::Long => quad.oversold_count > 0,
        SignalType::Short => quad.overbought_count > 0,
    }
}
