use tracing::trace;

use super::portfolio::{Account, Portfolio};
use super::types::SimulationConfig;

pub const MARKET_UP_THRESHOLD: f64 = 0.95;
pub const ATH_THRESHOLD: f64 = 0.85;
pub const CBB_PERFORMANCE_THRESHOLD: f64 = 0.90;

const SB_CAP_MULTIPLE: f64 = 2.0;
const CBB_CAP_MULTIPLE: u32 = 7;
const CBB_STEP_DOWN_AGES: [u32; 5] = [65, 70, 75, 80, 85];

const EQUITY_REFILL_RATE: f64 = 0.125;
const EQUITY_REFILL_RATE_CBB_FULL: f64 = 0.25;
const SB_COMFORT_RATIO: f64 = 0.5;
const WANTS_CUSHION: f64 = 0.10;
const CAP_WANTS_SHARE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSignals {
    pub market_performance: f64,
    pub ath_performance: f64,
    pub cbb_performance: f64,
}

impl MarketSignals {
    pub fn equities_tappable(&self) -> bool {
        self.market_performance >= MARKET_UP_THRESHOLD && self.ath_performance >= ATH_THRESHOLD
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuarterInputs {
    pub quarter: u32,
    pub aig: f64,
    pub cap_aig: f64,
    pub cbb_cap: f64,
    pub inflation_adjustment: f64,
    pub signals: MarketSignals,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpendingOutcome {
    pub portfolio: Portfolio,
    pub shortfall: f64,
    pub tba_withdrawal: f64,
    pub tda_withdrawal: f64,
    pub cbb_withdrawal: f64,
    pub to_spend_bucket: f64,
    pub to_crash_buffer: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct EquityDraw {
    tda: f64,
    tba: f64,
}

impl EquityDraw {
    fn total(self) -> f64 {
        self.tda + self.tba
    }
}

pub fn cap_aig(needs: f64, wants: f64, healthcare: f64, property_tax: f64, income_tax: f64) -> f64 {
    (needs + wants * CAP_WANTS_SHARE + healthcare + property_tax + income_tax).max(0.0)
}

pub fn sb_cap(cap_aig: f64) -> f64 {
    cap_aig.max(0.0) * SB_CAP_MULTIPLE
}

// Unadjusted figures; healthcare is whichever bracket applies once retired.
pub fn base_cap_aig(config: &SimulationConfig) -> f64 {
    let expenses = &config.expenses;
    let healthcare = expenses.healthcare_for_age(config.retirement_age, config.retirement_age);
    cap_aig(
        expenses.needs,
        expenses.wants,
        healthcare,
        expenses.property_tax,
        0.0,
    )
}

pub fn cbb_cap_for_age(base_cap_aig: f64, age: u32) -> f64 {
    let step_downs = CBB_STEP_DOWN_AGES
        .iter()
        .filter(|&&step_age| age >= step_age)
        .count() as u32;
    let multiple = CBB_CAP_MULTIPLE.saturating_sub(step_downs);
    (base_cap_aig * multiple as f64).max(0.0)
}

pub fn quarterly_tda_target(config: &SimulationConfig, inflation_adjustment: f64) -> f64 {
    let strategy = &config.strategy;
    ((strategy.initial_tda_withdrawal + strategy.roth_conversion_amount) * inflation_adjustment
        / 4.0)
        .max(0.0)
}

pub fn execute_quarterly(
    config: &SimulationConfig,
    balances: &Portfolio,
    inputs: &QuarterInputs,
) -> SpendingOutcome {
    let aig = inputs.aig.max(0.0);
    let sb_cap = sb_cap(inputs.cap_aig);
    let cbb_cap = inputs.cbb_cap.max(0.0);
    let mut tda_budget = quarterly_tda_target(config, inputs.inflation_adjustment);

    let mut portfolio = *balances;
    let mut outcome = SpendingOutcome {
        portfolio,
        shortfall: 0.0,
        tba_withdrawal: 0.0,
        tda_withdrawal: 0.0,
        cbb_withdrawal: 0.0,
        to_spend_bucket: 0.0,
        to_crash_buffer: 0.0,
    };

    if inputs.signals.equities_tappable() {
        let cbb_full = portfolio.cbb >= cbb_cap;
        let sb_room = (sb_cap - portfolio.sb).max(0.0);
        let refill_rate = if cbb_full {
            EQUITY_REFILL_RATE_CBB_FULL
        } else {
            EQUITY_REFILL_RATE
        };
        let sb_target = (refill_rate * aig).min(sb_room);

        if sb_target > 0.0 {
            let draw = withdraw_from_equities(&mut portfolio, sb_target, tda_budget);
            portfolio.apply(Account::SpendBucket, draw.total());
            tda_budget = (tda_budget - draw.tda).max(0.0);
            outcome.to_spend_bucket += draw.total();
            outcome.tda_withdrawal += draw.tda;
            outcome.tba_withdrawal += draw.tba;
            outcome.shortfall += (sb_target - draw.total()).max(0.0);
        }

        if !cbb_full {
            let cbb_target = (EQUITY_REFILL_RATE * aig).min((cbb_cap - portfolio.cbb).max(0.0));
            if cbb_target > 0.0 {
                let draw = withdraw_from_equities(&mut portfolio, cbb_target, tda_budget);
                portfolio.apply(Account::CrashBuffer, draw.total());
                outcome.to_crash_buffer += draw.total();
                outcome.tda_withdrawal += draw.tda;
                outcome.tba_withdrawal += draw.tba;
                outcome.shortfall += (cbb_target - draw.total()).max(0.0);
            }
        }
    } else if portfolio.sb > aig * SB_COMFORT_RATIO {
        // Market down but SB can ride it out.
    } else {
        // TODO: choose CBB vs equities by relative drawdown once that rule is defined;
        // both sides of the CBB performance threshold refill from CBB today.
        let cbb_holding_up = inputs.signals.cbb_performance >= CBB_PERFORMANCE_THRESHOLD;
        trace!(quarter = inputs.quarter, cbb_holding_up, "refilling from crash buffer");
        let reduced_aig = (aig - config.expenses.wants * WANTS_CUSHION).max(0.0);
        let quarterly_need = reduced_aig / 4.0;
        let sb_room = (sb_cap - portfolio.sb).max(0.0);
        let amount = portfolio
            .cbb
            .max(0.0)
            .min(quarterly_need)
            .min(sb_room);
        if amount > 0.0 {
            portfolio.transfer(Account::CrashBuffer, Account::SpendBucket, amount);
            outcome.cbb_withdrawal += amount;
            outcome.to_spend_bucket += amount;
        }
    }

    trace!(
        quarter = inputs.quarter,
        market = inputs.signals.market_performance,
        ath = inputs.signals.ath_performance,
        cbb_performance = inputs.signals.cbb_performance,
        to_sb = outcome.to_spend_bucket,
        to_cbb = outcome.to_crash_buffer,
        shortfall = outcome.shortfall,
        "quarterly spending decision"
    );

    outcome.portfolio = portfolio;
    outcome
}

// TDA first up to the remaining QTDAW budget, then TBA for the rest.
fn withdraw_from_equities(portfolio: &mut Portfolio, target: f64, tda_budget: f64) -> EquityDraw {
    if target <= 0.0 {
        return EquityDraw::default();
    }

    let tda = tda_budget.min(target).min(portfolio.tda).max(0.0);
    portfolio.apply(Account::TaxDeferred, -tda);

    let tba = (target - tda).min(portfolio.tba).max(0.0);
    portfolio.apply(Account::TaxableBrokerage, -tba);

    EquityDraw { tda, tba }
}
