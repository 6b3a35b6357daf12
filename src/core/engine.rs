use std::collections::VecDeque;

use tracing::debug;

use super::portfolio::{Account, Portfolio};
use super::strategy::{self, MarketSignals, QuarterInputs};
use super::types::{
    CashFlow, END_AGE, Metrics, QuarterlyResult, SimulationConfig, SimulationResult, Summary,
    YearlyResult,
};

const MONTHS_PER_YEAR: u32 = 12;
const MONTHS_PER_QUARTER: u32 = 3;
const PERFORMANCE_WINDOW_MONTHS: usize = 12;
pub const TBA_TAXABLE_SHARE: f64 = 0.5;
const MIN_TAX_DIVISOR: f64 = 0.01;
const SPOUSAL_STEP_UP_SHARE: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
struct YearPlan {
    year: i32,
    age: u32,
    inflation_adjustment: f64,
    working: bool,
    salary: f64,
    contribution_401k: f64,
    contribution_tba: f64,
    social_security: f64,
    roth_conversion: f64,
    needs: f64,
    wants: f64,
    healthcare: f64,
    property_tax: f64,
    estimated_tax: f64,
    aig: f64,
    cap_aig: f64,
    cbb_cap: f64,
    equity_return: f64,
}

impl YearPlan {
    fn gross_expenses(&self) -> f64 {
        self.needs + self.wants + self.healthcare + self.property_tax
    }

    fn monthly_gross_expenses(&self) -> f64 {
        self.gross_expenses() / MONTHS_PER_YEAR as f64
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FlowTotals {
    salary: f64,
    interest: f64,
    dividends: f64,
    social_security: f64,
    market_growth: f64,
    tba_withdrawal: f64,
    tda_withdrawal_spend: f64,
    tda_withdrawal_roth: f64,
    cbb_withdrawal: f64,
    sb_deposit: f64,
    sb_withdrawal: f64,
    contribution_401k: f64,
    contribution_tba: f64,
    needs: f64,
    wants: f64,
    healthcare: f64,
    property_tax: f64,
    income_tax: f64,
}

impl FlowTotals {
    fn post_to_sb(&mut self, portfolio: &mut Portfolio, amount: f64) {
        portfolio.apply(Account::SpendBucket, amount);
        if amount >= 0.0 {
            self.sb_deposit += amount;
        } else {
            self.sb_withdrawal -= amount;
        }
    }

    fn absorb(&mut self, other: &FlowTotals) {
        self.salary += other.salary;
        self.interest += other.interest;
        self.dividends += other.dividends;
        self.social_security += other.social_security;
        self.market_growth += other.market_growth;
        self.tba_withdrawal += other.tba_withdrawal;
        self.tda_withdrawal_spend += other.tda_withdrawal_spend;
        self.tda_withdrawal_roth += other.tda_withdrawal_roth;
        self.cbb_withdrawal += other.cbb_withdrawal;
        self.sb_deposit += other.sb_deposit;
        self.sb_withdrawal += other.sb_withdrawal;
        self.contribution_401k += other.contribution_401k;
        self.contribution_tba += other.contribution_tba;
        self.needs += other.needs;
        self.wants += other.wants;
        self.healthcare += other.healthcare;
        self.property_tax += other.property_tax;
        self.income_tax += other.income_tax;
    }

    fn gap_expenses(&self) -> f64 {
        self.needs + self.wants + self.healthcare + self.property_tax + self.income_tax
    }

    fn passive_income(&self) -> f64 {
        self.interest + self.dividends + self.social_security
    }

    fn to_cash_flow(&self) -> CashFlow {
        CashFlow {
            salary: self.salary,
            interest: self.interest,
            dividends: self.dividends,
            social_security: self.social_security,
            market_growth: self.market_growth,
            tba_withdrawal: self.tba_withdrawal,
            tda_withdrawal: self.tda_withdrawal_spend + self.tda_withdrawal_roth,
            tda_withdrawal_spend: self.tda_withdrawal_spend,
            tda_withdrawal_roth: self.tda_withdrawal_roth,
            cbb_withdrawal: self.cbb_withdrawal,
            sb_deposit: self.sb_deposit,
            sb_withdrawal: self.sb_withdrawal,
            roth_conversion: self.tda_withdrawal_roth,
            contribution_401k: self.contribution_401k,
            contribution_tba: self.contribution_tba,
            total_income: self.salary
                + self.interest
                + self.dividends
                + self.social_security
                + self.market_growth,
            needs: self.needs,
            wants: self.wants,
            healthcare: self.healthcare,
            income_tax: self.income_tax,
            property_tax: self.property_tax,
            total_expenses: self.gap_expenses(),
        }
    }

    fn metrics(&self, sb_cap: f64, cbb_cap: f64, is_failure: bool) -> Metrics {
        let gap_expenses = self.gap_expenses();
        let passive = self.passive_income();
        Metrics {
            annual_income_gap: (gap_expenses - passive).max(0.0),
            income_gap_expenses: gap_expenses,
            income_gap_passive_income: passive,
            sb_cap,
            cbb_cap,
            is_failure,
        }
    }
}

#[derive(Debug)]
struct MarketTracker {
    index: f64,
    peak: f64,
    index_window: VecDeque<f64>,
    cbb_window: VecDeque<f64>,
}

impl MarketTracker {
    fn new(cbb_start: f64) -> Self {
        Self {
            index: 1.0,
            peak: 1.0,
            index_window: VecDeque::from([1.0]),
            cbb_window: VecDeque::from([cbb_start]),
        }
    }

    fn record_month(&mut self, monthly_growth: f64, cbb_balance: f64) {
        self.index *= 1.0 + monthly_growth;
        self.peak = self.peak.max(self.index);
        push_window(&mut self.index_window, self.index);
        push_window(&mut self.cbb_window, cbb_balance);
    }

    fn signals(&self, cbb_balance: f64) -> MarketSignals {
        let index_year_ago = self.index_window.front().copied().unwrap_or(1.0);
        let cbb_year_ago = self.cbb_window.front().copied().unwrap_or(cbb_balance);
        MarketSignals {
            market_performance: ratio_or_flat(self.index, index_year_ago),
            ath_performance: ratio_or_flat(self.index, self.peak),
            cbb_performance: ratio_or_flat(cbb_balance, cbb_year_ago),
        }
    }
}

// Keeps the value from 12 months ago at the front.
fn push_window(window: &mut VecDeque<f64>, value: f64) {
    window.push_back(value);
    while window.len() > PERFORMANCE_WINDOW_MONTHS + 1 {
        window.pop_front();
    }
}

fn ratio_or_flat(current: f64, reference: f64) -> f64 {
    if reference > 0.0 {
        current / reference
    } else {
        1.0
    }
}

pub fn run_simulation(
    config: &SimulationConfig,
    market_returns: &[f64],
    _inflation_rates: &[f64],
) -> SimulationResult {
    let base_cap_aig = strategy::base_cap_aig(config);
    let mut portfolio = config.portfolio;
    let mut market = MarketTracker::new(portfolio.cbb);

    let mut accrued_interest = 0.0;
    let mut accrued_dividends = 0.0;
    let mut total_interest = 0.0;
    let mut total_dividends = 0.0;
    let mut prior_taxable_income: Option<f64> = None;
    let mut failure_year: Option<i32> = None;

    let years = simulated_years(config);
    let mut yearly_results = Vec::with_capacity(years as usize);
    let mut quarterly_results = Vec::with_capacity(years as usize * 4);

    for offset in 0..years {
        let plan = plan_year(
            config,
            offset,
            &portfolio,
            prior_taxable_income,
            base_cap_aig,
            market_returns,
        );
        let sb_tolerance = plan.monthly_gross_expenses();
        let monthly_growth = monthly_rate(plan.equity_return);

        let mut year_flows = FlowTotals::default();
        let mut quarter_flows = FlowTotals::default();

        for month in 0..MONTHS_PER_YEAR {
            if month % MONTHS_PER_QUARTER == 0 {
                let quarter = month / MONTHS_PER_QUARTER;

                quarter_flows.interest += accrued_interest;
                quarter_flows.dividends += accrued_dividends;
                total_interest += accrued_interest;
                total_dividends += accrued_dividends;
                quarter_flows.post_to_sb(&mut portfolio, accrued_interest + accrued_dividends);
                accrued_interest = 0.0;
                accrued_dividends = 0.0;

                if !plan.working {
                    let outcome = strategy::execute_quarterly(
                        config,
                        &portfolio,
                        &QuarterInputs {
                            quarter,
                            aig: plan.aig,
                            cap_aig: plan.cap_aig,
                            cbb_cap: plan.cbb_cap,
                            inflation_adjustment: plan.inflation_adjustment,
                            signals: market.signals(portfolio.cbb),
                        },
                    );
                    portfolio = outcome.portfolio;
                    quarter_flows.tba_withdrawal += outcome.tba_withdrawal;
                    quarter_flows.tda_withdrawal_spend += outcome.tda_withdrawal;
                    quarter_flows.cbb_withdrawal += outcome.cbb_withdrawal;
                    quarter_flows.sb_deposit += outcome.to_spend_bucket;
                    if outcome.shortfall > 0.0 {
                        debug!(
                            year = plan.year,
                            quarter,
                            shortfall = outcome.shortfall,
                            "equity refill fell short"
                        );
                    }
                }

                let roth = (plan.roth_conversion / 4.0).min(portfolio.tda).max(0.0);
                if roth > 0.0 {
                    portfolio.transfer(Account::TaxDeferred, Account::TaxFree, roth);
                    quarter_flows.tda_withdrawal_roth += roth;
                }
            }

            if plan.working {
                let gross = plan.salary / MONTHS_PER_YEAR as f64;
                let to_401k = plan.contribution_401k / MONTHS_PER_YEAR as f64;
                let to_tba = plan.contribution_tba / MONTHS_PER_YEAR as f64;
                portfolio.apply(Account::TaxDeferred, to_401k);
                portfolio.apply(Account::TaxableBrokerage, to_tba);
                quarter_flows.post_to_sb(&mut portfolio, gross - to_401k - to_tba);
                quarter_flows.salary += gross;
                quarter_flows.contribution_401k += to_401k;
                quarter_flows.contribution_tba += to_tba;
            }

            let social_security = plan.social_security / MONTHS_PER_YEAR as f64;
            quarter_flows.post_to_sb(&mut portfolio, social_security);
            quarter_flows.social_security += social_security;

            let estimated_tax = plan.estimated_tax / MONTHS_PER_YEAR as f64;
            quarter_flows.post_to_sb(&mut portfolio, -(sb_tolerance + estimated_tax));
            quarter_flows.needs += plan.needs / MONTHS_PER_YEAR as f64;
            quarter_flows.wants += plan.wants / MONTHS_PER_YEAR as f64;
            quarter_flows.healthcare += plan.healthcare / MONTHS_PER_YEAR as f64;
            quarter_flows.property_tax += plan.property_tax / MONTHS_PER_YEAR as f64;
            quarter_flows.income_tax += estimated_tax;

            accrued_interest +=
                portfolio.sb.max(0.0) * config.rates.hysa_rate / MONTHS_PER_YEAR as f64;
            accrued_dividends +=
                portfolio.cbb.max(0.0) * config.rates.bond_yield / MONTHS_PER_YEAR as f64;

            let growth_before = portfolio.equities();
            portfolio.tba *= 1.0 + monthly_growth;
            portfolio.tda *= 1.0 + monthly_growth;
            portfolio.tfa *= 1.0 + monthly_growth;
            quarter_flows.market_growth += portfolio.equities() - growth_before;
            market.record_month(monthly_growth, portfolio.cbb);

            if failure_year.is_none() {
                if let Some(account) = portfolio.breached_floor(sb_tolerance) {
                    failure_year = Some(plan.year);
                    debug!(
                        year = plan.year,
                        age = plan.age,
                        month = month + 1,
                        account = account.short_name(),
                        "portfolio floor breached"
                    );
                }
            }

            if month % MONTHS_PER_QUARTER == MONTHS_PER_QUARTER - 1 {
                quarterly_results.push(QuarterlyResult {
                    year: plan.year,
                    quarter: month / MONTHS_PER_QUARTER + 1,
                    age: plan.age,
                    balances: portfolio,
                    cash_flow: quarter_flows.to_cash_flow(),
                    metrics: quarter_flows.metrics(
                        strategy::sb_cap(plan.cap_aig),
                        plan.cbb_cap,
                        failure_year.is_some(),
                    ),
                });
                year_flows.absorb(&quarter_flows);
                quarter_flows = FlowTotals::default();
            }
        }

        let taxable_income = taxable_income(&year_flows.to_cash_flow());
        let final_tax = taxable_income * config.rates.income_tax;
        let true_up = final_tax - plan.estimated_tax;
        year_flows.post_to_sb(&mut portfolio, -true_up);
        year_flows.income_tax += true_up;
        prior_taxable_income = Some(taxable_income);

        if failure_year.is_none() && portfolio.breached_floor(sb_tolerance).is_some() {
            failure_year = Some(plan.year);
            debug!(year = plan.year, age = plan.age, "tax true-up breached portfolio floor");
        }

        let reported_sb_cap = strategy::sb_cap(strategy::cap_aig(
            year_flows.needs,
            year_flows.wants,
            year_flows.healthcare,
            year_flows.property_tax,
            year_flows.income_tax,
        ));
        yearly_results.push(YearlyResult {
            year: plan.year,
            age: plan.age,
            balances: portfolio,
            cash_flow: year_flows.to_cash_flow(),
            metrics: year_flows.metrics(reported_sb_cap, plan.cbb_cap, failure_year.is_some()),
        });

        if failure_year.is_some() {
            break;
        }
    }

    let summary = Summary {
        final_total_balance: portfolio.total(),
        is_success: failure_year.is_none(),
        failure_year,
        total_dividends,
        total_interest,
    };
    debug!(
        name = %config.name,
        years = yearly_results.len(),
        success = summary.is_success,
        final_total = summary.final_total_balance,
        "simulation finished"
    );

    SimulationResult {
        config: config.clone(),
        yearly_results,
        quarterly_results,
        summary,
    }
}

fn simulated_years(config: &SimulationConfig) -> u32 {
    (END_AGE + 1).saturating_sub(config.current_age)
}

pub fn inflation_adjustment(config: &SimulationConfig, year_offset: u32) -> f64 {
    (1.0 + config.rates.inflation).powi(year_offset as i32)
}

// A plan that starts at or past the retirement age never draws salary.
pub fn is_working(config: &SimulationConfig, age: u32) -> bool {
    config.current_age < config.retirement_age && age <= config.retirement_age
}

pub fn social_security_for_year(config: &SimulationConfig, year_offset: u32, age: u32) -> f64 {
    let spousal = &config.spousal;
    let adjustment = inflation_adjustment(config, year_offset);

    let lower_claimed =
        spousal.spouse_age.saturating_add(year_offset) >= spousal.lower_earner.claim_age;
    let higher_claimed = age >= spousal.higher_earner.claim_age;

    let higher = if higher_claimed {
        spousal.higher_earner.annual_benefit * adjustment
    } else {
        0.0
    };
    let mut lower = if lower_claimed {
        spousal.lower_earner.annual_benefit * adjustment
    } else {
        0.0
    };
    if higher_claimed && lower_claimed {
        lower = lower.max(higher * SPOUSAL_STEP_UP_SHARE);
    }
    lower + higher
}

pub fn roth_conversion_for_year(config: &SimulationConfig, year_offset: u32, age: u32) -> f64 {
    if year_offset == 0 {
        return 0.0;
    }
    let base = config
        .strategy
        .base_roth_conversion(age, config.retirement_age);
    (base * inflation_adjustment(config, year_offset)).max(0.0)
}

pub fn taxable_income(cash_flow: &CashFlow) -> f64 {
    cash_flow.salary
        + cash_flow.interest
        + cash_flow.dividends
        + cash_flow.social_security
        + cash_flow.tda_withdrawal_spend
        + cash_flow.tda_withdrawal_roth
        + cash_flow.tba_withdrawal * TBA_TAXABLE_SHARE
}

pub fn tax_divisor(config: &SimulationConfig) -> f64 {
    (1.0 - config.rates.income_tax).max(MIN_TAX_DIVISOR)
}

fn monthly_rate(annual: f64) -> f64 {
    (1.0 + annual).max(0.0).powf(1.0 / MONTHS_PER_YEAR as f64) - 1.0
}

fn plan_year(
    config: &SimulationConfig,
    offset: u32,
    portfolio: &Portfolio,
    prior_taxable_income: Option<f64>,
    base_cap_aig: f64,
    market_returns: &[f64],
) -> YearPlan {
    let rates = &config.rates;
    let expenses = &config.expenses;
    let age = config.current_age + offset;
    let year = config.current_year + offset as i32;
    let adjustment = inflation_adjustment(config, offset);
    let working = is_working(config, age);

    let needs = expenses.needs * adjustment;
    let property_tax = expenses.property_tax * adjustment;
    let healthcare = expenses.healthcare_for_age(age, config.retirement_age) * adjustment;

    let (salary, contribution_401k, contribution_tba) = if working {
        (
            config.salary * adjustment,
            config.contributions.annual_401k * adjustment,
            config.contributions.annual_tba * adjustment,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    let social_security = social_security_for_year(config, offset, age);
    let roth_conversion = roth_conversion_for_year(config, offset, age);

    let estimated_interest = portfolio.sb.max(0.0) * rates.hysa_rate;
    let estimated_dividends = portfolio.cbb.max(0.0) * rates.bond_yield;
    let estimated_tax = match prior_taxable_income {
        Some(income) => income * rates.income_tax,
        None => {
            (salary + social_security + estimated_interest + estimated_dividends + roth_conversion)
                * rates.income_tax
        }
    };

    // Before retirement, salary alone funds wants after every fixed outflow.
    let wants = if age < config.retirement_age {
        let fixed = needs
            + healthcare
            + property_tax
            + estimated_tax
            + roth_conversion
            + contribution_401k
            + contribution_tba;
        (salary - fixed).max(0.0)
    } else {
        expenses.wants * adjustment
    };

    let gap_expenses = needs + wants + healthcare + property_tax + estimated_tax;
    let estimated_passive = estimated_interest + estimated_dividends + social_security;
    let aig = (gap_expenses - estimated_passive).max(0.0) / tax_divisor(config);

    let equity_return = market_returns
        .get(offset as usize)
        .copied()
        .unwrap_or(if age < config.retirement_age {
            rates.pre_retirement_growth
        } else {
            rates.post_retirement_growth
        });

    YearPlan {
        year,
        age,
        inflation_adjustment: adjustment,
        working,
        salary,
        contribution_401k,
        contribution_tba,
        social_security,
        roth_conversion,
        needs,
        wants,
        healthcare,
        property_tax,
        estimated_tax,
        aig,
        cap_aig: strategy::cap_aig(needs, wants, healthcare, property_tax, estimated_tax),
        cbb_cap: strategy::cbb_cap_for_age(base_cap_aig, age),
        equity_return,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::types::{
        ContributionConfig, ExpenseConfig, RateConfig, SocialSecurityDetails, SpousalDetails,
        StrategyConfig, StrategyVariant,
    };
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    pub(crate) fn sample_config() -> SimulationConfig {
        SimulationConfig {
            id: Some("test-1".to_string()),
            name: "Test Simulation".to_string(),
            current_year: 2025,
            current_age: 60,
            retirement_age: 65,
            salary: 120_000.0,
            portfolio: Portfolio::new(200_000.0, 1_000_000.0, 500_000.0, 1_000_000.0, 0.0),
            spousal: SpousalDetails {
                spouse_age: 58,
                lower_earner: SocialSecurityDetails {
                    claim_age: 67,
                    annual_benefit: 20_000.0,
                },
                higher_earner: SocialSecurityDetails {
                    claim_age: 70,
                    annual_benefit: 40_000.0,
                },
            },
            expenses: ExpenseConfig {
                needs: 60_000.0,
                wants: 30_000.0,
                property_tax: 10_000.0,
                healthcare_pre_retirement: 5_000.0,
                healthcare_post_retirement_pre_medicare: 5_000.0,
                healthcare_medicare: 3_000.0,
            },
            contributions: ContributionConfig {
                annual_401k: 23_000.0,
                annual_tba: 12_000.0,
            },
            rates: RateConfig {
                inflation: 0.03,
                pre_retirement_growth: 0.07,
                post_retirement_growth: 0.05,
                bond_yield: 0.04,
                hysa_rate: 0.04,
                income_tax: 0.20,
            },
            strategy: StrategyConfig {
                initial_tda_withdrawal: 40_000.0,
                roth_conversion_amount: 10_000.0,
                roth_conversion_pre_retirement: None,
                roth_conversion_post_retirement: None,
                variant: StrategyVariant::QuarterlyBucket,
            },
        }
    }

    fn flat_returns(rate: f64) -> Vec<f64> {
        vec![rate; 40]
    }

    fn quiet_config() -> SimulationConfig {
        let mut config = sample_config();
        config.salary = 0.0;
        config.current_age = 70;
        config.retirement_age = 65;
        config.portfolio = Portfolio::new(0.0, 0.0, 0.0, 0.0, 0.0);
        config.spousal.lower_earner.annual_benefit = 0.0;
        config.spousal.higher_earner.annual_benefit = 0.0;
        config.expenses = ExpenseConfig {
            needs: 0.0,
            wants: 0.0,
            property_tax: 0.0,
            healthcare_pre_retirement: 0.0,
            healthcare_post_retirement_pre_medicare: 0.0,
            healthcare_medicare: 0.0,
        };
        config.contributions = ContributionConfig {
            annual_401k: 0.0,
            annual_tba: 0.0,
        };
        config.rates = RateConfig {
            inflation: 0.0,
            pre_retirement_growth: 0.0,
            post_retirement_growth: 0.0,
            bond_yield: 0.0,
            hysa_rate: 0.0,
            income_tax: 0.0,
        };
        config.strategy.initial_tda_withdrawal = 0.0;
        config.strategy.roth_conversion_amount = 0.0;
        config
    }

    fn assert_period_conserves(start: &Portfolio, end: &Portfolio, cash_flow: &CashFlow) {
        assert_approx_tol(
            end.total(),
            start.total() + cash_flow.total_income - cash_flow.total_expenses,
            1e-2,
        );
    }

    #[test]
    fn reference_scenario_completes_all_years_successfully() {
        let config = sample_config();
        let result = run_simulation(&config, &flat_returns(0.05), &flat_returns(0.03));

        assert_eq!(result.yearly_results.len(), 26);
        assert_eq!(result.quarterly_results.len(), 26 * 4);
        assert!(result.summary.is_success);
        assert_eq!(result.summary.failure_year, None);
        assert!(result.summary.final_total_balance > 0.0);

        let first = &result.yearly_results[0];
        let last = result.yearly_results.last().expect("at least one year");
        assert_eq!((first.year, first.age), (2025, 60));
        assert_eq!((last.year, last.age), (2050, 85));
        assert!(result.yearly_results.iter().all(|y| !y.metrics.is_failure));
    }

    #[test]
    fn deep_post_retirement_crash_fails_before_horizon() {
        let mut config = sample_config();
        config.rates.post_retirement_growth = -0.50;
        config.rates.bond_yield = 0.0;
        config.rates.hysa_rate = 0.0;

        let result = run_simulation(&config, &[], &[]);

        assert!(!result.summary.is_success);
        let failure_year = result.summary.failure_year.expect("run must fail");
        assert!(failure_year < config.current_year + 26);

        let last = result.yearly_results.last().expect("at least one year");
        assert_eq!(last.year, failure_year);
        assert!(last.metrics.is_failure);
        assert!(result.quarterly_results.iter().all(|q| q.year <= failure_year));
    }

    #[test]
    fn immediate_retirement_uses_post_retirement_wants_and_strategy_in_first_year() {
        let mut config = sample_config();
        config.current_age = 65;
        config.retirement_age = 65;
        config.portfolio.sb = 0.0;

        let result = run_simulation(&config, &[], &[]);
        let first = &result.yearly_results[0];

        assert_eq!(first.age, 65);
        assert_approx(first.cash_flow.wants, config.expenses.wants);
        assert_approx(first.cash_flow.salary, 0.0);
        assert_approx(first.cash_flow.contribution_401k, 0.0);
        assert!(first.cash_flow.tda_withdrawal_spend > 0.0);
        assert!(result.quarterly_results[0].cash_flow.sb_deposit > 0.0);
    }

    #[test]
    fn retirement_year_keeps_salary_and_defers_strategy_to_next_year() {
        let config = sample_config();
        let result = run_simulation(&config, &flat_returns(0.05), &[]);

        let retirement_year = &result.yearly_results[5];
        assert_eq!(retirement_year.age, 65);
        assert!(retirement_year.cash_flow.salary > 0.0);
        assert_approx(retirement_year.cash_flow.tda_withdrawal_spend, 0.0);
        assert_approx(retirement_year.cash_flow.tba_withdrawal, 0.0);
        assert_approx(
            retirement_year.cash_flow.wants,
            30_000.0 * 1.03_f64.powi(5),
        );

        let first_retired = &result.yearly_results[6];
        assert_approx(first_retired.cash_flow.salary, 0.0);
    }

    #[test]
    fn pre_retirement_wants_are_solved_from_salary() {
        let mut config = sample_config();
        config.salary = 300_000.0;
        let result = run_simulation(&config, &flat_returns(0.05), &[]);

        for (offset, year) in result.yearly_results.iter().take(5).enumerate() {
            let adjustment = 1.03_f64.powi(offset as i32);
            let cf = &year.cash_flow;
            let estimated_tax: f64 = result.quarterly_results[offset * 4..offset * 4 + 4]
                .iter()
                .map(|q| q.cash_flow.income_tax)
                .sum();
            let fixed = cf.needs
                + cf.healthcare
                + cf.property_tax
                + estimated_tax
                + cf.roth_conversion
                + cf.contribution_401k
                + cf.contribution_tba;
            assert_approx_tol(cf.wants, (300_000.0 * adjustment - fixed).max(0.0), 1e-4);
            assert_approx_tol(cf.healthcare, 5_000.0 * adjustment, 1e-6);
        }
    }

    #[test]
    fn roth_conversion_starts_in_second_year_as_direct_tda_to_tfa_transfer() {
        let config = sample_config();
        let result = run_simulation(&config, &flat_returns(0.05), &[]);

        let first = &result.yearly_results[0];
        assert_approx(first.cash_flow.roth_conversion, 0.0);
        assert_approx(first.balances.tfa, 0.0);

        let second = &result.yearly_results[1];
        assert_approx(second.cash_flow.roth_conversion, 10_000.0 * 1.03);
        assert_approx(second.cash_flow.tda_withdrawal_roth, 10_000.0 * 1.03);
        assert_approx(second.cash_flow.tda_withdrawal_spend, 0.0);
        assert!(second.balances.tfa > 10_000.0 * 1.03);
    }

    #[test]
    fn roth_conversion_is_capped_by_tda_balance() {
        let mut config = quiet_config();
        config.portfolio.tda = 1_000.0;
        config.strategy.roth_conversion_amount = 40_000.0;
        let result = run_simulation(&config, &[], &[]);

        let second = &result.yearly_results[1];
        assert_approx(second.cash_flow.roth_conversion, 1_000.0);
        assert_approx(second.balances.tda, 0.0);
        assert_approx(second.balances.tfa, 1_000.0);
        assert!(result.summary.is_success);
    }

    #[test]
    fn scheduled_roth_amounts_override_the_flat_amount() {
        let mut config = sample_config();
        config.strategy.roth_conversion_pre_retirement = Some(2_000.0);
        config.strategy.roth_conversion_post_retirement = Some(6_000.0);

        assert_approx(roth_conversion_for_year(&config, 0, 60), 0.0);
        assert_approx(roth_conversion_for_year(&config, 1, 61), 2_000.0 * 1.03);
        assert_approx(
            roth_conversion_for_year(&config, 6, 66),
            6_000.0 * 1.03_f64.powi(6),
        );
    }

    #[test]
    fn social_security_applies_claim_ages_and_spousal_step_up() {
        let mut config = sample_config();
        config.rates.inflation = 0.0;
        config.spousal.lower_earner.annual_benefit = 10_000.0;

        // Spouse 58 + 8 = 66 < 67, primary 68 < 70.
        assert_approx(social_security_for_year(&config, 8, 68), 0.0);
        // Spouse 67 claims alone.
        assert_approx(social_security_for_year(&config, 9, 69), 10_000.0);
        // Primary claims at 70; spouse stepped up to half of 40k.
        assert_approx(social_security_for_year(&config, 10, 70), 60_000.0);

        config.spousal.lower_earner.annual_benefit = 25_000.0;
        assert_approx(social_security_for_year(&config, 10, 70), 65_000.0);
    }

    #[test]
    fn social_security_step_up_waits_for_lower_earner_claim() {
        let mut config = sample_config();
        config.rates.inflation = 0.0;
        config.spousal.spouse_age = 50;

        assert_approx(social_security_for_year(&config, 10, 70), 40_000.0);
    }

    #[test]
    fn social_security_saturates_extreme_spouse_age() {
        let mut config = sample_config();
        config.rates.inflation = 0.0;
        config.spousal.spouse_age = u32::MAX;

        // Lower earner counts as claimed; stepped up to half of 40k.
        assert_approx(social_security_for_year(&config, 10, 70), 60_000.0);
    }

    #[test]
    fn external_returns_override_flat_growth_for_covered_years() {
        let mut config = quiet_config();
        config.portfolio.tba = 1_000.0;
        config.rates.post_retirement_growth = 0.02;

        let result = run_simulation(&config, &[0.10], &[]);
        assert_approx(result.yearly_results[0].balances.tba, 1_100.0);
        assert_approx(result.yearly_results[1].balances.tba, 1_122.0);
        assert_approx(result.yearly_results[0].cash_flow.market_growth, 100.0);
    }

    #[test]
    fn interest_accrues_monthly_and_is_credited_at_next_quarter_start() {
        let mut config = quiet_config();
        config.current_age = 84;
        config.portfolio.sb = 12_000.0;
        config.rates.hysa_rate = 0.12;

        let result = run_simulation(&config, &[], &[]);
        let q1 = &result.quarterly_results[0];
        let q2 = &result.quarterly_results[1];

        assert_approx(q1.cash_flow.interest, 0.0);
        assert_approx(q2.cash_flow.interest, 360.0);
        assert_approx(result.quarterly_results[2].cash_flow.interest, 12_360.0 * 0.03);
        assert_approx(q1.balances.sb, 12_000.0);
        assert_approx(
            result.summary.total_interest,
            result
                .yearly_results
                .iter()
                .map(|y| y.cash_flow.interest)
                .sum::<f64>(),
        );
    }

    #[test]
    fn tax_is_trued_up_at_year_end_and_carried_into_next_estimate() {
        let config = sample_config();
        let result = run_simulation(&config, &flat_returns(0.05), &[]);

        for window in result.yearly_results.windows(2) {
            let (prior, current) = (&window[0], &window[1]);
            assert_approx_tol(
                prior.cash_flow.income_tax,
                taxable_income(&prior.cash_flow) * config.rates.income_tax,
                1e-6,
            );

            let offset = (current.age - config.current_age) as usize;
            let estimate: f64 = result.quarterly_results[offset * 4..offset * 4 + 4]
                .iter()
                .map(|q| q.cash_flow.income_tax)
                .sum();
            assert_approx_tol(estimate, prior.cash_flow.income_tax, 1e-6);
        }
    }

    #[test]
    fn net_salary_lands_in_sb_and_contributions_bypass_it() {
        let config = sample_config();
        let result = run_simulation(&config, &flat_returns(0.0), &[]);
        let first = &result.yearly_results[0];

        assert_approx(first.cash_flow.salary, 120_000.0);
        assert_approx(first.cash_flow.contribution_401k, 23_000.0);
        assert_approx(first.cash_flow.contribution_tba, 12_000.0);
        assert_approx(first.balances.tda, 1_000_000.0 + 23_000.0);
        assert_approx(first.balances.tba, 500_000.0 + 12_000.0);
    }

    #[test]
    fn every_period_conserves_total_balance() {
        let config = sample_config();
        let result = run_simulation(&config, &flat_returns(0.05), &[]);

        let mut start = config.portfolio;
        for year in &result.yearly_results {
            assert_period_conserves(&start, &year.balances, &year.cash_flow);
            start = year.balances;
        }

        let mut start = config.portfolio;
        for (idx, quarter) in result.quarterly_results.iter().enumerate() {
            assert_period_conserves(&start, &quarter.balances, &quarter.cash_flow);
            // The tax true-up lands between Q4 and the next Q1.
            start = if idx % 4 == 3 {
                result.yearly_results[idx / 4].balances
            } else {
                quarter.balances
            };
        }
    }

    #[test]
    fn sb_flows_reconcile_with_sb_balance() {
        let config = sample_config();
        let result = run_simulation(&config, &flat_returns(0.05), &[]);

        let mut start_sb = config.portfolio.sb;
        for year in &result.yearly_results {
            let cf = &year.cash_flow;
            assert_approx_tol(year.balances.sb, start_sb + cf.sb_deposit - cf.sb_withdrawal, 1e-4);
            start_sb = year.balances.sb;
        }
    }

    #[test]
    fn reported_caps_match_cap_aig_and_step_down_schedule() {
        let config = sample_config();
        let result = run_simulation(&config, &flat_returns(0.05), &[]);
        let base = strategy::base_cap_aig(&config);

        for year in &result.yearly_results {
            let cf = &year.cash_flow;
            let cap_aig = cf.needs + cf.wants * 0.5 + cf.healthcare + cf.property_tax + cf.income_tax;
            assert_approx_tol(year.metrics.sb_cap, cap_aig * 2.0, 1e-6);
            assert_approx(year.metrics.cbb_cap, strategy::cbb_cap_for_age(base, year.age));
        }
        assert_approx(result.yearly_results[0].metrics.cbb_cap, base * 7.0);
        assert_approx(result.yearly_results[25].metrics.cbb_cap, base * 2.0);
    }

    #[test]
    fn reported_gap_is_expenses_minus_passive_income() {
        let config = sample_config();
        let result = run_simulation(&config, &flat_returns(0.05), &[]);

        for year in &result.yearly_results {
            let cf = &year.cash_flow;
            let m = &year.metrics;
            assert_approx(m.income_gap_expenses, cf.total_expenses);
            assert_approx(
                m.income_gap_passive_income,
                cf.interest + cf.dividends + cf.social_security,
            );
            assert_approx(
                m.annual_income_gap,
                (m.income_gap_expenses - m.income_gap_passive_income).max(0.0),
            );
        }
    }

    #[test]
    fn run_length_is_bounded_by_age_85() {
        let mut config = sample_config();
        config.current_age = 84;
        config.retirement_age = 84;
        assert_eq!(run_simulation(&config, &[], &[]).yearly_results.len(), 2);

        config.current_age = 90;
        config.retirement_age = 90;
        let result = run_simulation(&config, &[], &[]);
        assert!(result.yearly_results.is_empty());
        assert!(result.summary.is_success);
        assert_approx(result.summary.final_total_balance, config.portfolio.total());
    }

    #[test]
    fn reruns_are_bit_identical() {
        let config = sample_config();
        let returns = [0.12, -0.2, 0.05, 0.3, -0.1];
        let a = run_simulation(&config, &returns, &[0.03]);
        let b = run_simulation(&config, &returns, &[0.03]);
        assert_eq!(a, b);
    }

    #[test]
    fn inflation_overrides_do_not_change_results() {
        let config = sample_config();
        let a = run_simulation(&config, &[], &[]);
        let b = run_simulation(&config, &[], &[0.5; 30]);
        assert_eq!(a, b);
    }

    #[test]
    fn market_tracker_reports_twelve_month_and_peak_ratios() {
        let mut tracker = MarketTracker::new(100.0);
        let flat = tracker.signals(100.0);
        assert_approx(flat.market_performance, 1.0);
        assert_approx(flat.ath_performance, 1.0);

        for _ in 0..12 {
            tracker.record_month(0.01, 100.0);
        }
        let signals = tracker.signals(90.0);
        assert_approx(signals.market_performance, 1.01_f64.powi(12));
        assert_approx(signals.ath_performance, 1.0);
        assert_approx(signals.cbb_performance, 0.9);

        tracker.record_month(-0.5, 100.0);
        let signals = tracker.signals(100.0);
        assert_approx(signals.ath_performance, 0.5);
        assert_approx(signals.market_performance, 0.5 * 1.01_f64.powi(12) / 1.01);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_runs_respect_failure_floor_and_length_invariants(
            current_age in 40u32..86,
            retire_offset in 0u32..12,
            sb in 0u32..400_000,
            cbb in 0u32..1_500_000,
            tba in 0u32..1_500_000,
            tda in 0u32..1_500_000,
            needs in 10_000u32..150_000,
            wants in 0u32..80_000,
            growth_bp in -6000i32..1500,
            inflation_bp in 0u32..800,
            tax_bp in 0u32..4500
        ) {
            let mut config = sample_config();
            config.current_age = current_age;
            config.retirement_age = current_age + retire_offset;
            config.spousal.spouse_age = current_age.saturating_sub(2);
            config.portfolio = Portfolio::new(sb as f64, cbb as f64, tba as f64, tda as f64, 0.0);
            config.expenses.needs = needs as f64;
            config.expenses.wants = wants as f64;
            config.rates.post_retirement_growth = growth_bp as f64 / 10_000.0;
            config.rates.inflation = inflation_bp as f64 / 10_000.0;
            config.rates.income_tax = tax_bp as f64 / 10_000.0;

            let result = run_simulation(&config, &[], &[]);
            let max_years = (85 - current_age + 1) as usize;

            prop_assert!(result.yearly_results.len() <= max_years);
            prop_assert_eq!(result.yearly_results.len() == max_years, result.summary.is_success || result.yearly_results.last().map(|y| y.age) == Some(85));
            prop_assert_eq!(result.quarterly_results.len(), result.yearly_results.len() * 4);

            let mut failed = false;
            for quarter in &result.quarterly_results {
                if failed {
                    prop_assert!(quarter.metrics.is_failure);
                }
                failed = quarter.metrics.is_failure;
            }

            let mut prev_cap = f64::INFINITY;
            let mut failed = false;
            for (idx, year) in result.yearly_results.iter().enumerate() {
                if failed {
                    prop_assert!(year.metrics.is_failure);
                }
                failed = year.metrics.is_failure;
                if failed {
                    prop_assert_eq!(Some(year.year), result.summary.failure_year);
                    prop_assert_eq!(idx + 1, result.yearly_results.len());
                }
                prop_assert!(year.metrics.cbb_cap <= prev_cap);
                prev_cap = year.metrics.cbb_cap;

                if !year.metrics.is_failure {
                    let b = &year.balances;
                    let tolerance = (year.cash_flow.needs + year.cash_flow.wants
                        + year.cash_flow.healthcare + year.cash_flow.property_tax) / 12.0;
                    prop_assert!(b.cbb >= 0.0 && b.tba >= 0.0 && b.tda >= 0.0 && b.tfa >= 0.0);
                    prop_assert!(b.sb >= -tolerance - 1e-9);
                }
            }

            prop_assert_eq!(result.summary.is_success, result.summary.failure_year.is_none());
        }

        #[test]
        fn prop_successful_years_conserve_total(
            sb in 0u32..400_000,
            cbb in 0u32..1_500_000,
            tba in 0u32..1_500_000,
            tda in 0u32..1_500_000,
            growth_bp in -1000i32..1500
        ) {
            let mut config = sample_config();
            config.portfolio = Portfolio::new(sb as f64, cbb as f64, tba as f64, tda as f64, 0.0);
            config.rates.post_retirement_growth = growth_bp as f64 / 10_000.0;

            let result = run_simulation(&config, &[], &[]);
            let mut start = config.portfolio;
            for year in &result.yearly_results {
                let expected = start.total() + year.cash_flow.total_income - year.cash_flow.total_expenses;
                prop_assert!((year.balances.total() - expected).abs() <= 1e-2);
                start = year.balances;
            }
        }
    }
}
