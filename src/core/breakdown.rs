use std::collections::BTreeMap;

use super::engine::{
    TBA_TAXABLE_SHARE, inflation_adjustment, is_working, tax_divisor, taxable_income,
};
use super::portfolio::Portfolio;
use super::strategy::{
    ATH_THRESHOLD, CBB_PERFORMANCE_THRESHOLD, MARKET_UP_THRESHOLD, base_cap_aig, cap_aig,
    cbb_cap_for_age, quarterly_tda_target, sb_cap,
};
use super::types::{
    BreakdownSection, CashFlow, ComputationBreakdown, ComputationStep, MEDICARE_AGE,
    SimulationConfig, YearlyResult,
};

pub fn generate_breakdown(
    config: &SimulationConfig,
    target_age: u32,
    current: &YearlyResult,
    previous: Option<&YearlyResult>,
) -> ComputationBreakdown {
    let ctx = YearContext::new(config, target_age, current, previous);

    let mut sections = vec![
        inflation_section(&ctx),
        balances_section(&ctx),
        expenses_section(&ctx),
        income_section(&ctx),
        income_gap_section(&ctx),
        taxable_income_section(&ctx),
    ];
    if !ctx.working {
        sections.push(strategy_section(&ctx));
    }
    sections.push(spend_bucket_section(&ctx));
    sections.push(caps_section(&ctx));

    ComputationBreakdown {
        year: current.year,
        age: target_age,
        sections,
    }
}

struct YearContext<'a> {
    config: &'a SimulationConfig,
    age: u32,
    offset: u32,
    factor: f64,
    working: bool,
    start: Portfolio,
    current: &'a YearlyResult,
    previous: Option<&'a YearlyResult>,
    estimated_tax: f64,
}

impl<'a> YearContext<'a> {
    fn new(
        config: &'a SimulationConfig,
        age: u32,
        current: &'a YearlyResult,
        previous: Option<&'a YearlyResult>,
    ) -> Self {
        let offset = age.saturating_sub(config.current_age);
        let start = previous.map_or(config.portfolio, |p| p.balances);
        let cf = &current.cash_flow;
        let rate = config.rates.income_tax;
        // The first year has no realized income to carry, so it estimates from opening balances.
        let estimated_tax = match previous {
            Some(prior) => taxable_income(&prior.cash_flow) * rate,
            None => {
                (cf.salary
                    + cf.social_security
                    + start.sb.max(0.0) * config.rates.hysa_rate
                    + start.cbb.max(0.0) * config.rates.bond_yield
                    + cf.roth_conversion)
                    * rate
            }
        };
        Self {
            config,
            age,
            offset,
            factor: inflation_adjustment(config, offset),
            working: is_working(config, age),
            start,
            current,
            previous,
            estimated_tax,
        }
    }

    fn cash_flow(&self) -> &CashFlow {
        &self.current.cash_flow
    }

    fn gross_expenses(&self) -> f64 {
        let cf = self.cash_flow();
        cf.needs + cf.wants + cf.healthcare + cf.property_tax
    }
}

fn step(
    label: &str,
    formula: &str,
    values: &[(&str, f64)],
    result: f64,
    explanation: &str,
) -> ComputationStep {
    ComputationStep {
        label: label.to_string(),
        formula: formula.to_string(),
        values: values
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect::<BTreeMap<_, _>>(),
        result,
        explanation: explanation.to_string(),
    }
}

fn section(title: &str, steps: Vec<ComputationStep>) -> BreakdownSection {
    BreakdownSection {
        title: title.to_string(),
        steps,
    }
}

fn inflation_section(ctx: &YearContext<'_>) -> BreakdownSection {
    let rate = ctx.config.rates.inflation;
    section(
        "Inflation Adjustment",
        vec![
            step(
                "Inflation Rate",
                "rates.inflation",
                &[("inflation", rate)],
                rate,
                "Annual inflation applied to every dollar figure in the config.",
            ),
            step(
                "Years from Start",
                "age - currentAge",
                &[
                    ("age", ctx.age as f64),
                    ("currentAge", ctx.config.current_age as f64),
                ],
                ctx.offset as f64,
                "The first simulated year is not inflated.",
            ),
            step(
                "Cumulative Inflation Factor",
                "(1 + inflation) ^ years",
                &[("inflation", rate), ("years", ctx.offset as f64)],
                ctx.factor,
                "Multiplier applied to base expenses, salary, benefits and Roth amounts.",
            ),
        ],
    )
}

fn balances_section(ctx: &YearContext<'_>) -> BreakdownSection {
    let b = &ctx.current.balances;
    let mut steps = Vec::new();
    if ctx.previous.is_some() {
        steps.push(step(
            "Prior Year Spend Bucket",
            "SB at end of prior year",
            &[("sb", ctx.start.sb)],
            ctx.start.sb,
            "Opening SB balance for this year.",
        ));
    }
    steps.extend([
        step(
            "Spend Bucket (SB)",
            "SB",
            &[("sb", b.sb)],
            b.sb,
            "Cash for expenses, earning the HYSA rate.",
        ),
        step(
            "Crash Buffer Bucket (CBB)",
            "CBB",
            &[("cbb", b.cbb)],
            b.cbb,
            "Bond reserve tapped when markets are down.",
        ),
        step(
            "Taxable Brokerage (TBA)",
            "TBA",
            &[("tba", b.tba)],
            b.tba,
            "Equities; half of each withdrawal is taxable.",
        ),
        step(
            "Tax-Deferred Account (TDA)",
            "TDA",
            &[("tda", b.tda)],
            b.tda,
            "Equities; withdrawals and Roth conversions are fully taxable.",
        ),
        step(
            "Tax-Free Account (TFA)",
            "TFA",
            &[("tfa", b.tfa)],
            b.tfa,
            "Equities funded by Roth conversions; never withdrawn.",
        ),
        step(
            "Total Portfolio",
            "SB + CBB + TBA + TDA + TFA",
            &[
                ("sb", b.sb),
                ("cbb", b.cbb),
                ("tba", b.tba),
                ("tda", b.tda),
                ("tfa", b.tfa),
            ],
            b.total(),
            "End-of-year balance across all five accounts.",
        ),
    ]);
    section("Account Balances (End of Year)", steps)
}

fn expenses_section(ctx: &YearContext<'_>) -> BreakdownSection {
    let config = ctx.config;
    let cf = ctx.cash_flow();
    let mut steps = vec![step(
        "Needs (Essential Expenses)",
        "needs × inflationFactor",
        &[("needs", config.expenses.needs), ("inflationFactor", ctx.factor)],
        config.expenses.needs * ctx.factor,
        "Essential spending grows with inflation.",
    )];

    if ctx.age < config.retirement_age {
        let fixed = cf.needs
            + cf.healthcare
            + cf.property_tax
            + ctx.estimated_tax
            + cf.roth_conversion
            + cf.contribution_401k
            + cf.contribution_tba;
        steps.push(step(
            "Wants Calculation (Pre-Retirement)",
            "max(0, salary - (needs + healthcare + propertyTax + estimatedTax + rothConversion + 401k + tbaContribution))",
            &[
                ("salary", cf.salary),
                ("needs", cf.needs),
                ("healthcare", cf.healthcare),
                ("propertyTax", cf.property_tax),
                ("estimatedTax", ctx.estimated_tax),
                ("rothConversion", cf.roth_conversion),
                ("contribution401k", cf.contribution_401k),
                ("contributionTba", cf.contribution_tba),
            ],
            (cf.salary - fixed).max(0.0),
            "While working, discretionary spending is whatever salary leaves after fixed outflows.",
        ));
    } else {
        steps.push(step(
            "Wants (Discretionary)",
            "wants × inflationFactor",
            &[("wants", config.expenses.wants), ("inflationFactor", ctx.factor)],
            config.expenses.wants * ctx.factor,
            "Discretionary spending grows with inflation.",
        ));
    }

    let (bracket, base_healthcare) = if ctx.age < config.retirement_age {
        ("Pre-Retirement", config.expenses.healthcare_pre_retirement)
    } else if ctx.age < MEDICARE_AGE {
        (
            "Post-Retirement, Pre-Medicare",
            config.expenses.healthcare_post_retirement_pre_medicare,
        )
    } else {
        ("Medicare", config.expenses.healthcare_medicare)
    };
    steps.extend([
        step(
            &format!("Healthcare ({bracket})"),
            "healthcare × inflationFactor",
            &[("healthcare", base_healthcare), ("inflationFactor", ctx.factor)],
            base_healthcare * ctx.factor,
            "Bracket chosen by age against retirement and Medicare ages.",
        ),
        step(
            "Property Tax",
            "propertyTax × inflationFactor",
            &[
                ("propertyTax", config.expenses.property_tax),
                ("inflationFactor", ctx.factor),
            ],
            config.expenses.property_tax * ctx.factor,
            "Grows with inflation.",
        ),
        step(
            "Income Tax",
            "taxableIncome × incomeTax",
            &[
                ("taxableIncome", taxable_income(cf)),
                ("incomeTax", config.rates.income_tax),
            ],
            cf.income_tax,
            "Final liability after the year-end true-up.",
        ),
        step(
            "Total Expenses",
            "needs + wants + healthcare + propertyTax + incomeTax",
            &[
                ("needs", cf.needs),
                ("wants", cf.wants),
                ("healthcare", cf.healthcare),
                ("propertyTax", cf.property_tax),
                ("incomeTax", cf.income_tax),
            ],
            ctx.gross_expenses() + cf.income_tax,
            "All spending debited from SB this year.",
        ),
    ]);
    section("Expenses", steps)
}

fn income_section(ctx: &YearContext<'_>) -> BreakdownSection {
    let cf = ctx.cash_flow();
    section(
        "Income Sources",
        vec![
            step(
                "Salary",
                "salary × inflationFactor",
                &[("salary", ctx.config.salary), ("inflationFactor", ctx.factor)],
                cf.salary,
                if ctx.working {
                    "Paid monthly; contributions are taken out before the rest reaches SB."
                } else {
                    "No salary once retired."
                },
            ),
            step(
                "Interest (from SB)",
                "Σ monthly SB × hysaRate / 12",
                &[("hysaRate", ctx.config.rates.hysa_rate)],
                cf.interest,
                "Accrued monthly, credited to SB at each quarter start.",
            ),
            step(
                "Dividends (from CBB)",
                "Σ monthly CBB × bondYield / 12",
                &[("bondYield", ctx.config.rates.bond_yield)],
                cf.dividends,
                "Accrued monthly, credited to SB at each quarter start.",
            ),
            step(
                "Social Security",
                "benefits × inflationFactor, spousal step-up once both claim",
                &[
                    ("lowerEarner", ctx.config.spousal.lower_earner.annual_benefit),
                    ("higherEarner", ctx.config.spousal.higher_earner.annual_benefit),
                    ("inflationFactor", ctx.factor),
                ],
                cf.social_security,
                "Deposited to SB monthly.",
            ),
            step(
                "TBA Withdrawal",
                "Σ quarterly TBA draws",
                &[("tbaWithdrawal", cf.tba_withdrawal)],
                cf.tba_withdrawal,
                "Transfer, not income; half of it is taxable.",
            ),
            step(
                "TDA Withdrawal (Total)",
                "spend + Roth",
                &[
                    ("spend", cf.tda_withdrawal_spend),
                    ("roth", cf.tda_withdrawal_roth),
                ],
                cf.tda_withdrawal,
                "Transfer, not income; fully taxable.",
            ),
            step(
                "Roth Conversion",
                "rothAmount × inflationFactor / 4 per quarter, capped by TDA",
                &[("rothConversion", cf.roth_conversion)],
                cf.roth_conversion,
                "Moves TDA to TFA from the second simulated year.",
            ),
            step(
                "Market Growth",
                "Σ monthly growth on TBA + TDA + TFA",
                &[("marketGrowth", cf.market_growth)],
                cf.market_growth,
                "Equity growth credited inside the accounts.",
            ),
            step(
                "Total Income",
                "salary + interest + dividends + socialSecurity + marketGrowth",
                &[
                    ("salary", cf.salary),
                    ("interest", cf.interest),
                    ("dividends", cf.dividends),
                    ("socialSecurity", cf.social_security),
                    ("marketGrowth", cf.market_growth),
                ],
                cf.salary + cf.interest + cf.dividends + cf.social_security + cf.market_growth,
                "External inflows only; transfers between accounts are excluded.",
            ),
        ],
    )
}

fn income_gap_section(ctx: &YearContext<'_>) -> BreakdownSection {
    let cf = ctx.cash_flow();
    let gap_expenses = ctx.gross_expenses() + cf.income_tax;
    let passive = cf.interest + cf.dividends + cf.social_security;
    section(
        "Income Gap Calculation",
        vec![
            step(
                "Gap Expenses (Total for Gap)",
                "needs + wants + healthcare + propertyTax + incomeTax",
                &[
                    ("needs", cf.needs),
                    ("wants", cf.wants),
                    ("healthcare", cf.healthcare),
                    ("propertyTax", cf.property_tax),
                    ("incomeTax", cf.income_tax),
                ],
                gap_expenses,
                "Spending the portfolio has to cover.",
            ),
            step(
                "Passive Income",
                "interest + dividends + socialSecurity",
                &[
                    ("interest", cf.interest),
                    ("dividends", cf.dividends),
                    ("socialSecurity", cf.social_security),
                ],
                passive,
                "Income that arrives without selling assets.",
            ),
            step(
                "Annual Income Gap (AIG)",
                "max(0, gapExpenses - passiveIncome)",
                &[("gapExpenses", gap_expenses), ("passiveIncome", passive)],
                (gap_expenses - passive).max(0.0),
                "Shortfall refilled from equities or the crash buffer.",
            ),
        ],
    )
}

fn taxable_income_section(ctx: &YearContext<'_>) -> BreakdownSection {
    let cf = ctx.cash_flow();
    let rate = ctx.config.rates.income_tax;
    let taxable = taxable_income(cf);
    let final_tax = taxable * rate;

    let mut steps = vec![
        step("Salary (100% taxable)", "salary", &[("salary", cf.salary)], cf.salary, ""),
        step(
            "Interest (100% taxable)",
            "interest",
            &[("interest", cf.interest)],
            cf.interest,
            "",
        ),
        step(
            "Dividends (100% taxable)",
            "dividends",
            &[("dividends", cf.dividends)],
            cf.dividends,
            "",
        ),
        step(
            "Social Security (100% taxable)",
            "socialSecurity",
            &[("socialSecurity", cf.social_security)],
            cf.social_security,
            "",
        ),
        step(
            "TDA Withdrawal (100% taxable)",
            "tdaWithdrawalSpend",
            &[("tdaWithdrawalSpend", cf.tda_withdrawal_spend)],
            cf.tda_withdrawal_spend,
            "",
        ),
        step(
            "Roth Conversion (100% taxable)",
            "tdaWithdrawalRoth",
            &[("tdaWithdrawalRoth", cf.tda_withdrawal_roth)],
            cf.tda_withdrawal_roth,
            "",
        ),
        step(
            "TBA Withdrawal (50% taxable)",
            "tbaWithdrawal × 0.5",
            &[("tbaWithdrawal", cf.tba_withdrawal)],
            cf.tba_withdrawal * TBA_TAXABLE_SHARE,
            "Half of a brokerage sale is treated as gains.",
        ),
        step(
            "Total Taxable Income (This Year)",
            "sum of taxable components",
            &[("taxableIncome", taxable)],
            taxable,
            "",
        ),
    ];

    if ctx.previous.is_some() {
        steps.push(step(
            "This Year's Estimated Tax (from Prior Year)",
            "priorTaxableIncome × incomeTax",
            &[("incomeTax", rate)],
            ctx.estimated_tax,
            "Deducted from SB in twelve equal parts.",
        ));
    } else {
        steps.push(step(
            "This Year's Estimated Tax",
            "(salary + socialSecurity + SB₀ × hysaRate + CBB₀ × bondYield + rothConversion) × incomeTax",
            &[
                ("salary", cf.salary),
                ("socialSecurity", cf.social_security),
                ("sb", ctx.start.sb),
                ("cbb", ctx.start.cbb),
                ("rothConversion", cf.roth_conversion),
                ("incomeTax", rate),
            ],
            ctx.estimated_tax,
            "No prior year exists, so the estimate uses opening balances.",
        ));
    }

    steps.extend([
        step(
            "This Year's Tax Bill",
            "taxableIncome × incomeTax",
            &[("taxableIncome", taxable), ("incomeTax", rate)],
            final_tax,
            "Final liability for the year.",
        ),
        step(
            "Year-End True-Up",
            "taxBill - estimatedTax",
            &[("taxBill", final_tax), ("estimatedTax", ctx.estimated_tax)],
            final_tax - ctx.estimated_tax,
            "Positive amounts are debited from SB, negative amounts refunded.",
        ),
        step(
            "Estimated Tax (Next Year)",
            "taxableIncome × incomeTax",
            &[("taxableIncome", taxable), ("incomeTax", rate)],
            final_tax,
            "Next year's monthly deductions are based on this year's realized income.",
        ),
    ]);
    section("Taxable Income Calculation", steps)
}

fn strategy_section(ctx: &YearContext<'_>) -> BreakdownSection {
    let config = ctx.config;
    let cf = ctx.cash_flow();
    let gap_expenses = ctx.gross_expenses() + ctx.estimated_tax;
    let est_passive = ctx.start.sb.max(0.0) * config.rates.hysa_rate
        + ctx.start.cbb.max(0.0) * config.rates.bond_yield
        + cf.social_security;
    let divisor = tax_divisor(config);
    let aig = (gap_expenses - est_passive).max(0.0) / divisor;
    let strategy_cap_aig = cap_aig(
        cf.needs,
        cf.wants,
        cf.healthcare,
        cf.property_tax,
        ctx.estimated_tax,
    );
    let base = base_cap_aig(config);

    section(
        "Spending Strategy Parameters",
        vec![
            step(
                "Annual Income Gap (Strategy)",
                "max(0, gapExpenses - estimatedPassive) / max(0.01, 1 - incomeTax)",
                &[
                    ("gapExpenses", gap_expenses),
                    ("estimatedPassive", est_passive),
                    ("taxDivisor", divisor),
                ],
                aig,
                "Grossed up so that refills from taxable accounts cover their own tax.",
            ),
            step(
                "Quarterly AIG (QAIG)",
                "AIG / 4",
                &[("aig", aig)],
                aig / 4.0,
                "",
            ),
            step(
                "Cap AIG (for SB/CBB caps)",
                "needs + 0.5 × wants + healthcare + propertyTax + estimatedTax",
                &[
                    ("needs", cf.needs),
                    ("wants", cf.wants),
                    ("healthcare", cf.healthcare),
                    ("propertyTax", cf.property_tax),
                    ("estimatedTax", ctx.estimated_tax),
                ],
                strategy_cap_aig,
                "Only half of wants counts toward the caps.",
            ),
            step(
                "SB Cap",
                "2 × capAIG",
                &[("capAig", strategy_cap_aig)],
                sb_cap(strategy_cap_aig),
                "Refills stop once SB reaches this level.",
            ),
            step(
                "CBB Cap",
                "baseCapAIG × multiple, stepping down at 65, 70, 75, 80 and 85",
                &[("baseCapAig", base), ("age", ctx.age as f64)],
                cbb_cap_for_age(base, ctx.age),
                "Base cap AIG uses uninflated expenses.",
            ),
            step(
                "Market Threshold (vs 12mo prior)",
                "index / index 12 months ago",
                &[("threshold", MARKET_UP_THRESHOLD)],
                MARKET_UP_THRESHOLD,
                "Equities are tapped only at or above this ratio.",
            ),
            step(
                "ATH Threshold",
                "index / all-time high",
                &[("threshold", ATH_THRESHOLD)],
                ATH_THRESHOLD,
                "Equities are tapped only at or above this ratio.",
            ),
            step(
                "CBB Performance Threshold",
                "CBB / CBB 12 months ago",
                &[("threshold", CBB_PERFORMANCE_THRESHOLD)],
                CBB_PERFORMANCE_THRESHOLD,
                "Reported with each down-market refill; the crash buffer is drawn either way.",
            ),
            step(
                "Quarterly TDA Withdrawal Target (QTDAW)",
                "(initialTdaWithdrawal + rothConversionAmount) × inflationFactor / 4",
                &[
                    ("initialTdaWithdrawal", config.strategy.initial_tda_withdrawal),
                    ("rothConversionAmount", config.strategy.roth_conversion_amount),
                    ("inflationFactor", ctx.factor),
                ],
                quarterly_tda_target(config, ctx.factor),
                "Budget for TDA draws each quarter; TBA covers the rest.",
            ),
        ],
    )
}

fn spend_bucket_section(ctx: &YearContext<'_>) -> BreakdownSection {
    let cf = ctx.cash_flow();
    let end_sb = ctx.current.balances.sb;
    let net_salary = cf.salary - cf.contribution_401k - cf.contribution_tba;
    let known_inflows = net_salary + cf.interest + cf.dividends + cf.social_security;
    let known_outflows = ctx.gross_expenses() + cf.income_tax;
    let net_change = cf.sb_deposit - cf.sb_withdrawal;
    let strategy_transfers = (end_sb - ctx.start.sb) - (known_inflows - known_outflows);

    section(
        "Spend Bucket Operations",
        vec![
            step(
                "SB Starting Balance (Beginning of Year)",
                "SB at start of year",
                &[("sb", ctx.start.sb)],
                ctx.start.sb,
                "",
            ),
            step(
                "SB Deposit: Salary (NET, after contributions)",
                "salary - 401k - tbaContribution",
                &[
                    ("salary", cf.salary),
                    ("contribution401k", cf.contribution_401k),
                    ("contributionTba", cf.contribution_tba),
                ],
                net_salary,
                "",
            ),
            step(
                "SB Deposit: Interest (HYSA)",
                "interest",
                &[("interest", cf.interest)],
                cf.interest,
                "Credited at quarter starts.",
            ),
            step(
                "SB Deposit: Dividends (from CBB)",
                "dividends",
                &[("dividends", cf.dividends)],
                cf.dividends,
                "Credited at quarter starts.",
            ),
            step(
                "SB Deposit: Social Security",
                "socialSecurity",
                &[("socialSecurity", cf.social_security)],
                cf.social_security,
                "Credited monthly.",
            ),
            step(
                "SB Deposit: Strategy Transfers",
                "(endSB - startSB) - (inflows - outflows)",
                &[
                    ("endSb", end_sb),
                    ("startSb", ctx.start.sb),
                    ("inflows", known_inflows),
                    ("outflows", known_outflows),
                ],
                strategy_transfers,
                "Quarterly refills from TDA, TBA or CBB.",
            ),
            step(
                "SB Withdrawal: Expenses",
                "needs + wants + healthcare + propertyTax",
                &[
                    ("needs", cf.needs),
                    ("wants", cf.wants),
                    ("healthcare", cf.healthcare),
                    ("propertyTax", cf.property_tax),
                ],
                ctx.gross_expenses(),
                "Debited in twelve equal monthly amounts.",
            ),
            step(
                "SB Withdrawal: Income Tax",
                "estimatedTax + trueUp",
                &[("incomeTax", cf.income_tax)],
                cf.income_tax,
                "Monthly estimates plus the year-end adjustment.",
            ),
            step(
                "Total SB Deposits",
                "sbDeposit",
                &[("sbDeposit", cf.sb_deposit)],
                cf.sb_deposit,
                "",
            ),
            step(
                "Total SB Withdrawals",
                "sbWithdrawal",
                &[("sbWithdrawal", cf.sb_withdrawal)],
                cf.sb_withdrawal,
                "",
            ),
            step(
                "Net SB Change",
                "deposits - withdrawals",
                &[("sbDeposit", cf.sb_deposit), ("sbWithdrawal", cf.sb_withdrawal)],
                net_change,
                "",
            ),
            step(
                "SB Ending Balance (End of Year)",
                "startSB + netChange",
                &[("startSb", ctx.start.sb), ("netChange", net_change)],
                ctx.start.sb + net_change,
                "Matches the recorded year-end SB balance.",
            ),
        ],
    )
}

fn caps_section(ctx: &YearContext<'_>) -> BreakdownSection {
    let cf = ctx.cash_flow();
    let b = &ctx.current.balances;
    let metrics = &ctx.current.metrics;
    let reported_cap_aig = cap_aig(
        cf.needs,
        cf.wants,
        cf.healthcare,
        cf.property_tax,
        cf.income_tax,
    );
    let ratio = |balance: f64, cap: f64| if cap > 0.0 { balance / cap } else { 0.0 };

    section(
        "Caps & Status",
        vec![
            step(
                "Cap AIG (50% Wants)",
                "needs + 0.5 × wants + healthcare + propertyTax + incomeTax",
                &[
                    ("needs", cf.needs),
                    ("wants", cf.wants),
                    ("healthcare", cf.healthcare),
                    ("propertyTax", cf.property_tax),
                    ("incomeTax", cf.income_tax),
                ],
                reported_cap_aig,
                "",
            ),
            step(
                "SB Cap",
                "2 × capAIG",
                &[("capAig", reported_cap_aig)],
                metrics.sb_cap,
                "",
            ),
            step(
                "SB vs Cap",
                "SB / sbCap",
                &[("sb", b.sb), ("sbCap", metrics.sb_cap)],
                ratio(b.sb, metrics.sb_cap),
                "",
            ),
            step(
                "CBB Cap",
                "baseCapAIG × multiple",
                &[("age", ctx.age as f64)],
                metrics.cbb_cap,
                "",
            ),
            step(
                "CBB vs Cap",
                "CBB / cbbCap",
                &[("cbb", b.cbb), ("cbbCap", metrics.cbb_cap)],
                ratio(b.cbb, metrics.cbb_cap),
                "",
            ),
            step(
                "Failure Status",
                "1 if any account breached its floor",
                &[("isFailure", if metrics.is_failure { 1.0 } else { 0.0 })],
                if metrics.is_failure { 1.0 } else { 0.0 },
                if metrics.is_failure {
                    "The portfolio failed in or before this year."
                } else {
                    "All accounts are within their floors."
                },
            ),
        ],
    )
}
