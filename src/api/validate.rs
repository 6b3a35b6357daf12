use thiserror::Error;

use crate::core::{END_AGE, SimulationConfig};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("retirementAge ({retirement_age}) must not be before currentAge ({current_age})")]
    RetirementBeforeCurrentAge { current_age: u32, retirement_age: u32 },
    #[error("currentAge ({0}) must be at most 85")]
    CurrentAgePastHorizon(u32),
    #[error("spousal.spouseAge ({0}) must be at most 85")]
    SpouseAgePastHorizon(u32),
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
    #[error("{field} must not be negative (got {value:.2})")]
    Negative { field: &'static str, value: f64 },
    #[error("rates.incomeTax must be between 0 and 1 (got {0:.4})")]
    IncomeTaxOutOfRange(f64),
    #[error("{field} must be greater than -1 (got {value:.4})")]
    RateAtOrBelowTotalLoss { field: &'static str, value: f64 },
}

pub fn validate_config(config: &SimulationConfig) -> Result<(), ConfigError> {
    if config.retirement_age < config.current_age {
        return Err(ConfigError::RetirementBeforeCurrentAge {
            current_age: config.current_age,
            retirement_age: config.retirement_age,
        });
    }
    if config.current_age > END_AGE {
        return Err(ConfigError::CurrentAgePastHorizon(config.current_age));
    }
    if config.spousal.spouse_age > END_AGE {
        return Err(ConfigError::SpouseAgePastHorizon(config.spousal.spouse_age));
    }

    for (field, value) in money_fields(config) {
        check_finite(field, value)?;
        if value < 0.0 {
            return Err(ConfigError::Negative { field, value });
        }
    }

    let rates = &config.rates;
    for (field, value) in [
        ("rates.inflation", rates.inflation),
        ("rates.preRetirementGrowth", rates.pre_retirement_growth),
        ("rates.postRetirementGrowth", rates.post_retirement_growth),
    ] {
        check_finite(field, value)?;
        if value <= -1.0 {
            return Err(ConfigError::RateAtOrBelowTotalLoss { field, value });
        }
    }
    for (field, value) in [
        ("rates.bondYield", rates.bond_yield),
        ("rates.hysaRate", rates.hysa_rate),
    ] {
        check_finite(field, value)?;
    }

    check_finite("rates.incomeTax", rates.income_tax)?;
    if !(0.0..=1.0).contains(&rates.income_tax) {
        return Err(ConfigError::IncomeTaxOutOfRange(rates.income_tax));
    }
    Ok(())
}

pub fn validate_series(field: &'static str, series: &[f64]) -> Result<(), ConfigError> {
    for &value in series {
        check_finite(field, value)?;
        if value <= -1.0 {
            return Err(ConfigError::RateAtOrBelowTotalLoss { field, value });
        }
    }
    Ok(())
}

fn check_finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { field })
    }
}

fn money_fields(config: &SimulationConfig) -> Vec<(&'static str, f64)> {
    let p = &config.portfolio;
    let e = &config.expenses;
    let s = &config.strategy;
    let mut fields = vec![
        ("salary", config.salary),
        ("portfolio.sb", p.sb),
        ("portfolio.cbb", p.cbb),
        ("portfolio.tba", p.tba),
        ("portfolio.tda", p.tda),
        ("portfolio.tfa", p.tfa),
        ("spousal.lowerEarner.annualBenefit", config.spousal.lower_earner.annual_benefit),
        ("spousal.higherEarner.annualBenefit", config.spousal.higher_earner.annual_benefit),
        ("expenses.needs", e.needs),
        ("expenses.wants", e.wants),
        ("expenses.propertyTax", e.property_tax),
        ("expenses.healthcarePreRetirement", e.healthcare_pre_retirement),
        (
            "expenses.healthcarePostRetirementPreMedicare",
            e.healthcare_post_retirement_pre_medicare,
        ),
        ("expenses.healthcareMedicare", e.healthcare_medicare),
        ("contributions.annual401k", config.contributions.annual_401k),
        ("contributions.annualTba", config.contributions.annual_tba),
        ("strategy.initialTdaWithdrawal", s.initial_tda_withdrawal),
        ("strategy.rothConversionAmount", s.roth_conversion_amount),
    ];
    if let Some(amount) = s.roth_conversion_pre_retirement {
        fields.push(("strategy.rothConversionPreRetirement", amount));
    }
    if let Some(amount) = s.roth_conversion_post_retirement {
        fields.push(("strategy.rothConversionPostRetirement", amount));
    }
    fields
}
