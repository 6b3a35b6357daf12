use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::portfolio::Portfolio;

pub const END_AGE: u32 = 85;
pub const MEDICARE_AGE: u32 = 65;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyVariant {
    #[default]
    QuarterlyBucket,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub current_year: i32,
    pub current_age: u32,
    pub retirement_age: u32,
    pub salary: f64,
    pub portfolio: Portfolio,
    pub spousal: SpousalDetails,
    pub expenses: ExpenseConfig,
    pub contributions: ContributionConfig,
    pub rates: RateConfig,
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialSecurityDetails {
    pub claim_age: u32,
    pub annual_benefit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpousalDetails {
    pub spouse_age: u32,
    pub lower_earner: SocialSecurityDetails,
    pub higher_earner: SocialSecurityDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseConfig {
    pub needs: f64,
    pub wants: f64,
    pub property_tax: f64,
    pub healthcare_pre_retirement: f64,
    pub healthcare_post_retirement_pre_medicare: f64,
    pub healthcare_medicare: f64,
}

impl ExpenseConfig {
    pub fn healthcare_for_age(&self, age: u32, retirement_age: u32) -> f64 {
        if age < retirement_age {
            self.healthcare_pre_retirement
        } else if age < MEDICARE_AGE {
            self.healthcare_post_retirement_pre_medicare
        } else {
            self.healthcare_medicare
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionConfig {
    #[serde(rename = "annual401k")]
    pub annual_401k: f64,
    pub annual_tba: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateConfig {
    pub inflation: f64,
    pub pre_retirement_growth: f64,
    pub post_retirement_growth: f64,
    pub bond_yield: f64,
    pub hysa_rate: f64,
    pub income_tax: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    pub initial_tda_withdrawal: f64,
    #[serde(default)]
    pub roth_conversion_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roth_conversion_pre_retirement: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roth_conversion_post_retirement: Option<f64>,
    #[serde(default, rename = "type")]
    pub variant: StrategyVariant,
}

impl StrategyConfig {
    pub fn base_roth_conversion(&self, age: u32, retirement_age: u32) -> f64 {
        let scheduled = if age < retirement_age {
            self.roth_conversion_pre_retirement
        } else {
            self.roth_conversion_post_retirement
        };
        scheduled.unwrap_or(self.roth_conversion_amount)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlow {
    pub salary: f64,
    pub interest: f64,
    pub dividends: f64,
    pub social_security: f64,
    pub market_growth: f64,
    pub tba_withdrawal: f64,
    pub tda_withdrawal: f64,
    pub tda_withdrawal_spend: f64,
    pub tda_withdrawal_roth: f64,
    pub cbb_withdrawal: f64,
    pub sb_deposit: f64,
    pub sb_withdrawal: f64,
    pub roth_conversion: f64,
    #[serde(rename = "contribution401k")]
    pub contribution_401k: f64,
    pub contribution_tba: f64,
    pub total_income: f64,
    pub needs: f64,
    pub wants: f64,
    pub healthcare: f64,
    pub income_tax: f64,
    pub property_tax: f64,
    pub total_expenses: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub annual_income_gap: f64,
    pub income_gap_expenses: f64,
    pub income_gap_passive_income: f64,
    pub sb_cap: f64,
    pub cbb_cap: f64,
    pub is_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyResult {
    pub year: i32,
    pub age: u32,
    pub balances: Portfolio,
    pub cash_flow: CashFlow,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterlyResult {
    pub year: i32,
    pub quarter: u32,
    pub age: u32,
    pub balances: Portfolio,
    pub cash_flow: CashFlow,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub final_total_balance: f64,
    pub is_success: bool,
    pub failure_year: Option<i32>,
    pub total_dividends: f64,
    pub total_interest: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub config: SimulationConfig,
    pub yearly_results: Vec<YearlyResult>,
    pub quarterly_results: Vec<QuarterlyResult>,
    pub summary: Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputationStep {
    pub label: String,
    pub formula: String,
    pub values: BTreeMap<String, f64>,
    pub result: f64,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownSection {
    pub title: String,
    pub steps: Vec<ComputationStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputationBreakdown {
    pub year: i32,
    pub age: u32,
    pub sections: Vec<BreakdownSection>,
}
