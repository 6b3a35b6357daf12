mod breakdown;
mod engine;
mod portfolio;
mod strategy;
mod types;

pub use breakdown::generate_breakdown;
pub use engine::run_simulation;
pub use portfolio::{Account, Portfolio};
pub use types::{
    BreakdownSection, CashFlow, ComputationBreakdown, ComputationStep, ContributionConfig,
    END_AGE, ExpenseConfig, Metrics, QuarterlyResult, RateConfig, SimulationConfig,
    SimulationResult, SocialSecurityDetails, SpousalDetails, StrategyConfig, StrategyVariant,
    Summary, YearlyResult,
};

#[cfg(test)]
pub(crate) use engine::tests::sample_config;
