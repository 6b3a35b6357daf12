use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Account {
    SpendBucket,
    CrashBuffer,
    TaxableBrokerage,
    TaxDeferred,
    TaxFree,
}

impl Account {
    pub const ALL: [Account; 5] = [
        Account::SpendBucket,
        Account::CrashBuffer,
        Account::TaxableBrokerage,
        Account::TaxDeferred,
        Account::TaxFree,
    ];

    pub fn short_name(self) -> &'static str {
        match self {
            Account::SpendBucket => "sb",
            Account::CrashBuffer => "cbb",
            Account::TaxableBrokerage => "tba",
            Account::TaxDeferred => "tda",
            Account::TaxFree => "tfa",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub sb: f64,
    pub cbb: f64,
    pub tba: f64,
    pub tda: f64,
    pub tfa: f64,
}

impl Portfolio {
    pub fn new(sb: f64, cbb: f64, tba: f64, tda: f64, tfa: f64) -> Self {
        Self {
            sb,
            cbb,
            tba,
            tda,
            tfa,
        }
    }

    pub fn get(&self, account: Account) -> f64 {
        match account {
            Account::SpendBucket => self.sb,
            Account::CrashBuffer => self.cbb,
            Account::TaxableBrokerage => self.tba,
            Account::TaxDeferred => self.tda,
            Account::TaxFree => self.tfa,
        }
    }

    pub fn apply(&mut self, account: Account, delta: f64) {
        *self.slot_mut(account) += delta;
    }

    pub fn transfer(&mut self, from: Account, to: Account, amount: f64) {
        self.apply(from, -amount);
        self.apply(to, amount);
    }

    pub fn total(&self) -> f64 {
        self.sb + self.cbb + self.tba + self.tda + self.tfa
    }

    pub fn equities(&self) -> f64 {
        self.tba + self.tda + self.tfa
    }

    // SB is allowed to dip to -sb_tolerance to absorb monthly posting order.
    pub fn breached_floor(&self, sb_tolerance: f64) -> Option<Account> {
        if self.sb < -sb_tolerance {
            return Some(Account::SpendBucket);
        }
        Account::ALL[1..]
            .iter()
            .copied()
            .find(|&account| self.get(account) < 0.0)
    }

    fn slot_mut(&mut self, account: Account) -> &mut f64 {
        match account {
            Account::SpendBucket => &mut self.sb,
            Account::CrashBuffer => &mut self.cbb,
            Account::TaxableBrokerage => &mut self.tba,
            Account::TaxDeferred => &mut self.tda,
            Account::TaxFree => &mut self.tfa,
        }
    }
}
