use crate::models::SettledFunds;
use chrono::{Days, NaiveDate};
use log::debug;

/// Tolerance for float noise when comparing a cost against settled cash.
pub const CASH_EPSILON: f64 = 1e-6;

/// Settled cash plus sale proceeds that have not reached their settlement date.
#[derive(Debug, Clone)]
pub struct CapitalLedger {
    settled_cash: f64,
    pending: Vec<SettledFunds>,
    settlement_days: u32,
}

impl CapitalLedger {
    /// `initial_capital` must be finite and non-negative.
    pub fn new(initial_capital: f64, settlement_days: u32) -> Self {
        debug_assert!(
            initial_capital.is_finite() && initial_capital >= 0.0,
            "initial capital must be non-negative, got {}",
            initial_capital
        );
        Self {
            settled_cash: initial_capital,
            pending: Vec::new(),
            settlement_days,
        }
    }

    /// Merges every pending entry due on or before `date` into settled cash and returns the result.
    /// Merged entries are dropped, so repeated calls for the same date are no-ops.
    pub fn get_available_buying_power(&mut self, date: NaiveDate) -> f64 {
        let mut released = 0.0;
        self.pending.retain(|funds| {
            if funds.settlement_date <= date {
                released += funds.amount;
                false
            } else {
                true
            }
        });

        if released > 0.0 {
            debug!("Settled {:.2} on {}", released, date);
            self.settled_cash += released;
        }

        self.settled_cash
    }

    pub fn can_afford(&self, amount: f64) -> bool {
        amount.is_finite() && amount >= 0.0 && amount <= self.settled_cash + CASH_EPSILON
    }

    /// Callers must check `can_afford` first; overdrawing is a logic error.
    pub fn debit(&mut self, amount: f64) {
        assert!(
            self.can_afford(amount),
            "debit of {:.6} exceeds settled cash {:.6}",
            amount,
            self.settled_cash
        );
        self.settled_cash = (self.settled_cash - amount).max(0.0);
    }

    /// Proceeds are always deferred, even when `settlement_date` is today.
    pub fn credit_pending(&mut self, amount: f64, settlement_date: NaiveDate) {
        if !amount.is_finite() || amount <= 0.0 {
            return;
        }
        self.pending.push(SettledFunds {
            amount,
            settlement_date,
        });
    }

    pub fn settlement_date_for(&self, session_date: NaiveDate) -> NaiveDate {
        session_date
            .checked_add_days(Days::new(u64::from(self.settlement_days)))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn settled_cash(&self) -> f64 {
        self.settled_cash
    }

    pub fn unsettled_total(&self) -> f64 {
        self.pending.iter().map(|funds| funds.amount).sum()
    }

    pub fn pending(&self) -> &[SettledFunds] {
        &self.pending
    }

    pub fn settlement_days(&self) -> u32 {
        self.settlement_days
    }
}
