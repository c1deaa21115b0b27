use chrono::NaiveDate;
use log::warn;

/// Per-run daily loss limit. Owned by the caller and passed into each evaluation so that
/// independent runs never share halt state.
#[derive(Debug, Clone)]
pub struct DailyLossGuard {
    max_daily_loss: Option<f64>,
    day: Option<NaiveDate>,
    realized_today: f64,
    halted: bool,
}

impl DailyLossGuard {
    pub fn new(max_daily_loss: Option<f64>) -> Self {
        Self {
            max_daily_loss: max_daily_loss.filter(|limit| limit.is_finite() && *limit > 0.0),
            day: None,
            realized_today: 0.0,
            halted: false,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn start_day(&mut self, date: NaiveDate) {
        if self.day != Some(date) {
            self.day = Some(date);
            self.realized_today = 0.0;
            self.halted = false;
        }
    }

    pub fn record_realized(&mut self, pnl: f64) {
        if !pnl.is_finite() {
            return;
        }
        self.realized_today += pnl;
        if let Some(limit) = self.max_daily_loss {
            if !self.halted && -self.realized_today >= limit {
                self.halted = true;
                warn!(
                    "Daily loss limit reached ({:.2} >= {:.2}); halting new entries{}",
                    -self.realized_today,
                    limit,
                    self.day
                        .map(|day| format!(" for {}", day))
                        .unwrap_or_default()
                );
            }
        }
    }

    pub fn allows_entry(&self) -> bool {
        !self.halted
    }

    pub fn realized_today(&self) -> f64 {
        self.realized_today
    }
}
