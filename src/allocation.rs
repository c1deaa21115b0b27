use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAllocation {
    pub daily_allocation: f64,
    pub per_stock_allocation: f64,
}

/// Splits a fixed fraction of current buying power evenly across the day's picks.
#[derive(Debug, Clone, Copy)]
pub struct AllocationPlanner {
    daily_allocation_pct: f64,
}

impl AllocationPlanner {
    pub fn new(daily_allocation_pct: f64) -> Self {
        Self {
            daily_allocation_pct,
        }
    }

    /// `num_candidates` must be non-zero; callers skip allocation on empty days.
    pub fn allocate(&self, buying_power: f64, num_candidates: usize) -> DailyAllocation {
        debug_assert!(num_candidates > 0, "allocate called with zero candidates");
        let daily_allocation = buying_power * self.daily_allocation_pct;
        DailyAllocation {
            daily_allocation,
            per_stock_allocation: daily_allocation / num_candidates as f64,
        }
    }

    pub fn daily_allocation_pct(&self) -> f64 {
        self.daily_allocation_pct
    }
}
