//! Slot and storage budget walk.

/// Budgets available to one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Storage left in MB. Starts from what the accountant reports.
    pub storage_mb: i64,
    /// Download slots left. Slow torrents do not use one.
    pub slots: i64,
}

/// What one candidate asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demand {
    /// Storage still to be written: total size minus what is already on disk.
    pub mb: i64,
    pub slow: bool,
}

impl Budget {
    /// Take `demand` if both budgets stay non-negative. Returns whether it fit.
    pub fn try_take(&mut self, demand: Demand) -> bool {
        let storage = self.storage_mb - demand.mb;
        let slots = if demand.slow { self.slots } else { self.slots - 1 };
        if storage < 0 || slots < 0 {
            return false;
        }
        self.storage_mb = storage;
        self.slots = slots;
        true
    }
}

/// Walk `demands` in priority order; `true` for each one that fits.
/// A candidate that does not fit is skipped and the walk continues.
pub fn allocate(mut budget: Budget, demands: &[Demand]) -> Vec<bool> {
    demands.iter().map(|d| budget.try_take(*d)).collect()
}
