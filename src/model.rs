#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancerMetrics {
    pub workers: usize,
    pub submitted: u64,
    pub dispatched: u64,
    pub completed: u64,
}

impl BalancerMetrics {
    /// Запросы, отданные воркерам и еще не завершенные.
    pub fn in_flight(&self) -> u64 {
        self.dispatched.saturating_sub(self.completed)
    }

    /// Запросы, принятые во входную очередь, но еще не распределенные.
    pub fn queued(&self) -> u64 {
        self.submitted.saturating_sub(self.dispatched)
    }
}



/// Согласованный срез нагрузки, снятый циклом диспетчера.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSnapshot {
    /// Незавершенные запросы, индекс = `WorkerId`
    pub pending: Vec<usize>,
    pub dispatched: u64,
    pub completed: u64,
}

impl LoadSnapshot {
    pub fn total_pending(&self) -> usize {
        self.pending.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.pending.is_empty() {
            return 0.0;
        }
        self.total_pending() as f64 / self.pending.len() as f64
    }

    /// Дисперсия нагрузки по воркерам: E[x²] - E[x]².
    pub fn variance(&self) -> f64 {
        if self.pending.is_empty() {
            return 0.0;
        }
        let n = self.pending.len() as f64;
        let sum_sq: usize = self.pending.iter().map(|p| p * p).sum();
        let mean = self.mean();
        (sum_sq as f64 / n - mean * mean).max(0.0)
    }

    pub fn max(&self) -> usize {
        self.pending.iter().copied().max().unwrap_or(0)
    }

    pub fn min(&self) -> usize {
        self.pending.iter().copied().min().unwrap_or(0)
    }

    /// Разница между самым и наименее загруженным воркером.
    pub fn imbalance(&self) -> usize {
        self.max() - self.min()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_statistics() {
        let snapshot = LoadSnapshot {
            pending: vec![1, 4, 8, 7],
            dispatched: 30,
            completed: 10,
        };
        assert_eq!(snapshot.total_pending(), 20);
        assert_eq!(snapshot.mean(), 5.0);
        // (1 + 16 + 64 + 49) / 4 - 25 = 7.5
        assert!((snapshot.variance() - 7.5).abs() < 1e-9);
        assert_eq!(snapshot.imbalance(), 7);
    }

    #[test]
    fn empty_snapshot_is_zero() {
        let snapshot = LoadSnapshot {
            pending: Vec::new(),
            dispatched: 0,
            completed: 0,
        };
        assert_eq!(snapshot.mean(), 0.0);
        assert_eq!(snapshot.variance(), 0.0);
        assert_eq!(snapshot.imbalance(), 0);
    }

    #[test]
    fn metrics_derived_counts() {
        let metrics = BalancerMetrics {
            workers: 4,
            submitted: 12,
            dispatched: 10,
            completed: 7,
        };
        assert_eq!(metrics.in_flight(), 3);
        assert_eq!(metrics.queued(), 2);
    }
}
