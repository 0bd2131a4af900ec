/// Point-in-time counters for a single map instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MapStats {
    /// Reads (`get`, `release`, `contains`) that found a live entry
    pub hits: u64,
    /// Reads that found nothing or an expired entry
    pub misses: u64,
    /// Completed `set` calls
    pub writes: u64,
    /// Expired entries removed as a side effect of a read
    pub lazy_evictions: u64,
    /// Expired entries removed by reclamation passes
    pub swept_evictions: u64,
    /// Completed reclamation passes
    pub sweeps: u64,
}

impl MapStats {
    pub fn evictions(&self) -> u64 {
        self.lazy_evictions + self.swept_evictions
    }

    /// Fraction of reads that hit, 0.0 when nothing was read yet
    pub fn hit_ratio(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            0.0
        } else {
            self.hits as f64 / reads as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let stats = MapStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_ratio(), 0.75);
        assert_eq!(MapStats::default().hit_ratio(), 0.0);
    }

    #[test]
    fn test_evictions_sums_both_paths() {
        let stats = MapStats {
            lazy_evictions: 2,
            swept_evictions: 5,
            ..Default::default()
        };
        assert_eq!(stats.evictions(), 7);
    }
}
