use super::config::AreaFilterConfig;
use super::constants::{FILTER_INVALID, INVALID_MASK, MIN_FILTER_COUNT, MODIFIED, REFERENCE};
use super::grid::{distance_meters, GridHeader};
use super::sounding::{BinCoord, StoredSounding};

/// Good/bad tallies of the area filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub good: u64,
    pub bad: u64,
    /// Bins left alone because a feature was close by
    pub protected_bins: u64,
}

impl FilterStats {
    pub fn add(&mut self, other: &FilterStats) {
        self.good += other.good;
        self.bad += other.bad;
        self.protected_bins += other.protected_bins;
    }

    pub fn bad_percent(&self) -> f64 {
        let total = self.good + self.bad;
        if total == 0 {
            0.0
        } else {
            self.bad as f64 / total as f64 * 100.0
        }
    }

    pub fn good_percent(&self) -> f64 {
        if self.good + self.bad == 0 {
            0.0
        } else {
            100.0 - self.bad_percent()
        }
    }
}

/// Statistical outlier filter over the soundings of one bin.
#[derive(Debug, Clone)]
pub struct AreaFilter {
    std_dev_multiplier: f64,
    feature_radius_meters: f64,
    features: Vec<[f64; 2]>,
}

impl AreaFilter {
    pub fn new(config: &AreaFilterConfig) -> Self {
        Self {
            std_dev_multiplier: config.std_dev_multiplier,
            feature_radius_meters: config.feature_radius_meters,
            features: config.features.clone(),
        }
    }

    /// Is there a feature within the exclusion radius of this bin's centre
    pub fn is_near_feature(&self, grid: &GridHeader, coord: &BinCoord) -> bool {
        let (lat, lon) = grid.bin_center(coord);
        self.features
            .iter()
            .any(|[f_lat, f_lon]| distance_meters(lat, lon, *f_lat, *f_lon) <= self.feature_radius_meters)
    }

    /// Invalidate outliers in one bin.
    ///
    /// Only valid, non-reference soundings are judged. A sounding is bad when it lies more
    /// than `std_dev_multiplier` standard deviations from the bin mean.
    pub fn apply(&self, soundings: &mut [StoredSounding]) -> FilterStats {
        let mut stats = FilterStats::default();
        let depths: Vec<f64> = soundings
            .iter()
            .filter(|s| is_candidate(s))
            .map(|s| s.depth as f64)
            .collect();
        if depths.len() < MIN_FILTER_COUNT {
            stats.good = depths.len() as u64;
            return stats;
        }
        let n = depths.len() as f64;
        let mean = depths.iter().sum::<f64>() / n;
        let std_dev = (depths.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
        let limit = self.std_dev_multiplier * std_dev;

        for s in soundings.iter_mut().filter(|s| is_candidate(s)) {
            if (s.depth as f64 - mean).abs() > limit {
                s.flags |= FILTER_INVALID | MODIFIED;
                stats.bad += 1;
            } else {
                stats.good += 1;
            }
        }
        stats
    }
}

fn is_candidate(sounding: &StoredSounding) -> bool {
    sounding.flags & (INVALID_MASK | REFERENCE) == 0
}
