use serde::Serialize;
use simple_moving_average::{SMA, SumTreeSMA};

use crate::errors::LapsyncError;
use crate::sync::{AlignedLap, same_grid};

/// Window, in grid points, of the trailing baseline built from a single lap
pub const ROLLING_WINDOW: usize = 100;

/// Mean and standard deviation of one channel at one grid point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ChannelStats {
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

/// Welford's online mean/variance.
#[derive(Clone, Copy, Debug, Default)]
struct Welford {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn add(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn stats(&self) -> ChannelStats {
        let std = if self.count >= 2 {
            (self.m2 / (self.count - 1) as f64).sqrt()
        } else {
            0.0
        };
        ChannelStats {
            mean: self.mean,
            std,
            count: self.count,
        }
    }
}

/// Learned per-grid-point speed norms, used in place of a single reference lap.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineStats {
    pub grid_len: usize,
    pub grid_step: f64,
    pub speed: Vec<ChannelStats>,
}

impl BaselineStats {
    /// Statistics across several laps on the same grid. A grid point is
    /// covered as long as at least one lap defines it.
    pub fn from_history(laps: &[AlignedLap]) -> Result<Self, LapsyncError> {
        let Some(first) = laps.first() else {
            return Err(LapsyncError::NoBaselineLap {
                role: "history".to_string(),
                reason: "the session has no other laps".to_string(),
            });
        };
        for lap in &laps[1..] {
            first.ensure_same_grid(lap)?;
        }

        let len = laps.iter().map(AlignedLap::defined_len).max().unwrap_or(0);
        let mut accumulators = vec![Welford::default(); len];
        for lap in laps {
            for (acc, speed) in accumulators.iter_mut().zip(lap.speeds()) {
                acc.add(speed);
            }
        }

        Ok(Self {
            grid_len: first.grid_len,
            grid_step: first.grid_step,
            speed: accumulators.iter().map(Welford::stats).collect(),
        })
    }

    /// Trailing moving-window statistics of a lap's own speed trace. Each
    /// point's window includes the point itself.
    pub fn rolling<const WINDOW: usize>(lap: &AlignedLap) -> Self {
        let mut mean = SumTreeSMA::<f64, f64, WINDOW>::new();
        let mut mean_sq = SumTreeSMA::<f64, f64, WINDOW>::new();
        let speed = lap
            .speeds()
            .map(|v| {
                mean.add_sample(v);
                mean_sq.add_sample(v * v);
                let m = mean.get_average();
                let variance = (mean_sq.get_average() - m * m).max(0.0);
                ChannelStats {
                    mean: m,
                    std: variance.sqrt(),
                    count: mean.get_num_samples(),
                }
            })
            .collect();

        Self {
            grid_len: lap.grid_len,
            grid_step: lap.grid_step,
            speed,
        }
    }

    pub fn len(&self) -> usize {
        self.speed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speed.is_empty()
    }

    pub(crate) fn matches_grid(&self, lap: &AlignedLap) -> Result<(), LapsyncError> {
        if same_grid((self.grid_len, self.grid_step), (lap.grid_len, lap.grid_step)) {
            Ok(())
        } else {
            Err(LapsyncError::GridMismatch {
                reason: format!(
                    "baseline uses {} points every {:.3} m, lap {} uses {} points every {:.3} m",
                    self.grid_len, self.grid_step, lap.lap_number, lap.grid_len, lap.grid_step
                ),
            })
        }
    }
}
