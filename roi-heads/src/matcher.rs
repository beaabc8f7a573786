//! Proposal to ground truth assignment by match quality.

use crate::common::*;

/// The integer encoding of [Match::BelowLowThreshold].
pub const BELOW_LOW_THRESHOLD: i64 = -1;
/// The integer encoding of [Match::BetweenThresholds].
pub const BETWEEN_THRESHOLDS: i64 = -2;

/// The assignment of one proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Match {
    /// Matched to the ground truth at the index.
    Matched(usize),
    /// Background.
    BelowLowThreshold,
    /// Neither foreground nor background.
    BetweenThresholds,
}

impl Match {
    pub fn matched_index(&self) -> Option<usize> {
        match *self {
            Self::Matched(index) => Some(index),
            _ => None,
        }
    }

    pub fn to_i64(&self) -> i64 {
        match *self {
            Self::Matched(index) => index as i64,
            Self::BelowLowThreshold => BELOW_LOW_THRESHOLD,
            Self::BetweenThresholds => BETWEEN_THRESHOLDS,
        }
    }
}

impl From<Match> for i64 {
    fn from(from: Match) -> Self {
        from.to_i64()
    }
}

impl TryFrom<i64> for Match {
    type Error = Error;

    fn try_from(from: i64) -> Result<Self, Self::Error> {
        let matched = match from {
            BELOW_LOW_THRESHOLD => Self::BelowLowThreshold,
            BETWEEN_THRESHOLDS => Self::BetweenThresholds,
            index if index >= 0 => Self::Matched(index as usize),
            other => bail!("{} is not a valid match encoding", other),
        };
        Ok(matched)
    }
}

#[derive(Debug, Clone)]
pub struct MatcherInit {
    pub high_threshold: f64,
    pub low_threshold: f64,
    /// Keep the best proposal of every ground truth even below the thresholds.
    pub allow_low_quality_matches: bool,
}

impl MatcherInit {
    pub fn build(self) -> Result<Matcher> {
        let Self {
            high_threshold,
            low_threshold,
            allow_low_quality_matches,
        } = self;
        ensure!(
            high_threshold.is_finite() && low_threshold.is_finite(),
            "matching thresholds must be finite numbers"
        );
        ensure!(
            low_threshold <= high_threshold,
            "low_threshold ({}) must not exceed high_threshold ({})",
            low_threshold,
            high_threshold
        );
        Ok(Matcher {
            high_threshold,
            low_threshold,
            allow_low_quality_matches,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Matcher {
    high_threshold: f64,
    low_threshold: f64,
    allow_low_quality_matches: bool,
}

impl Matcher {
    pub fn high_threshold(&self) -> f64 {
        self.high_threshold
    }

    pub fn low_threshold(&self) -> f64 {
        self.low_threshold
    }

    /// Assign every proposal from a `[num_gt, num_proposals]` quality matrix.
    pub fn match_quality(&self, quality: &Tensor) -> Result<Vec<Match>> {
        let (num_gt, num_proposals) = quality
            .size2()
            .map_err(|_| format_err!("expect a 2D quality matrix, but get {:?}", quality.size()))?;
        let (num_gt, num_proposals) = (num_gt as usize, num_proposals as usize);

        if num_proposals == 0 {
            return Ok(vec![]);
        }
        if num_gt == 0 {
            return Ok(vec![Match::BelowLowThreshold; num_proposals]);
        }

        let values = Vec::<f32>::from(
            &quality
                .to_device(Device::Cpu)
                .to_kind(Kind::Float)
                .contiguous()
                .view([(num_gt * num_proposals) as i64]),
        );
        debug_assert!(
            values.iter().all(|val| !val.is_nan()),
            "NaN detected in the quality matrix"
        );
        let quality_of = |gt: usize, proposal: usize| values[gt * num_proposals + proposal];

        // best ground truth per proposal, first index wins ties
        let best: Vec<(usize, f32)> = (0..num_proposals)
            .map(|proposal| {
                (0..num_gt).fold((0, quality_of(0, proposal)), |best, gt| {
                    let val = quality_of(gt, proposal);
                    if val > best.1 {
                        (gt, val)
                    } else {
                        best
                    }
                })
            })
            .collect();

        let mut matches: Vec<Match> = best
            .iter()
            .map(|&(gt, val)| {
                let val = val as f64;
                if val < self.low_threshold {
                    Match::BelowLowThreshold
                } else if val < self.high_threshold {
                    Match::BetweenThresholds
                } else {
                    Match::Matched(gt)
                }
            })
            .collect();

        if self.allow_low_quality_matches {
            for gt in 0..num_gt {
                let highest = (0..num_proposals)
                    .map(|proposal| quality_of(gt, proposal))
                    .fold(f32::NEG_INFINITY, f32::max);

                (0..num_proposals)
                    .filter(|&proposal| quality_of(gt, proposal) == highest)
                    .for_each(|proposal| {
                        matches[proposal] = Match::Matched(best[proposal].0);
                    });
            }
        }

        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality(rows: &[&[f32]]) -> Tensor {
        let num_cols = rows.first().map(|row| row.len()).unwrap_or(0) as i64;
        let values: Vec<f32> = rows.iter().flat_map(|row| row.iter().cloned()).collect();
        Tensor::of_slice(&values).view([rows.len() as i64, num_cols])
    }

    fn matcher(allow_low_quality_matches: bool) -> Matcher {
        MatcherInit {
            high_threshold: 0.7,
            low_threshold: 0.3,
            allow_low_quality_matches,
        }
        .build()
        .unwrap()
    }

    #[test]
    fn match_by_thresholds() -> Result<()> {
        let quality = quality(&[&[0.9, 0.5, 0.1, 0.0], &[0.2, 0.6, 0.0, 0.75]]);
        let matches = matcher(false).match_quality(&quality)?;
        ensure!(
            matches
                == vec![
                    Match::Matched(0),
                    Match::BetweenThresholds,
                    Match::BelowLowThreshold,
                    Match::Matched(1),
                ]
        );
        Ok(())
    }

    #[test]
    fn match_low_quality() -> Result<()> {
        // the second ground truth has no proposal above the high threshold
        let quality = quality(&[&[0.9, 0.1, 0.0], &[0.0, 0.4, 0.2]]);
        let matches = matcher(false).match_quality(&quality)?;
        ensure!(matches[1] == Match::BetweenThresholds);

        let matches = matcher(true).match_quality(&quality)?;
        ensure!(
            matches
                == vec![
                    Match::Matched(0),
                    Match::Matched(1),
                    Match::BelowLowThreshold
                ]
        );
        Ok(())
    }

    #[test]
    fn match_degenerate_inputs() -> Result<()> {
        let matcher = matcher(true);

        let no_proposals = Tensor::zeros(&[2, 0], FLOAT_CPU);
        ensure!(matcher.match_quality(&no_proposals)?.is_empty());

        let no_gt = Tensor::zeros(&[0, 3], FLOAT_CPU);
        ensure!(matcher.match_quality(&no_gt)? == vec![Match::BelowLowThreshold; 3]);

        ensure!(matcher.match_quality(&Tensor::zeros(&[3], FLOAT_CPU)).is_err());
        Ok(())
    }

    #[test]
    fn match_encoding() -> Result<()> {
        for matched in [
            Match::Matched(0),
            Match::Matched(5),
            Match::BelowLowThreshold,
            Match::BetweenThresholds,
        ] {
            ensure!(Match::try_from(i64::from(matched))? == matched);
        }
        ensure!(Match::try_from(-3i64).is_err());
        Ok(())
    }

    #[test]
    fn matcher_init_checks() {
        let init = |high_threshold, low_threshold| MatcherInit {
            high_threshold,
            low_threshold,
            allow_low_quality_matches: false,
        };
        assert!(init(0.5, 0.5).build().is_ok());
        assert!(init(0.4, 0.5).build().is_err());
        assert!(init(f64::NAN, 0.5).build().is_err());
    }
}
