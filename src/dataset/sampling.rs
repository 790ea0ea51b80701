use std::fmt;
use std::str::FromStr;

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Background slices drawn per tumor slice unless configured otherwise.
pub const DEFAULT_BACKGROUND_RATIO: usize = 2;

/// Why a slice was selected for training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplePolicy {
    /// The slice has at least one foreground pixel.
    Tumor,
    /// The slice was drawn from the slices without foreground.
    Background,
}

impl fmt::Display for SamplePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policy_str = match self {
            SamplePolicy::Tumor => "tumor",
            SamplePolicy::Background => "background",
        };
        write!(f, "{policy_str}")
    }
}

impl FromStr for SamplePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tumor" => Ok(SamplePolicy::Tumor),
            "background" => Ok(SamplePolicy::Background),
            other => Err(format!("unknown sample policy: {other}")),
        }
    }
}

/// Select training slices of one patient.
///
/// Every slice in `tumor` is kept. Of the remaining `B` slices, `min(B, ratio * T)`
/// are drawn with `rng`. The result is in ascending depth order.
pub fn balance_slices<R: Rng + ?Sized>(
    tumor: &[usize],
    depth: usize,
    ratio: usize,
    rng: &mut R,
) -> Vec<(usize, SamplePolicy)> {
    let mut is_tumor = vec![false; depth];
    for &z in tumor {
        if z < depth {
            is_tumor[z] = true;
        }
    }
    let background: Vec<usize> = (0..depth).filter(|z| !is_tumor[*z]).collect();
    let n_tumor = depth - background.len();
    let n_background = background.len().min(ratio.saturating_mul(n_tumor));

    let mut selected: Vec<(usize, SamplePolicy)> = (0..depth)
        .filter(|z| is_tumor[*z])
        .map(|z| (z, SamplePolicy::Tumor))
        .collect();
    selected.extend(
        index::sample(rng, background.len(), n_background)
            .into_iter()
            .map(|i| (background[i], SamplePolicy::Background)),
    );
    selected.sort_by_key(|(z, _)| *z);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::rstest;

    fn count(selected: &[(usize, SamplePolicy)], policy: SamplePolicy) -> usize {
        selected.iter().filter(|(_, p)| *p == policy).count()
    }

    #[rstest]
    #[case::sparse_tumor(vec![10, 11, 12], 100, 3, 6)]
    #[case::few_background(vec![0, 1, 2, 3], 6, 4, 2)]
    #[case::all_tumor(vec![0, 1, 2], 3, 3, 0)]
    #[case::no_tumor(vec![], 50, 0, 0)]
    #[case::empty_volume(vec![], 0, 0, 0)]
    fn test_balance_counts(
        #[case] tumor: Vec<usize>,
        #[case] depth: usize,
        #[case] expected_tumor: usize,
        #[case] expected_background: usize,
    ) {
        let mut rng = StdRng::seed_from_u64(42);
        let selected = balance_slices(&tumor, depth, DEFAULT_BACKGROUND_RATIO, &mut rng);
        assert_eq!(count(&selected, SamplePolicy::Tumor), expected_tumor);
        assert_eq!(count(&selected, SamplePolicy::Background), expected_background);
        assert_eq!(selected.len(), expected_tumor + expected_background);
    }

    #[test]
    fn test_sorted_and_consistent() {
        let tumor = vec![40, 41, 42, 43];
        let mut rng = StdRng::seed_from_u64(7);
        let selected = balance_slices(&tumor, 120, 2, &mut rng);

        assert!(selected.windows(2).all(|w| w[0].0 < w[1].0));
        for (z, policy) in &selected {
            assert_eq!(tumor.contains(z), *policy == SamplePolicy::Tumor);
        }
    }

    #[test]
    fn test_seeded_draw_is_reproducible() {
        let tumor = vec![5, 6];
        let a = balance_slices(&tumor, 200, 2, &mut StdRng::seed_from_u64(3));
        let b = balance_slices(&tumor, 200, 2, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn test_ratio() {
        let mut rng = StdRng::seed_from_u64(1);
        let selected = balance_slices(&[3], 20, 5, &mut rng);
        assert_eq!(count(&selected, SamplePolicy::Background), 5);
    }

    #[test]
    fn test_policy_strings() {
        assert_eq!("tumor".parse::<SamplePolicy>().unwrap(), SamplePolicy::Tumor);
        assert_eq!(SamplePolicy::Background.to_string(), "background");
        assert!("foreground".parse::<SamplePolicy>().is_err());
    }
}
