use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

/// Patients assigned to training and validation. Every input id is in exactly one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatientSplit {
    pub train: Vec<String>,
    pub val: Vec<String>,
}

impl PatientSplit {
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty() && self.val.is_empty()
    }
}

/// Number of validation patients out of `n`: the fraction rounded up, at least one
/// and at most `n`.
pub fn val_count(n: usize, val_fraction: f64) -> usize {
    if n == 0 {
        return 0;
    }
    // Absorb representation error so that e.g. 10 * 0.7 is not rounded up to 8
    let scaled = n as f64 * val_fraction.clamp(0.0, 1.0) - 1e-9;
    (scaled.ceil().max(0.0) as usize).clamp(1, n)
}

/// Split patients into training and validation sets with a seeded shuffle.
///
/// Ids are sorted and deduplicated first, so the result depends only on the set of
/// ids and the seed.
pub fn split_patients<S: AsRef<str>>(ids: &[S], val_fraction: f64, seed: u64) -> PatientSplit {
    let mut ids: Vec<String> = ids.iter().map(|id| id.as_ref().to_string()).collect();
    ids.sort();
    ids.dedup();

    let mut rng = StdRng::seed_from_u64(seed);
    ids.shuffle(&mut rng);

    let n_val = val_count(ids.len(), val_fraction);
    let train = ids.split_off(n_val);
    PatientSplit { train, val: ids }
}
