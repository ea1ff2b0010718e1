// ============================================================
// Layer 4 — Subject Selection
// ============================================================
// Draws the subjects of one run from the Brainweb pool:
//
//   source      nI subjects scanned with the source protocol
//   target      nJ subjects scanned with the target protocol,
//               providing the few labeled target samples
//   validation  nH further target subjects for evaluation
//
// The three groups are drawn without replacement one after the
// other, so no subject appears in two groups.
//
// Uses a Fisher-Yates shuffle via rand::seq::SliceRandom.

use anyhow::{bail, Result};
use rand::{seq::SliceRandom, Rng};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectSplit {
    pub source:     Vec<usize>,
    pub target:     Vec<usize>,
    pub validation: Vec<usize>,
}

/// Subjects available for sampling: `0..num_subjects`, minus the
/// reserved prediction subject if there is one.
pub fn subject_pool(num_subjects: usize, reserved: Option<usize>) -> Vec<usize> {
    (0..num_subjects).filter(|&s| Some(s) != reserved).collect()
}

pub fn select_subjects<R: Rng + ?Sized>(
    pool:         &[usize],
    n_source:     usize,
    n_target:     usize,
    n_validation: usize,
    rng:          &mut R,
) -> Result<SubjectSplit> {
    let needed = n_source + n_target + n_validation;
    if needed > pool.len() {
        bail!(
            "{} subjects requested ({} source, {} target, {} validation) but the pool holds {}",
            needed, n_source, n_target, n_validation, pool.len()
        );
    }

    let mut shuffled = pool.to_vec();
    shuffled.shuffle(rng);

    let validation = shuffled[n_source + n_target..needed].to_vec();
    let target     = shuffled[n_source..n_source + n_target].to_vec();
    shuffled.truncate(n_source);

    tracing::info!(
        "Subjects: source {:?}, target {:?}, validation {:?}",
        shuffled, target, validation
    );

    Ok(SubjectSplit { source: shuffled, target, validation })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    #[test]
    fn test_pool_excludes_reserved_subject() {
        let pool = subject_pool(20, Some(19));
        assert_eq!(pool.len(), 19);
        assert!(!pool.contains(&19));
        assert_eq!(subject_pool(20, None).len(), 20);
    }

    #[test]
    fn test_groups_are_disjoint_and_sized() {
        let mut rng = StdRng::seed_from_u64(7);
        let pool    = subject_pool(20, Some(19));
        let split   = select_subjects(&pool, 4, 1, 9, &mut rng).unwrap();

        assert_eq!(split.source.len(), 4);
        assert_eq!(split.target.len(), 1);
        assert_eq!(split.validation.len(), 9);

        let all: HashSet<usize> = split.source.iter()
            .chain(&split.target)
            .chain(&split.validation)
            .copied()
            .collect();
        assert_eq!(all.len(), 14);
        assert!(all.iter().all(|s| pool.contains(s)));
    }

    #[test]
    fn test_pool_too_small() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select_subjects(&[0, 1, 2], 2, 1, 1, &mut rng).is_err());
    }

    #[test]
    fn test_same_seed_same_split() {
        let pool = subject_pool(20, None);
        let a = select_subjects(&pool, 4, 1, 9, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = select_subjects(&pool, 4, 1, 9, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
    }
}
