use rand::Rng;
use thiserror::Error;

#[derive(Debug, PartialEq, Eq, Error)]
pub enum SampleError {
    #[error("sample size must be at most {len}, but is {k}")]
    InvalidArgument { k: usize, len: usize },
}

/// Sample `k` distinct indices in `0..len`, uniformly over all `k`-subsets.
fn sample_indices<R: Rng + ?Sized>(
    len: usize,
    k: usize,
    rng: &mut R,
) -> Result<Vec<usize>, SampleError> {
    if k > len {
        return Err(SampleError::InvalidArgument { k, len });
    }

    let mut remaining: Vec<usize> = (0..len).collect();
    let mut picked = Vec::with_capacity(k);
    for _ in 0..k {
        let i_rem = rng.random_range(0..remaining.len());
        picked.push(remaining.swap_remove(i_rem));
    }

    Ok(picked)
}

/// Sample `k` distinct elements of `population`.
pub fn sample<'a, T, R: Rng + ?Sized>(
    population: &'a [T],
    k: usize,
    rng: &mut R,
) -> Result<Vec<&'a T>, SampleError> {
    let indices = sample_indices(population.len(), k, rng)?;
    Ok(indices.into_iter().map(|i| &population[i]).collect())
}
