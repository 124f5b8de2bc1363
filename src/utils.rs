use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// a macro to declare simple Vec<String> in test fixtures
#[cfg(test)]
#[macro_export]
macro_rules! string_vec {
    ($($x:expr),*) => {
        vec![$($x.into()),*]
    };
}

/// split randomly a Vec<T> into p Vec<T> of approximatively the same size (sizes differ by at most one)
pub fn split_into_balanced_random_chunks<T: Clone>(vec: Vec<T>, p: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<T>> {
    let mut shuffled = vec;
    shuffled.shuffle(rng);

    let n = shuffled.len();
    let base_size = n / p;
    let extra_elements = n % p;

    let mut chunks = Vec::with_capacity(p);
    let mut start = 0;

    for i in 0..p {
        // the first `extra_elements` chunks get one more element
        let chunk_size = base_size + if i < extra_elements { 1 } else { 0 };
        let end = start + chunk_size;
        chunks.push(shuffled[start..end].to_vec());
        start = end;
    }

    chunks
}

/// Derive a sub-seed from a top-level seed, a repeat index and a domain tag.
/// Pure function of its inputs: stable across runs, platforms and thread counts.
pub fn derive_seed(top_seed: u64, repeat: usize, domain: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(top_seed.to_le_bytes());
    hasher.update((repeat as u64).to_le_bytes());
    hasher.update(domain.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Draw a fresh top-level seed when none was supplied, so the run can be replayed later
pub fn random_seed() -> u64 {
    rand::thread_rng().gen()
}

/// Truncate a long joined list for display
pub fn truncate_display(s: String, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_split_into_balanced_random_chunks_sizes() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let chunks = split_into_balanced_random_chunks((0..11).collect::<Vec<usize>>(), 3, &mut rng);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 4, 3]);

        let mut all: Vec<usize> = chunks.into_iter().flatten().collect();
        all.sort();
        assert_eq!(all, (0..11).collect::<Vec<usize>>());
    }

    #[test]
    fn test_split_into_balanced_random_chunks_more_chunks_than_items() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let chunks = split_into_balanced_random_chunks(vec!["a", "b"], 4, &mut rng);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.iter().filter(|c| c.is_empty()).count(), 2);
    }

    #[test]
    fn test_split_is_reproducible() {
        let a = split_into_balanced_random_chunks((0..50).collect::<Vec<usize>>(), 5, &mut ChaCha8Rng::seed_from_u64(3));
        let b = split_into_balanced_random_chunks((0..50).collect::<Vec<usize>>(), 5, &mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_seed_is_stable_and_distinct() {
        assert_eq!(derive_seed(42, 0, "cv1"), derive_seed(42, 0, "cv1"));
        assert_ne!(derive_seed(42, 0, "cv1"), derive_seed(42, 1, "cv1"));
        assert_ne!(derive_seed(42, 0, "cv1"), derive_seed(43, 0, "cv1"));
        assert_ne!(derive_seed(42, 0, "cv1"), derive_seed(42, 0, "cv2"));
    }

    #[test]
    fn test_truncate_display() {
        assert_eq!(truncate_display("abcdef".to_string(), 10), "abcdef");
        assert_eq!(truncate_display("abcdefghijkl".to_string(), 8), "abcde...");
    }

    #[test]
    fn test_string_vec_macro() {
        let v: Vec<String> = string_vec!["a", "b"];
        assert_eq!(v, vec!["a".to_string(), "b".to_string()]);
    }
}
