use sha2::{Digest, Sha256};

/// Separates the hashed fields so that `("ab", "c")` and `("a", "bc")` never collide.
/// Changing it reshuffles every existing rollout bucket.
const SCORE_DELIMITER: &[u8; 16] = b"\0\0\0\0Cookies!\x03\x02\x01\0";

const WORD_SIZE: usize = 4;
const WORD_SCALE: f64 = 4_294_967_296.0; // 2^32

/// The resolved identity of whoever a flag is being evaluated for: which subject kind
/// identified it, and the identifier it extracted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectIdentity {
    pub subject_class: String,
    pub subject_id: String,
}

impl SubjectIdentity {
    pub fn new(subject_class: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_class: subject_class.into(),
            subject_id: subject_id.into(),
        }
    }

    /// Rolls the dice for this subject and the given flag. See [`calculate_score`].
    pub fn score(&self, flag_id: &str) -> f64 {
        calculate_score(&self.subject_class, &self.subject_id, flag_id)
    }
}

/// Calculates a deterministic score in `[0, 1)` for a subject and a flag.
///
/// The score is the SHA-256 digest of `subject_class`, `subject_id` and `flag_id` (separated by
/// a fixed delimiter), folded into a single 32-bit word by XOR-ing its eight little-endian
/// words, and scaled by `2^32`. The same inputs always land in the same spot, which is what
/// lets a rollout be ramped up by raising its percentage without flipping anyone back off.
///
/// A subject is enabled by a rollout when `score < enable_percentage / 100`.
pub fn calculate_score(subject_class: &str, subject_id: &str, flag_id: &str) -> f64 {
    f64::from(score_word(subject_class, subject_id, flag_id)) / WORD_SCALE
}

fn score_word(subject_class: &str, subject_id: &str, flag_id: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(subject_class.as_bytes());
    hasher.update(SCORE_DELIMITER);
    hasher.update(subject_id.as_bytes());
    hasher.update(SCORE_DELIMITER);
    hasher.update(flag_id.as_bytes());
    let digest = hasher.finalize();

    digest.chunks_exact(WORD_SIZE).fold(0, |word, chunk| {
        let mut bytes = [0u8; WORD_SIZE];
        bytes.copy_from_slice(chunk);
        word ^ u32::from_le_bytes(bytes)
    })
}
