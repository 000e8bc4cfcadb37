//! Display identity for newly connected participants.
//!
//! Ids look like `user_QXF`. With 26³ possible ids collisions are possible
//! and tolerated: nothing in the hub relies on participant ids being unique.

use rand::Rng;

/// Cursor palette handed out to participants.
pub const PALETTE: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E9",
];

const ID_PREFIX: &str = "user_";
const ID_LETTERS: usize = 3;

/// Generated display id and cursor color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantIdentity {
    pub id: String,
    pub color: String,
}

impl ParticipantIdentity {
    /// Generate from the thread-local RNG.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Generate from an explicit RNG (for testing)
    pub fn generate_with<R: Rng>(rng: &mut R) -> Self {
        let mut id = String::with_capacity(ID_PREFIX.len() + ID_LETTERS);
        id.push_str(ID_PREFIX);
        for _ in 0..ID_LETTERS {
            id.push(char::from(b'A' + rng.gen_range(0..26u8)));
        }

        let color = PALETTE[rng.gen_range(0..PALETTE.len())].to_string();
        Self { id, color }
    }
}
