//! Secure random number generation.
//!
//! All randomness comes from the operating system CSPRNG via `getrandom`.

use crate::CryptoError;

/// Fill a buffer with random bytes from the OS CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::RandomFailed)
}

/// Generate a random 32-byte array, suitable for a node seed or a network key.
pub fn random_32() -> Result<[u8; 32], CryptoError> {
    let mut buf = [0u8; 32];
    fill_random(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_32_is_not_all_zero() {
        let a = random_32().unwrap();
        let b = random_32().unwrap();
        assert_ne!(a, [0u8; 32]);
        assert_ne!(a, b);
    }
}
