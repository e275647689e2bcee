// src/checksums.rs
//
// Checksum used by the serial event protocol.

/// Simple XOR of all bytes. Returns 0 for an empty slice.
pub fn xor_checksum(data: &[u8]) -> u8 {
    let mut result: u8 = 0;
    for &byte in data {
        result ^= byte;
    }
    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_checksum_basic() {
        assert_eq!(xor_checksum(&[0x01, 0x02, 0x05]), 0x06);
        assert_eq!(xor_checksum(&[0x09]), 0x09);
    }

    #[test]
    fn test_xor_checksum_empty() {
        assert_eq!(xor_checksum(&[]), 0x00);
    }

    #[test]
    fn test_xor_checksum_self_cancelling() {
        assert_eq!(xor_checksum(&[0xAD, 0xAD]), 0x00);
        assert_eq!(xor_checksum(&[0xFF, 0x0F, 0xF0]), 0x00);
    }
}
