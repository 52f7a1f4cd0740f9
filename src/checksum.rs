use crc32fast::Hasher;

/// Replaceable per-packet integrity strategy.
///
/// The sensor firmware historically shipped with validation bypassed, so the
/// strategy is an explicit configuration point instead of a baked-in constant:
/// `SumOfBytes` matches the wire's documented algorithm and is the default,
/// `Crc32` folds a CRC-32 into the 16-bit field, and `Disabled` reproduces the
/// bypass. A mismatch never blocks reassembly; it is flagged and counted while
/// the payload is stored anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMode {
    #[default]
    SumOfBytes,
    Crc32,
    Disabled,
}

impl ChecksumMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChecksumMode::SumOfBytes => "sum_of_bytes",
            ChecksumMode::Crc32 => "crc32",
            ChecksumMode::Disabled => "disabled",
        }
    }

    pub fn is_disabled(self) -> bool {
        matches!(self, ChecksumMode::Disabled)
    }

    /// Computes the 16-bit checksum over the covered bytes.
    pub fn compute(self, covered: &[u8]) -> u16 {
        match self {
            ChecksumMode::SumOfBytes => covered.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16)),
            ChecksumMode::Crc32 => {
                let mut hasher = Hasher::new();
                hasher.update(covered);
                hasher.finalize() as u16
            }
            ChecksumMode::Disabled => 0,
        }
    }

    /// True when the declared field matches (or validation is disabled).
    pub fn verify(self, covered: &[u8], declared: u16) -> bool {
        match self {
            ChecksumMode::Disabled => true,
            _ => self.compute(covered) == declared,
        }
    }
}
