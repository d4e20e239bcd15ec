use crc32fast::Hasher;

/// CRC-32 (IEEE) accumulated across calls.
///
/// Holds the finalized value so far; every update resumes from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RunningCrc(u32);

impl RunningCrc {
    pub(crate) fn new() -> Self {
        Self(0)
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        let mut hasher = Hasher::new_with_initial(self.0);
        hasher.update(data);
        self.0 = hasher.finalize();
    }

    pub(crate) fn value(&self) -> u32 {
        self.0
    }
}

pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut crc = RunningCrc::new();
    crc.update(data);
    crc.value()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // Standard CRC-32 check input
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut crc = RunningCrc::new();
        crc.update(b"1234");
        crc.update(b"");
        crc.update(b"56789");
        assert_eq!(crc.value(), crc32(b"123456789"));
    }
}
