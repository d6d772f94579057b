/// Result of `get_sched_info`, laid out for C callers.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
#[repr(C)]
pub struct SchedInfo {
    pub pid: i32,
    pub priority: i32,
    pub runtime: u64,
    /// Quantum in ticks; always 1.
    pub time_slice: i32,
}

impl SchedInfo {
    pub const SIZE: usize = size_of::<Self>();

    /// Little-endian wire image, padding zeroed.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.pid.to_le_bytes());
        out[4..8].copy_from_slice(&self.priority.to_le_bytes());
        out[8..16].copy_from_slice(&self.runtime.to_le_bytes());
        out[16..20].copy_from_slice(&self.time_slice.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_c() {
        assert_eq!(SchedInfo::SIZE, 24);
        let raw = SchedInfo {
            pid: 3,
            priority: 1,
            runtime: 0x1_0000_0002,
            time_slice: 1,
        }
        .to_bytes();
        assert_eq!(raw[0], 3);
        assert_eq!(raw[4], 1);
        assert_eq!(&raw[8..16], &0x1_0000_0002u64.to_le_bytes());
        assert_eq!(raw[16], 1);
        assert_eq!(&raw[20..], &[0; 4]);
    }
}
