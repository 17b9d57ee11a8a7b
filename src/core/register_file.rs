//! Physical general purpose register file.
//!
//! The GPR file is a flat array of vec4 registers. Allocation is first-fit:
//! the lowest numbered register that is neither reserved (pinned by a stage
//! for preloaded values) nor currently in use is handed out. Register usage is
//! tracked in a bitset so the search is a handful of word scans.

/// Upper bound on the number of GPRs any supported chip exposes per thread.
pub const MAX_GPRS: usize = 128;

const WORDS: usize = MAX_GPRS / 64;

/// Physical register index.
pub type RegId = u8;

/// Bit set for tracking register sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegBitSet {
    words: [u64; WORDS],
}

impl RegBitSet {
    /// Create empty register set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, reg: RegId) -> bool {
        let reg = reg as usize;
        reg < MAX_GPRS && (self.words[reg / 64] & (1u64 << (reg % 64))) != 0
    }

    pub fn set(&mut self, reg: RegId) {
        let reg = reg as usize;
        if reg < MAX_GPRS {
            self.words[reg / 64] |= 1u64 << (reg % 64);
        }
    }

    pub fn clear(&mut self, reg: RegId) {
        let reg = reg as usize;
        if reg < MAX_GPRS {
            self.words[reg / 64] &= !(1u64 << (reg % 64));
        }
    }

    pub fn union(&mut self, other: &RegBitSet) {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= b;
        }
    }

    /// Find the lowest register not contained in `self` or `exclude`.
    pub fn find_first_clear(&self, exclude: &RegBitSet) -> Option<RegId> {
        for (i, (a, b)) in self.words.iter().zip(exclude.words.iter()).enumerate() {
            let taken = a | b;
            if taken != u64::MAX {
                let bit = (!taken).trailing_zeros() as usize;
                return Some((i * 64 + bit) as RegId);
            }
        }
        None
    }

    /// One past the highest register in the set, 0 if empty.
    pub fn high_water(&self) -> u32 {
        for (i, w) in self.words.iter().enumerate().rev() {
            if *w != 0 {
                return (i * 64 + 64 - w.leading_zeros() as usize) as u32;
            }
        }
        0
    }
}

/// Error types for register allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegAllocError {
    /// Every register in the file is reserved or in use.
    NoRegistersAvailable,
    /// Register is not allocated.
    RegisterNotAllocated,
    /// Register index outside the file.
    InvalidRegister,
}

/// Register file used by the remapping pass.
///
/// Reserved registers hold stage-preloaded values for the whole shader; the
/// remaining registers are handed out and returned as live ranges start and
/// end.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    num_regs: usize,
    reserved: RegBitSet,
    used: RegBitSet,
    /// Every register that was ever reserved or allocated.
    touched: RegBitSet,
}

impl RegisterFile {
    /// Create a file with `num_regs` registers (clamped to [`MAX_GPRS`]).
    pub fn new(num_regs: usize) -> Self {
        Self {
            num_regs: num_regs.min(MAX_GPRS),
            reserved: RegBitSet::new(),
            used: RegBitSet::new(),
            touched: RegBitSet::new(),
        }
    }

    pub fn num_regs(&self) -> usize {
        self.num_regs
    }

    /// Pin a register for the lifetime of the shader.
    pub fn reserve(&mut self, reg: RegId) -> Result<(), RegAllocError> {
        if reg as usize >= self.num_regs {
            return Err(RegAllocError::InvalidRegister);
        }
        self.reserved.set(reg);
        self.touched.set(reg);
        Ok(())
    }

    /// Allocate the lowest free register.
    pub fn allocate_first_fit(&mut self) -> Result<RegId, RegAllocError> {
        let mut taken = self.used.clone();
        taken.union(&self.reserved);
        match taken.find_first_clear(&RegBitSet::new()) {
            Some(reg) if (reg as usize) < self.num_regs => {
                self.used.set(reg);
                self.touched.set(reg);
                Ok(reg)
            }
            _ => Err(RegAllocError::NoRegistersAvailable),
        }
    }

    /// Return a register to the free pool.
    pub fn free_register(&mut self, reg: RegId) -> Result<(), RegAllocError> {
        if reg as usize >= self.num_regs {
            return Err(RegAllocError::InvalidRegister);
        }
        if !self.used.contains(reg) {
            return Err(RegAllocError::RegisterNotAllocated);
        }
        self.used.clear(reg);
        Ok(())
    }

    /// Registers the shader needs: one past the highest register ever touched.
    pub fn gpr_count(&self) -> u32 {
        self.touched.high_water()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regbitset_operations() {
        let mut set = RegBitSet::new();
        assert!(!set.contains(70));
        set.set(70);
        assert!(set.contains(70));
        assert_eq!(set.high_water(), 71);
        set.clear(70);
        assert!(!set.contains(70));
        assert_eq!(set.high_water(), 0);

        let mut low = RegBitSet::new();
        for reg in 0..64 {
            low.set(reg);
        }
        let mut high = RegBitSet::new();
        high.set(64);
        assert_eq!(low.find_first_clear(&high), Some(65));
        assert_eq!(low.high_water(), 64);
    }

    #[test]
    fn test_first_fit_skips_reserved() {
        let mut regfile = RegisterFile::new(8);
        regfile.reserve(0).unwrap();
        regfile.reserve(2).unwrap();

        assert_eq!(regfile.allocate_first_fit(), Ok(1));
        assert_eq!(regfile.allocate_first_fit(), Ok(3));
        regfile.free_register(1).unwrap();
        assert_eq!(regfile.allocate_first_fit(), Ok(1));
        assert_eq!(regfile.gpr_count(), 4);
    }

    #[test]
    fn test_exhaustion() {
        let mut regfile = RegisterFile::new(2);
        regfile.allocate_first_fit().unwrap();
        regfile.allocate_first_fit().unwrap();
        assert_eq!(
            regfile.allocate_first_fit(),
            Err(RegAllocError::NoRegistersAvailable)
        );
        assert_eq!(regfile.reserve(5), Err(RegAllocError::InvalidRegister));
        assert_eq!(
            regfile.free_register(7),
            Err(RegAllocError::InvalidRegister)
        );
    }
}
