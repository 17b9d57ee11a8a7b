//! ALU opcodes of the VLIW target and their source modifier flags.

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum AluOp {
    MOV,
    ADD,
    MUL,
    MUL_IEEE,
    MULADD_IEEE,
    MIN,
    MAX,
    FLOOR,
    CEIL,
    TRUNC,
    RNDNE,
    FRACT,
    RECIP_IEEE,
    RECIPSQRT_IEEE,
    SQRT_IEEE,
    EXP_IEEE,
    LOG_IEEE,
    SIN,
    COS,
    DOT4_IEEE,
    CUBE,
    SETGT_DX10,
    SETGE_DX10,
    SETE_DX10,
    SETNE_DX10,
    SETGT_INT,
    SETGE_INT,
    SETE_INT,
    SETNE_INT,
    SETGT_UINT,
    SETGE_UINT,
    CNDE,
    CNDE_INT,
    ADD_INT,
    SUB_INT,
    MULLO_INT,
    MIN_INT,
    MAX_INT,
    MIN_UINT,
    MAX_UINT,
    LSHL_INT,
    ASHR_INT,
    LSHR_INT,
    AND_INT,
    OR_INT,
    XOR_INT,
    NOT_INT,
    FLT_TO_INT,
    FLT_TO_UINT,
    INT_TO_FLT,
    UINT_TO_FLT,
    KILLGT,
    KILLNE_INT,
    GROUP_BARRIER,
}

impl AluOp {
    /// Mnemonic and number of sources.
    pub const fn info(self) -> (&'static str, usize) {
        use AluOp::*;
        match self {
            MOV => ("MOV", 1),
            ADD => ("ADD", 2),
            MUL => ("MUL", 2),
            MUL_IEEE => ("MUL_IEEE", 2),
            MULADD_IEEE => ("MULADD_IEEE", 3),
            MIN => ("MIN", 2),
            MAX => ("MAX", 2),
            FLOOR => ("FLOOR", 1),
            CEIL => ("CEIL", 1),
            TRUNC => ("TRUNC", 1),
            RNDNE => ("RNDNE", 1),
            FRACT => ("FRACT", 1),
            RECIP_IEEE => ("RECIP_IEEE", 1),
            RECIPSQRT_IEEE => ("RECIPSQRT_IEEE", 1),
            SQRT_IEEE => ("SQRT_IEEE", 1),
            EXP_IEEE => ("EXP_IEEE", 1),
            LOG_IEEE => ("LOG_IEEE", 1),
            SIN => ("SIN", 1),
            COS => ("COS", 1),
            DOT4_IEEE => ("DOT4_IEEE", 2),
            CUBE => ("CUBE", 2),
            SETGT_DX10 => ("SETGT_DX10", 2),
            SETGE_DX10 => ("SETGE_DX10", 2),
            SETE_DX10 => ("SETE_DX10", 2),
            SETNE_DX10 => ("SETNE_DX10", 2),
            SETGT_INT => ("SETGT_INT", 2),
            SETGE_INT => ("SETGE_INT", 2),
            SETE_INT => ("SETE_INT", 2),
            SETNE_INT => ("SETNE_INT", 2),
            SETGT_UINT => ("SETGT_UINT", 2),
            SETGE_UINT => ("SETGE_UINT", 2),
            CNDE => ("CNDE", 3),
            CNDE_INT => ("CNDE_INT", 3),
            ADD_INT => ("ADD_INT", 2),
            SUB_INT => ("SUB_INT", 2),
            MULLO_INT => ("MULLO_INT", 2),
            MIN_INT => ("MIN_INT", 2),
            MAX_INT => ("MAX_INT", 2),
            MIN_UINT => ("MIN_UINT", 2),
            MAX_UINT => ("MAX_UINT", 2),
            LSHL_INT => ("LSHL_INT", 2),
            ASHR_INT => ("ASHR_INT", 2),
            LSHR_INT => ("LSHR_INT", 2),
            AND_INT => ("AND_INT", 2),
            OR_INT => ("OR_INT", 2),
            XOR_INT => ("XOR_INT", 2),
            NOT_INT => ("NOT_INT", 1),
            FLT_TO_INT => ("FLT_TO_INT", 1),
            FLT_TO_UINT => ("FLT_TO_UINT", 1),
            INT_TO_FLT => ("INT_TO_FLT", 1),
            UINT_TO_FLT => ("UINT_TO_FLT", 1),
            KILLGT => ("KILLGT", 2),
            KILLNE_INT => ("KILLNE_INT", 2),
            GROUP_BARRIER => ("GROUP_BARRIER", 0),
        }
    }

    pub fn name(self) -> &'static str {
        self.info().0
    }

    pub fn num_srcs(self) -> usize {
        self.info().1
    }

    /// Ops whose sources are read as whole vectors and produce one channel.
    pub fn is_reduction(self) -> bool {
        matches!(self, AluOp::DOT4_IEEE)
    }

    /// Ops that only execute in the transcendental slot.
    pub fn is_trans(self) -> bool {
        use AluOp::*;
        matches!(
            self,
            RECIP_IEEE
                | RECIPSQRT_IEEE
                | SQRT_IEEE
                | EXP_IEEE
                | LOG_IEEE
                | SIN
                | COS
                | MULLO_INT
                | INT_TO_FLT
                | UINT_TO_FLT
                | FLT_TO_UINT
        )
    }
}

bitflags! {
    /// Source and destination modifiers of an ALU instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AluModifiers: u16 {
        const SRC0_NEG = 1 << 0;
        const SRC0_ABS = 1 << 1;
        const SRC1_NEG = 1 << 2;
        const SRC1_ABS = 1 << 3;
        // The third source slot has no absolute-value modifier.
        const SRC2_NEG = 1 << 4;
        const DST_CLAMP = 1 << 5;
        const UPDATE_EXEC = 1 << 6;
        const UPDATE_PRED = 1 << 7;
    }
}

impl AluModifiers {
    pub fn neg(src: usize) -> Self {
        match src {
            0 => AluModifiers::SRC0_NEG,
            1 => AluModifiers::SRC1_NEG,
            2 => AluModifiers::SRC2_NEG,
            _ => AluModifiers::empty(),
        }
    }

    /// Absolute-value flag for a source slot, `None` where the hardware has none.
    pub fn abs(src: usize) -> Option<Self> {
        match src {
            0 => Some(AluModifiers::SRC0_ABS),
            1 => Some(AluModifiers::SRC1_ABS),
            _ => None,
        }
    }

    pub fn src_neg(self, src: usize) -> bool {
        let flag = Self::neg(src);
        !flag.is_empty() && self.contains(flag)
    }

    pub fn src_abs(self, src: usize) -> bool {
        Self::abs(src).is_some_and(|flag| self.contains(flag))
    }

    /// Move the modifiers of source `from` to source `to`.
    pub fn moved_src(self, from: usize, to: usize) -> Self {
        let mut out = self;
        out.remove(Self::neg(from));
        if let Some(abs) = Self::abs(from) {
            out.remove(abs);
        }
        if self.src_neg(from) {
            out |= Self::neg(to);
        }
        if self.src_abs(from) {
            if let Some(abs) = Self::abs(to) {
                out |= abs;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_src2_has_no_abs() {
        assert_eq!(AluModifiers::abs(2), None);
        assert!(!AluModifiers::all().src_abs(2));
        assert!(AluModifiers::SRC2_NEG.src_neg(2));
    }

    #[test]
    fn test_modifier_move() {
        let mods = AluModifiers::SRC0_NEG | AluModifiers::SRC0_ABS | AluModifiers::DST_CLAMP;
        let moved = mods.moved_src(0, 1);
        assert!(moved.src_neg(1) && moved.src_abs(1));
        assert!(!moved.src_neg(0) && !moved.src_abs(0));
        assert!(moved.contains(AluModifiers::DST_CLAMP));
    }

    #[test]
    fn test_op_info() {
        assert_eq!(AluOp::MULADD_IEEE.num_srcs(), 3);
        assert_eq!(AluOp::GROUP_BARRIER.num_srcs(), 0);
        assert!(AluOp::SIN.is_trans());
        assert!(!AluOp::ADD.is_trans());
    }
}
