//! Opcode alphabet.
//!
//! Each variant is either argument-less (encoded as a single byte) or
//! carries a 16-bit little-endian argument (encoded as three bytes). The
//! handful of optimizer-only super-instructions that pack more than 16 bits
//! of operand (`CompareLtLocalJump`) are the one exception and are called
//! out individually in [`ArgWidth`].

use strum::{FromRepr, IntoStaticStr};

/// How many bytes (beyond the opcode byte itself) an instruction's argument
/// occupies once encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgWidth {
    /// No argument; the instruction is one byte.
    None,
    /// A 16-bit little-endian argument; the instruction is three bytes.
    Narrow,
    /// A 32-bit packed argument (two 8-bit indices plus a 16-bit jump
    /// target, or similar). Only ever produced by the peephole optimizer.
    Wide32,
}

macro_rules! opcodes {
    ($($(#[$meta:meta])* $name:ident => $width:expr),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, FromRepr)]
        #[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
        #[repr(u8)]
        pub enum Opcode {
            $($(#[$meta])* $name,)+
        }

        impl Opcode {
            #[must_use]
            pub fn arg_width(self) -> ArgWidth {
                match self {
                    $(Self::$name => $width,)+
                }
            }
        }
    };
}

opcodes! {
    // Constants
    LoadConst => ArgWidth::Narrow,
    LoadNone => ArgWidth::None,
    LoadTrue => ArgWidth::None,
    LoadFalse => ArgWidth::None,
    LoadZero => ArgWidth::None,
    LoadOne => ArgWidth::None,
    LoadEmptyList => ArgWidth::None,
    LoadEmptyTuple => ArgWidth::None,
    LoadEmptyDict => ArgWidth::None,

    // Locals
    LoadFast => ArgWidth::Narrow,
    StoreFast => ArgWidth::Narrow,
    DeleteFast => ArgWidth::Narrow,
    LoadFast0 => ArgWidth::None,
    LoadFast1 => ArgWidth::None,
    LoadFast2 => ArgWidth::None,
    LoadFast3 => ArgWidth::None,
    StoreFast0 => ArgWidth::None,
    StoreFast1 => ArgWidth::None,
    StoreFast2 => ArgWidth::None,
    StoreFast3 => ArgWidth::None,

    // Globals / names
    LoadGlobal => ArgWidth::Narrow,
    StoreGlobal => ArgWidth::Narrow,
    DeleteGlobal => ArgWidth::Narrow,
    LoadName => ArgWidth::Narrow,
    StoreName => ArgWidth::Narrow,
    DeleteName => ArgWidth::Narrow,

    // Cells / free
    LoadDeref => ArgWidth::Narrow,
    StoreDeref => ArgWidth::Narrow,
    DeleteDeref => ArgWidth::Narrow,

    // Attributes / subscript
    LoadAttr => ArgWidth::Narrow,
    StoreAttr => ArgWidth::Narrow,
    DeleteAttr => ArgWidth::Narrow,
    BinarySubscr => ArgWidth::None,
    StoreSubscr => ArgWidth::None,
    DeleteSubscr => ArgWidth::None,
    LoadMethod => ArgWidth::Narrow,
    CallMethod => ArgWidth::Narrow,

    // Binary / unary / compare
    BinaryAdd => ArgWidth::None,
    BinarySub => ArgWidth::None,
    BinaryMul => ArgWidth::None,
    BinaryDivide => ArgWidth::None,
    BinaryFloorDiv => ArgWidth::None,
    BinaryMod => ArgWidth::None,
    BinaryPow => ArgWidth::None,
    BinaryLShift => ArgWidth::None,
    BinaryRShift => ArgWidth::None,
    BinaryAnd => ArgWidth::None,
    BinaryOr => ArgWidth::None,
    BinaryXor => ArgWidth::None,
    BinaryMatMul => ArgWidth::None,
    UnaryNeg => ArgWidth::None,
    UnaryPos => ArgWidth::None,
    UnaryNot => ArgWidth::None,
    UnaryInvert => ArgWidth::None,
    CompareLt => ArgWidth::None,
    CompareLe => ArgWidth::None,
    CompareEq => ArgWidth::None,
    CompareNe => ArgWidth::None,
    CompareGt => ArgWidth::None,
    CompareGe => ArgWidth::None,
    CompareIs => ArgWidth::None,
    CompareIsNot => ArgWidth::None,
    CompareIn => ArgWidth::None,
    CompareNotIn => ArgWidth::None,
    // Specialized integer/float variants, produced only by the peephole layer.
    BinaryAddInt => ArgWidth::None,
    BinarySubInt => ArgWidth::None,
    BinaryMulInt => ArgWidth::None,
    BinaryAddFloat => ArgWidth::None,
    BinaryDivideFloat => ArgWidth::None,
    CompareLtInt => ArgWidth::None,
    CompareLeInt => ArgWidth::None,
    CompareEqInt => ArgWidth::None,
    CompareNeInt => ArgWidth::None,
    CompareGtInt => ArgWidth::None,
    CompareGeInt => ArgWidth::None,

    // Collection building
    BuildList => ArgWidth::Narrow,
    BuildTuple => ArgWidth::Narrow,
    BuildSet => ArgWidth::Narrow,
    BuildMap => ArgWidth::Narrow,
    ListAppend => ArgWidth::Narrow,
    SetAdd => ArgWidth::Narrow,
    MapAdd => ArgWidth::Narrow,

    // Iterator & jumps
    GetIter => ArgWidth::None,
    ForIter => ArgWidth::Narrow,
    Jump => ArgWidth::Narrow,
    PopJumpIfTrue => ArgWidth::Narrow,
    PopJumpIfFalse => ArgWidth::Narrow,
    JumpIfTrueOrPop => ArgWidth::Narrow,
    JumpIfFalseOrPop => ArgWidth::Narrow,

    // Calls
    Call => ArgWidth::Narrow,
    CallKw => ArgWidth::Narrow,
    CallEx => ArgWidth::Narrow,

    // Classes & functions
    LoadBuildClass => ArgWidth::None,
    MakeFunction => ArgWidth::Narrow,
    LoadLocals => ArgWidth::None,
    SetupAnnotations => ArgWidth::None,

    // Import
    ImportName => ArgWidth::Narrow,
    ImportFrom => ArgWidth::Narrow,
    ImportStar => ArgWidth::None,

    // Unpacking
    UnpackSequence => ArgWidth::Narrow,
    UnpackEx => ArgWidth::Narrow,

    // Exceptions & contexts
    SetupExcept => ArgWidth::Narrow,
    SetupFinally => ArgWidth::Narrow,
    SetupWith => ArgWidth::Narrow,
    SetupExceptStar => ArgWidth::Narrow,
    PopExcept => ArgWidth::None,
    PopExceptHandler => ArgWidth::None,
    PopBlock => ArgWidth::None,
    ClearException => ArgWidth::None,
    ExceptionMatch => ArgWidth::None,
    ExceptStarMatch => ArgWidth::None,
    ExceptStarReraise => ArgWidth::None,
    WithCleanup => ArgWidth::None,
    EndFinally => ArgWidth::None,
    RaiseVarargs => ArgWidth::Narrow,
    ContinueLoop => ArgWidth::Narrow,

    // Coroutines / generators
    YieldValue => ArgWidth::None,
    YieldFrom => ArgWidth::None,
    GetAwaitable => ArgWidth::None,

    // Pattern matching
    MatchSequence => ArgWidth::Narrow,
    MatchStar => ArgWidth::Narrow,
    ExtractStar => ArgWidth::Narrow,
    MatchMapping => ArgWidth::Narrow,
    MatchKeys => ArgWidth::None,
    CopyDict => ArgWidth::None,
    MatchClass => ArgWidth::Narrow,

    // Stack mechanics
    Pop => ArgWidth::None,
    Dup => ArgWidth::None,
    Dup2 => ArgWidth::None,
    Rot2 => ArgWidth::None,
    Rot3 => ArgWidth::None,
    Return => ArgWidth::None,

    // Fused super-instructions (optimizer output only)
    LoadFastLoadFast => ArgWidth::Narrow,
    LoadFastLoadConst => ArgWidth::Narrow,
    LoadConstLoadFast => ArgWidth::Narrow,
    StoreFastLoadFast => ArgWidth::Narrow,
    CompareLtJump => ArgWidth::Narrow,
    CompareLeJump => ArgWidth::Narrow,
    CompareEqJump => ArgWidth::Narrow,
    CompareNeJump => ArgWidth::Narrow,
    CompareGtJump => ArgWidth::Narrow,
    CompareGeJump => ArgWidth::Narrow,
    CompareLtLocalJump => ArgWidth::Wide32,
    IncrementFast => ArgWidth::Narrow,
    DecrementFast => ArgWidth::Narrow,
    NegateFast => ArgWidth::Narrow,
    AddConstFast => ArgWidth::Narrow,
    LenGeneric => ArgWidth::None,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_repr(byte as usize).ok_or(byte)
    }
}

impl Opcode {
    #[must_use]
    pub fn has_arg(self) -> bool {
        !matches!(self.arg_width(), ArgWidth::None)
    }

    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// True for the compare family, used by the peephole layer's
    /// compare+jump and compare-local-jump fusions.
    #[must_use]
    pub fn is_compare(self) -> bool {
        matches!(
            self,
            Self::CompareLt
                | Self::CompareLe
                | Self::CompareEq
                | Self::CompareNe
                | Self::CompareGt
                | Self::CompareGe
        )
    }

    /// Net stack effect (pushes minus pops) for a conservative upper-bound
    /// `stack_size` scan. Where the true effect depends on runtime values
    /// (e.g. whether a conditional jump is taken) the larger of the two
    /// possibilities is returned, never the smaller.
    ///
    /// `arg` is the decoded instruction argument (0 for argument-less
    /// opcodes). `UnpackEx` packs its two byte counts into one 16-bit
    /// argument as `before | (after << 8)`.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn stack_effect(self, arg: u32) -> i32 {
        let arg = arg as i32;
        match self {
            Self::LoadConst
            | Self::LoadNone
            | Self::LoadTrue
            | Self::LoadFalse
            | Self::LoadZero
            | Self::LoadOne
            | Self::LoadEmptyList
            | Self::LoadEmptyTuple
            | Self::LoadEmptyDict
            | Self::LoadFast
            | Self::LoadFast0
            | Self::LoadFast1
            | Self::LoadFast2
            | Self::LoadFast3
            | Self::LoadGlobal
            | Self::LoadName
            | Self::LoadDeref
            | Self::LoadBuildClass
            | Self::LoadLocals
            | Self::ImportFrom
            | Self::Dup
            | Self::CopyDict => 1,

            Self::Dup2 => 2,

            Self::StoreFast
            | Self::StoreFast0
            | Self::StoreFast1
            | Self::StoreFast2
            | Self::StoreFast3
            | Self::StoreGlobal
            | Self::StoreName
            | Self::StoreDeref
            | Self::DeleteAttr
            | Self::ImportStar
            | Self::Pop
            | Self::Return
            | Self::ImportName => -1,

            Self::DeleteFast
            | Self::DeleteGlobal
            | Self::DeleteName
            | Self::DeleteDeref
            | Self::LoadAttr
            | Self::GetIter
            | Self::Jump
            | Self::SetupAnnotations
            | Self::ContinueLoop
            | Self::YieldValue
            | Self::YieldFrom
            | Self::GetAwaitable
            | Self::UnaryNeg
            | Self::UnaryPos
            | Self::UnaryNot
            | Self::UnaryInvert
            | Self::Rot2
            | Self::Rot3
            | Self::NegateFast
            | Self::IncrementFast
            | Self::DecrementFast
            | Self::AddConstFast
            | Self::LenGeneric
            | Self::BinarySubscr => 0,

            Self::StoreAttr => -2,
            Self::DeleteSubscr => -2,
            Self::StoreSubscr => -3,

            Self::LoadMethod => 1,
            Self::CallMethod => -(arg + 1),

            Self::BinaryAdd
            | Self::BinarySub
            | Self::BinaryMul
            | Self::BinaryDivide
            | Self::BinaryFloorDiv
            | Self::BinaryMod
            | Self::BinaryPow
            | Self::BinaryLShift
            | Self::BinaryRShift
            | Self::BinaryAnd
            | Self::BinaryOr
            | Self::BinaryXor
            | Self::BinaryMatMul
            | Self::CompareLt
            | Self::CompareLe
            | Self::CompareEq
            | Self::CompareNe
            | Self::CompareGt
            | Self::CompareGe
            | Self::CompareIs
            | Self::CompareIsNot
            | Self::CompareIn
            | Self::CompareNotIn
            | Self::BinaryAddInt
            | Self::BinarySubInt
            | Self::BinaryMulInt
            | Self::BinaryAddFloat
            | Self::BinaryDivideFloat
            | Self::CompareLtInt
            | Self::CompareLeInt
            | Self::CompareEqInt
            | Self::CompareNeInt
            | Self::CompareGtInt
            | Self::CompareGeInt
            | Self::ExceptionMatch
            | Self::ExceptStarMatch => -1,

            Self::BuildList | Self::BuildTuple | Self::BuildSet => 1 - arg,
            Self::BuildMap => 1 - 2 * arg,
            Self::ListAppend | Self::SetAdd => -1,
            Self::MapAdd => -2,

            Self::ForIter => 1,
            Self::PopJumpIfTrue | Self::PopJumpIfFalse => -1,
            Self::JumpIfTrueOrPop | Self::JumpIfFalseOrPop => 0,

            Self::Call => -arg,
            Self::CallKw => -arg,
            Self::CallEx => -1,

            Self::MakeFunction => -1,

            Self::UnpackSequence => arg - 1,
            Self::UnpackEx => {
                let before = arg & 0xFF;
                let after = (arg >> 8) & 0xFF;
                before + after
            }

            Self::SetupExcept
            | Self::SetupFinally
            | Self::SetupWith
            | Self::SetupExceptStar
            | Self::PopExcept
            | Self::PopExceptHandler
            | Self::PopBlock
            | Self::ClearException
            | Self::ExceptStarReraise
            | Self::WithCleanup
            | Self::EndFinally => 0,

            Self::RaiseVarargs => -arg,

            Self::MatchSequence | Self::MatchStar | Self::ExtractStar | Self::MatchMapping | Self::MatchClass => 1,
            Self::MatchKeys => 2,

            Self::LoadFastLoadFast | Self::LoadFastLoadConst | Self::LoadConstLoadFast => 2,
            Self::StoreFastLoadFast => 0,
            Self::CompareLtJump
            | Self::CompareLeJump
            | Self::CompareEqJump
            | Self::CompareNeJump
            | Self::CompareGtJump
            | Self::CompareGeJump
            | Self::CompareLtLocalJump => -2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_width_matches_has_arg() {
        assert!(Opcode::LoadConst.has_arg());
        assert!(!Opcode::Pop.has_arg());
        assert_eq!(Opcode::CompareLtLocalJump.arg_width(), ArgWidth::Wide32);
    }

    #[test]
    fn mnemonic_is_screaming_snake_case() {
        assert_eq!(Opcode::LoadFast.mnemonic(), "LOAD_FAST");
        assert_eq!(Opcode::CompareLtLocalJump.mnemonic(), "COMPARE_LT_LOCAL_JUMP");
    }

    #[test]
    fn stack_effect_accounts_for_arg() {
        assert_eq!(Opcode::LoadConst.stack_effect(0), 1);
        assert_eq!(Opcode::BuildList.stack_effect(3), -2);
        assert_eq!(Opcode::BuildMap.stack_effect(2), -3);
        assert_eq!(Opcode::Call.stack_effect(2), -2);
        assert_eq!(Opcode::UnpackEx.stack_effect(1 | (2 << 8)), 3);
    }
}
