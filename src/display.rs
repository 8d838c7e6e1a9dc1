//! `Display`/`Debug` impls, kept in their own module as
//! `iximeow-yaxpeax-avnera`'s `display.rs` does.

use core::fmt;

use crate::instruction::{Instruction, Mnemonic, Operand, RegisterPair};

impl fmt::Display for RegisterPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let lo = self.low_address();
        write!(f, "r{}:r{}", lo, lo + 1)
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Mnemonic::*;
        let s = match self {
            Adiw => "adiw",
            Sbiw => "sbiw",
            Call => "call",
            Jmp => "jmp",
            Sts => "sts",
            Lds => "lds",
            Ret => "ret",
            Cp => "cp",
            Cpc => "cpc",
            Add => "add",
            Adc => "adc",
            Ldi => "ldi",
            Cpi => "cpi",
            Stx => "stx",
            Brge => "brge",
            Brne => "brne",
            Rjmp => "rjmp",
            Rcall => "rcall",
            Eor => "eor",
            In => "in",
            Out => "out",
            Lpm => "lpm",
            Push => "push",
            Pop => "pop",
        };
        f.write_str(s)
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Operand as fmt::Display>::fmt(self, f)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::RegReg { rd, rr, .. } => write!(f, "r{}, r{}", rd, rr),
            Operand::ConstReg { k, rd } => write!(f, "r{}, 0x{:02x}", rd, k),
            Operand::ConstPair { k, pair } => write!(f, "{}, 0x{:02x}", pair, k),
            Operand::Reg { rd } => write!(f, "r{}", rd),
            Operand::RegAddress { rd, address } => write!(f, "r{}, 0x{:04x}", rd, address),
            Operand::Address { address } => write!(f, "0x{:04x}", address),
            Operand::Offset7 { offset } => {
                if *offset < 0 {
                    write!(f, ".-{:#x}", -(*offset as i16))
                } else {
                    write!(f, ".+{:#x}", offset)
                }
            }
            Operand::Offset12 { offset } => {
                if *offset < 0 {
                    write!(f, ".-{:#x}", -(*offset as i32))
                } else {
                    write!(f, ".+{:#x}", offset)
                }
            }
            Operand::IoAddrReg { io_addr, rd } => write!(f, "r{}, 0x{:02x}", rd, io_addr),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if matches!(self.operand, Operand::None) {
            write!(f, "{}", self.mnemonic)
        } else {
            write!(f, "{} {}", self.mnemonic, self.operand)
        }
    }
}
