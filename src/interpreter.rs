//! the interpreter (module D): owns all architectural state and applies
//! decoded instructions to it.

use std::collections::BTreeSet;

use crate::board::Board;
use crate::decoder::decode;
use crate::error::AvrError;
use crate::instruction::{Instruction, Mnemonic, Operand, RegisterPair};
use crate::segment::Segment;

/// SRAM address of the stack pointer's low byte.
pub const SPL: u16 = 0x5D;
/// SRAM address of the stack pointer's high byte.
pub const SPH: u16 = 0x5E;
/// SRAM address of the status register.
pub const SREG: u16 = 0x5F;

/// SREG flag bit masks. `I` and `T` are not modeled: this core does not
/// simulate interrupts, and no instruction in the recognized subset reads or
/// writes `T`.
pub mod sreg_flag {
    pub const H: u8 = 0b0010_0000;
    pub const S: u8 = 0b0001_0000;
    pub const V: u8 = 0b0000_1000;
    pub const N: u8 = 0b0000_0100;
    pub const Z: u8 = 0b0000_0010;
    pub const C: u8 = 0b0000_0001;
}

/// owns program flash, SRAM (including the register file, I/O registers,
/// and SREG), the program counter, and the breakpoint set for one
/// simulation session.
pub struct Interpreter {
    board: Board,
    flash: Vec<u16>,
    memory: Vec<u8>,
    pc: u16,
    breakpoints: BTreeSet<u16>,
}

impl Interpreter {
    /// a fresh interpreter with zeroed flash/SRAM for the given board. call
    /// [`Interpreter::load`] before stepping.
    pub fn new(board: Board) -> Interpreter {
        Interpreter {
            board,
            flash: vec![0; board.flash_end as usize],
            memory: vec![0; board.ram_end as usize],
            pc: 0,
            breakpoints: BTreeSet::new(),
        }
    }

    pub fn board(&self) -> Board {
        self.board
    }

    /// the current program counter, in flash words.
    pub fn pc(&self) -> u16 {
        self.pc
    }

    /// initializes flash from `text` (at its word load address) and copies
    /// each of `data_segments` into SRAM at its byte load address. resets
    /// SP to `ram_end - 2`, clears SREG, and clears any breakpoints.
    pub fn load(&mut self, text: &dyn Segment, data_segments: &[&dyn Segment]) {
        for word in self.flash.iter_mut() {
            *word = 0;
        }
        for byte in self.memory.iter_mut() {
            *byte = 0;
        }
        self.breakpoints.clear();
        self.pc = 0;

        let base = text.address() as usize;
        let bytes = text.data();
        for (i, pair) in bytes.chunks(2).enumerate() {
            let lo = pair[0];
            let hi = pair.get(1).copied().unwrap_or(0);
            self.flash[base + i] = (lo as u16) | ((hi as u16) << 8);
        }

        for segment in data_segments {
            let addr = segment.address() as usize;
            let bytes = segment.data();
            self.memory[addr..addr + bytes.len()].copy_from_slice(bytes);
        }

        let sp = self.board.ram_end - 2;
        self.set_sp(sp);
        self.memory[SREG as usize] = 0;

        log::debug!(
            "loaded {} text words at {:#06x}, sp={:#06x}",
            bytes.len() / 2,
            base,
            sp
        );
    }

    /// decodes the instruction at the current PC, without mutating state.
    pub fn next_instruction(&self) -> Result<Instruction, AvrError> {
        decode(&self.flash[self.pc as usize..])
    }

    /// executes exactly one instruction (1 or 2 flash words).
    pub fn step(&mut self) -> Result<(), AvrError> {
        let instr = self.next_instruction()?;
        self.execute(&instr)
    }

    /// if the next instruction is `CALL`, runs until control returns to the
    /// word immediately after it; otherwise behaves like [`Interpreter::step`].
    pub fn next(&mut self) -> Result<(), AvrError> {
        let call_site = self.pc;
        let instr = self.next_instruction()?;
        let resume_at = call_site.wrapping_add(instr.size as u16);
        self.execute(&instr)?;
        if instr.mnemonic == Mnemonic::Call {
            while self.pc != resume_at {
                self.step()?;
            }
        }
        Ok(())
    }

    /// executes instructions until the PC lies in the breakpoint set.
    pub fn run(&mut self) -> Result<(), AvrError> {
        while !self.breakpoints.contains(&self.pc) {
            self.step()?;
        }
        Ok(())
    }

    pub fn set_breakpoint(&mut self, address: u16) {
        self.breakpoints.insert(address);
    }

    pub fn delete_breakpoint(&mut self, address: u16) {
        self.breakpoints.remove(&address);
    }

    /// reads one byte of SRAM.
    pub fn read(&self, address: u16) -> u8 {
        self.memory[address as usize]
    }

    /// writes one byte of SRAM directly, bypassing any instruction. useful
    /// for tests and for an embedding debugger that wants to poke memory.
    pub fn write(&mut self, address: u16, value: u8) {
        self.memory[address as usize] = value;
    }

    fn execute(&mut self, instr: &Instruction) -> Result<(), AvrError> {
        log::trace!("pc={:#06x} {}", self.pc, instr);
        use Mnemonic::*;

        match (instr.mnemonic, instr.operand) {
            (Ret, Operand::None) => {
                self.ret();
            }
            (Add, Operand::RegReg { rd, rr, .. }) => {
                let operand = self.memory[rr as usize];
                self.add_byte(rd as u16, operand);
                self.advance(instr);
            }
            (Adc, Operand::RegReg { rd, rr, .. }) => {
                let carry = self.flag(sreg_flag::C) as u8;
                let operand = self.memory[rr as usize].wrapping_add(carry);
                self.add_byte(rd as u16, operand);
                self.advance(instr);
            }
            (Cp, Operand::RegReg { rd, rr, .. }) => {
                self.compare(rd, self.memory[rr as usize], false, false);
                self.advance(instr);
            }
            (Cpc, Operand::RegReg { rd, rr, .. }) => {
                let carry = self.flag(sreg_flag::C);
                self.compare(rd, self.memory[rr as usize], carry, true);
                self.advance(instr);
            }
            (Eor, Operand::RegReg { rd, rr, .. }) => {
                self.eor(rd, rr);
                self.advance(instr);
            }
            (Ldi, Operand::ConstReg { k, rd }) => {
                self.memory[rd as usize] = k;
                self.advance(instr);
            }
            (Cpi, Operand::ConstReg { k, rd }) => {
                self.compare(rd, k, false, false);
                self.advance(instr);
            }
            (Adiw, Operand::ConstPair { k, pair }) => {
                self.adiw(pair, k);
                self.advance(instr);
            }
            (Sbiw, Operand::ConstPair { k, pair }) => {
                self.sbiw(pair, k);
                self.advance(instr);
            }
            (Push, Operand::Reg { rd }) => {
                let value = self.memory[rd as usize];
                self.push(value);
                self.advance(instr);
            }
            (Pop, Operand::Reg { rd }) => {
                let value = self.pop();
                self.memory[rd as usize] = value;
                self.advance(instr);
            }
            (Lpm, Operand::Reg { rd }) => {
                self.lpm(rd);
                self.advance(instr);
            }
            (Stx, Operand::Reg { rd }) => {
                self.stx(rd);
                self.advance(instr);
            }
            (Sts, Operand::RegAddress { rd, address }) => {
                self.memory[address as usize] = self.memory[rd as usize];
                self.advance(instr);
            }
            (Lds, Operand::RegAddress { rd, address }) => {
                self.memory[rd as usize] = self.memory[address as usize];
                self.advance(instr);
            }
            (Call, Operand::Address { address }) => {
                let return_to = self.pc.wrapping_add(instr.size as u16);
                self.call(address, return_to);
            }
            (Jmp, Operand::Address { address }) => {
                self.pc = address;
            }
            (Rcall, Operand::Offset12 { offset }) => {
                let return_to = self.pc.wrapping_add(instr.size as u16);
                let target = return_to.wrapping_add(offset as u16);
                self.call(target, return_to);
            }
            (Rjmp, Operand::Offset12 { offset }) => {
                let advanced = self.pc.wrapping_add(instr.size as u16);
                self.pc = advanced.wrapping_add(offset as u16);
            }
            (Brge, Operand::Offset7 { offset }) => {
                self.advance(instr);
                if !self.flag(sreg_flag::S) {
                    self.pc = self.pc.wrapping_add(offset as u16);
                }
            }
            (Brne, Operand::Offset7 { offset }) => {
                self.advance(instr);
                if !self.flag(sreg_flag::Z) {
                    self.pc = self.pc.wrapping_add(offset as u16);
                }
            }
            (In, Operand::IoAddrReg { io_addr, rd }) => {
                self.memory[rd as usize] = self.memory[io_addr as usize + 0x20];
                self.advance(instr);
            }
            (Out, Operand::IoAddrReg { io_addr, rd }) => {
                self.memory[io_addr as usize + 0x20] = self.memory[rd as usize];
                self.advance(instr);
            }
            (mnemonic, _) => {
                return Err(AvrError::Unimplemented { mnemonic });
            }
        }

        debug_assert_eq!(
            self.flag(sreg_flag::S),
            self.flag(sreg_flag::N) != self.flag(sreg_flag::V),
            "flag invariant S = N XOR V violated after {}",
            instr
        );

        Ok(())
    }

    fn advance(&mut self, instr: &Instruction) {
        self.pc = self.pc.wrapping_add(instr.size as u16);
    }

    fn flag(&self, mask: u8) -> bool {
        self.memory[SREG as usize] & mask != 0
    }

    fn toggle_flag(&mut self, mask: u8, set: bool) {
        let sreg = &mut self.memory[SREG as usize];
        if set {
            *sreg |= mask;
        } else {
            *sreg &= !mask;
        }
    }

    fn update_sign(&mut self) {
        let set = self.flag(sreg_flag::N) != self.flag(sreg_flag::V);
        self.toggle_flag(sreg_flag::S, set);
    }

    fn sp(&self) -> u16 {
        let lo = self.memory[SPL as usize] as u16;
        let hi = self.memory[SPH as usize] as u16;
        lo | (hi << 8)
    }

    fn set_sp(&mut self, value: u16) {
        self.memory[SPL as usize] = (value & 0xFF) as u8;
        self.memory[SPH as usize] = (value >> 8) as u8;
    }

    fn pair_value(&self, pair: RegisterPair) -> u16 {
        let lo = pair.low_address() as u16;
        self.memory[lo as usize] as u16 | ((self.memory[lo as usize + 1] as u16) << 8)
    }

    fn set_pair_value(&mut self, pair: RegisterPair, value: u16) {
        let lo = pair.low_address() as u16;
        self.memory[lo as usize] = (value & 0xFF) as u8;
        self.memory[lo as usize + 1] = (value >> 8) as u8;
    }

    /// the common arithmetic primitive behind ADD/ADC/ADIW/SBIW: computes
    /// `memory[addr] + operand` in 16-bit unsigned arithmetic, updates
    /// C/Z/N/V/H/S, and writes the low 8 bits back.
    fn add_byte(&mut self, addr: u16, operand: u8) {
        let reg = self.memory[addr as usize];
        let result: u16 = reg as u16 + operand as u16;
        let res8 = (result & 0xFF) as u8;

        let carry = result & 0x100 != 0;
        let zero = res8 == 0;
        let negative = res8 & 0x80 != 0;

        let reg_sign = reg & 0x80 != 0;
        let op_sign = operand & 0x80 != 0;
        let res_sign = res8 & 0x80 != 0;
        let overflow = reg_sign == op_sign && res_sign != reg_sign;

        let half_carry = (reg ^ operand ^ res8) & 0x10 != 0;

        self.toggle_flag(sreg_flag::C, carry);
        self.toggle_flag(sreg_flag::Z, zero);
        self.toggle_flag(sreg_flag::N, negative);
        self.toggle_flag(sreg_flag::V, overflow);
        self.toggle_flag(sreg_flag::H, half_carry);
        self.update_sign();

        self.memory[addr as usize] = res8;
    }

    /// `sub_byte(reg, x)` is `add_byte(reg, !x + 1)` with `C` overridden to
    /// reflect an actual borrow, per `spec.md` §4.D.
    fn sub_byte(&mut self, addr: u16, operand: u8) {
        let original = self.memory[addr as usize];
        let negated = (!operand).wrapping_add(1);
        self.add_byte(addr, negated);
        self.toggle_flag(sreg_flag::C, operand > original);
    }

    fn adiw(&mut self, pair: RegisterPair, k: u8) {
        let h = self.flag(sreg_flag::H);
        let lo = pair.low_address() as u16;
        let hi = lo + 1;
        self.add_byte(lo, k);
        let carry_out = self.flag(sreg_flag::C) as u8;
        self.add_byte(hi, carry_out);
        self.toggle_flag(sreg_flag::H, h);
    }

    fn sbiw(&mut self, pair: RegisterPair, k: u8) {
        let h = self.flag(sreg_flag::H);
        let lo = pair.low_address() as u16;
        let hi = lo + 1;
        self.sub_byte(lo, k);
        let carry_out = self.flag(sreg_flag::C) as u8;
        self.sub_byte(hi, carry_out);
        self.toggle_flag(sreg_flag::H, h);
    }

    /// shared comparison core for CP/CPC/CPI: `memory[rd] - operand (-
    /// carry_in)`, without writeback. when `clear_z_only` is set (CPC), the
    /// Z flag is only ever cleared, never set, so it survives across a
    /// multi-byte compare.
    /// mirrors `original_source/simulator/src/simulator.cpp`'s `cp`/`cpc`/
    /// `cpi`: the 16-bit difference is taken over the *unsigned* byte values
    /// (not sign-extended), and overflow is flagged whenever that difference
    /// falls outside `i8`'s range. This is the simulator's own definition of
    /// V for a compare, not a bit-level carry/sign derivation.
    fn compare(&mut self, rd: u8, operand: u8, carry_in: bool, clear_z_only: bool) {
        let rd_value = self.memory[rd as usize];
        let carry = carry_in as i16;
        let res: i16 = rd_value as i16 - operand as i16 - carry;
        let res8 = (res & 0xFF) as u8;

        let overflow = !(i8::MIN as i16..=i8::MAX as i16).contains(&res);
        self.toggle_flag(sreg_flag::V, overflow);

        if clear_z_only {
            if res8 != 0 {
                self.toggle_flag(sreg_flag::Z, false);
            }
        } else {
            self.toggle_flag(sreg_flag::Z, res8 == 0);
        }

        let borrow = operand as u16 + carry_in as u16 > rd_value as u16;
        self.toggle_flag(sreg_flag::C, borrow);
        self.toggle_flag(sreg_flag::N, res8 & 0x80 != 0);
        self.update_sign();
    }

    fn eor(&mut self, rd: u8, rr: u8) {
        let result = self.memory[rd as usize] ^ self.memory[rr as usize];
        self.memory[rd as usize] = result;
        self.toggle_flag(sreg_flag::V, false);
        self.toggle_flag(sreg_flag::N, result & 0x80 != 0);
        self.toggle_flag(sreg_flag::Z, result == 0);
        self.update_sign();
    }

    fn push(&mut self, value: u8) {
        let sp = self.sp();
        self.memory[sp as usize] = value;
        self.set_sp(sp.wrapping_sub(1));
    }

    fn pop(&mut self) -> u8 {
        let sp = self.sp().wrapping_add(1);
        self.set_sp(sp);
        self.memory[sp as usize]
    }

    fn call(&mut self, target: u16, return_to: u16) {
        let sp = self.sp();
        self.memory[sp as usize] = (return_to >> 8) as u8;
        self.memory[sp.wrapping_sub(1) as usize] = (return_to & 0xFF) as u8;
        self.set_sp(sp.wrapping_sub(2));
        self.pc = target;
    }

    fn ret(&mut self) {
        let sp = self.sp();
        let lo = self.memory[sp.wrapping_add(1) as usize];
        let hi = self.memory[sp.wrapping_add(2) as usize];
        self.set_sp(sp.wrapping_add(2));
        self.pc = (lo as u16) | ((hi as u16) << 8);
    }

    fn lpm(&mut self, rd: u8) {
        let z = self.pair_value(RegisterPair::Z);
        let word = self.flash[(z >> 1) as usize];
        let value = if z & 1 == 0 {
            (word & 0xFF) as u8
        } else {
            (word >> 8) as u8
        };
        self.memory[rd as usize] = value;
        self.set_pair_value(RegisterPair::Z, z.wrapping_add(1));
    }

    fn stx(&mut self, rd: u8) {
        let x = self.pair_value(RegisterPair::X);
        self.memory[x as usize] = self.memory[rd as usize];
        self.set_pair_value(RegisterPair::X, x.wrapping_add(1));
    }
}
