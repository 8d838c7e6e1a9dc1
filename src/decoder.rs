//! the pattern-driven instruction decoder (module C).
//!
//! the rule table below is `spec.md` §4.C's table, copied essentially
//! verbatim as pattern strings. each pattern is compiled once, on first use,
//! into a `(mask, value, fields)` triple: `mask`/`value` pick out the fixed
//! opcode bits, and `fields` maps each field character to the ordered list
//! of bit positions it names (repeated characters span multiple, possibly
//! non-contiguous, bit positions — this is what correctly reconstructs e.g.
//! `ADD`'s `Rr`, whose bits are split across position 6 and positions
//! 12-15).

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::bits::{bits_at, two_complement};
use crate::error::AvrError;
use crate::instruction::{Instruction, Mnemonic, Operand, RegisterPair};

type FieldMap = HashMap<char, Vec<usize>>;

struct Rule {
    mnemonic: Mnemonic,
    mask: u16,
    value: u16,
    fields: FieldMap,
}

fn compile_pattern(mnemonic: Mnemonic, pattern: &str) -> Rule {
    let mut mask = 0u16;
    let mut value = 0u16;
    let mut fields: FieldMap = HashMap::new();
    let mut pos = 0usize;
    for ch in pattern.chars() {
        if ch == ' ' {
            continue;
        }
        match ch {
            '0' => {
                mask |= 1 << (15 - pos);
            }
            '1' => {
                mask |= 1 << (15 - pos);
                value |= 1 << (15 - pos);
            }
            c => {
                fields.entry(c).or_insert_with(Vec::new).push(pos);
            }
        }
        pos += 1;
    }
    debug_assert_eq!(pos, 16, "pattern {:?} is not 16 bits wide", pattern);
    Rule { mnemonic, mask, value, fields }
}

fn rules() -> &'static Vec<Rule> {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        use Mnemonic::*;
        vec![
            compile_pattern(Ret, "1001 0101 0000 1000"),
            compile_pattern(Add, "0000 11r ddddd rrrr"),
            compile_pattern(Adc, "0001 11r ddddd rrrr"),
            compile_pattern(Cp, "0001 01r ddddd rrrr"),
            compile_pattern(Cpc, "0000 01r ddddd rrrr"),
            compile_pattern(Eor, "0010 01r ddddd rrrr"),
            compile_pattern(Ldi, "1110 KKKK dddd KKKK"),
            compile_pattern(Cpi, "0011 KKKK dddd KKKK"),
            compile_pattern(Brge, "1111 01uu uuuu u100"),
            compile_pattern(Brne, "1111 01uu uuuu u001"),
            compile_pattern(Rjmp, "1100 uuuu uuuu uuuu"),
            compile_pattern(Rcall, "1101 uuuu uuuu uuuu"),
            compile_pattern(In, "1011 0aa ddddd aaaa"),
            compile_pattern(Out, "1011 1aa ddddd aaaa"),
            compile_pattern(Adiw, "1001 0110 kkpp kkkk"),
            compile_pattern(Sbiw, "1001 0111 kkpp kkkk"),
            compile_pattern(Push, "1001 001 ddddd 1111"),
            compile_pattern(Pop, "1001 000 ddddd 1111"),
            compile_pattern(Stx, "1001 001 ddddd 1101"),
            compile_pattern(Lpm, "1001 000 ddddd 0101"),
            // 32-bit instructions: the second program word carries the
            // address/immediate.
            compile_pattern(Sts, "1001 001 ddddd 0000"),
            compile_pattern(Lds, "1001 000 ddddd 0000"),
            compile_pattern(Call, "1001 010 kkkkk 111k"),
            compile_pattern(Jmp, "1001 010 kkkkk 110k"),
        ]
    })
}

/// decodes the instruction encoded by `words`. `words[0]` is the instruction
/// word; for 32-bit instructions (`CALL`, `JMP`, `LDS`, `STS`) `words[1]`
/// supplies the address, and the caller is responsible for making sure it is
/// present (the decoder does not bound-check beyond what `words` naturally
/// provides, matching `spec.md` §7's caller-error stance on malformed
/// input).
pub fn decode(words: &[u16]) -> Result<Instruction, AvrError> {
    let word = words[0];

    if let Some(rule) = match_rule(word) {
        return Ok(build_instruction(rule, word, words));
    }

    let second = words.get(1).copied().unwrap_or(0);
    Err(AvrError::InvalidInstruction {
        word,
        bytes: [
            (word >> 8) as u8,
            (word & 0xFF) as u8,
            (second >> 8) as u8,
            (second & 0xFF) as u8,
        ],
    })
}

/// finds the first rule whose fixed bits match `word`, without touching any
/// following word. this is split out from [`decode`] so a generic
/// [`yaxpeax_arch::Reader`]-backed caller (see the `Decoder` impl below) can
/// learn whether a second flash word needs to be fetched *before* reading
/// one, rather than guessing.
fn match_rule(word: u16) -> Option<&'static Rule> {
    rules().iter().find(|rule| word & rule.mask == rule.value)
}

/// true for the four mnemonics whose encoding spans two program words.
fn is_32_bit(mnemonic: Mnemonic) -> bool {
    matches!(mnemonic, Mnemonic::Call | Mnemonic::Jmp | Mnemonic::Lds | Mnemonic::Sts)
}

/// a convenience entry point mirroring `InstDecoder::decode_slice` from the
/// `yaxpeax-avnera` decoder this crate is patterned after.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct InstDecoder;

impl InstDecoder {
    pub fn decode_slice(words: &[u16]) -> Result<Instruction, AvrError> {
        decode(words)
    }
}

impl yaxpeax_arch::Decoder<crate::Avr> for InstDecoder {
    fn decode_into<T: yaxpeax_arch::Reader<<crate::Avr as yaxpeax_arch::Arch>::Address, <crate::Avr as yaxpeax_arch::Arch>::Word>>(
        &self,
        inst: &mut Instruction,
        words: &mut T,
    ) -> Result<(), <crate::Avr as yaxpeax_arch::Arch>::DecodeError> {
        use yaxpeax_arch::StandardDecodeError;

        words.mark();
        let w0 = words.next()?;
        let rule = match_rule(w0).ok_or(StandardDecodeError::InvalidOpcode)?;

        let decoded = if is_32_bit(rule.mnemonic) {
            let w1 = words.next()?;
            build_instruction(rule, w0, &[w0, w1])
        } else {
            build_instruction(rule, w0, &[w0])
        };

        *inst = decoded;
        Ok(())
    }
}

fn extract(fields: &FieldMap, name: char, word: u16) -> u16 {
    match fields.get(&name) {
        Some(positions) => bits_at(word, positions),
        None => 0,
    }
}

fn build_instruction(rule: &Rule, word: u16, words: &[u16]) -> Instruction {
    use Mnemonic::*;

    match rule.mnemonic {
        Ret => Instruction::new(Ret, 1, Operand::None),

        Add | Adc | Cp | Cpc | Eor => {
            let rr = extract(&rule.fields, 'r', word) as u8;
            let rd = extract(&rule.fields, 'd', word) as u8;
            Instruction::new(
                rule.mnemonic,
                1,
                Operand::RegReg { rd, rr, carry_in: false },
            )
        }

        Ldi | Cpi => {
            let k = extract(&rule.fields, 'K', word) as u8;
            let rd = extract(&rule.fields, 'd', word) as u8 + 16;
            Instruction::new(rule.mnemonic, 1, Operand::ConstReg { k, rd })
        }

        Brge | Brne => {
            let u = extract(&rule.fields, 'u', word);
            let offset = two_complement(u, 7) as i8;
            Instruction::new(rule.mnemonic, 1, Operand::Offset7 { offset })
        }

        Rjmp | Rcall => {
            let u = extract(&rule.fields, 'u', word);
            let offset = two_complement(u, 12) as i16;
            Instruction::new(rule.mnemonic, 1, Operand::Offset12 { offset })
        }

        In | Out => {
            let io_addr = extract(&rule.fields, 'a', word) as u8;
            let rd = extract(&rule.fields, 'd', word) as u8;
            Instruction::new(rule.mnemonic, 1, Operand::IoAddrReg { io_addr, rd })
        }

        Adiw | Sbiw => {
            let k = extract(&rule.fields, 'k', word) as u8;
            let pair = RegisterPair::from_code(extract(&rule.fields, 'p', word));
            Instruction::new(rule.mnemonic, 1, Operand::ConstPair { k, pair })
        }

        Push | Pop | Stx | Lpm => {
            let rd = extract(&rule.fields, 'd', word) as u8;
            Instruction::new(rule.mnemonic, 1, Operand::Reg { rd })
        }

        Sts | Lds => {
            let rd = extract(&rule.fields, 'd', word) as u8;
            let address = words[1];
            Instruction::new(rule.mnemonic, 2, Operand::RegAddress { rd, address })
        }

        Call | Jmp => {
            // the low bits of the first word would carry the upper address
            // bits on AVR parts with more than 64K words of flash; for the
            // ATmega168 (flash_end = 8192 words) they are always zero, so
            // the address is simply the second word.
            let address = words[1];
            Instruction::new(rule.mnemonic, 2, Operand::Address { address })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Operand;

    #[test]
    fn decodes_ret() {
        let instr = decode(&[0b1001_0101_0000_1000]).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Ret);
        assert_eq!(instr.size, 1);
        assert_eq!(instr.operand, Operand::None);
    }

    #[test]
    fn decodes_adiw_x_22() {
        // adiw X,22: 1001 0110 01 01 0110
        let instr = decode(&[0b1001_0110_0101_0110]).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Adiw);
        match instr.operand {
            Operand::ConstPair { k, pair } => {
                assert_eq!(k, 22);
                assert_eq!(pair, RegisterPair::X);
            }
            other => panic!("unexpected operand {:?}", other),
        }
    }

    #[test]
    fn decodes_ldi_upper_half_registers() {
        // ldi r20, 0x5a: 1110 0101 0100 1010
        let instr = decode(&[0b1110_0101_0100_1010]).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Ldi);
        match instr.operand {
            Operand::ConstReg { k, rd } => {
                assert_eq!(rd, 20);
                assert_eq!(k, 0x5a);
            }
            other => panic!("unexpected operand {:?}", other),
        }
    }

    #[test]
    fn decodes_add_with_split_register_field() {
        // add r1, r17: 0000 11d ddddd rrrr with d=1 (00001), r=17 (10001)
        // encoded bit6 ('r' MSB)=1, ddddd=00001, rrrr=0001
        let word = 0b0000_11_1_00001_0001u16;
        let instr = decode(&[word]).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Add);
        match instr.operand {
            Operand::RegReg { rd, rr, carry_in } => {
                assert_eq!(rd, 1);
                assert_eq!(rr, 17);
                assert!(!carry_in);
            }
            other => panic!("unexpected operand {:?}", other),
        }
    }

    #[test]
    fn decodes_32_bit_call() {
        // call 0x0006: 1001 010 00000 111 0, then address word 0x0006
        let word0 = 0b1001_010_00000_1110u16;
        let instr = decode(&[word0, 0x0006]).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Call);
        assert_eq!(instr.size, 2);
        assert_eq!(instr.operand, Operand::Address { address: 6 });
    }

    #[test]
    fn rejects_unmatched_word() {
        // all-zero word matches no rule (closest pattern prefixes require
        // nonzero high bits or a specific low nibble).
        let err = decode(&[0b0100_0000_0000_0000]).unwrap_err();
        assert!(matches!(err, AvrError::InvalidInstruction { .. }));
    }

    #[test]
    fn every_rule_round_trips_its_mnemonic() {
        for rule in rules() {
            let word = rule.value | (!rule.mask & sample_dont_cares(rule));
            let second = if matches!(
                rule.mnemonic,
                Mnemonic::Call | Mnemonic::Jmp | Mnemonic::Sts | Mnemonic::Lds
            ) {
                Some(0u16)
            } else {
                None
            };
            let words: Vec<u16> = match second {
                Some(w1) => vec![word, w1],
                None => vec![word],
            };
            let decoded = decode(&words).unwrap_or_else(|e| {
                panic!("rule for {:?} failed to decode its own pattern: {}", rule.mnemonic, e)
            });
            assert_eq!(decoded.mnemonic, rule.mnemonic);
        }
    }

    fn sample_dont_cares(_rule: &Rule) -> u16 {
        0
    }
}
