//! # `avrsim`, an instruction decoder and interpreter for the ATmega168 core
//! of the AVR instruction set.
//!
//! this crate recognizes the 24-instruction subset of the AVR instruction
//! set described in its design notes: enough to run small hand-assembled or
//! compiler-generated programs that stick to straight-line arithmetic,
//! comparisons, direct/indirect memory access, and the usual call/branch
//! control flow.
//!
//! ## usage
//!
//! decode a single instruction word with [`decoder::decode`]:
//!
//! ```
//! use avrsim::decoder::decode;
//!
//! let inst = decode(&[0b1001_0101_0000_1000]).unwrap();
//! assert_eq!("ret", inst.to_string());
//! ```
//!
//! or load a program into an [`interpreter::Interpreter`] and run it:
//!
//! ```
//! use avrsim::board::ATMEGA168;
//! use avrsim::interpreter::Interpreter;
//! use avrsim::segment::SliceSegment;
//!
//! // a single `ret` instruction, little-endian.
//! let text = SliceSegment::new(0, vec![0x08, 0x95]);
//! let mut interp = Interpreter::new(ATMEGA168);
//! interp.load(&text, &[]);
//! interp.step().unwrap();
//! assert_eq!(interp.pc(), 0); // ret with an all-zero stack returns to 0
//! ```
//!
//! additionally, `avrsim` implements the `yaxpeax-arch` traits most useful
//! for generic tooling: [`yaxpeax_arch::Instruction`] and
//! [`yaxpeax_arch::LengthedInstruction`] on [`instruction::Instruction`],
//! [`yaxpeax_arch::Arch`] on the unit struct [`Avr`], and
//! [`yaxpeax_arch::Decoder<Avr>`](yaxpeax_arch::Decoder) on
//! [`decoder::InstDecoder`] for callers who already have a generic
//! `yaxpeax_arch::Reader` of their own. the crate's own
//! [`decoder::decode`]/[`decoder::InstDecoder::decode_slice`] remain the
//! primary entry point, since they report the richer [`AvrError`] rather
//! than `yaxpeax_arch`'s [`yaxpeax_arch::StandardDecodeError`].

pub mod bits;
pub mod board;
pub mod decoder;
pub mod display;
pub mod error;
pub mod instruction;
pub mod interpreter;
pub mod segment;

pub use decoder::{decode, InstDecoder};
pub use error::AvrError;
pub use instruction::{Instruction, Mnemonic, Operand, RegisterPair};

use yaxpeax_arch::{Arch, StandardDecodeError};

/// a trivial struct for [`yaxpeax_arch::Arch`] to be implemented on; it only
/// carries the associated type parameters.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct Avr;

impl Arch for Avr {
    type Address = u16;
    type Word = u16;
    type Instruction = Instruction;
    type Decoder = InstDecoder;
    type DecodeError = StandardDecodeError;
    type Operand = Operand;
}
