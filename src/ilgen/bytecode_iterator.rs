use super::{Error, InternalError};
use crate::jvm::{ByteCode, ConstantIndex, OperandShape};
use byteorder::{BigEndian, ReadBytesExt};
use std::convert::TryFrom;

/// Decoded operands of an instruction
///
/// Branch offsets are already made absolute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operands {
    None,
    /// `bipush`/`sipush` value
    Immediate(i32),
    Constant(ConstantIndex),
    Local(u16),
    Increment {
        local: u16,
        delta: i16,
    },
    Branch(usize),
    InterfaceCall {
        index: ConstantIndex,
        count: u8,
    },
    /// `newarray` element type code
    ArrayType(u8),
    MultiArray {
        index: ConstantIndex,
        dimensions: u8,
    },
    TableSwitch {
        default: usize,
        low: i32,
        targets: Vec<usize>,
    },
    LookupSwitch {
        default: usize,
        pairs: Vec<(i32, usize)>,
    },
}

/// One decoded instruction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub bc_index: usize,

    /// Opcode byte (for `wide` instructions, the opcode after the prefix)
    pub raw: u8,

    /// `None` for bytes the instruction set leaves unassigned
    pub op: Option<ByteCode>,

    /// Was the instruction prefixed by `wide`?
    pub wide: bool,

    /// Length in bytes, including any `wide` prefix and switch padding
    pub length: usize,

    pub operands: Operands,
}

impl Instruction {
    /// Bytecode index of the instruction that follows
    pub fn next_index(&self) -> usize {
        self.bc_index + self.length
    }

    pub fn byte_code(&self) -> Result<ByteCode, Error> {
        self.op
            .ok_or(Error::Internal(InternalError::MalformedByteCode(self.bc_index)))
    }

    /// Every explicit branch target (switch targets included, in case order with the default last)
    pub fn branch_targets(&self) -> Vec<usize> {
        match &self.operands {
            Operands::Branch(target) => vec![*target],
            Operands::TableSwitch {
                default, targets, ..
            } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            Operands::LookupSwitch { default, pairs } => {
                let mut all: Vec<usize> = pairs.iter().map(|(_, target)| *target).collect();
                all.push(*default);
                all
            }
            _ => vec![],
        }
    }

    /// Local variable operand
    pub fn local(&self) -> Result<u16, Error> {
        match self.operands {
            Operands::Local(local) | Operands::Increment { local, .. } => Ok(local),
            _ => Err(Error::Internal(InternalError::MalformedByteCode(self.bc_index))),
        }
    }

    /// Constant pool operand
    pub fn constant_index(&self) -> Result<ConstantIndex, Error> {
        match self.operands {
            Operands::Constant(index)
            | Operands::InterfaceCall { index, .. }
            | Operands::MultiArray { index, .. } => Ok(index),
            _ => Err(Error::Internal(InternalError::MalformedByteCode(self.bc_index))),
        }
    }
}

/// Decodes instructions out of a method's bytecode
///
/// Iterating produces the instructions in order. Raw accessors read operand bytes at arbitrary
/// positions, which is how the decoder itself is written.
pub struct ByteCodeIterator<'a> {
    code: &'a [u8],
    bc_index: usize,
}

impl<'a> ByteCodeIterator<'a> {
    pub fn new(code: &'a [u8]) -> ByteCodeIterator<'a> {
        ByteCodeIterator { code, bc_index: 0 }
    }

    /// Index of the next instruction to be produced
    pub fn current_index(&self) -> usize {
        self.bc_index
    }

    /// Continue iteration from another instruction
    pub fn seek(&mut self, bc_index: usize) {
        self.bc_index = bc_index;
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    fn bytes_at(&self, at: usize) -> Result<&'a [u8], Error> {
        self.code
            .get(at..)
            .ok_or(Error::Internal(InternalError::MalformedByteCode(at)))
    }

    fn malformed<E>(at: usize) -> impl FnOnce(E) -> Error {
        move |_| Error::Internal(InternalError::MalformedByteCode(at))
    }

    pub fn read_u8(&self, at: usize) -> Result<u8, Error> {
        self.bytes_at(at)?.read_u8().map_err(Self::malformed(at))
    }

    pub fn read_i8(&self, at: usize) -> Result<i8, Error> {
        self.bytes_at(at)?.read_i8().map_err(Self::malformed(at))
    }

    pub fn read_u16(&self, at: usize) -> Result<u16, Error> {
        self.bytes_at(at)?
            .read_u16::<BigEndian>()
            .map_err(Self::malformed(at))
    }

    pub fn read_i16(&self, at: usize) -> Result<i16, Error> {
        self.bytes_at(at)?
            .read_i16::<BigEndian>()
            .map_err(Self::malformed(at))
    }

    pub fn read_i32(&self, at: usize) -> Result<i32, Error> {
        self.bytes_at(at)?
            .read_i32::<BigEndian>()
            .map_err(Self::malformed(at))
    }

    /// Absolute branch target, checked to lie within the code
    fn target(&self, bc_index: usize, offset: i32) -> Result<usize, Error> {
        let target = bc_index as i64 + offset as i64;
        if target < 0 {
            Err(Error::Internal(InternalError::MalformedByteCode(bc_index)))
        } else if target as usize >= self.code.len() {
            Err(Error::Internal(InternalError::MissingBranchTarget(
                target as usize,
            )))
        } else {
            Ok(target as usize)
        }
    }

    /// Decode the instruction starting at `bc_index`
    pub fn decode(&self, bc_index: usize) -> Result<Instruction, Error> {
        let raw = self.read_u8(bc_index)?;
        let op = match ByteCode::try_from(raw) {
            Ok(op) => op,
            Err(_) => {
                return Ok(Instruction {
                    bc_index,
                    raw,
                    op: None,
                    wide: false,
                    length: 1,
                    operands: Operands::None,
                })
            }
        };

        if op == ByteCode::Wide {
            return self.decode_wide(bc_index);
        }

        let at = bc_index + 1;
        let (length, operands) = match op.operand_shape() {
            OperandShape::None => (1, Operands::None),
            OperandShape::Byte => (2, Operands::Immediate(self.read_i8(at)? as i32)),
            OperandShape::Short => (3, Operands::Immediate(self.read_i16(at)? as i32)),
            OperandShape::ConstantIndex8 => (
                2,
                Operands::Constant(ConstantIndex(self.read_u8(at)? as u16)),
            ),
            OperandShape::ConstantIndex16 => {
                (3, Operands::Constant(ConstantIndex(self.read_u16(at)?)))
            }
            OperandShape::Local => (2, Operands::Local(self.read_u8(at)? as u16)),
            OperandShape::LocalIncrement => (
                3,
                Operands::Increment {
                    local: self.read_u8(at)? as u16,
                    delta: self.read_i8(at + 1)? as i16,
                },
            ),
            OperandShape::Branch16 => {
                let offset = self.read_i16(at)? as i32;
                (3, Operands::Branch(self.target(bc_index, offset)?))
            }
            OperandShape::Branch32 => {
                let offset = self.read_i32(at)?;
                (5, Operands::Branch(self.target(bc_index, offset)?))
            }
            OperandShape::InterfaceCall => (
                5,
                Operands::InterfaceCall {
                    index: ConstantIndex(self.read_u16(at)?),
                    count: self.read_u8(at + 2)?,
                },
            ),
            OperandShape::DynamicCall => (5, Operands::Constant(ConstantIndex(self.read_u16(at)?))),
            OperandShape::ArrayType => (2, Operands::ArrayType(self.read_u8(at)?)),
            OperandShape::MultiArray => (
                4,
                Operands::MultiArray {
                    index: ConstantIndex(self.read_u16(at)?),
                    dimensions: self.read_u8(at + 2)?,
                },
            ),
            OperandShape::TableSwitch => self.decode_table_switch(bc_index)?,
            OperandShape::LookupSwitch => self.decode_lookup_switch(bc_index)?,
            OperandShape::Wide => {
                return Err(Error::Internal(InternalError::MalformedByteCode(bc_index)))
            }
        };

        // Operands must lie entirely within the code
        if bc_index + length > self.code.len() {
            return Err(Error::Internal(InternalError::MalformedByteCode(bc_index)));
        }

        Ok(Instruction {
            bc_index,
            raw,
            op: Some(op),
            wide: false,
            length,
            operands,
        })
    }

    fn decode_wide(&self, bc_index: usize) -> Result<Instruction, Error> {
        let raw = self.read_u8(bc_index + 1)?;
        let op = ByteCode::try_from(raw).map_err(Self::malformed(bc_index))?;
        let local = self.read_u16(bc_index + 2)?;
        let (length, operands) = match op.operand_shape() {
            OperandShape::Local => (4, Operands::Local(local)),
            OperandShape::LocalIncrement => (
                6,
                Operands::Increment {
                    local,
                    delta: self.read_i16(bc_index + 4)?,
                },
            ),
            _ => return Err(Error::Internal(InternalError::MalformedByteCode(bc_index))),
        };
        Ok(Instruction {
            bc_index,
            raw,
            op: Some(op),
            wide: true,
            length,
            operands,
        })
    }

    /// First operand byte of a switch (operands are 4-byte aligned relative to the method start)
    fn switch_operands_start(bc_index: usize) -> usize {
        (bc_index + 4) & !3
    }

    fn decode_table_switch(&self, bc_index: usize) -> Result<(usize, Operands), Error> {
        let start = Self::switch_operands_start(bc_index);
        let default = self.target(bc_index, self.read_i32(start)?)?;
        let low = self.read_i32(start + 4)?;
        let high = self.read_i32(start + 8)?;
        if high < low {
            return Err(Error::Internal(InternalError::MalformedByteCode(bc_index)));
        }

        let count = (high as i64 - low as i64 + 1) as usize;
        let mut targets = vec![];
        for i in 0..count {
            let offset = self.read_i32(start + 12 + 4 * i)?;
            targets.push(self.target(bc_index, offset)?);
        }

        let length = start + 12 + 4 * count - bc_index;
        Ok((
            length,
            Operands::TableSwitch {
                default,
                low,
                targets,
            },
        ))
    }

    fn decode_lookup_switch(&self, bc_index: usize) -> Result<(usize, Operands), Error> {
        let start = Self::switch_operands_start(bc_index);
        let default = self.target(bc_index, self.read_i32(start)?)?;
        let count = self.read_i32(start + 4)?;
        if count < 0 {
            return Err(Error::Internal(InternalError::MalformedByteCode(bc_index)));
        }

        let count = count as usize;
        let mut pairs = vec![];
        for i in 0..count {
            let key = self.read_i32(start + 8 + 8 * i)?;
            let offset = self.read_i32(start + 12 + 8 * i)?;
            pairs.push((key, self.target(bc_index, offset)?));
        }

        let length = start + 8 + 8 * count - bc_index;
        Ok((length, Operands::LookupSwitch { default, pairs }))
    }
}

impl<'a> Iterator for ByteCodeIterator<'a> {
    type Item = Result<Instruction, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bc_index >= self.code.len() {
            return None;
        }
        let decoded = self.decode(self.bc_index);
        match &decoded {
            Ok(instruction) => self.bc_index = instruction.next_index(),
            Err(_) => self.bc_index = self.code.len(),
        }
        Some(decoded)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simple_sequence() {
        // iconst_1; bipush -2; iadd; ifeq -1 (back to iadd); return
        let code = [0x04, 0x10, 0xfe, 0x60, 0x99, 0xff, 0xff, 0xb1];
        let instructions: Vec<Instruction> = ByteCodeIterator::new(&code)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(instructions.len(), 5);
        assert_eq!(instructions[1].operands, Operands::Immediate(-2));
        assert_eq!(instructions[2].bc_index, 3);
        assert_eq!(instructions[3].operands, Operands::Branch(3));
        assert_eq!(instructions[4].op, Some(ByteCode::Return));
        assert_eq!(instructions[4].next_index(), code.len());
    }

    #[test]
    fn wide_forms() {
        // wide iload 0x0102; wide iinc 0x0003 -1000
        let code = [0xc4, 0x15, 0x01, 0x02, 0xc4, 0x84, 0x00, 0x03, 0xfc, 0x18];
        let iter = ByteCodeIterator::new(&code);

        let load = iter.decode(0).unwrap();
        assert!(load.wide);
        assert_eq!(load.op, Some(ByteCode::ILoad));
        assert_eq!(load.length, 4);
        assert_eq!(load.local().unwrap(), 0x0102);

        let inc = iter.decode(4).unwrap();
        assert_eq!(inc.length, 6);
        assert_eq!(
            inc.operands,
            Operands::Increment {
                local: 3,
                delta: -1000
            }
        );
    }

    #[test]
    fn switch_padding_is_relative_to_method_start() {
        let mut code = vec![0x00, 0xaa, 0x00, 0x00];
        for word in &[20i32, 0, 1, 24, 24] {
            code.extend_from_slice(&word.to_be_bytes());
        }
        code.resize(30, 0x00);

        let switch = ByteCodeIterator::new(&code).decode(1).unwrap();
        assert_eq!(switch.length, 23);
        assert_eq!(
            switch.operands,
            Operands::TableSwitch {
                default: 21,
                low: 0,
                targets: vec![25, 25],
            }
        );
        assert_eq!(switch.branch_targets(), vec![25, 25, 21]);

        let mut code = vec![0xab, 0x00, 0x00, 0x00];
        for word in &[12i32, 1, 7, 12] {
            code.extend_from_slice(&word.to_be_bytes());
        }
        code.push(0xb1);
        let lookup = ByteCodeIterator::new(&code).decode(0).unwrap();
        assert_eq!(lookup.length, 20);
        assert_eq!(
            lookup.operands,
            Operands::LookupSwitch {
                default: 12,
                pairs: vec![(7, 12)],
            }
        );
    }

    #[test]
    fn bad_instructions() {
        let iter = ByteCodeIterator::new(&[0xcb, 0xa7, 0x00, 0x10, 0x11, 0x00]);
        let unknown = iter.decode(0).unwrap();
        assert_eq!(unknown.op, None);
        assert_eq!(unknown.length, 1);
        assert_eq!(
            iter.decode(1),
            Err(Error::Internal(InternalError::MissingBranchTarget(17)))
        );
        assert_eq!(
            iter.decode(4),
            Err(Error::Internal(InternalError::MalformedByteCode(5)))
        );
    }
}
