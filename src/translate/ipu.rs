//! IPU control-core instruction stream

use std::fmt::Write;

use crate::error::{CompileError, CompileResult};
use crate::ir::{Module, Operation};

const TARGET: &str = "ipu";

/// Stream header: version 0.1.3.6, little-endian packed
const HEADER: u32 = 0x0603_0100;

const OP_WRITE32: u32 = 0x02;
const OP_SYNC: u32 = 0x03;
const OP_ADDRESS_PATCH: u32 = 0x04;
const OP_WRITEBD: u32 = 0x06;

fn field(op: &Operation, value: Option<i64>, what: &str) -> CompileResult<u32> {
    let value = value.ok_or_else(|| {
        CompileError::translation(TARGET, format!("{} is missing '{}'", op.name, what))
    })?;
    u32::try_from(value).map_err(|_| {
        CompileError::translation(
            TARGET,
            format!("{} field '{}' does not fit a word: {}", op.name, what, value),
        )
    })
}

fn opcode(code: u32, column: u32, row: u32) -> u32 {
    code << 24 | (column & 0xFF) << 16 | (row & 0xFF) << 8
}

fn encode(op: &Operation, words: &mut Vec<u32>) -> CompileResult<()> {
    match op.name.as_str() {
        "aiex.ipu.write32" => {
            let column = field(op, op.operand_int(0), "column")?;
            let row = field(op, op.operand_int(1), "row")?;
            words.push(opcode(OP_WRITE32, column, row));
            words.push(field(op, op.int_attr("address"), "address")?);
            words.push(field(op, op.int_attr("value"), "value")?);
        }
        "aiex.ipu.writebd_shimtile" => {
            let column = field(op, op.operand_int(0), "column")?;
            words.push(opcode(OP_WRITEBD, column, 0));
            words.push(field(op, op.operand_int(1), "bd_id")?);
            words.push(field(op, op.int_attr("buffer_length"), "buffer_length")?);
            words.push(field(op, op.int_attr("buffer_offset"), "buffer_offset")?);
            words.push(field(op, op.int_attr("arg_idx"), "arg_idx")?);
        }
        "aiex.ipu.address_patch" => {
            words.push(opcode(OP_ADDRESS_PATCH, 0, 0));
            words.push(field(op, op.operand_int(0), "address")?);
            words.push(field(op, op.operand_int(1), "arg_idx")?);
            words.push(field(op, op.operand_int(2), "offset")?);
        }
        "aiex.ipu.sync" => {
            let column = field(op, op.operand_int(0), "column")?;
            let row = field(op, op.operand_int(1), "row")?;
            let direction = field(op, op.operand_int(2), "direction")?;
            let channel = field(op, op.operand_int(3), "channel")?;
            let columns = field(op, op.operand_int(4), "column_num")?;
            let rows = field(op, op.operand_int(5), "row_num")?;
            words.push(opcode(OP_SYNC, 0, 0));
            words.push(column << 16 | row << 8 | direction);
            words.push(channel << 16 | columns << 8 | rows);
        }
        "aiex.ipu.dma_memcpy_nd" => {
            return Err(CompileError::translation(
                TARGET,
                "aiex.ipu.dma_memcpy_nd must be lowered before translation",
            ))
        }
        other => {
            return Err(CompileError::translation(
                TARGET,
                format!("no encoding for '{}'", other),
            ))
        }
    }
    Ok(())
}

/// Encode every runtime-sequence instruction in program order
pub fn translate_to_ipu(module: &Module) -> CompileResult<Vec<u32>> {
    let instructions: Vec<&Operation> = module
        .walk()
        .into_iter()
        .map(|id| module.op(id))
        .filter(|op| op.name.starts_with("aiex.ipu."))
        .collect();

    let mut words = vec![HEADER, instructions.len() as u32];
    for op in instructions {
        encode(op, &mut words)?;
    }
    Ok(words)
}

/// One lower-case hex word per line
pub fn render_ipu_words(words: &[u32]) -> CompileResult<String> {
    let mut out = String::with_capacity(words.len() * 9);
    for word in words {
        writeln!(out, "{:08x}", word)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_sequence() {
        let module = parse_module(
            "func.func(@sequence) {
               aiex.ipu.write32(0, 0) {address = 119316, value = 1}
               aiex.ipu.sync(0, 0, 0, 0, 1, 1)
             }",
        )
        .unwrap();
        let words = translate_to_ipu(&module).unwrap();
        assert_eq!(
            words,
            vec![HEADER, 2, 0x0200_0000, 119316, 1, 0x0300_0000, 0, 0x0000_0101]
        );
        let text = render_ipu_words(&words).unwrap();
        assert!(text.starts_with("06030100\n00000002\n"));
        assert_eq!(text.lines().count(), 8);
    }

    #[test]
    fn test_unlowered_memcpy_fails() {
        let module = parse_module("aiex.ipu.dma_memcpy_nd(@x) {length = 4}").unwrap();
        let err = translate_to_ipu(&module).unwrap_err();
        assert!(err.to_string().contains("must be lowered"));
    }

    #[test]
    fn test_negative_field_rejected() {
        let module = parse_module("aiex.ipu.write32(0, 0) {address = -4, value = 0}").unwrap();
        assert!(translate_to_ipu(&module).is_err());
    }
}
