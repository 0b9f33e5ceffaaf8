//! LLVM IR text for the unified core module

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use crate::error::{CompileError, CompileResult};
use crate::ir::{Attribute, Module, OpId, Operation};

const TARGET: &str = "llvm-ir";

fn unsupported(op: &Operation) -> CompileError {
    CompileError::translation(TARGET, format!("cannot translate '{}' to LLVM IR", op.name))
}

fn typed(operand: &Attribute) -> CompileResult<String> {
    match operand {
        Attribute::Int(n) => Ok(format!("i32 {}", n)),
        Attribute::Symbol(s) => Ok(format!("ptr @{}", s)),
        Attribute::Value(v) => Ok(format!("i32 %{}", v)),
        other => Err(CompileError::translation(
            TARGET,
            format!("operand {} has no LLVM type", other),
        )),
    }
}

fn untyped(operand: &Attribute) -> CompileResult<String> {
    typed(operand).map(|text| text.split_once(' ').map_or(text.clone(), |(_, v)| v.to_string()))
}

fn binary_opcode(name: &str) -> Option<&'static str> {
    Some(match name {
        "llvm.addi" => "add",
        "llvm.subi" => "sub",
        "llvm.muli" => "mul",
        "llvm.andi" => "and",
        "llvm.ori" => "or",
        "llvm.xori" => "xor",
        "llvm.shli" => "shl",
        _ => return None,
    })
}

struct FunctionEmitter<'m> {
    module: &'m Module,
    out: String,
    block: String,
    counter: usize,
}

impl<'m> FunctionEmitter<'m> {
    fn new(module: &'m Module) -> Self {
        Self {
            module,
            out: String::new(),
            block: "entry".to_string(),
            counter: 0,
        }
    }

    fn next_label(&mut self, base: &str) -> String {
        self.counter += 1;
        format!("{}{}", base, self.counter)
    }

    fn start_block(&mut self, label: &str) -> CompileResult<()> {
        writeln!(self.out, "{}:", label)?;
        self.block = label.to_string();
        Ok(())
    }

    /// Pointer to element `index` of `base`, or `base` itself
    fn address(&mut self, base: &Attribute, index: Option<&Attribute>) -> CompileResult<String> {
        let base = untyped(base)?;
        match index {
            None => Ok(base),
            Some(index) => {
                let label = self.next_label("%gep");
                writeln!(
                    self.out,
                    "  {} = getelementptr inbounds i32, ptr {}, {}",
                    label,
                    base,
                    typed(index)?
                )?;
                Ok(label)
            }
        }
    }

    fn emit_region(&mut self, parent: OpId) -> CompileResult<()> {
        let module = self.module;
        for &child in module.children(Some(parent)) {
            self.emit_op(child)?;
        }
        Ok(())
    }

    fn emit_op(&mut self, id: OpId) -> CompileResult<()> {
        let module = self.module;
        let op = module.op(id);
        match op.name.as_str() {
            "llvm.call" => {
                let callee = op.operand_symbol(0).ok_or_else(|| unsupported(op))?;
                let args = op.operands[1..]
                    .iter()
                    .map(typed)
                    .collect::<CompileResult<Vec<_>>>()?
                    .join(", ");
                match &op.result {
                    Some(result) => {
                        writeln!(self.out, "  %{} = call i32 @{}({})", result, callee, args)?
                    }
                    None => writeln!(self.out, "  call void @{}({})", callee, args)?,
                }
            }
            "llvm.load" => {
                let result = op.result.as_deref().ok_or_else(|| unsupported(op))?;
                let base = op.operands.first().ok_or_else(|| unsupported(op))?;
                let pointer = self.address(base, op.operands.get(1))?;
                writeln!(self.out, "  %{} = load i32, ptr {}, align 4", result, pointer)?;
            }
            "llvm.store" => {
                let value = op.operands.first().ok_or_else(|| unsupported(op))?;
                let base = op.operands.get(1).ok_or_else(|| unsupported(op))?;
                let pointer = self.address(base, op.operands.get(2))?;
                writeln!(self.out, "  store {}, ptr {}, align 4", typed(value)?, pointer)?;
            }
            "llvm.constant" => {
                let result = op.result.as_deref().ok_or_else(|| unsupported(op))?;
                let value = op.operand_int(0).ok_or_else(|| unsupported(op))?;
                writeln!(self.out, "  %{} = add i32 0, {}", result, value)?;
            }
            "llvm.loop" => self.emit_loop(id)?,
            "llvm.cond" => self.emit_cond(id)?,
            "llvm.return" => writeln!(self.out, "  ret void")?,
            name => {
                let opcode = binary_opcode(name).ok_or_else(|| unsupported(op))?;
                let result = op.result.as_deref().ok_or_else(|| unsupported(op))?;
                let (lhs, rhs) = match op.operands.as_slice() {
                    [lhs, rhs] => (untyped(lhs)?, untyped(rhs)?),
                    _ => return Err(unsupported(op)),
                };
                writeln!(self.out, "  %{} = {} i32 {}, {}", result, opcode, lhs, rhs)?;
            }
        }
        Ok(())
    }

    /// `llvm.loop(lower, upper, step)` as a header/body/latch loop
    fn emit_loop(&mut self, id: OpId) -> CompileResult<()> {
        let module = self.module;
        let op = module.op(id);
        let (lower, upper, step) = match op.operands.as_slice() {
            [lower, upper, step] => (untyped(lower)?, untyped(upper)?, untyped(step)?),
            _ => return Err(unsupported(op)),
        };
        let name = self.next_label("loop");
        let iv = match &op.result {
            Some(result) => format!("%{}", result),
            None => format!("%{}.iv", name),
        };
        let header = format!("{}.header", name);
        let body = format!("{}.body", name);
        let latch = format!("{}.latch", name);
        let exit = format!("{}.exit", name);
        let entry = self.block.clone();

        writeln!(self.out, "  br label %{}", header)?;
        self.start_block(&header)?;
        writeln!(
            self.out,
            "  {} = phi i32 [ {}, %{} ], [ %{}.next, %{} ]",
            iv, lower, entry, name, latch
        )?;
        writeln!(self.out, "  %{}.cond = icmp slt i32 {}, {}", name, iv, upper)?;
        writeln!(self.out, "  br i1 %{}.cond, label %{}, label %{}", name, body, exit)?;
        self.start_block(&body)?;
        self.emit_region(id)?;
        writeln!(self.out, "  br label %{}", latch)?;
        self.start_block(&latch)?;
        writeln!(self.out, "  %{}.next = add i32 {}, {}", name, iv, step)?;
        writeln!(self.out, "  br label %{}", header)?;
        self.start_block(&exit)
    }

    fn emit_cond(&mut self, id: OpId) -> CompileResult<()> {
        let module = self.module;
        let op = module.op(id);
        let condition = op.operands.first().ok_or_else(|| unsupported(op))?;
        let name = self.next_label("cond");
        writeln!(
            self.out,
            "  %{}.flag = icmp ne i32 {}, 0",
            name,
            untyped(condition)?
        )?;
        writeln!(
            self.out,
            "  br i1 %{0}.flag, label %{0}.then, label %{0}.end",
            name
        )?;
        self.start_block(&format!("{}.then", name))?;
        self.emit_region(id)?;
        writeln!(self.out, "  br label %{}.end", name)?;
        self.start_block(&format!("{}.end", name))
    }
}

/// Render the LLVM-dialect module as textual LLVM IR
pub fn translate_to_llvm_ir(module: &Module) -> CompileResult<String> {
    let mut globals = Vec::new();
    let mut defined = Vec::new();
    let mut declared = BTreeSet::new();
    for &id in module.body() {
        let op = module.op(id);
        let symbol = op.operand_symbol(0).ok_or_else(|| unsupported(op))?;
        match (op.name.as_str(), &op.region) {
            ("llvm.global", _) => globals.push(id),
            ("llvm.func", Some(_)) => defined.push((symbol, id)),
            ("llvm.func", None) => {
                declared.insert(symbol);
            }
            _ => return Err(unsupported(op)),
        }
    }

    // Signatures come from the first call site of each external function
    let mut signatures: BTreeMap<&str, String> = BTreeMap::new();
    for id in module.find_all("llvm.call") {
        let op = module.op(id);
        let Some(callee) = op.operand_symbol(0) else {
            continue;
        };
        if defined.iter().any(|(name, _)| *name == callee) || signatures.contains_key(callee) {
            continue;
        }
        let params = op.operands[1..]
            .iter()
            .map(|arg| typed(arg).map(|t| t.split(' ').next().unwrap_or("i32").to_string()))
            .collect::<CompileResult<Vec<_>>>()?;
        let ret = if op.result.is_some() { "i32" } else { "void" };
        signatures.insert(callee, format!("{} @{}({})", ret, callee, params.join(", ")));
    }
    for symbol in declared {
        signatures
            .entry(symbol)
            .or_insert_with(|| format!("void @{}()", symbol));
    }

    let mut out = String::new();
    writeln!(out, "; ModuleID = 'aie'")?;
    writeln!(out, "source_filename = \"aie\"")?;
    writeln!(out)?;

    for &id in &globals {
        let op = module.op(id);
        let symbol = op.operand_symbol(0).unwrap_or_default();
        let size = op.int_attr("size").ok_or_else(|| {
            CompileError::translation(TARGET, format!("global @{} has no size", symbol))
        })?;
        if let Some(address) = op.int_attr("address") {
            writeln!(out, "; @{} placed at {:#x}", symbol, address)?;
        }
        writeln!(
            out,
            "@{} = global [{} x i8] zeroinitializer, align 16",
            symbol, size
        )?;
    }
    if !globals.is_empty() {
        writeln!(out)?;
    }

    for signature in signatures.values() {
        writeln!(out, "declare {}", signature)?;
    }
    if !signatures.is_empty() {
        writeln!(out)?;
    }

    for (symbol, id) in defined {
        let mut emitter = FunctionEmitter::new(module);
        emitter.emit_region(id)?;
        let terminated = emitter.out.trim_end().ends_with("ret void");
        writeln!(out, "define void @{}() {{", symbol)?;
        writeln!(out, "entry:")?;
        out.push_str(&emitter.out);
        if !terminated {
            writeln!(out, "  ret void")?;
        }
        writeln!(out, "}}")?;
        writeln!(out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    #[test]
    fn test_function_with_loop() {
        let module = parse_module(
            "llvm.global(@buf) {address = 1024, size = 64}
             llvm.func(@llvm.aie2.acquire) {sym_visibility = \"private\"}
             llvm.func(@core_1_2) {
               llvm.call(@llvm.aie2.acquire, 3, 1)
               llvm.loop(0, 4, 1) {
                 llvm.store(7, @buf)
               }
               llvm.call(@kernel)
               llvm.return
             }",
        )
        .unwrap();
        let ir = translate_to_llvm_ir(&module).unwrap();

        assert!(ir.contains("@buf = global [64 x i8] zeroinitializer, align 16"));
        assert!(ir.contains("declare void @llvm.aie2.acquire(i32, i32)"));
        assert!(ir.contains("declare void @kernel()"));
        assert!(ir.contains("define void @core_1_2() {\nentry:\n"));
        assert!(ir.contains("%loop1.iv = phi i32 [ 0, %entry ], [ %loop1.next, %loop1.latch ]"));
        assert!(ir.contains("store i32 7, ptr @buf, align 4"));
        assert_eq!(ir.matches("ret void").count(), 1);
    }

    #[test]
    fn test_rejects_unlowered_top_level() {
        let module = parse_module("func.func(@f) { }").unwrap();
        let err = translate_to_llvm_ir(&module).unwrap_err();
        assert!(err.to_string().contains("cannot translate 'func.func'"));
    }

    #[test]
    fn test_binary_ops() {
        let module = parse_module(
            "llvm.func(@f) {
               %a = llvm.constant(2)
               %b = llvm.addi(%a, 3)
               llvm.store(%b, @out, 1)
             }",
        )
        .unwrap();
        let ir = translate_to_llvm_ir(&module).unwrap();
        assert!(ir.contains("%b = add i32 %a, 3"));
        assert!(ir.contains("getelementptr inbounds i32, ptr @out, i32 1"));
        assert!(ir.contains("  ret void\n}"));
    }
}
