//! Lowering from the device dialects to standard functions and globals,
//! and from there to the LLVM dialect.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::device::{core_symbol, owning_tile, DeviceModel};
use crate::ir::{Attribute, Module, OpId, Operation};

use super::PassResult;

fn is_declaration(op: &Operation) -> bool {
    (op.is("func.func") || op.is("llvm.func")) && op.region.is_none()
}

fn is_call(op: &Operation) -> bool {
    op.is("func.call") || op.is("llvm.call")
}

fn lower_use_lock(module: &mut Module, id: OpId, intrinsics: (&str, &str)) -> PassResult {
    let op = module.op(id);
    let lock = op
        .operand_value(0)
        .ok_or("aie.use_lock without a lock operand")?
        .to_string();
    let lock_id = match op.int_attr("lock_id") {
        Some(n) => n,
        None => module
            .defining_op(&lock)
            .and_then(|def| module.op(def).operand_int(1))
            .ok_or_else(|| format!("lock %{} has no ID", lock))?,
    };
    let value = op.operand_int(2).unwrap_or(0);
    let callee = match op.operand_str(1).unwrap_or("acquire") {
        "acquire" | "acquire_ge" => intrinsics.0,
        "release" => intrinsics.1,
        other => return Err(format!("unknown lock action '{}'", other)),
    };

    let op = module.op_mut(id);
    op.name = "func.call".to_string();
    op.operands = vec![
        Attribute::Symbol(callee.to_string()),
        Attribute::Int(lock_id),
        Attribute::Int(value),
    ];
    op.attributes.clear();
    Ok(())
}

/// Cores become functions, buffers become globals, lock uses become
/// intrinsic calls. The devices are gone afterwards.
pub fn core_to_standard(module: &mut Module) -> PassResult {
    let mut declared = BTreeSet::new();

    for device in module.devices() {
        let model = DeviceModel::of_device(module, device);
        let intrinsics = model.lock_intrinsics();

        let mut buffers: HashMap<String, String> = HashMap::new();
        for buffer in module.find_in(device, "aie.buffer") {
            let op = module.op(buffer).clone();
            let (Some(value), Some(symbol)) =
                (op.result.clone(), op.symbol_name().map(str::to_string))
            else {
                continue;
            };
            let mut global =
                Operation::new("memref.global").with_operand(Attribute::Symbol(symbol.clone()));
            for key in ["size", "address"] {
                if let Some(attr) = op.attr(key) {
                    global = global.with_attr(key, attr.clone());
                }
            }
            module.insert_before(device, global);
            buffers.insert(value, symbol);
        }

        for core in module.find_in(device, "aie.core") {
            let loc = owning_tile(module, core).ok_or("core is not placed on a tile")?;
            let body = module.walk_in(core);
            let local: HashSet<String> = body
                .iter()
                .filter_map(|&id| module.op(id).result.clone())
                .collect();

            for id in body {
                if module.op(id).is("aie.use_lock") {
                    lower_use_lock(module, id, intrinsics)?;
                    continue;
                }
                let mut operands = Vec::new();
                for operand in module.op(id).operands.clone() {
                    operands.push(match operand {
                        Attribute::Value(value) => match buffers.get(&value) {
                            Some(symbol) => Attribute::Symbol(symbol.clone()),
                            None if local.contains(&value) => Attribute::Value(value),
                            None => {
                                return Err(format!(
                                    "core on tile ({}, {}) uses %{} which has no standard lowering",
                                    loc.0, loc.1, value
                                ))
                            }
                        },
                        other => other,
                    });
                }
                module.op_mut(id).operands = operands;
            }

            let func = module.insert_before(
                device,
                Operation::new("func.func")
                    .with_operand(Attribute::Symbol(core_symbol(loc)))
                    .with_region(),
            );
            for child in module.children(Some(core)).to_vec() {
                module.move_to(child, Some(func));
            }
            module.erase(core);
        }

        for intrinsic in [intrinsics.0, intrinsics.1] {
            if declared.insert(intrinsic) {
                module.insert_before(
                    device,
                    Operation::new("func.func")
                        .with_operand(Attribute::Symbol(intrinsic.to_string()))
                        .with_attr("sym_visibility", Attribute::Str("private".into())),
                );
            }
        }
        module.erase(device);
    }
    Ok(())
}

/// Drop whatever runtime-sequence ops survived the device lowering
pub fn aiex_to_standard(module: &mut Module) -> PassResult {
    for id in module.walk() {
        if module.is_live(id) && module.op(id).dialect() == "aiex" {
            module.erase(id);
        }
    }
    Ok(())
}

pub fn canonicalize(module: &mut Module) -> PassResult {
    for id in module.walk() {
        if module.is_live(id) && matches!(module.op(id).name.as_str(), "aie.end" | "scf.yield") {
            module.erase(id);
        }
    }

    let called: HashSet<String> = module
        .walk()
        .into_iter()
        .map(|id| module.op(id))
        .filter(|op| is_call(op))
        .filter_map(|op| op.operand_symbol(0).map(str::to_string))
        .collect();
    for id in module.body().to_vec() {
        let op = module.op(id);
        let unused = is_declaration(op)
            && op.str_attr("sym_visibility") == Some("private")
            && op
                .operand_symbol(0)
                .map_or(true, |symbol| !called.contains(symbol));
        if unused {
            module.erase(id);
        }
    }
    Ok(())
}

/// Fold identical top-level declarations and globals
pub fn cse(module: &mut Module) -> PassResult {
    let mut seen: Vec<OpId> = Vec::new();
    for id in module.body().to_vec() {
        let op = module.op(id);
        if !(is_declaration(op) || op.is("memref.global") || op.is("llvm.global")) {
            continue;
        }
        let duplicate = seen.iter().any(|&earlier| {
            let other = module.op(earlier);
            other.name == op.name
                && other.operands == op.operands
                && other.attributes == op.attributes
        });
        if duplicate {
            module.erase(id);
        } else {
            seen.push(id);
        }
    }
    Ok(())
}

pub fn convert_to_llvm(module: &mut Module) -> PassResult {
    for id in module.walk() {
        let name = module.op(id).name.clone();
        let lowered = match name.as_str() {
            "func.func" => "llvm.func".to_string(),
            "func.call" => "llvm.call".to_string(),
            "func.return" => "llvm.return".to_string(),
            "memref.global" => "llvm.global".to_string(),
            "memref.load" => "llvm.load".to_string(),
            "memref.store" => "llvm.store".to_string(),
            "cf.loop" => "llvm.loop".to_string(),
            "cf.cond" => "llvm.cond".to_string(),
            other if other.starts_with("arith.") => format!("llvm.{}", &other["arith.".len()..]),
            other if other.starts_with("llvm.") => continue,
            other => return Err(format!("failed to legalize operation '{}'", other)),
        };
        module.op_mut(id).name = lowered;
    }

    for id in module.body().to_vec() {
        let op = module.op(id);
        if !op.is("llvm.func") || op.region.is_none() {
            continue;
        }
        let terminated = module
            .children(Some(id))
            .last()
            .is_some_and(|&last| module.op(last).is("llvm.return"));
        if !terminated {
            module.append(Some(id), Operation::new("llvm.return"));
        }
    }
    Ok(())
}
