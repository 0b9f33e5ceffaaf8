//! Structural rewrites: affine lowering, device canonicalization, scf to cf

use crate::ir::{Attribute, Module, Operation};

use super::PassResult;

/// Default device for programs written without an explicit `aie.device`
const DEFAULT_DEVICE: &str = "xcvc1902";

/// Rename an op in place when its name is in `table`
fn rename_ops(module: &mut Module, table: &[(&str, &str)]) {
    for id in module.walk() {
        let op = module.op_mut(id);
        if let Some((_, to)) = table.iter().find(|(from, _)| op.name == *from) {
            op.name = to.to_string();
        }
    }
}

/// affine -> scf / memref
pub fn lower_affine(module: &mut Module) -> PassResult {
    rename_ops(
        module,
        &[
            ("affine.for", "scf.for"),
            ("affine.if", "scf.if"),
            ("affine.yield", "scf.yield"),
            ("affine.load", "memref.load"),
            ("affine.store", "memref.store"),
        ],
    );
    if let Some(id) = module.walk().into_iter().find(|&id| module.op(id).dialect() == "affine") {
        return Err(format!("cannot lower '{}'", module.op(id).name));
    }
    Ok(())
}

/// Wrap a device-less program in the default device
pub fn canonicalize_device(module: &mut Module) -> PassResult {
    if !module.devices().is_empty() {
        return Ok(());
    }
    let top: Vec<_> = module.body().to_vec();
    let device = module.insert_at(
        None,
        0,
        Operation::new("aie.device")
            .with_operand(Attribute::Ident(DEFAULT_DEVICE.to_string()))
            .with_region(),
    );
    for id in top {
        module.move_to(id, Some(device));
    }
    Ok(())
}

/// Structured control flow to its unstructured form
pub fn convert_scf_to_cf(module: &mut Module) -> PassResult {
    for id in module.find_all("scf.yield") {
        module.erase(id);
    }
    for id in module.walk() {
        let op = module.op_mut(id);
        match op.name.as_str() {
            "scf.for" => {
                if op.operands.len() != 3 {
                    return Err(format!(
                        "scf.for expects (lower, upper, step), got {} operands",
                        op.operands.len()
                    ));
                }
                op.name = "cf.loop".to_string();
            }
            "scf.if" => op.name = "cf.cond".to_string(),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    #[test]
    fn test_lower_affine_renames() {
        let mut module =
            parse_module("affine.for(0, 4, 1) { affine.load(0) affine.yield }").unwrap();
        lower_affine(&mut module).unwrap();
        let names: Vec<_> = module
            .walk()
            .into_iter()
            .map(|id| module.op(id).name.clone())
            .collect();
        assert_eq!(names, vec!["scf.for", "memref.load", "scf.yield"]);
    }

    #[test]
    fn test_lower_affine_rejects_unknown() {
        let mut module = parse_module("affine.apply(1)").unwrap();
        assert!(lower_affine(&mut module).is_err());
    }

    #[test]
    fn test_canonicalize_wraps_top_level() {
        let mut module = parse_module("%t = aie.tile(1, 3)\naie.end").unwrap();
        canonicalize_device(&mut module).unwrap();
        let devices = module.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(module.body().len(), 1);
        assert_eq!(module.children(Some(devices[0])).len(), 2);
        assert_eq!(module.op(devices[0]).operand_str(0), Some("xcvc1902"));
    }

    #[test]
    fn test_canonicalize_keeps_existing_device() {
        let mut module = parse_module("aie.device(ipu) { aie.end }").unwrap();
        let before = module.clone();
        canonicalize_device(&mut module).unwrap();
        assert_eq!(module, before);
    }

    #[test]
    fn test_scf_to_cf() {
        let mut module = parse_module("scf.for(0, 4, 1) { scf.yield }").unwrap();
        convert_scf_to_cf(&mut module).unwrap();
        let id = module.body()[0];
        assert_eq!(module.op(id).name, "cf.loop");
        assert!(module.children(Some(id)).is_empty());
    }

    #[test]
    fn test_scf_for_arity() {
        let mut module = parse_module("scf.for(0, 4) { }").unwrap();
        assert!(convert_scf_to_cf(&mut module).is_err());
    }
}
