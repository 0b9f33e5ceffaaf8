//! Translations from a lowered module to target text
//!
//! Each translation is a pure function of the module; writing the result to
//! disk is the artifact emitter's job.

mod ipu;
mod llvm;
mod xaie;

pub use ipu::{render_ipu_words, translate_to_ipu};
pub use llvm::translate_to_llvm_ir;
pub use xaie::{translate_to_cdo, translate_to_xaie};

use crate::device::{core_symbol, owning_tile, DeviceModel, TileLoc};
use crate::error::{CompileError, CompileResult};
use crate::ir::Module;

/// Architecture descriptor of the first device, e.g. `AIE2`
pub fn translate_to_target_arch(module: &Module) -> CompileResult<String> {
    let device = module
        .devices()
        .first()
        .copied()
        .ok_or_else(|| CompileError::translation("target-arch", "module has no aie.device"))?;
    Ok(DeviceModel::of_device(module, device).target_arch())
}

/// Tiles running a core program, in program order
fn core_tiles(module: &Module) -> Vec<TileLoc> {
    module
        .find_all("aie.core")
        .into_iter()
        .filter_map(|core| owning_tile(module, core))
        .collect()
}

/// Core function names for the tiles in `module`, in program order
pub fn core_functions(module: &Module) -> Vec<String> {
    core_tiles(module).into_iter().map(core_symbol).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    #[test]
    fn test_target_arch_of_first_device() {
        let module = parse_module("aie.device(xcvc1902) { } aie.device(ipu) { }").unwrap();
        assert_eq!(translate_to_target_arch(&module).unwrap(), "AIE");
    }

    #[test]
    fn test_target_arch_needs_device() {
        let module = parse_module("aie.end").unwrap();
        assert!(translate_to_target_arch(&module).is_err());
    }

    #[test]
    fn test_core_functions() {
        let module = parse_module(
            "aie.device(ipu) { %t = aie.tile(2, 3) aie.core(%t) { aie.end } }",
        )
        .unwrap();
        assert_eq!(core_functions(&module), vec!["core_2_3"]);
    }
}
