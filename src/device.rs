//! Device models and tile geometry for the AIE array
//!
//! These mirror the handful of device families the driver knows about.
//! Unknown device names are kept verbatim so target validation can report
//! them.

use serde::{Deserialize, Serialize};

use crate::ir::{Module, OpId};

/// Tile coordinate: (column, row)
pub type TileLoc = (i64, i64);

/// AIE architecture generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AieArch {
    Aie1,
    Aie2,
}

/// A device family the program is placed on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModel {
    pub name: String,
    pub arch: Option<AieArch>,
    pub columns: i64,
    pub rows: i64,
    /// Rows holding memory tiles (AIE2 only)
    pub mem_tile_rows: Vec<i64>,
}

impl DeviceModel {
    pub fn lookup(name: &str) -> Self {
        let (arch, columns, rows, mem_tile_rows) = match name {
            "xcvc1902" => (Some(AieArch::Aie1), 50, 9, vec![]),
            "xcve2302" => (Some(AieArch::Aie2), 17, 4, vec![1]),
            "xcve2802" => (Some(AieArch::Aie2), 38, 11, vec![1, 2]),
            "ipu" => (Some(AieArch::Aie2), 5, 6, vec![1]),
            _ => (None, 0, 0, vec![]),
        };
        Self {
            name: name.to_string(),
            arch,
            columns,
            rows,
            mem_tile_rows,
        }
    }

    /// Device model of a `aie.device` op
    pub fn of_device(module: &Module, device: OpId) -> Self {
        Self::lookup(module.op(device).operand_str(0).unwrap_or(""))
    }

    /// Target architecture descriptor
    pub fn target_arch(&self) -> String {
        match self.arch {
            Some(AieArch::Aie1) => "AIE".to_string(),
            Some(AieArch::Aie2) => "AIE2".to_string(),
            None => self.name.to_uppercase(),
        }
    }

    pub fn is_shim(&self, row: i64) -> bool {
        row == 0
    }

    pub fn is_mem_tile(&self, row: i64) -> bool {
        self.mem_tile_rows.contains(&row)
    }

    pub fn contains(&self, loc: TileLoc) -> bool {
        self.arch.is_none()
            || (loc.0 >= 0 && loc.0 < self.columns && loc.1 >= 0 && loc.1 < self.rows)
    }

    pub fn lock_count(&self, row: i64) -> usize {
        if self.is_mem_tile(row) {
            64
        } else {
            16
        }
    }

    /// Bytes of data memory addressable on a tile
    pub fn data_memory_size(&self, row: i64) -> i64 {
        match self.arch {
            Some(AieArch::Aie2) if self.is_mem_tile(row) => 512 * 1024,
            Some(AieArch::Aie2) => 64 * 1024,
            _ => 32 * 1024,
        }
    }

    /// Bytes reserved for the core stack at the bottom of data memory
    pub fn stack_size(&self) -> i64 {
        0x400
    }

    /// Intrinsic names used when lowering lock operations
    pub fn lock_intrinsics(&self) -> (&'static str, &'static str) {
        match self.arch {
            Some(AieArch::Aie2) => ("llvm.aie2.acquire", "llvm.aie2.release"),
            _ => ("llvm.aie.lock.acquire.reg", "llvm.aie.lock.release.reg"),
        }
    }
}

/// Coordinates of the `aie.tile` op defining `%value`
pub fn tile_loc(module: &Module, value: &str) -> Option<TileLoc> {
    let op = module.op(module.defining_op(value)?);
    if !op.is("aie.tile") {
        return None;
    }
    Some((op.operand_int(0)?, op.operand_int(1)?))
}

/// Tile coordinates of an op's first operand (tile, lock, buffer or core)
pub fn owning_tile(module: &Module, id: OpId) -> Option<TileLoc> {
    let value = module.op(id).operand_value(0)?;
    let def = module.op(module.defining_op(value)?);
    if def.is("aie.tile") {
        Some((def.operand_int(0)?, def.operand_int(1)?))
    } else {
        let inner = def.operand_value(0)?;
        tile_loc(module, inner)
    }
}

/// Name of the `aie.core` function for a tile
pub fn core_symbol(loc: TileLoc) -> String {
    format!("core_{}_{}", loc.0, loc.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_device_arch() {
        assert_eq!(DeviceModel::lookup("xcvc1902").target_arch(), "AIE");
        assert_eq!(DeviceModel::lookup("ipu").target_arch(), "AIE2");
    }

    #[test]
    fn test_unknown_device_reports_name() {
        let model = DeviceModel::lookup("xyz1");
        assert_eq!(model.arch, None);
        assert_eq!(model.target_arch(), "XYZ1");
    }

    #[test]
    fn test_memory_limits() {
        let ipu = DeviceModel::lookup("ipu");
        assert_eq!(ipu.data_memory_size(2), 64 * 1024);
        assert_eq!(ipu.data_memory_size(1), 512 * 1024);
        assert_eq!(ipu.lock_count(1), 64);
        assert_eq!(DeviceModel::lookup("xcvc1902").data_memory_size(3), 32 * 1024);
    }
}
