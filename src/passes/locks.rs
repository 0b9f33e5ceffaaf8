//! Lock and buffer resource assignment

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::device::{owning_tile, DeviceModel, TileLoc};
use crate::ir::{Attribute, Module, OpId};

use super::PassResult;

const BUFFER_ALIGNMENT: i64 = 16;

fn value_label(module: &Module, id: OpId) -> String {
    match &module.op(id).result {
        Some(name) => format!("%{}", name),
        None => module.op(id).name.clone(),
    }
}

fn used_lock_ids(module: &Module, device: OpId, tile: TileLoc) -> BTreeSet<i64> {
    module
        .find_in(device, "aie.lock")
        .into_iter()
        .filter(|&id| owning_tile(module, id) == Some(tile))
        .filter_map(|id| module.op(id).operand_int(1))
        .collect()
}

/// Smallest lock ID not yet used on `tile`
pub(super) fn next_free_lock_id(
    module: &Module,
    device: OpId,
    tile: TileLoc,
) -> Result<i64, String> {
    let model = DeviceModel::of_device(module, device);
    let used = used_lock_ids(module, device, tile);
    let limit = model.lock_count(tile.1) as i64;
    (0..limit).find(|n| !used.contains(n)).ok_or_else(|| {
        format!(
            "tile ({}, {}) has more than {} locks",
            tile.0, tile.1, limit
        )
    })
}

pub fn assign_lock_ids(module: &mut Module, device: OpId) -> PassResult {
    let model = DeviceModel::of_device(module, device);
    let locks = module.find_in(device, "aie.lock");

    let mut used: BTreeMap<TileLoc, BTreeSet<i64>> = BTreeMap::new();
    for &lock in &locks {
        let tile = owning_tile(module, lock)
            .ok_or_else(|| format!("lock {} is not placed on a tile", value_label(module, lock)))?;
        if let Some(id) = module.op(lock).operand_int(1) {
            if id < 0 || id >= model.lock_count(tile.1) as i64 {
                return Err(format!(
                    "lock ID {} out of range on tile ({}, {})",
                    id, tile.0, tile.1
                ));
            }
            if !used.entry(tile).or_default().insert(id) {
                return Err(format!(
                    "lock ID {} used twice on tile ({}, {})",
                    id, tile.0, tile.1
                ));
            }
        }
    }

    for &lock in &locks {
        if module.op(lock).operand_int(1).is_some() {
            continue;
        }
        let tile = owning_tile(module, lock)
            .ok_or_else(|| format!("lock {} is not placed on a tile", value_label(module, lock)))?;
        let taken = used.entry(tile).or_default();
        let limit = model.lock_count(tile.1) as i64;
        let id = (0..limit).find(|n| !taken.contains(n)).ok_or_else(|| {
            format!(
                "tile ({}, {}) has more than {} locks",
                tile.0, tile.1, limit
            )
        })?;
        taken.insert(id);
        let op = module.op_mut(lock);
        op.operands.truncate(1);
        op.operands.push(Attribute::Int(id));
    }
    Ok(())
}

pub fn assign_buffer_addresses(module: &mut Module, device: OpId) -> PassResult {
    for lock in module.find_in(device, "aie.lock") {
        if module.op(lock).operand_int(1).is_none() {
            return Err(format!(
                "lock {} has no ID; lock IDs must be assigned before buffer addresses",
                value_label(module, lock)
            ));
        }
    }

    let model = DeviceModel::of_device(module, device);
    let cores: HashSet<TileLoc> = module
        .find_in(device, "aie.core")
        .into_iter()
        .filter_map(|core| owning_tile(module, core))
        .collect();

    let mut by_tile: BTreeMap<TileLoc, Vec<OpId>> = BTreeMap::new();
    for buffer in module.find_in(device, "aie.buffer") {
        let tile = owning_tile(module, buffer).ok_or_else(|| {
            format!("buffer {} is not placed on a tile", value_label(module, buffer))
        })?;
        by_tile.entry(tile).or_default().push(buffer);
    }

    for (tile, buffers) in by_tile {
        let limit = model.data_memory_size(tile.1);
        let mut next = if cores.contains(&tile) {
            model.stack_size()
        } else {
            0
        };

        let mut sizes = Vec::with_capacity(buffers.len());
        for &buffer in &buffers {
            let label = value_label(module, buffer);
            let size = module
                .op(buffer)
                .int_attr("size")
                .ok_or_else(|| format!("buffer {} has no size", label))?;
            if size <= 0 {
                return Err(format!("buffer {} has non-positive size {}", label, size));
            }
            sizes.push(size);
            if let Some(address) = module.op(buffer).int_attr("address") {
                if address < 0 {
                    return Err(format!("buffer {} has negative address {}", label, address));
                }
                let end = address
                    .checked_add(size)
                    .ok_or_else(|| format!("buffer {} address overflows", label))?;
                next = next.max(end);
            }
        }

        for (&buffer, size) in buffers.iter().zip(sizes) {
            if module.op(buffer).int_attr("address").is_some() {
                continue;
            }
            let overflow = || format!("buffer {} address overflows", value_label(module, buffer));
            let address = next
                .checked_add(BUFFER_ALIGNMENT - 1)
                .ok_or_else(overflow)?
                / BUFFER_ALIGNMENT
                * BUFFER_ALIGNMENT;
            let end = address.checked_add(size).ok_or_else(overflow)?;
            if end > limit {
                return Err(format!(
                    "allocated buffers exceeded available memory on tile ({}, {}): need {} bytes, have {}",
                    tile.0, tile.1, end, limit
                ));
            }
            module
                .op_mut(buffer)
                .attributes
                .insert("address".into(), Attribute::Int(address));
            next = end;
        }
    }
    Ok(())
}

/// Resolve every lock a core touches to an ID reachable from that core
pub fn localize_locks(module: &mut Module, device: OpId) -> PassResult {
    for core in module.find_in(device, "aie.core") {
        let core_tile = owning_tile(module, core).ok_or("core is not placed on a tile")?;
        for use_op in module.find_in(core, "aie.use_lock") {
            let lock_value = module
                .op(use_op)
                .operand_value(0)
                .ok_or("aie.use_lock without a lock operand")?
                .to_string();
            let lock = module
                .defining_op(&lock_value)
                .filter(|&id| module.op(id).is("aie.lock"))
                .ok_or_else(|| format!("%{} is not a lock", lock_value))?;
            let id = module
                .op(lock)
                .operand_int(1)
                .ok_or_else(|| format!("lock %{} has no ID", lock_value))?;
            let lock_tile = owning_tile(module, lock)
                .ok_or_else(|| format!("lock %{} is not placed on a tile", lock_value))?;
            let distance = (lock_tile.0 - core_tile.0).abs() + (lock_tile.1 - core_tile.1).abs();
            if distance > 1 {
                return Err(format!(
                    "lock %{} on tile ({}, {}) is not accessible from core ({}, {})",
                    lock_value, lock_tile.0, lock_tile.1, core_tile.0, core_tile.1
                ));
            }
            module
                .op_mut(use_op)
                .attributes
                .insert("lock_id".into(), Attribute::Int(id));
        }
    }
    Ok(())
}

pub fn normalize_address_spaces(module: &mut Module, device: OpId) -> PassResult {
    for buffer in module.find_in(device, "aie.buffer") {
        module.op_mut(buffer).attributes.remove("memory_space");
    }
    Ok(())
}
