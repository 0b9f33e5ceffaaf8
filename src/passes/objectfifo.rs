//! Object FIFO lowering
//!
//! `aie.objectfifo(%producer, %consumer) {sym_name, depth, size}` describes a
//! bounded channel between two tiles. Registration attaches access loops to
//! the consumer (or producer) core; the stateful transform then replaces the
//! FIFO with concrete buffers, a producer/consumer lock pair and a stream
//! flow.

use crate::device::{tile_loc, DeviceModel, TileLoc};
use crate::ir::{Attribute, Module, OpId, Operation};

use super::locks::next_free_lock_id;
use super::PassResult;

fn find_fifo(module: &Module, device: OpId, symbol: &str) -> Option<OpId> {
    module
        .find_in(device, "aie.objectfifo")
        .into_iter()
        .find(|&id| module.op(id).str_attr("sym_name") == Some(symbol))
}

/// Core on the tile defined by `%tile`, created when missing
fn core_for_tile(module: &mut Module, device: OpId, tile: &str) -> OpId {
    let existing = module
        .find_in(device, "aie.core")
        .into_iter()
        .find(|&id| module.op(id).operand_value(0) == Some(tile));
    if let Some(core) = existing {
        return core;
    }
    let core = module.append(
        Some(device),
        Operation::new("aie.core")
            .with_operand(Attribute::Value(tile.to_string()))
            .with_region(),
    );
    module.append(Some(core), Operation::new("aie.end"));
    core
}

pub fn register_processes(module: &mut Module, device: OpId) -> PassResult {
    for reg in module.find_in(device, "aie.objectfifo.register_process") {
        let op = module.op(reg);
        let fifo = op
            .operand_symbol(0)
            .ok_or("register_process expects an object FIFO symbol")?
            .to_string();
        let port = op.operand_str(1).unwrap_or("consume").to_string();
        let callee = op
            .operand_symbol(2)
            .ok_or("register_process expects a function symbol")?
            .to_string();
        let count = op.int_attr("count").unwrap_or(1);

        let fifo_op = find_fifo(module, device, &fifo)
            .ok_or_else(|| format!("unknown object FIFO @{}", fifo))?;
        let tile_index = match port.as_str() {
            "consume" => 1,
            "produce" => 0,
            other => return Err(format!("unknown object FIFO port '{}'", other)),
        };
        let tile = module
            .op(fifo_op)
            .operand_value(tile_index)
            .ok_or_else(|| format!("object FIFO @{} has no {} tile", fifo, port))?
            .to_string();

        let core = core_for_tile(module, device, &tile);
        let loop_op = Operation::new("scf.for")
            .with_operands([Attribute::Int(0), Attribute::Int(count), Attribute::Int(1)])
            .with_region();
        let last = module.children(Some(core)).last().copied();
        let body = match last {
            Some(end) if module.op(end).is("aie.end") => module.insert_before(end, loop_op),
            _ => module.append(Some(core), loop_op),
        };

        let access = |name: &str| {
            Operation::new(name).with_operands([
                Attribute::Symbol(fifo.clone()),
                Attribute::Ident(port.clone()),
                Attribute::Int(1),
            ])
        };
        module.append(Some(body), access("aie.objectfifo.acquire"));
        module.append(
            Some(body),
            Operation::new("func.call").with_operand(Attribute::Symbol(callee)),
        );
        module.append(Some(body), access("aie.objectfifo.release"));

        module.erase(reg);
    }
    Ok(())
}

/// Number of flows already using a DMA channel on `tile` at endpoint `side`
fn dma_channels_in_use(module: &Module, device: OpId, tile: TileLoc, side: usize) -> i64 {
    module
        .find_in(device, "aie.flow")
        .into_iter()
        .filter(|&id| {
            let op = module.op(id);
            op.operand_str(side * 3 + 1) == Some("DMA")
                && op
                    .operand_value(side * 3)
                    .and_then(|value| tile_loc(module, value))
                    == Some(tile)
        })
        .count() as i64
}

pub fn stateful_transform(module: &mut Module, device: OpId) -> PassResult {
    let model = DeviceModel::of_device(module, device);

    for fifo in module.find_in(device, "aie.objectfifo") {
        let op = module.op(fifo).clone();
        let name = op
            .str_attr("sym_name")
            .ok_or("object FIFO without sym_name")?
            .to_string();
        let depth = op.int_attr("depth").unwrap_or(2);
        if depth < 1 {
            return Err(format!("object FIFO @{} has depth {}", name, depth));
        }
        let size = op
            .int_attr("size")
            .ok_or_else(|| format!("object FIFO @{} has no size", name))?;
        let producer = op
            .operand_value(0)
            .ok_or_else(|| format!("object FIFO @{} has no producer tile", name))?
            .to_string();
        let consumer = op
            .operand_value(1)
            .ok_or_else(|| format!("object FIFO @{} has no consumer tile", name))?
            .to_string();
        let prod_tile = tile_loc(module, &producer)
            .ok_or_else(|| format!("%{} is not a tile", producer))?;
        let cons_tile = tile_loc(module, &consumer)
            .ok_or_else(|| format!("%{} is not a tile", consumer))?;

        for i in 0..depth {
            let sym = format!("{}_buff_{}", name, i);
            let result = module.fresh_value(&sym);
            module.insert_before(
                fifo,
                Operation::new("aie.buffer")
                    .with_result(result)
                    .with_operand(Attribute::Value(consumer.clone()))
                    .with_attr("size", Attribute::Int(size))
                    .with_attr("sym_name", Attribute::Str(sym)),
            );
        }

        let make_lock = |module: &mut Module, suffix: &str, init: i64| -> Result<String, String> {
            let sym = format!("{}_{}", name, suffix);
            let id = next_free_lock_id(module, device, cons_tile)?;
            let result = module.fresh_value(&sym);
            module.insert_before(
                fifo,
                Operation::new("aie.lock")
                    .with_result(result.clone())
                    .with_operands([Attribute::Value(consumer.clone()), Attribute::Int(id)])
                    .with_attr("init", Attribute::Int(init))
                    .with_attr("sym_name", Attribute::Str(sym)),
            );
            Ok(result)
        };
        let prod_lock = make_lock(module, "prod_lock", depth)?;
        let cons_lock = make_lock(module, "cons_lock", 0)?;

        if prod_tile != cons_tile {
            let src_channel = dma_channels_in_use(module, device, prod_tile, 0);
            let dst_channel = dma_channels_in_use(module, device, cons_tile, 1);
            module.insert_before(
                fifo,
                Operation::new("aie.flow").with_operands([
                    Attribute::Value(producer.clone()),
                    Attribute::Ident("DMA".into()),
                    Attribute::Int(src_channel),
                    Attribute::Value(consumer.clone()),
                    Attribute::Ident("DMA".into()),
                    Attribute::Int(dst_channel),
                ]),
            );
            for (tile, direction, channel) in [
                (prod_tile, "MM2S", src_channel),
                (cons_tile, "S2MM", dst_channel),
            ] {
                if model.is_shim(tile.1) {
                    module.insert_before(
                        fifo,
                        Operation::new("aie.shim_dma_allocation").with_operands([
                            Attribute::Symbol(name.clone()),
                            Attribute::Ident(direction.into()),
                            Attribute::Int(channel),
                            Attribute::Int(tile.0),
                        ]),
                    );
                }
            }
        }

        for access in module.walk_in(device) {
            let (is_acquire, is_release) = {
                let op = module.op(access);
                (
                    op.is("aie.objectfifo.acquire"),
                    op.is("aie.objectfifo.release"),
                )
            };
            if !(is_acquire || is_release)
                || module.op(access).operand_symbol(0) != Some(name.as_str())
            {
                continue;
            }
            let op = module.op_mut(access);
            let consuming = op.operand_str(1) != Some("produce");
            let count = op.operand_int(2).unwrap_or(1);
            let (lock, action) = match (is_acquire, consuming) {
                (true, true) => (&cons_lock, "acquire_ge"),
                (true, false) => (&prod_lock, "acquire_ge"),
                (false, true) => (&prod_lock, "release"),
                (false, false) => (&cons_lock, "release"),
            };
            op.name = "aie.use_lock".to_string();
            op.operands = vec![
                Attribute::Value(lock.clone()),
                Attribute::Ident(action.into()),
                Attribute::Int(count),
            ];
        }

        module.erase(fifo);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;
    use crate::passes::fixtures::PROGRAM;

    #[test]
    fn test_register_creates_core_loop() {
        let mut module = parse_module(PROGRAM).unwrap();
        let device = module.devices()[0];
        register_processes(&mut module, device).unwrap();

        assert!(module.find_all("aie.objectfifo.register_process").is_empty());
        let core = module
            .find_all("aie.core")
            .into_iter()
            .find(|&id| module.op(id).operand_value(0) == Some("tile_0_2"))
            .unwrap();
        let children: Vec<_> = module
            .children(Some(core))
            .iter()
            .map(|&id| module.op(id).name.clone())
            .collect();
        assert_eq!(children, vec!["scf.for", "aie.end"]);
        let body = module.children(Some(core))[0];
        assert_eq!(module.op(body).operand_int(1), Some(4));
        assert_eq!(module.children(Some(body)).len(), 3);
    }

    #[test]
    fn test_stateful_transform_materializes_fifo() {
        let mut module = parse_module(PROGRAM).unwrap();
        let device = module.devices()[0];
        register_processes(&mut module, device).unwrap();
        stateful_transform(&mut module, device).unwrap();

        assert!(module.find_all("aie.objectfifo").is_empty());
        assert!(module.find_all("aie.objectfifo.acquire").is_empty());
        assert!(module.lookup_symbol("of_in_buff_0").is_some());
        assert!(module.lookup_symbol("of_in_buff_1").is_some());

        let prod = module.op(module.lookup_symbol("of_in_prod_lock").unwrap());
        assert_eq!(prod.int_attr("init"), Some(2));
        assert!(prod.operand_int(1).is_some());

        let flows = module.find_all("aie.flow");
        assert_eq!(flows.len(), 2);
        let allocation = module.find_all("aie.shim_dma_allocation");
        assert_eq!(allocation.len(), 1);
        assert_eq!(module.op(allocation[0]).operand_str(1), Some("MM2S"));

        let uses = module.find_all("aie.use_lock");
        let locks: Vec<_> = uses
            .iter()
            .filter_map(|&id| module.op(id).operand_value(0))
            .collect();
        assert!(locks.contains(&"of_in_cons_lock"));
        assert!(locks.contains(&"of_in_prod_lock"));
    }

    #[test]
    fn test_unknown_fifo_fails() {
        let mut module = parse_module(
            "aie.device(ipu) { aie.objectfifo.register_process(@nope, consume, @k) }",
        )
        .unwrap();
        let device = module.devices()[0];
        let err = register_processes(&mut module, device).unwrap_err();
        assert!(err.contains("@nope"));
    }
}
