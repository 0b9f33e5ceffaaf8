//! Runtime sequence lowering for the IPU control core

use crate::ir::{Attribute, Module, OpId, Operation};

use super::PassResult;

/// Buffer descriptors per shim tile
const SHIM_BD_COUNT: i64 = 16;
/// Address register of buffer descriptor 0; descriptors are 0x20 apart
const BD_BASE_ADDRESS: i64 = 0x1D004;
const BD_STRIDE: i64 = 0x20;

/// Start-queue register of a shim DMA channel
fn queue_address(direction: &str, channel: i64) -> Result<i64, String> {
    match (direction, channel) {
        ("MM2S", 0) => Ok(0x1D214),
        ("MM2S", 1) => Ok(0x1D21C),
        ("S2MM", 0) => Ok(0x1D204),
        ("S2MM", 1) => Ok(0x1D20C),
        _ => Err(format!("no shim DMA queue for {} channel {}", direction, channel)),
    }
}

struct ShimAllocation {
    direction: String,
    channel: i64,
    column: i64,
}

fn shim_allocation(module: &Module, device: OpId, symbol: &str) -> Option<ShimAllocation> {
    module
        .find_in(device, "aie.shim_dma_allocation")
        .into_iter()
        .map(|id| module.op(id))
        .find(|op| op.operand_symbol(0) == Some(symbol))
        .and_then(|op| {
            Some(ShimAllocation {
                direction: op.operand_str(1)?.to_string(),
                channel: op.operand_int(2)?,
                column: op.operand_int(3)?,
            })
        })
}

/// Replace each `aiex.ipu.dma_memcpy_nd` with buffer-descriptor writes
pub fn dma_to_ipu(module: &mut Module, device: OpId) -> PassResult {
    for memcpy in module.find_in(device, "aiex.ipu.dma_memcpy_nd") {
        let op = module.op(memcpy).clone();
        let symbol = op
            .operand_symbol(0)
            .ok_or("aiex.ipu.dma_memcpy_nd expects an object FIFO or shim symbol")?;
        let allocation = shim_allocation(module, device, symbol)
            .ok_or_else(|| format!("no shim DMA allocation for @{}", symbol))?;

        let bd_id = op.int_attr("id").unwrap_or(0);
        if !(0..SHIM_BD_COUNT).contains(&bd_id) {
            return Err(format!(
                "buffer descriptor {} out of range, shim tiles have {}",
                bd_id, SHIM_BD_COUNT
            ));
        }
        let length = op
            .int_attr("length")
            .ok_or_else(|| format!("transfer on @{} has no length", symbol))?;
        let offset = op.int_attr("offset").unwrap_or(0);
        let arg_idx = op.int_attr("arg_idx").unwrap_or(0);
        let queue = queue_address(&allocation.direction, allocation.channel)?;

        module.insert_before(
            memcpy,
            Operation::new("aiex.ipu.writebd_shimtile")
                .with_operands([Attribute::Int(allocation.column), Attribute::Int(bd_id)])
                .with_attr("buffer_length", Attribute::Int(length))
                .with_attr("buffer_offset", Attribute::Int(offset))
                .with_attr("arg_idx", Attribute::Int(arg_idx)),
        );
        module.insert_before(
            memcpy,
            Operation::new("aiex.ipu.address_patch").with_operands([
                Attribute::Int(BD_BASE_ADDRESS + bd_id * BD_STRIDE),
                Attribute::Int(arg_idx),
                Attribute::Int(offset),
            ]),
        );
        module.insert_before(
            memcpy,
            Operation::new("aiex.ipu.write32")
                .with_operands([Attribute::Int(allocation.column), Attribute::Int(0)])
                .with_attr("address", Attribute::Int(queue))
                .with_attr("value", Attribute::Int(bd_id)),
        );
        module.erase(memcpy);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;
    use pretty_assertions::assert_eq;

    const SEQUENCE: &str = "aie.device(ipu) {
        %shim = aie.tile(0, 0)
        aie.shim_dma_allocation(@in, MM2S, 1, 0)
        aie.shim_dma_allocation(@out, S2MM, 0, 0)
        func.func(@sequence) {
          aiex.ipu.dma_memcpy_nd(@in) {arg_idx = 0, id = 1, length = 64, offset = 0}
          aiex.ipu.dma_memcpy_nd(@out) {arg_idx = 2, id = 0, length = 64, offset = 16}
          aiex.ipu.sync(0, 0, 0, 0, 1, 1)
        }
      }";

    #[test]
    fn test_memcpy_becomes_bd_writes() {
        let mut module = parse_module(SEQUENCE).unwrap();
        let device = module.devices()[0];
        dma_to_ipu(&mut module, device).unwrap();

        let func = module.find_all("func.func")[0];
        let names: Vec<_> = module
            .children(Some(func))
            .iter()
            .map(|&id| module.op(id).name.clone())
            .collect();
        assert_eq!(
            names,
            vec![
                "aiex.ipu.writebd_shimtile",
                "aiex.ipu.address_patch",
                "aiex.ipu.write32",
                "aiex.ipu.writebd_shimtile",
                "aiex.ipu.address_patch",
                "aiex.ipu.write32",
                "aiex.ipu.sync",
            ]
        );

        let writes = module.find_all("aiex.ipu.write32");
        assert_eq!(module.op(writes[0]).int_attr("address"), Some(0x1D21C));
        assert_eq!(module.op(writes[1]).int_attr("address"), Some(0x1D204));
        let patches = module.find_all("aiex.ipu.address_patch");
        assert_eq!(module.op(patches[0]).operand_int(0), Some(0x1D024));
    }

    #[test]
    fn test_missing_allocation() {
        let mut module = parse_module(
            "aie.device(ipu) { func.func(@s) { aiex.ipu.dma_memcpy_nd(@ghost) {length = 4} } }",
        )
        .unwrap();
        let device = module.devices()[0];
        let err = dma_to_ipu(&mut module, device).unwrap_err();
        assert_eq!(err, "no shim DMA allocation for @ghost");
    }

    #[test]
    fn test_bd_out_of_range() {
        let mut module = parse_module(
            "aie.device(ipu) {
               aie.shim_dma_allocation(@in, MM2S, 0, 0)
               func.func(@s) { aiex.ipu.dma_memcpy_nd(@in) {id = 16, length = 4} }
             }",
        )
        .unwrap();
        let device = module.devices()[0];
        assert!(dma_to_ipu(&mut module, device).is_err());
    }
}
