//! Host-side C++: libxaie glue (`aie_inc.cpp`) and device configuration
//! (`aie_control.cpp`)

use std::fmt::Write;

use crate::device::{core_symbol, owning_tile, DeviceModel, TileLoc};
use crate::error::{CompileError, CompileResult};
use crate::ir::{Module, OpId};

struct Lock {
    tile: TileLoc,
    id: i64,
    init: i64,
}

struct Buffer {
    symbol: String,
    tile: TileLoc,
    address: i64,
    size: i64,
}

struct Route {
    tile: TileLoc,
    input: (String, i64),
    output: (String, i64),
    packet_id: Option<i64>,
}

/// Physical resources of one routed device
struct DeviceSummary {
    model: DeviceModel,
    cores: Vec<TileLoc>,
    locks: Vec<Lock>,
    buffers: Vec<Buffer>,
    routes: Vec<Route>,
}

fn placed(module: &Module, id: OpId, target: &str) -> CompileResult<TileLoc> {
    owning_tile(module, id).ok_or_else(|| {
        CompileError::translation(
            target,
            format!("{} is not placed on a tile", module.op(id).name),
        )
    })
}

impl DeviceSummary {
    fn collect(module: &Module, device: OpId, target: &str) -> CompileResult<Self> {
        for unrouted in ["aie.flow", "aie.packet_flow", "aiex.multicast", "aiex.broadcast_packet"] {
            if !module.find_in(device, unrouted).is_empty() {
                return Err(CompileError::translation(
                    target,
                    format!("{} must be routed before translation", unrouted),
                ));
            }
        }

        let mut summary = DeviceSummary {
            model: DeviceModel::of_device(module, device),
            cores: Vec::new(),
            locks: Vec::new(),
            buffers: Vec::new(),
            routes: Vec::new(),
        };

        for core in module.find_in(device, "aie.core") {
            summary.cores.push(placed(module, core, target)?);
        }

        for lock in module.find_in(device, "aie.lock") {
            let op = module.op(lock);
            let id = op.operand_int(1).ok_or_else(|| {
                CompileError::translation(target, "lock without an assigned ID")
            })?;
            summary.locks.push(Lock {
                tile: placed(module, lock, target)?,
                id,
                init: op.int_attr("init").unwrap_or(0),
            });
        }

        for buffer in module.find_in(device, "aie.buffer") {
            let op = module.op(buffer);
            let symbol = op.symbol_name().unwrap_or("buffer").to_string();
            let address = op.int_attr("address").ok_or_else(|| {
                CompileError::translation(target, format!("buffer {} has no address", symbol))
            })?;
            summary.buffers.push(Buffer {
                tile: placed(module, buffer, target)?,
                address,
                size: op.int_attr("size").unwrap_or(0),
                symbol,
            });
        }

        for switchbox in module.find_in(device, "aie.switchbox") {
            let tile = placed(module, switchbox, target)?;
            for &id in module.children(Some(switchbox)) {
                let op = module.op(id);
                let packet_id = match op.name.as_str() {
                    "aie.connect" => None,
                    "aie.packet_rule" => Some(op.int_attr("id").unwrap_or(0)),
                    _ => continue,
                };
                let port = |index: usize| -> CompileResult<(String, i64)> {
                    match (op.operand_str(index), op.operand_int(index + 1)) {
                        (Some(bundle), Some(channel)) => Ok((bundle.to_string(), channel)),
                        _ => Err(CompileError::translation(
                            target,
                            format!("malformed {}", op.name),
                        )),
                    }
                };
                summary.routes.push(Route {
                    tile,
                    input: port(0)?,
                    output: port(2)?,
                    packet_id,
                });
            }
        }
        Ok(summary)
    }
}

fn summarize(module: &Module, target: &str) -> CompileResult<Vec<DeviceSummary>> {
    module
        .devices()
        .into_iter()
        .map(|device| DeviceSummary::collect(module, device, target))
        .collect()
}

fn port_name(bundle: &str) -> String {
    bundle.to_uppercase()
}

fn tile(loc: TileLoc) -> String {
    format!("XAie_TileLoc({}, {})", loc.0, loc.1)
}

fn write_routes(out: &mut String, dev: &str, routes: &[Route]) -> CompileResult<()> {
    for route in routes {
        match route.packet_id {
            None => writeln!(
                out,
                "  XAie_StrmConnCctEnable({}, {}, {}, {}, {}, {});",
                dev,
                tile(route.tile),
                port_name(&route.input.0),
                route.input.1,
                port_name(&route.output.0),
                route.output.1
            )?,
            Some(id) => {
                writeln!(
                    out,
                    "  XAie_StrmPktSwSlavePortEnable({}, {}, {}, {});",
                    dev,
                    tile(route.tile),
                    port_name(&route.input.0),
                    route.input.1
                )?;
                writeln!(
                    out,
                    "  XAie_StrmPktSwSlaveSlotEnable({}, {}, {}, {}, 0, XAie_PacketInit({}, 0), 0x1F, {}, 0);",
                    dev,
                    tile(route.tile),
                    port_name(&route.input.0),
                    route.input.1,
                    id,
                    route.output.1
                )?;
                writeln!(
                    out,
                    "  XAie_StrmPktSwMstrPortEnable({}, {}, {}, {}, XAIE_SS_PKT_DONOT_DROP_HEADER, 0, 0x1);",
                    dev,
                    tile(route.tile),
                    port_name(&route.output.0),
                    route.output.1
                )?;
            }
        }
    }
    Ok(())
}

/// libxaie glue included by the host program
pub fn translate_to_xaie(module: &Module) -> CompileResult<String> {
    let devices = summarize(module, "xaie")?;
    let dev = "&(ctx->DevInst)";

    let mut out = String::new();
    writeln!(out, "// Generated libxaie configuration; include from the host program.")?;
    writeln!(out)?;

    writeln!(out, "int mlir_aie_configure_cores(aie_libxaie_ctx_t *ctx) {{")?;
    for summary in &devices {
        for &loc in &summary.cores {
            writeln!(out, "  XAie_CoreReset({}, {});", dev, tile(loc))?;
            writeln!(out, "  XAie_CoreUnreset({}, {});", dev, tile(loc))?;
            writeln!(
                out,
                "  XAie_LoadElf({}, {}, (const char *)\"{}.elf\", XAIE_DISABLE);",
                dev,
                tile(loc),
                core_symbol(loc)
            )?;
        }
    }
    writeln!(out, "  return 0;")?;
    writeln!(out, "}}")?;
    writeln!(out)?;

    writeln!(out, "int mlir_aie_start_cores(aie_libxaie_ctx_t *ctx) {{")?;
    for summary in &devices {
        for &loc in &summary.cores {
            writeln!(out, "  XAie_CoreEnable({}, {});", dev, tile(loc))?;
        }
    }
    writeln!(out, "  return 0;")?;
    writeln!(out, "}}")?;
    writeln!(out)?;

    writeln!(out, "int mlir_aie_initialize_locks(aie_libxaie_ctx_t *ctx) {{")?;
    for summary in &devices {
        for lock in &summary.locks {
            writeln!(
                out,
                "  XAie_LockSetValue({}, {}, XAie_LockInit({}, {}));",
                dev,
                tile(lock.tile),
                lock.id,
                lock.init
            )?;
        }
    }
    writeln!(out, "  return 0;")?;
    writeln!(out, "}}")?;
    writeln!(out)?;

    writeln!(out, "int mlir_aie_configure_switchboxes(aie_libxaie_ctx_t *ctx) {{")?;
    for summary in &devices {
        write_routes(&mut out, dev, &summary.routes)?;
    }
    writeln!(out, "  return 0;")?;
    writeln!(out, "}}")?;

    for summary in &devices {
        for buffer in &summary.buffers {
            writeln!(out)?;
            writeln!(
                out,
                "// {} bytes at {:#x} on tile ({}, {})",
                buffer.size, buffer.address, buffer.tile.0, buffer.tile.1
            )?;
            writeln!(
                out,
                "int32_t mlir_aie_read_buffer_{}(aie_libxaie_ctx_t *ctx, int index) {{",
                buffer.symbol
            )?;
            writeln!(out, "  u32 value;")?;
            writeln!(
                out,
                "  XAie_DataMemRdWord({}, {}, {:#x} + (index * 4), &value);",
                dev,
                tile(buffer.tile),
                buffer.address
            )?;
            writeln!(out, "  return value;")?;
            writeln!(out, "}}")?;
            writeln!(
                out,
                "void mlir_aie_write_buffer_{}(aie_libxaie_ctx_t *ctx, int index, int32_t value) {{",
                buffer.symbol
            )?;
            writeln!(
                out,
                "  XAie_DataMemWrWord({}, {}, {:#x} + (index * 4), value);",
                dev,
                tile(buffer.tile),
                buffer.address
            )?;
            writeln!(out, "}}")?;
        }
    }
    Ok(out)
}

/// Configuration data object source replaying the same setup
pub fn translate_to_cdo(module: &Module) -> CompileResult<String> {
    let devices = summarize(module, "cdo")?;
    let dev = "devInst";

    let mut out = String::new();
    writeln!(out, "// Generated device configuration.")?;
    writeln!(out, "#include <xaiengine.h>")?;
    writeln!(out)?;

    writeln!(out, "void addInitConfigToCDO(XAie_DevInst *{}) {{", dev)?;
    for summary in &devices {
        writeln!(out, "  // device {}", summary.model.name)?;
        for &loc in &summary.cores {
            writeln!(out, "  XAie_CoreReset({}, {});", dev, tile(loc))?;
            writeln!(out, "  XAie_CoreUnreset({}, {});", dev, tile(loc))?;
        }
        for lock in &summary.locks {
            writeln!(
                out,
                "  XAie_LockSetValue({}, {}, XAie_LockInit({}, {}));",
                dev,
                tile(lock.tile),
                lock.id,
                lock.init
            )?;
        }
        write_routes(&mut out, dev, &summary.routes)?;
    }
    writeln!(out, "}}")?;
    writeln!(out)?;

    writeln!(out, "void addCoreEnableToCDO(XAie_DevInst *{}) {{", dev)?;
    for summary in &devices {
        for &loc in &summary.cores {
            writeln!(out, "  XAie_CoreEnable({}, {});", dev, tile(loc))?;
        }
    }
    writeln!(out, "}}")?;
    Ok(out)
}
