//! Stream routing: circuit flows, packet flows, broadcast and multicast
//!
//! Routes are dimension-ordered (column first, then row). Each hop becomes a
//! connection inside the `aie.switchbox` of the tile it crosses.

use std::collections::HashMap;

use crate::device::{tile_loc, DeviceModel, TileLoc};
use crate::ir::{Attribute, Module, OpId, Operation};

use super::PassResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Port {
    North,
    South,
    East,
    West,
}

impl Port {
    fn name(self) -> &'static str {
        match self {
            Port::North => "North",
            Port::South => "South",
            Port::East => "East",
            Port::West => "West",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "North" => Some(Port::North),
            "South" => Some(Port::South),
            "East" => Some(Port::East),
            "West" => Some(Port::West),
            _ => None,
        }
    }

    fn opposite(self) -> Self {
        match self {
            Port::North => Port::South,
            Port::South => Port::North,
            Port::East => Port::West,
            Port::West => Port::East,
        }
    }

    /// Outgoing channels available in this direction
    fn capacity(self) -> i64 {
        match self {
            Port::North => 6,
            _ => 4,
        }
    }

    fn between(from: TileLoc, to: TileLoc) -> Self {
        if to.0 > from.0 {
            Port::East
        } else if to.0 < from.0 {
            Port::West
        } else if to.1 > from.1 {
            Port::North
        } else {
            Port::South
        }
    }
}

/// Tiles visited from `src` to `dst`, both included
fn xy_path(src: TileLoc, dst: TileLoc) -> Vec<TileLoc> {
    let mut path = vec![src];
    let mut current = src;
    while current.0 != dst.0 {
        current.0 += (dst.0 - current.0).signum();
        path.push(current);
    }
    while current.1 != dst.1 {
        current.1 += (dst.1 - current.1).signum();
        path.push(current);
    }
    path
}

/// A stream endpoint: `%tile, Bundle, channel`
struct Endpoint {
    tile: TileLoc,
    bundle: String,
    channel: i64,
}

fn endpoint(module: &Module, op: &Operation, first: usize) -> Result<Endpoint, String> {
    let value = op
        .operand_value(first)
        .ok_or_else(|| format!("malformed {}: expected a tile operand", op.name))?;
    let tile = tile_loc(module, value).ok_or_else(|| format!("%{} is not a tile", value))?;
    let bundle = op
        .operand_str(first + 1)
        .ok_or_else(|| format!("malformed {}: expected a port bundle", op.name))?
        .to_string();
    let channel = op
        .operand_int(first + 2)
        .ok_or_else(|| format!("malformed {}: expected a channel", op.name))?;
    Ok(Endpoint {
        tile,
        bundle,
        channel,
    })
}

/// Find the `aie.tile` for `loc`, creating it at the top of the device if needed
fn tile_value(module: &mut Module, device: OpId, loc: TileLoc) -> String {
    let existing = module.find_in(device, "aie.tile").into_iter().find(|&id| {
        let op = module.op(id);
        (op.operand_int(0), op.operand_int(1)) == (Some(loc.0), Some(loc.1))
    });
    if let Some(value) = existing.and_then(|id| module.op(id).result.clone()) {
        return value;
    }
    let value = module.fresh_value(&format!("tile_{}_{}", loc.0, loc.1));
    module.insert_at(
        Some(device),
        0,
        Operation::new("aie.tile")
            .with_result(value.clone())
            .with_operands([Attribute::Int(loc.0), Attribute::Int(loc.1)]),
    );
    value
}

fn switchbox_for(module: &mut Module, device: OpId, loc: TileLoc) -> OpId {
    let existing = module.find_in(device, "aie.switchbox").into_iter().find(|&id| {
        module
            .op(id)
            .operand_value(0)
            .and_then(|value| tile_loc(module, value))
            == Some(loc)
    });
    if let Some(id) = existing {
        return id;
    }
    let tile = tile_value(module, device, loc);
    module.append(
        Some(device),
        Operation::new("aie.switchbox")
            .with_operand(Attribute::Value(tile))
            .with_region(),
    )
}

/// Outgoing directional channels in use, per tile
struct ChannelMap {
    used: HashMap<(TileLoc, Port), i64>,
}

impl ChannelMap {
    fn from_device(module: &Module, device: OpId) -> Self {
        let mut used = HashMap::new();
        for sb in module.find_in(device, "aie.switchbox") {
            let Some(loc) = module
                .op(sb)
                .operand_value(0)
                .and_then(|value| tile_loc(module, value))
            else {
                continue;
            };
            for connect in module.find_in(sb, "aie.connect") {
                let op = module.op(connect);
                if let (Some(port), Some(channel)) = (
                    op.operand_str(2).and_then(Port::from_name),
                    op.operand_int(3),
                ) {
                    let slot = used.entry((loc, port)).or_insert(0);
                    *slot = (*slot).max(channel + 1);
                }
            }
        }
        Self { used }
    }

    fn allocate(&mut self, tile: TileLoc, port: Port) -> Result<i64, String> {
        let slot = self.used.entry((tile, port)).or_insert(0);
        if *slot >= port.capacity() {
            return Err(format!(
                "no free {} channel on tile ({}, {})",
                port.name(),
                tile.0,
                tile.1
            ));
        }
        *slot += 1;
        Ok(*slot - 1)
    }
}

fn connection(name: &str, input: (&str, i64), output: (&str, i64)) -> Operation {
    Operation::new(name).with_operands([
        Attribute::Ident(input.0.to_string()),
        Attribute::Int(input.1),
        Attribute::Ident(output.0.to_string()),
        Attribute::Int(output.1),
    ])
}

fn check_inside(model: &DeviceModel, loc: TileLoc) -> PassResult {
    if model.contains(loc) {
        Ok(())
    } else {
        Err(format!(
            "tile ({}, {}) is outside device {}",
            loc.0, loc.1, model.name
        ))
    }
}

/// Route every circuit-switched `aie.flow` through the switchboxes
pub fn route_circuit_flows(module: &mut Module, device: OpId) -> PassResult {
    let model = DeviceModel::of_device(module, device);
    let mut channels = ChannelMap::from_device(module, device);

    for flow in module.find_in(device, "aie.flow") {
        let op = module.op(flow).clone();
        let src = endpoint(module, &op, 0)?;
        let dst = endpoint(module, &op, 3)?;
        check_inside(&model, src.tile)?;
        check_inside(&model, dst.tile)?;

        let path = xy_path(src.tile, dst.tile);
        let mut input = (src.bundle.clone(), src.channel);
        for (i, &tile) in path.iter().enumerate() {
            let (output, next_input) = match path.get(i + 1) {
                Some(&next) => {
                    let port = Port::between(tile, next);
                    let channel = channels.allocate(tile, port)?;
                    (
                        (port.name().to_string(), channel),
                        (port.opposite().name().to_string(), channel),
                    )
                }
                None => ((dst.bundle.clone(), dst.channel), (String::new(), 0)),
            };
            let sb = switchbox_for(module, device, tile);
            module.append(
                Some(sb),
                connection(
                    "aie.connect",
                    (&input.0, input.1),
                    (&output.0, output.1),
                ),
            );
            input = next_input;
        }
        module.erase(flow);
    }
    Ok(())
}

/// Route every `aie.packet_flow` as per-hop packet rules
pub fn route_packet_flows(module: &mut Module, device: OpId) -> PassResult {
    let model = DeviceModel::of_device(module, device);

    for flow in module.find_in(device, "aie.packet_flow") {
        let id = module
            .op(flow)
            .operand_int(0)
            .ok_or("aie.packet_flow expects a packet ID")?;
        let sources = module.find_in(flow, "aie.packet_source");
        let source = match sources.as_slice() {
            [single] => endpoint(module, &module.op(*single).clone(), 0)?,
            _ => return Err(format!("packet flow {} needs exactly one source", id)),
        };
        check_inside(&model, source.tile)?;

        let dests: Vec<Endpoint> = module
            .find_in(flow, "aie.packet_dest")
            .into_iter()
            .map(|dest| endpoint(module, &module.op(dest).clone(), 0))
            .collect::<Result<_, _>>()?;
        if dests.is_empty() {
            return Err(format!("packet flow {} has no destination", id));
        }

        for dest in &dests {
            check_inside(&model, dest.tile)?;
            let path = xy_path(source.tile, dest.tile);
            let mut input = (source.bundle.clone(), source.channel);
            for (i, &tile) in path.iter().enumerate() {
                let output = match path.get(i + 1) {
                    Some(&next) => (Port::between(tile, next).name().to_string(), 0),
                    None => (dest.bundle.clone(), dest.channel),
                };
                let rule = connection("aie.packet_rule", (&input.0, input.1), (&output.0, output.1))
                    .with_attr("id", Attribute::Int(id));
                let sb = switchbox_for(module, device, tile);
                let duplicate = module.children(Some(sb)).iter().any(|&existing| {
                    let op = module.op(existing);
                    op.name == rule.name
                        && op.operands == rule.operands
                        && op.attributes == rule.attributes
                });
                if !duplicate {
                    module.append(Some(sb), rule);
                }
                if let Some(&next) = path.get(i + 1) {
                    input = (Port::between(tile, next).opposite().name().to_string(), 0);
                }
            }
        }
        module.erase(flow);
    }
    Ok(())
}

/// `aiex.broadcast_packet` groups become one `aie.packet_flow` per packet ID
pub fn broadcast_packets(module: &mut Module, device: OpId) -> PassResult {
    for bp in module.find_in(device, "aiex.broadcast_packet") {
        let source_operands = module.op(bp).operands.clone();
        if source_operands.len() != 3 {
            return Err("aiex.broadcast_packet expects (%tile, bundle, channel)".to_string());
        }
        for group in module.find_in(bp, "aiex.bp_id") {
            let id = module
                .op(group)
                .operand_int(0)
                .ok_or("aiex.bp_id expects a packet ID")?;
            let dests: Vec<Vec<Attribute>> = module
                .find_in(group, "aiex.bp_dest")
                .into_iter()
                .map(|dest| module.op(dest).operands.clone())
                .collect();
            let flow = module.insert_before(
                bp,
                Operation::new("aie.packet_flow")
                    .with_operand(Attribute::Int(id))
                    .with_region(),
            );
            module.append(
                Some(flow),
                Operation::new("aie.packet_source").with_operands(source_operands.clone()),
            );
            for operands in dests {
                module.append(
                    Some(flow),
                    Operation::new("aie.packet_dest").with_operands(operands),
                );
            }
        }
        module.erase(bp);
    }
    Ok(())
}

/// `aiex.multicast` fans out into one circuit flow per destination
pub fn lower_multicast(module: &mut Module, device: OpId) -> PassResult {
    for mc in module.find_in(device, "aiex.multicast") {
        let source_operands = module.op(mc).operands.clone();
        if source_operands.len() != 3 {
            return Err("aiex.multicast expects (%tile, bundle, channel)".to_string());
        }
        for dest in module.find_in(mc, "aiex.multi_dest") {
            let dest_operands = module.op(dest).operands.clone();
            module.insert_before(
                mc,
                Operation::new("aie.flow")
                    .with_operands(source_operands.iter().cloned())
                    .with_operands(dest_operands),
            );
        }
        module.erase(mc);
    }
    Ok(())
}
