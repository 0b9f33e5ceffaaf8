//! Transformation stages
//!
//! Every stage is a named, in-place rewrite of a `Module` that either
//! succeeds or reports why it could not. The set is closed: the driver
//! composes these into pipelines, and embedders can add their own through
//! `Stage::Custom`.

mod ipu;
mod locks;
mod objectfifo;
mod routing;
mod standard;
mod structure;

use crate::error::{CompileError, CompileResult};
use crate::ir::{Module, OpId};

/// Outcome of a single stage body
pub type PassResult = Result<(), String>;

/// Where a stage anchors: the whole module or each `aie.device`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Module,
    Device,
}

/// A transformation stage
#[derive(Debug, Clone, Copy)]
pub enum Stage {
    LowerAffine,
    CanonicalizeDevice,
    AssignLockIds,
    RegisterObjectFifos,
    ObjectFifoStatefulTransform,
    BroadcastPacket,
    RoutePacketFlows,
    LowerMulticast,
    AssignBufferAddresses,
    ConvertScfToCf,
    CreatePathfinderFlows,
    DmaToIpu,
    LocalizeLocks,
    NormalizeAddressSpaces,
    CoreToStandard,
    AieXToStandard,
    Canonicalize,
    Cse,
    ConvertToLlvm,
    Custom {
        name: &'static str,
        scope: Scope,
        run: fn(&mut Module) -> PassResult,
    },
}

impl Stage {
    /// Pipeline name of the stage
    pub fn name(&self) -> &'static str {
        match self {
            Stage::LowerAffine => "lower-affine",
            Stage::CanonicalizeDevice => "aie-canonicalize-device",
            Stage::AssignLockIds => "aie-assign-lock-ids",
            Stage::RegisterObjectFifos => "aie-register-objectFifos",
            Stage::ObjectFifoStatefulTransform => "aie-objectFifo-stateful-transform",
            Stage::BroadcastPacket => "aie-broadcast-packet",
            Stage::RoutePacketFlows => "aie-create-packet-flows",
            Stage::LowerMulticast => "aie-lower-multicast",
            Stage::AssignBufferAddresses => "aie-assign-buffer-addresses",
            Stage::ConvertScfToCf => "convert-scf-to-cf",
            Stage::CreatePathfinderFlows => "aie-create-pathfinder-flows",
            Stage::DmaToIpu => "aie-dma-to-ipu",
            Stage::LocalizeLocks => "aie-localize-locks",
            Stage::NormalizeAddressSpaces => "aie-normalize-address-spaces",
            Stage::CoreToStandard => "aie-standard-lowering",
            Stage::AieXToStandard => "aiex-standard-lowering",
            Stage::Canonicalize => "canonicalize",
            Stage::Cse => "cse",
            Stage::ConvertToLlvm => "convert-to-llvm",
            Stage::Custom { name, .. } => *name,
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Stage::AssignLockIds
            | Stage::RegisterObjectFifos
            | Stage::ObjectFifoStatefulTransform
            | Stage::BroadcastPacket
            | Stage::RoutePacketFlows
            | Stage::LowerMulticast
            | Stage::AssignBufferAddresses
            | Stage::CreatePathfinderFlows
            | Stage::DmaToIpu
            | Stage::LocalizeLocks
            | Stage::NormalizeAddressSpaces => Scope::Device,
            Stage::Custom { scope, .. } => *scope,
            _ => Scope::Module,
        }
    }

    /// Apply the stage in place
    pub fn run(&self, module: &mut Module) -> CompileResult<()> {
        log::debug!("running stage {}", self.name());
        let result = match self {
            Stage::LowerAffine => structure::lower_affine(module),
            Stage::CanonicalizeDevice => structure::canonicalize_device(module),
            Stage::ConvertScfToCf => structure::convert_scf_to_cf(module),
            Stage::AssignLockIds => for_each_device(module, locks::assign_lock_ids),
            Stage::RegisterObjectFifos => for_each_device(module, objectfifo::register_processes),
            Stage::ObjectFifoStatefulTransform => {
                for_each_device(module, objectfifo::stateful_transform)
            }
            Stage::BroadcastPacket => for_each_device(module, routing::broadcast_packets),
            Stage::RoutePacketFlows => for_each_device(module, routing::route_packet_flows),
            Stage::LowerMulticast => for_each_device(module, routing::lower_multicast),
            Stage::AssignBufferAddresses => {
                for_each_device(module, locks::assign_buffer_addresses)
            }
            Stage::CreatePathfinderFlows => for_each_device(module, routing::route_circuit_flows),
            Stage::DmaToIpu => for_each_device(module, ipu::dma_to_ipu),
            Stage::LocalizeLocks => for_each_device(module, locks::localize_locks),
            Stage::NormalizeAddressSpaces => {
                for_each_device(module, locks::normalize_address_spaces)
            }
            Stage::CoreToStandard => standard::core_to_standard(module),
            Stage::AieXToStandard => standard::aiex_to_standard(module),
            Stage::Canonicalize => standard::canonicalize(module),
            Stage::Cse => standard::cse(module),
            Stage::ConvertToLlvm => standard::convert_to_llvm(module),
            Stage::Custom { run, .. } => run(module),
        };
        result.map_err(|message| CompileError::stage(self.name(), message))
    }
}

fn for_each_device(module: &mut Module, f: fn(&mut Module, OpId) -> PassResult) -> PassResult {
    for device in module.devices() {
        f(module, device)?;
    }
    Ok(())
}
