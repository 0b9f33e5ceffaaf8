//! Ordered stage lists and their textual form
//!
//! The pipelines below are the ones the driver schedules. Consecutive
//! device-scoped stages are printed nested under `aie.device(...)`, which is
//! also how they are anchored when they run.

use std::fmt;

use crate::error::CompileResult;
use crate::ir::Module;
use crate::passes::{Scope, Stage};

/// An ordered list of stages applied to one module
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Structural normalization shared by every branch
    pub fn canonicalize() -> Self {
        Self::new(vec![
            Stage::LowerAffine,
            Stage::CanonicalizeDevice,
            Stage::AssignLockIds,
            Stage::RegisterObjectFifos,
            Stage::ObjectFifoStatefulTransform,
            Stage::BroadcastPacket,
            Stage::RoutePacketFlows,
            Stage::LowerMulticast,
            Stage::AssignBufferAddresses,
            Stage::ConvertScfToCf,
        ])
    }

    pub fn ipu() -> Self {
        Self::new(vec![Stage::DmaToIpu])
    }

    /// Core lowering down to the LLVM dialect
    pub fn unified() -> Self {
        Self::new(vec![
            Stage::LocalizeLocks,
            Stage::NormalizeAddressSpaces,
            Stage::CoreToStandard,
            Stage::AieXToStandard,
            Stage::Canonicalize,
            Stage::Cse,
            Stage::ConvertToLlvm,
            Stage::Canonicalize,
            Stage::Cse,
        ])
    }

    pub fn host() -> Self {
        Self::new(vec![
            Stage::CreatePathfinderFlows,
            Stage::BroadcastPacket,
            Stage::RoutePacketFlows,
            Stage::LowerMulticast,
        ])
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Apply every stage in order, stopping at the first failure
    pub fn run(&self, module: &mut Module) -> CompileResult<()> {
        for stage in &self.stages {
            stage.run(module)?;
        }
        Ok(())
    }

    /// Textual description, e.g. `builtin.module(lower-affine,aie.device(aie-assign-lock-ids))`
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut device_group: Vec<&str> = Vec::new();
        for stage in &self.stages {
            match stage.scope() {
                Scope::Device => device_group.push(stage.name()),
                Scope::Module => {
                    if !device_group.is_empty() {
                        parts.push(format!("aie.device({})", device_group.join(",")));
                        device_group.clear();
                    }
                    parts.push(stage.name().to_string());
                }
            }
        }
        if !device_group.is_empty() {
            parts.push(format!("aie.device({})", device_group.join(",")));
        }
        format!("builtin.module({})", parts.join(","))
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileError;
    use crate::ir::{Attribute, Operation};
    use crate::passes::PassResult;
    use pretty_assertions::assert_eq;

    fn count(module: &mut Module) -> PassResult {
        let n = module.body().len() as i64;
        module.append(None, Operation::new("test.marker").with_operand(Attribute::Int(n)));
        Ok(())
    }

    fn fail(_: &mut Module) -> PassResult {
        Err("boom".to_string())
    }

    #[test]
    fn test_describe_groups_device_stages() {
        assert_eq!(
            Pipeline::canonicalize().describe(),
            "builtin.module(lower-affine,aie-canonicalize-device,aie.device(\
             aie-assign-lock-ids,aie-register-objectFifos,aie-objectFifo-stateful-transform,\
             aie-broadcast-packet,aie-create-packet-flows,aie-lower-multicast,\
             aie-assign-buffer-addresses),convert-scf-to-cf)"
        );
        assert_eq!(
            Pipeline::ipu().to_string(),
            "builtin.module(aie.device(aie-dma-to-ipu))"
        );
    }

    #[test]
    fn test_stops_at_first_failure() {
        let marker = Stage::Custom {
            name: "marker",
            scope: Scope::Module,
            run: count,
        };
        let failing = Stage::Custom {
            name: "failing",
            scope: Scope::Module,
            run: fail,
        };
        let pipeline = Pipeline::new(vec![marker, failing, marker]);
        let mut module = Module::new();

        let err = pipeline.run(&mut module).unwrap_err();
        assert!(matches!(err, CompileError::StageFailed { ref stage, .. } if stage == "failing"));
        assert_eq!(module.body().len(), 1);
    }

    #[test]
    fn test_unified_ends_with_cleanup() {
        let names: Vec<_> = Pipeline::unified().stages().iter().map(Stage::name).collect();
        assert_eq!(names.last(), Some(&"cse"));
        assert_eq!(names.iter().filter(|&&n| n == "canonicalize").count(), 2);
    }
}
