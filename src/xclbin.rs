//! XCLBIN packaging metadata
//!
//! `xclbinutil` takes its kernel signature, memory topology and AIE partition
//! as JSON documents. All three are written next to the other artifacts and
//! the tool is then run through the regular runner. The partition document
//! points at the committed device configuration.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;

use crate::artifact::{emit_artifact, Artifact, ArtifactKind};
use crate::error::CompileResult;
use crate::ir::Module;
use crate::runner::ToolRunner;

/// Names and IDs identifying the kernel inside the xclbin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XclbinSpec {
    pub kernel_name: String,
    pub instance_name: String,
    pub kernel_id: String,
    /// Host buffers passed to the runtime sequence
    pub buffer_args: usize,
    /// Array columns the design occupies
    pub column_width: usize,
}

impl XclbinSpec {
    /// One buffer per `arg_idx` referenced by the runtime sequence
    pub fn buffer_args_of(module: &Module) -> usize {
        module
            .find_all("aiex.ipu.dma_memcpy_nd")
            .into_iter()
            .filter_map(|id| module.op(id).int_attr("arg_idx"))
            .map(|idx| idx.max(0) as usize + 1)
            .max()
            .unwrap_or(1)
    }

    /// Columns up to and including the rightmost placed tile
    pub fn column_width_of(module: &Module) -> usize {
        module
            .find_all("aie.tile")
            .into_iter()
            .filter_map(|id| module.op(id).operand_int(0))
            .map(|col| col.max(0) as usize + 1)
            .max()
            .unwrap_or(1)
    }
}

#[derive(Debug, Serialize)]
struct KernelArgument {
    name: String,
    #[serde(rename = "memory-connection", skip_serializing_if = "Option::is_none")]
    memory_connection: Option<&'static str>,
    #[serde(rename = "address-qualifier")]
    address_qualifier: &'static str,
    #[serde(rename = "type")]
    ty: &'static str,
    offset: String,
}

#[derive(Debug, Serialize)]
struct KernelInstance {
    name: String,
}

#[derive(Debug, Serialize)]
struct ExtendedData {
    subtype: &'static str,
    functional: &'static str,
    dpu_kernel_id: String,
}

#[derive(Debug, Serialize)]
struct Kernel {
    name: String,
    #[serde(rename = "type")]
    ty: &'static str,
    #[serde(rename = "extended-data")]
    extended_data: ExtendedData,
    arguments: Vec<KernelArgument>,
    instances: Vec<KernelInstance>,
}

fn kernel(spec: &XclbinSpec) -> Kernel {
    let mut arguments = vec![
        KernelArgument {
            name: "instr".to_string(),
            memory_connection: Some("SRAM"),
            address_qualifier: "GLOBAL",
            ty: "char *",
            offset: "0x00".to_string(),
        },
        KernelArgument {
            name: "ninstr".to_string(),
            memory_connection: None,
            address_qualifier: "SCALAR",
            ty: "uint64_t",
            offset: "0x08".to_string(),
        },
    ];
    for i in 0..spec.buffer_args {
        arguments.push(KernelArgument {
            name: format!("bo{}", i),
            memory_connection: Some("HOST"),
            address_qualifier: "GLOBAL",
            ty: "void*",
            offset: format!("{:#04x}", 0x10 + i * 8),
        });
    }
    Kernel {
        name: spec.kernel_name.clone(),
        ty: "dpu",
        extended_data: ExtendedData {
            subtype: "DPU",
            functional: "0",
            dpu_kernel_id: spec.kernel_id.clone(),
        },
        arguments,
        instances: vec![KernelInstance {
            name: spec.instance_name.clone(),
        }],
    }
}

/// `kernels.json` contents
pub fn kernels_json(spec: &XclbinSpec) -> CompileResult<String> {
    let document = json!({ "ps-kernels": { "kernels": [kernel(spec)] } });
    Ok(serde_json::to_string_pretty(&document)?)
}

/// `mem_topology.json` contents
pub fn mem_topology_json() -> CompileResult<String> {
    let document = json!({
        "mem_topology": {
            "m_count": "2",
            "m_mem_data": [
                {
                    "m_type": "MEM_DRAM",
                    "m_used": "1",
                    "m_sizeKB": "0x10000",
                    "m_tag": "HOST",
                    "m_base_address": "0x4000000"
                },
                {
                    "m_type": "MEM_DRAM",
                    "m_used": "1",
                    "m_sizeKB": "0xc000",
                    "m_tag": "SRAM",
                    "m_base_address": "0x4000000"
                }
            ]
        }
    });
    Ok(serde_json::to_string_pretty(&document)?)
}

/// `aie_partition.json` contents, with `device_config` as the partition image
pub fn aie_partition_json(spec: &XclbinSpec, device_config: &Path) -> CompileResult<String> {
    let document = json!({
        "aie_partition": {
            "name": "QoS",
            "operations_per_cycle": "2048",
            "inference_fingerprint": "23423",
            "pre_post_fingerprint": "12345",
            "partition": {
                "column_width": spec.column_width,
                "start_columns": [1]
            },
            "PDIs": [
                {
                    "uuid": "00000000-0000-0000-0000-000000000001",
                    "file_name": device_config.display().to_string(),
                    "cdo_groups": [
                        {
                            "name": "DPU",
                            "type": "PRIMARY",
                            "pdi_id": "0x01",
                            "dpu_kernel_ids": [spec.kernel_id],
                            "pre_cdo_groups": ["0xC1"]
                        }
                    ]
                }
            ]
        }
    });
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Write the metadata, then bundle it and `device_config` into `output`
/// with `xclbinutil`
pub fn package(
    spec: &XclbinSpec,
    device_config: &Path,
    work_dir: &Path,
    output: &Path,
    runner: &mut ToolRunner,
) -> CompileResult<Vec<Artifact>> {
    let kernels_path = work_dir.join("kernels.json");
    let topology_path = work_dir.join("mem_topology.json");
    let partition_path = work_dir.join("aie_partition.json");
    let mut artifacts = vec![
        emit_artifact(&kernels_path, ArtifactKind::KernelMetadata, || kernels_json(spec))?,
        emit_artifact(&topology_path, ArtifactKind::KernelMetadata, mem_topology_json)?,
        emit_artifact(&partition_path, ArtifactKind::KernelMetadata, || {
            aie_partition_json(spec, device_config)
        })?,
    ];

    let args = vec![
        "--add-replace-section".to_string(),
        format!("MEM_TOPOLOGY:JSON:{}", topology_path.display()),
        "--add-kernel".to_string(),
        kernels_path.display().to_string(),
        "--add-replace-section".to_string(),
        format!("AIE_PARTITION:JSON:{}", partition_path.display()),
        "--force".to_string(),
        "--output".to_string(),
        output.display().to_string(),
    ];
    runner.run_checked("xclbinutil", &args)?;
    if !runner.is_dry_run() {
        artifacts.push(Artifact::new(ArtifactKind::Xclbin, PathBuf::from(output)));
    }
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;
    use crate::toolchain::Toolchain;
    use std::fs;
    use tempfile::tempdir;

    fn spec() -> XclbinSpec {
        XclbinSpec {
            kernel_name: "MLIR_AIE".to_string(),
            instance_name: "MLIRAIE".to_string(),
            kernel_id: "0x901".to_string(),
            buffer_args: 2,
            column_width: 2,
        }
    }

    #[test]
    fn test_kernels_json_shape() {
        let text = kernels_json(&spec()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let kernel = &value["ps-kernels"]["kernels"][0];
        assert_eq!(kernel["name"], "MLIR_AIE");
        assert_eq!(kernel["extended-data"]["dpu_kernel_id"], "0x901");
        assert_eq!(kernel["instances"][0]["name"], "MLIRAIE");
        let args = kernel["arguments"].as_array().unwrap();
        assert_eq!(args.len(), 4);
        assert_eq!(args[3]["name"], "bo1");
        assert_eq!(args[3]["offset"], "0x18");
        assert!(args[1].get("memory-connection").is_none());
    }

    #[test]
    fn test_buffer_args_from_sequence() {
        let module = parse_module(
            "func.func(@s) {
               aiex.ipu.dma_memcpy_nd(@a) {arg_idx = 0}
               aiex.ipu.dma_memcpy_nd(@b) {arg_idx = 2}
             }",
        )
        .unwrap();
        assert_eq!(XclbinSpec::buffer_args_of(&module), 3);
        assert_eq!(XclbinSpec::buffer_args_of(&Module::new()), 1);
    }

    #[test]
    fn test_partition_points_at_device_config() {
        let text = aie_partition_json(&spec(), Path::new("/work/aie_control.cpp")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let partition = &value["aie_partition"];
        assert_eq!(partition["partition"]["column_width"], 2);
        assert_eq!(partition["PDIs"][0]["file_name"], "/work/aie_control.cpp");
        assert_eq!(partition["PDIs"][0]["cdo_groups"][0]["dpu_kernel_ids"][0], "0x901");
    }

    #[test]
    fn test_column_width_from_tiles() {
        let module = parse_module(
            "aie.device(ipu) { %a = aie.tile(0, 2) %b = aie.tile(3, 2) }",
        )
        .unwrap();
        assert_eq!(XclbinSpec::column_width_of(&module), 4);
    }

    #[test]
    fn test_package_dry_run() {
        let dir = tempdir().unwrap();
        let mut runner = ToolRunner::new(Toolchain::default(), false, true);
        let config = dir.path().join("aie_control.cpp");
        let output = dir.path().join("final.xclbin");
        let artifacts = package(&spec(), &config, dir.path(), &output, &mut runner).unwrap();

        assert_eq!(artifacts.len(), 3);
        assert!(dir.path().join("kernels.json").exists());
        let partition = fs::read_to_string(dir.path().join("aie_partition.json")).unwrap();
        assert!(partition.contains(&config.display().to_string()));

        let invocation = &runner.invocations()[0];
        assert_eq!(invocation.program, "xclbinutil");
        let partition_section = format!(
            "AIE_PARTITION:JSON:{}",
            dir.path().join("aie_partition.json").display()
        );
        assert!(invocation.args.contains(&partition_section));
        assert!(!output.exists());
    }
}
