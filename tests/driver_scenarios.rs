//! End-to-end driver runs against small programs

use std::fs;
use std::path::{Path, PathBuf};

use aiecc::{
    ArtifactKind, Branch, CompileError, Driver, DriverOptions, HostEnv, Module, PassResult, Scope,
    Stage, Toolchain,
};
use pretty_assertions::assert_eq;
use tempfile::{tempdir, TempDir};

const PROGRAM: &str = r#"
module {
  aie.device(ipu) {
    %tile_0_0 = aie.tile(0, 0)
    %tile_0_2 = aie.tile(0, 2)
    %tile_1_2 = aie.tile(1, 2)
    %lock_a = aie.lock(%tile_0_2) {init = 1, sym_name = "lock_a"}
    %buf_a = aie.buffer(%tile_0_2) {size = 1024, sym_name = "buf_a"}
    %buf_b = aie.buffer(%tile_1_2) {size = 256, sym_name = "buf_b"}
    aie.objectfifo(%tile_0_0, %tile_0_2) {depth = 2, size = 256, sym_name = "of_in"}
    aie.objectfifo.register_process(@of_in, consume, @kernel) {count = 4}
    aie.flow(%tile_0_2, DMA, 0, %tile_1_2, DMA, 0)
    aie.core(%tile_1_2) {
      aie.use_lock(%lock_a, acquire, 1)
      affine.for(0, 8, 1) {
        affine.store(7, %buf_b)
      }
      aie.use_lock(%lock_a, release, 0)
      aie.end
    }
    func.func(@sequence) {
      aiex.ipu.dma_memcpy_nd(@of_in) {arg_idx = 0, id = 0, length = 1024, offset = 0}
      aiex.ipu.sync(0, 0, 0, 0, 1, 1)
    }
  }
}
"#;

/// Input file plus a working directory, both inside one temp dir
struct Workspace {
    _root: TempDir,
    input: PathBuf,
    work_dir: PathBuf,
}

impl Workspace {
    fn new(program: &str) -> Self {
        let root = tempdir().unwrap();
        let input = root.path().join("aie.mlir");
        fs::write(&input, program).unwrap();
        let work_dir = root.path().join("build");
        Self {
            _root: root,
            input,
            work_dir,
        }
    }

    fn options(&self) -> DriverOptions {
        let mut options = DriverOptions::new(&self.input);
        options.work_dir = Some(self.work_dir.clone());
        options.install_dir = PathBuf::from("/opt/aiecc");
        options
    }

    fn file(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }
}

fn driver(options: DriverOptions) -> Driver {
    Driver::new(options, Toolchain::default())
}

fn programs(invocations: &[aiecc::Invocation]) -> Vec<String> {
    invocations
        .iter()
        .map(|i| {
            Path::new(&i.program)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect()
}

#[test]
fn test_default_run_emits_host_sources_only() {
    let ws = Workspace::new(PROGRAM);
    let report = driver(ws.options()).run().unwrap();

    assert_eq!(report.target_arch, "AIE2");
    assert_eq!(report.branches, vec![Branch::Host]);
    assert_eq!(report.artifacts.len(), 2);
    assert!(report.invocations.is_empty());

    let glue = fs::read_to_string(ws.file("aie_inc.cpp")).unwrap();
    assert!(glue.contains("mlir_aie_configure_cores"));
    assert!(glue.contains("core_0_2.elf"));
    let control = fs::read_to_string(ws.file("aie_control.cpp")).unwrap();
    assert!(control.contains("addInitConfigToCDO"));

    assert!(!ws.file("input.o").exists());
    assert!(!ws.file("ipu_insts.txt").exists());
}

#[test]
fn test_unknown_device_is_rejected() {
    let ws = Workspace::new("aie.device(xyz1) {\n  %t = aie.tile(1, 2)\n}\n");
    let err = driver(ws.options()).run().unwrap_err();
    match err {
        CompileError::UnexpectedTargetArch { arch } => assert_eq!(arch, "XYZ1"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!ws.file("aie_inc.cpp").exists());
}

#[test]
fn test_only_ipu_stops_after_instructions() {
    let ws = Workspace::new(PROGRAM);
    let mut options = ws.options();
    options.only_generate_ipu = true;
    options.ipu_insts_name = "insts.txt".to_string();
    let report = driver(options).run().unwrap();

    assert_eq!(report.branches, vec![Branch::Ipu]);
    assert_eq!(report.artifacts.len(), 1);
    assert_eq!(report.artifacts[0].kind, ArtifactKind::IpuInstructions);

    let words = fs::read_to_string(ws.file("insts.txt")).unwrap();
    let mut lines = words.lines();
    assert_eq!(lines.next(), Some("06030100"));
    // writebd, address_patch, write32 and sync
    assert_eq!(lines.next(), Some("00000004"));
    assert!(!ws.file("aie_inc.cpp").exists());
}

#[test]
fn test_ipu_then_host() {
    let ws = Workspace::new(PROGRAM);
    let mut options = ws.options();
    options.generate_ipu = true;
    let report = driver(options).run().unwrap();

    assert_eq!(report.branches, vec![Branch::Ipu, Branch::Host]);
    assert!(report.artifact(ArtifactKind::IpuInstructions).is_some());
    assert!(report.artifact(ArtifactKind::HostGlue).is_some());
}

fn reject(_: &mut Module) -> PassResult {
    Err("rejected by test".to_string())
}

#[test]
fn test_failing_stage_stops_the_run() {
    let ws = Workspace::new(PROGRAM);
    let stage = Stage::Custom {
        name: "test-reject",
        scope: Scope::Module,
        run: reject,
    };
    let err = driver(ws.options()).with_stage(stage).run().unwrap_err();
    match err {
        CompileError::StageFailed { stage, message } => {
            assert_eq!(stage, "test-reject");
            assert_eq!(message, "rejected by test");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!ws.file("aie_inc.cpp").exists());
    assert!(!ws.file("aie_control.cpp").exists());
}

#[test]
fn test_runs_are_deterministic() {
    let ws = Workspace::new(PROGRAM);
    let mut options = ws.options();
    options.generate_ipu = true;

    let first = driver(options.clone()).run().unwrap();
    let glue = fs::read_to_string(ws.file("aie_inc.cpp")).unwrap();
    let insts = fs::read_to_string(ws.file("ipu_insts.txt")).unwrap();

    let second = driver(options).run().unwrap();
    assert_eq!(first.target_arch, second.target_arch);
    assert_eq!(glue, fs::read_to_string(ws.file("aie_inc.cpp")).unwrap());
    assert_eq!(insts, fs::read_to_string(ws.file("ipu_insts.txt")).unwrap());
}

#[test]
fn test_existing_work_dir_is_reused() {
    let ws = Workspace::new(PROGRAM);
    fs::create_dir_all(&ws.work_dir).unwrap();
    fs::write(ws.file("notes.txt"), "keep me").unwrap();

    driver(ws.options()).run().unwrap();
    assert_eq!(fs::read_to_string(ws.file("notes.txt")).unwrap(), "keep me");
}

#[test]
fn test_dry_run_unified_and_host() {
    let ws = Workspace::new(PROGRAM);
    let mut options = ws.options();
    options.dry_run = true;
    options.unified = true;
    options.host_args = vec!["test.cpp".to_string(), "-o".to_string(), "test.elf".to_string()];
    let report = driver(options).run().unwrap();

    assert_eq!(report.branches, vec![Branch::Unified, Branch::Host]);
    assert_eq!(
        programs(&report.invocations),
        vec!["opt", "llc", "clang", "clang", "clang++"]
    );
    assert!(report.invocations.iter().all(|i| i.skipped));

    let links: Vec<_> = report.invocations[2..4]
        .iter()
        .map(|i| i.args[3].clone())
        .collect();
    assert_eq!(links, vec!["-Wl,--entry=core_1_2", "-Wl,--entry=core_0_2"]);
    assert!(report.invocations[4].args.ends_with(&[
        "test.cpp".to_string(),
        "-o".to_string(),
        "test.elf".to_string()
    ]));

    // The driver writes its own translation; tool outputs are never claimed
    let ir = fs::read_to_string(ws.file("input.ll")).unwrap();
    assert!(ir.contains("define void @core_1_2()"));
    assert!(ir.contains("declare void @kernel()"));
    assert!(report.artifact(ArtifactKind::LlvmIr).is_some());
    assert!(report.artifact(ArtifactKind::Object).is_none());
    assert!(!ws.file("input.o").exists());
}

#[cfg(unix)]
#[test]
fn test_failing_tool_aborts_and_keeps_earlier_outputs() {
    use std::os::unix::fs::PermissionsExt;

    let ws = Workspace::new(PROGRAM);
    let peano = tempdir().unwrap();
    let bin = peano.path().join("bin");
    fs::create_dir(&bin).unwrap();
    let opt = bin.join("opt");
    fs::write(&opt, "#!/bin/sh\nexit 1\n").unwrap();
    fs::set_permissions(&opt, fs::Permissions::from_mode(0o755)).unwrap();

    let mut options = ws.options();
    options.generate_ipu = true;
    options.unified = true;
    let toolchain = Toolchain::discover(Some(peano.path()), &HostEnv::default());
    let err = Driver::new(options, toolchain).run().unwrap_err();
    match err {
        CompileError::ToolFailed { program, code } => {
            assert_eq!(program, opt.display().to_string());
            assert_eq!(code, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(ws.file("ipu_insts.txt").exists());
    assert!(ws.file("input.ll").exists());
    assert!(!ws.file("input.o").exists());
    assert!(!ws.file("aie_inc.cpp").exists());
}

#[test]
fn test_unified_without_compile_stops_at_llvm_ir() {
    let ws = Workspace::new(PROGRAM);
    let mut options = ws.options();
    options.unified = true;
    options.compile = false;
    let report = driver(options).run().unwrap();

    assert!(report.invocations.is_empty());
    assert!(report.artifact(ArtifactKind::LlvmIr).is_some());
    assert!(report.artifact(ArtifactKind::OptimizedLlvmIr).is_none());
}

#[test]
fn test_dry_run_xclbin_packaging() {
    let ws = Workspace::new(PROGRAM);
    let mut options = ws.options();
    options.dry_run = true;
    options.generate_ipu = true;
    options.generate_xclbin = true;
    let report = driver(options).run().unwrap();

    assert_eq!(
        report.branches,
        vec![Branch::Ipu, Branch::Host, Branch::Xclbin]
    );
    assert_eq!(programs(&report.invocations), vec!["xclbinutil"]);
    assert!(ws.file("kernels.json").exists());
    assert!(report.artifact(ArtifactKind::Xclbin).is_none());

    let partition = fs::read_to_string(ws.file("aie_partition.json")).unwrap();
    let config = report.artifact(ArtifactKind::DeviceConfig).unwrap();
    assert!(partition.contains(&config.path.display().to_string()));
    assert!(partition.contains("\"column_width\": 2"));

    let json = report.to_json().unwrap();
    assert!(json.contains("\"target_arch\": \"AIE2\""));
}
