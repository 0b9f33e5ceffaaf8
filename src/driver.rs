//! Compilation driver
//!
//! Loads the program, canonicalizes it once, and then derives every output
//! from an independent fork of the canonical module: the IPU instruction
//! stream, the unified core object and the host-side sources. External tools
//! run through a single `ToolRunner` so tracing, dry runs and profiling
//! apply uniformly.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use colored::Colorize;
use regex::Regex;
use serde::Serialize;

use crate::artifact::{emit_artifact, emit_artifact_pair, Artifact, ArtifactKind};
use crate::error::{CompileError, CompileResult};
use crate::host::HostBuild;
use crate::ir::Module;
use crate::parser::load_module;
use crate::passes::Stage;
use crate::pipeline::Pipeline;
use crate::runner::{Invocation, ToolRunner};
use crate::toolchain::Toolchain;
use crate::translate::{
    core_functions, render_ipu_words, translate_to_cdo, translate_to_ipu, translate_to_llvm_ir,
    translate_to_target_arch, translate_to_xaie,
};
use crate::xclbin::{self, XclbinSpec};

/// Everything the driver needs to know about one run
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub input: PathBuf,
    /// Working directory, `<input>.prj` when unset
    pub work_dir: Option<PathBuf>,
    pub sysroot: Option<PathBuf>,
    pub peano: Option<PathBuf>,
    pub host_target: String,
    pub host_args: Vec<String>,
    /// Root of the aiecc installation holding `runtime_lib`
    pub install_dir: PathBuf,
    pub verbose: bool,
    pub dry_run: bool,
    pub compile: bool,
    pub link: bool,
    pub compile_host: bool,
    pub unified: bool,
    pub generate_ipu: bool,
    pub only_generate_ipu: bool,
    pub generate_xclbin: bool,
    pub ipu_insts_name: String,
    pub xclbin_name: String,
    pub xclbin_kernel_name: String,
    pub xclbin_instance_name: String,
    pub xclbin_kernel_id: String,
}

impl DriverOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            work_dir: None,
            sysroot: None,
            peano: None,
            host_target: default_host_target(),
            host_args: Vec::new(),
            install_dir: PathBuf::from("."),
            verbose: false,
            dry_run: false,
            compile: true,
            link: true,
            compile_host: true,
            unified: false,
            generate_ipu: false,
            only_generate_ipu: false,
            generate_xclbin: false,
            ipu_insts_name: "ipu_insts.txt".to_string(),
            xclbin_name: "final.xclbin".to_string(),
            xclbin_kernel_name: "MLIR_AIE".to_string(),
            xclbin_instance_name: "MLIRAIE".to_string(),
            xclbin_kernel_id: "0x901".to_string(),
        }
    }
}

/// `<build arch>-linux-gnu`
pub fn default_host_target() -> String {
    format!("{}-linux-gnu", std::env::consts::ARCH)
}

/// Downstream branches, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Branch {
    Ipu,
    Unified,
    Host,
    Xclbin,
}

/// Summary of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct CompileReport {
    pub work_dir: PathBuf,
    pub target_arch: String,
    pub branches: Vec<Branch>,
    pub artifacts: Vec<Artifact>,
    pub invocations: Vec<Invocation>,
}

impl CompileReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }
}

/// `--tmpdir`, or `<input>.prj`, made absolute
pub fn resolve_work_dir(options: &DriverOptions) -> CompileResult<PathBuf> {
    let dir = match &options.work_dir {
        Some(dir) => dir.clone(),
        None => {
            let mut name = options.input.clone().into_os_string();
            name.push(".prj");
            PathBuf::from(name)
        }
    };
    if dir.is_absolute() {
        return Ok(dir);
    }
    let cwd = std::env::current_dir().map_err(|source| CompileError::WorkDir {
        path: dir.clone(),
        source,
    })?;
    Ok(cwd.join(dir))
}

/// Create the working directory; an existing one is reused as is.
/// Its parent must already exist.
pub fn create_work_dir(dir: &Path) -> CompileResult<()> {
    match fs::create_dir(dir) {
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        result => result.map_err(|source| CompileError::WorkDir {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

/// Reject descriptors without an `AIE` generation marker
pub fn validate_target_arch(arch: &str) -> CompileResult<String> {
    let arch = arch.trim();
    let pattern = Regex::new("AIE.?").map_err(|e| CompileError::config(e.to_string()))?;
    if pattern.is_match(arch) {
        Ok(arch.to_string())
    } else {
        Err(CompileError::UnexpectedTargetArch {
            arch: arch.to_string(),
        })
    }
}

/// Backend triple for a target descriptor, e.g. `aie2-none-elf`
pub fn peano_target(arch: &str) -> String {
    format!("{}-none-elf", arch.to_lowercase())
}

/// Artifact for a file an external tool wrote; nothing is written in a dry run
fn produced(runner: &ToolRunner, kind: ArtifactKind, path: &Path) -> Option<Artifact> {
    (!runner.is_dry_run()).then(|| Artifact::new(kind, path))
}

pub struct Driver {
    options: DriverOptions,
    toolchain: Toolchain,
    extra_stages: Vec<Stage>,
}

impl Driver {
    pub fn new(options: DriverOptions, toolchain: Toolchain) -> Self {
        Self {
            options,
            toolchain,
            extra_stages: Vec::new(),
        }
    }

    /// Append a stage to the canonicalization pipeline
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.extra_stages.push(stage);
        self
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    fn canonicalize_pipeline(&self) -> Pipeline {
        let mut pipeline = Pipeline::canonicalize();
        for stage in &self.extra_stages {
            pipeline.push(*stage);
        }
        pipeline
    }

    fn run_pipeline(&self, pipeline: &Pipeline, module: &mut Module) -> CompileResult<()> {
        if self.options.verbose {
            println!("{} {}", "Running:".cyan(), pipeline);
        }
        pipeline.run(module)
    }

    pub fn run(&self) -> CompileResult<CompileReport> {
        let opts = &self.options;
        let work_dir = resolve_work_dir(opts)?;
        create_work_dir(&work_dir)?;
        log::info!("working directory {}", work_dir.display());

        let mut runner = ToolRunner::new(self.toolchain.clone(), opts.verbose, opts.dry_run);

        let mut module = load_module(&opts.input)?;
        if opts.verbose {
            print!("{}", module);
        }
        self.run_pipeline(&self.canonicalize_pipeline(), &mut module)?;
        if opts.verbose {
            print!("{}", module);
        }

        let target_arch = validate_target_arch(&translate_to_target_arch(&module)?)?;
        println!("{} {}", "target arch:".bold(), peano_target(&target_arch));

        let mut report = CompileReport {
            work_dir: work_dir.clone(),
            target_arch: target_arch.clone(),
            branches: Vec::new(),
            artifacts: Vec::new(),
            invocations: Vec::new(),
        };

        if opts.generate_ipu || opts.only_generate_ipu {
            let artifact = self.ipu_branch(&module, &work_dir)?;
            report.artifacts.push(artifact);
            report.branches.push(Branch::Ipu);
            if opts.only_generate_ipu {
                report.invocations = runner.into_invocations();
                return Ok(report);
            }
        }

        if opts.unified {
            let artifacts = self.unified_branch(&module, &work_dir, &target_arch, &mut runner)?;
            report.artifacts.extend(artifacts);
            report.branches.push(Branch::Unified);
        }

        let artifacts = self.host_branch(&module, &work_dir, &target_arch, &mut runner)?;
        report.artifacts.extend(artifacts);
        report.branches.push(Branch::Host);

        if opts.generate_xclbin {
            let spec = XclbinSpec {
                kernel_name: opts.xclbin_kernel_name.clone(),
                instance_name: opts.xclbin_instance_name.clone(),
                kernel_id: opts.xclbin_kernel_id.clone(),
                buffer_args: XclbinSpec::buffer_args_of(&module),
                column_width: XclbinSpec::column_width_of(&module),
            };
            let device_config = report
                .artifact(ArtifactKind::DeviceConfig)
                .map(|artifact| artifact.path.clone())
                .unwrap_or_else(|| work_dir.join("aie_control.cpp"));
            let output = work_dir.join(&opts.xclbin_name);
            report.artifacts.extend(xclbin::package(
                &spec,
                &device_config,
                &work_dir,
                &output,
                &mut runner,
            )?);
            report.branches.push(Branch::Xclbin);
        }

        report.invocations = runner.into_invocations();
        Ok(report)
    }

    fn ipu_branch(&self, module: &Module, work_dir: &Path) -> CompileResult<Artifact> {
        let mut fork = module.fork();
        self.run_pipeline(&Pipeline::ipu(), &mut fork)?;
        let path = work_dir.join(&self.options.ipu_insts_name);
        emit_artifact(&path, ArtifactKind::IpuInstructions, || {
            render_ipu_words(&translate_to_ipu(&fork)?)
        })
    }

    fn unified_branch(
        &self,
        module: &Module,
        work_dir: &Path,
        target_arch: &str,
        runner: &mut ToolRunner,
    ) -> CompileResult<Vec<Artifact>> {
        let opts = &self.options;
        let mut fork = module.fork();
        self.run_pipeline(&Pipeline::unified(), &mut fork)?;

        let llvm_ir = work_dir.join("input.ll");
        let mut artifacts = vec![emit_artifact(&llvm_ir, ArtifactKind::LlvmIr, || {
            translate_to_llvm_ir(&fork)
        })?];
        if !opts.compile {
            return Ok(artifacts);
        }

        let optimized = work_dir.join("input.opt.ll");
        let opt = runner.toolchain().peano_tool("opt").display().to_string();
        runner.run_checked(
            &opt,
            &[
                "--passes=default<O2>".to_string(),
                "-inline-threshold=10".to_string(),
                "-S".to_string(),
                llvm_ir.display().to_string(),
                "-o".to_string(),
                optimized.display().to_string(),
            ],
        )?;
        artifacts.extend(produced(runner, ArtifactKind::OptimizedLlvmIr, &optimized));

        let object = work_dir.join("input.o");
        let llc = runner.toolchain().peano_tool("llc").display().to_string();
        runner.run_checked(
            &llc,
            &[
                optimized.display().to_string(),
                "-O2".to_string(),
                format!("--march={}", target_arch.to_lowercase()),
                "--function-sections".to_string(),
                "--filetype=obj".to_string(),
                "-o".to_string(),
                object.display().to_string(),
            ],
        )?;
        artifacts.extend(produced(runner, ArtifactKind::Object, &object));

        if opts.link {
            let clang = runner.toolchain().peano_tool("clang").display().to_string();
            for entry in core_functions(module) {
                let elf = work_dir.join(format!("{}.elf", entry));
                runner.run_checked(
                    &clang,
                    &[
                        "-O2".to_string(),
                        format!("--target={}", peano_target(target_arch)),
                        "-nostdlib".to_string(),
                        format!("-Wl,--entry={}", entry),
                        object.display().to_string(),
                        "-o".to_string(),
                        elf.display().to_string(),
                    ],
                )?;
                artifacts.extend(produced(runner, ArtifactKind::CoreElf, &elf));
            }
        }
        Ok(artifacts)
    }

    fn host_branch(
        &self,
        module: &Module,
        work_dir: &Path,
        target_arch: &str,
        runner: &mut ToolRunner,
    ) -> CompileResult<Vec<Artifact>> {
        let opts = &self.options;
        if opts.verbose {
            println!("{}", "Host compilation".bold());
        }
        let mut fork = module.fork();
        self.run_pipeline(&Pipeline::host(), &mut fork)?;

        let glue_path = work_dir.join("aie_inc.cpp");
        let control_path = work_dir.join("aie_control.cpp");
        let artifacts = emit_artifact_pair(
            (&glue_path, ArtifactKind::HostGlue),
            || translate_to_xaie(&fork),
            (&control_path, ArtifactKind::DeviceConfig),
            || translate_to_cdo(&fork),
        )?
        .to_vec();

        if opts.compile_host {
            HostBuild::new(opts.host_target.clone(), opts.install_dir.clone(), work_dir)
                .sysroot(opts.sysroot.as_deref())
                .aietools(runner.toolchain().aietools_root.as_deref())
                .target_arch(target_arch)
                .host_args(&opts.host_args)
                .run(runner)?;
        }
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_target_arch_pattern() {
        assert_eq!(validate_target_arch(" AIE2\n").unwrap(), "AIE2");
        assert_eq!(validate_target_arch("AIE").unwrap(), "AIE");
        assert!(matches!(
            validate_target_arch("XYZ1"),
            Err(CompileError::UnexpectedTargetArch { ref arch }) if arch == "XYZ1"
        ));
    }

    #[test]
    fn test_peano_target() {
        assert_eq!(peano_target("AIE2"), "aie2-none-elf");
    }

    #[test]
    fn test_work_dir_defaults_next_to_input() {
        let options = DriverOptions::new("/tmp/design/aie.mlir");
        assert_eq!(
            resolve_work_dir(&options).unwrap(),
            PathBuf::from("/tmp/design/aie.mlir.prj")
        );
    }

    #[test]
    fn test_relative_work_dir_is_absolute() {
        let mut options = DriverOptions::new("aie.mlir");
        options.work_dir = Some(PathBuf::from("build"));
        let dir = resolve_work_dir(&options).unwrap();
        assert!(dir.is_absolute());
        assert!(dir.ends_with("build"));
    }

    #[test]
    fn test_create_work_dir_is_idempotent() {
        let root = tempdir().unwrap();
        let dir = root.path().join("build");
        create_work_dir(&dir).unwrap();
        fs::write(dir.join("keep.txt"), "x").unwrap();
        create_work_dir(&dir).unwrap();
        assert!(dir.join("keep.txt").exists());
    }

    #[test]
    fn test_create_work_dir_needs_parent() {
        let root = tempdir().unwrap();
        let dir = root.path().join("missing").join("build");
        let err = create_work_dir(&dir).unwrap_err();
        assert!(matches!(err, CompileError::WorkDir { ref path, .. } if *path == dir));
        assert!(!root.path().join("missing").exists());
    }

    #[test]
    fn test_create_work_dir_rejects_file() {
        let root = tempdir().unwrap();
        let path = root.path().join("build");
        fs::write(&path, "not a directory").unwrap();
        assert!(matches!(
            create_work_dir(&path),
            Err(CompileError::WorkDir { .. })
        ));
    }

    #[test]
    fn test_defaults() {
        let options = DriverOptions::new("x.mlir");
        assert!(options.compile && options.link && options.compile_host);
        assert!(!options.unified && !options.generate_ipu);
        assert_eq!(options.ipu_insts_name, "ipu_insts.txt");
        assert_eq!(options.xclbin_kernel_id, "0x901");
        assert!(options.host_target.ends_with("-linux-gnu"));
    }
}
