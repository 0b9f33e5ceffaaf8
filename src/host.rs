//! Host program compilation against the generated glue

use std::path::{Path, PathBuf};

use crate::error::CompileResult;
use crate::runner::ToolRunner;

/// Host `clang++` invocation, assembled from the driver configuration
#[derive(Debug, Clone)]
pub struct HostBuild {
    host_target: String,
    sysroot: Option<PathBuf>,
    install_dir: PathBuf,
    aietools_root: Option<PathBuf>,
    work_dir: PathBuf,
    target_arch: String,
    host_args: Vec<String>,
}

impl HostBuild {
    pub fn new(
        host_target: impl Into<String>,
        install_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host_target: host_target.into(),
            sysroot: None,
            install_dir: install_dir.into(),
            aietools_root: None,
            work_dir: work_dir.into(),
            target_arch: String::new(),
            host_args: Vec::new(),
        }
    }

    pub fn sysroot(mut self, sysroot: Option<&Path>) -> Self {
        self.sysroot = sysroot.map(Path::to_path_buf);
        self
    }

    pub fn aietools(mut self, root: Option<&Path>) -> Self {
        self.aietools_root = root.map(Path::to_path_buf);
        self
    }

    pub fn target_arch(mut self, arch: impl Into<String>) -> Self {
        self.target_arch = arch.into();
        self
    }

    pub fn host_args(mut self, args: &[String]) -> Self {
        self.host_args = args.to_vec();
        self
    }

    /// `<install>/runtime_lib/<arch prefix>`
    fn runtime_dir(&self) -> PathBuf {
        let prefix = self
            .host_target
            .split_once('-')
            .map_or(self.host_target.as_str(), |(arch, _)| arch);
        self.install_dir.join("runtime_lib").join(prefix)
    }

    pub fn clang_args(&self) -> Vec<String> {
        let mut args = vec!["-std=c++11".to_string()];
        if !self.host_target.is_empty() {
            args.push(format!("--target={}", self.host_target));
        }
        if let Some(sysroot) = &self.sysroot {
            args.push(format!("--sysroot={}", sysroot.display()));
            // This sysroot ships lib/gcc without the matching include/gcc
            if self.host_target == "aarch64-linux-gnu" {
                args.push(format!("--gcc-toolchain={}", sysroot.join("usr").display()));
            }
        }

        let runtime = self.runtime_dir();
        args.push(
            runtime
                .join("test_lib")
                .join("lib")
                .join("libmemory_allocator_ion.a")
                .display()
                .to_string(),
        );
        args.push(format!("-I{}", runtime.join("xaiengine").join("include").display()));
        args.push(format!("-L{}", runtime.join("xaiengine").join("lib").display()));
        if let Some(aietools) = &self.aietools_root {
            args.push(format!("-L{}", aietools.join("lib").join("lnx64.so").display()));
        }
        args.push(format!("-I{}", self.work_dir.display()));
        args.push("-fuse-ld=lld".to_string());
        args.push("-lm".to_string());
        args.push("-lxaiengine".to_string());
        args.push(if self.target_arch == "AIE2" {
            "-D__AIEARCH__=20".to_string()
        } else {
            "-D__AIEARCH__=10".to_string()
        });
        args.extend(self.host_args.iter().cloned());
        args
    }

    /// Compile and link the host program; a no-op without host arguments
    pub fn run(&self, runner: &mut ToolRunner) -> CompileResult<bool> {
        if self.host_args.is_empty() {
            log::debug!("no host arguments, skipping host compilation");
            return Ok(false);
        }
        runner.run_checked("clang++", &self.clang_args())?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::Toolchain;
    use pretty_assertions::assert_eq;

    fn build(target: &str) -> HostBuild {
        HostBuild::new(target, "/opt/aie", "/work/prj")
            .target_arch("AIE2")
            .host_args(&["test.cpp".to_string(), "-o".to_string(), "test.elf".to_string()])
    }

    #[test]
    fn test_clang_args_order() {
        let args = build("x86_64-linux-gnu")
            .sysroot(Some(Path::new("/sysroot")))
            .aietools(Some(Path::new("/vitis/aietools")))
            .clang_args();
        assert_eq!(
            args,
            vec![
                "-std=c++11",
                "--target=x86_64-linux-gnu",
                "--sysroot=/sysroot",
                "/opt/aie/runtime_lib/x86_64/test_lib/lib/libmemory_allocator_ion.a",
                "-I/opt/aie/runtime_lib/x86_64/xaiengine/include",
                "-L/opt/aie/runtime_lib/x86_64/xaiengine/lib",
                "-L/vitis/aietools/lib/lnx64.so",
                "-I/work/prj",
                "-fuse-ld=lld",
                "-lm",
                "-lxaiengine",
                "-D__AIEARCH__=20",
                "test.cpp",
                "-o",
                "test.elf",
            ]
        );
    }

    #[test]
    fn test_aarch64_gets_gcc_toolchain() {
        let args = build("aarch64-linux-gnu")
            .sysroot(Some(Path::new("/sysroot")))
            .target_arch("AIE")
            .clang_args();
        assert_eq!(args[3], "--gcc-toolchain=/sysroot/usr");
        assert!(args.contains(&"-D__AIEARCH__=10".to_string()));
        assert!(args.contains(&"-I/opt/aie/runtime_lib/aarch64/xaiengine/include".to_string()));
    }

    #[test]
    fn test_skipped_without_host_args() {
        let mut runner = ToolRunner::new(Toolchain::default(), false, true);
        let ran = HostBuild::new("x86_64-linux-gnu", "/opt/aie", "/work")
            .run(&mut runner)
            .unwrap();
        assert!(!ran);
        assert!(runner.invocations().is_empty());
    }

    #[test]
    fn test_dry_run_records_clang() {
        let mut runner = ToolRunner::new(Toolchain::default(), false, true);
        assert!(build("x86_64-linux-gnu").run(&mut runner).unwrap());
        assert_eq!(runner.invocations()[0].program, "clang++");
    }
}
