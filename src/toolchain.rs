//! Vendor and backend toolchain discovery
//!
//! Discovery reads a snapshot of the host environment and produces an
//! immutable `Toolchain`. Nothing here mutates process-wide state; child
//! processes receive the augmented environment from `Toolchain::child_env`.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// The environment variables discovery depends on
#[derive(Debug, Clone, Default)]
pub struct HostEnv {
    pub vitis: Option<PathBuf>,
    pub peano: Option<PathBuf>,
    pub path: Option<OsString>,
}

impl HostEnv {
    pub fn capture() -> Self {
        Self {
            vitis: env::var_os("VITIS").map(PathBuf::from),
            peano: env::var_os("PEANO_INSTALL_DIR").map(PathBuf::from),
            path: env::var_os("PATH"),
        }
    }
}

/// Resolved tool locations
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    pub vitis_root: Option<PathBuf>,
    pub aietools_root: Option<PathBuf>,
    pub peano_root: Option<PathBuf>,
    search_path: Vec<PathBuf>,
}

impl Toolchain {
    pub fn discover(peano_override: Option<&Path>, host: &HostEnv) -> Self {
        let mut search_path: Vec<PathBuf> = host
            .path
            .as_ref()
            .map(|p| env::split_paths(p).collect())
            .unwrap_or_default();

        let vitis_root = host.vitis.clone().or_else(|| {
            let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            let found = which::which_in("v++", host.path.as_ref(), cwd).ok()?;
            let real = fs::canonicalize(&found).unwrap_or(found);
            let root = real.parent()?.parent()?.to_path_buf();
            log::info!("Found Vitis at {}", root.display());
            Some(root)
        });

        let aietools_root = match &vitis_root {
            Some(vitis) => {
                let aietools = vitis.join("aietools");
                let root = if aietools.exists() {
                    aietools
                } else {
                    vitis.join("cardano")
                };
                search_path.push(root.join("bin"));
                search_path.push(vitis.join("bin"));
                Some(root)
            }
            None => {
                log::warn!("VITIS not found; vendor tools will be looked up on PATH unchanged");
                None
            }
        };

        let peano_root = peano_override
            .map(Path::to_path_buf)
            .or_else(|| host.peano.clone());
        if let Some(root) = &peano_root {
            log::info!("Using Peano at {}", root.display());
        }

        Self {
            vitis_root,
            aietools_root,
            peano_root,
            search_path,
        }
    }

    /// Path of a backend tool such as `clang` or `llc`
    pub fn peano_tool(&self, tool: &str) -> PathBuf {
        match &self.peano_root {
            Some(root) => {
                let in_bin = root.join("bin").join(tool);
                if in_bin.exists() {
                    in_bin
                } else {
                    root.join(tool)
                }
            }
            None => PathBuf::from(tool),
        }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// `PATH` value for child processes
    pub fn search_path_var(&self) -> OsString {
        env::join_paths(&self.search_path).unwrap_or_default()
    }

    /// Environment overrides applied to every child process
    pub fn child_env(&self) -> Vec<(String, OsString)> {
        let mut vars = vec![("PATH".to_string(), self.search_path_var())];
        if let Some(vitis) = &self.vitis_root {
            vars.push(("VITIS".to_string(), vitis.clone().into_os_string()));
        }
        if let Some(aietools) = &self.aietools_root {
            vars.push(("AIETOOLS".to_string(), aietools.clone().into_os_string()));
        }
        vars
    }
}
