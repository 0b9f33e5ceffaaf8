//! AIE Compiler Driver
//!
//! This library lowers a dataflow program for an AIE array into the artifacts
//! needed to run it: the device configuration source, the host glue, the
//! IPU instruction stream and, optionally, a compiled core object with one
//! executable per core.
//!
//! # Example
//!
//! ```rust,no_run
//! use aiecc::{Driver, DriverOptions, HostEnv, Toolchain};
//!
//! let mut options = DriverOptions::new("aie.mlir");
//! options.generate_ipu = true;
//! let toolchain = Toolchain::discover(None, &HostEnv::capture());
//! let report = Driver::new(options, toolchain).run().unwrap();
//! println!("{}", report.target_arch);
//! ```

pub mod artifact;
pub mod device;
pub mod driver;
pub mod error;
pub mod host;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod passes;
pub mod pipeline;
pub mod runner;
pub mod toolchain;
pub mod translate;
pub mod xclbin;

pub use artifact::{emit_artifact, emit_artifact_pair, Artifact, ArtifactKind, OutputFile};
pub use driver::{Branch, CompileReport, Driver, DriverOptions};
pub use error::{CompileError, CompileResult};
pub use ir::{Attribute, Module, OpId, Operation};
pub use parser::{load_module, parse_module, Parser};
pub use passes::{PassResult, Scope, Stage};
pub use pipeline::Pipeline;
pub use runner::{Invocation, ToolRunner};
pub use toolchain::{HostEnv, Toolchain};

/// Parse `source` and run the canonicalization pipeline on it
pub fn canonicalize(source: &str) -> CompileResult<Module> {
    let mut module = parse_module(source)?;
    Pipeline::canonicalize().run(&mut module)?;
    Ok(module)
}
