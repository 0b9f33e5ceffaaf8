//! AIE compiler driver CLI
//!
//! Usage:
//!   aiecc aie.mlir
//!   aiecc aie.mlir --unified --peano /opt/peano -v
//!   aiecc aie.mlir --aie-generate-ipu --ipu-insts-name insts.txt -- test.cpp -o test.exe

use std::path::PathBuf;

use clap::Parser as ClapParser;
use colored::Colorize;

use aiecc::runner::profile_report;
use aiecc::{CompileReport, Driver, DriverOptions, HostEnv, Toolchain};

#[derive(ClapParser, Debug)]
#[command(name = "aiecc")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Lowers AIE dataflow programs into device, host and instruction-stream artifacts")]
struct Args {
    /// Program description to compile
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Working directory for intermediate and output files
    #[arg(long)]
    tmpdir: Option<PathBuf>,

    /// Sysroot for cross-compiling the host program
    #[arg(long)]
    sysroot: Option<PathBuf>,

    /// Root directory of the Peano backend toolchain
    #[arg(long)]
    peano: Option<PathBuf>,

    /// Target triple of the host program
    #[arg(long = "host-target", default_value_t = aiecc::driver::default_host_target())]
    host_target: String,

    /// Installation root holding runtime_lib (defaults to two levels above the executable)
    #[arg(long = "install-dir", hide = true)]
    install_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Print commands instead of running them
    #[arg(short = 'n', long = "dry-run")]
    dry_run: bool,

    /// Compile the unified LLVM IR to an object file
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true")]
    compile: bool,

    #[arg(long = "no-compile")]
    no_compile: bool,

    /// Link one executable per core
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true")]
    link: bool,

    #[arg(long = "no-link")]
    no_link: bool,

    /// Compile the host program when host arguments are given
    #[arg(
        long = "compile-host",
        default_value_t = true,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    compile_host: bool,

    #[arg(long = "no-compile-host")]
    no_compile_host: bool,

    /// Compile all cores together into a single object
    #[arg(long)]
    unified: bool,

    /// Generate the IPU instruction stream
    #[arg(long = "aie-generate-ipu")]
    generate_ipu: bool,

    /// Generate the IPU instruction stream and stop
    #[arg(long = "aie-only-generate-ipu")]
    only_generate_ipu: bool,

    /// Package an xclbin with the kernel metadata
    #[arg(long = "aie-generate-xclbin")]
    generate_xclbin: bool,

    /// Output file for the IPU instruction stream
    #[arg(long = "ipu-insts-name", default_value = "ipu_insts.txt")]
    ipu_insts_name: String,

    /// Output xclbin filename
    #[arg(long = "xclbin-name", default_value = "final.xclbin")]
    xclbin_name: String,

    /// Kernel name in the xclbin
    #[arg(long = "xclbin-kernel-name", default_value = "MLIR_AIE")]
    xclbin_kernel_name: String,

    /// Instance name in the xclbin metadata
    #[arg(long = "xclbin-instance-name", default_value = "MLIRAIE")]
    xclbin_instance_name: String,

    /// Kernel id in the xclbin
    #[arg(long = "xclbin-kernel-id", default_value = "0x901")]
    xclbin_kernel_id: String,

    /// Print the slowest external commands after the run
    #[arg(long)]
    profile: bool,

    /// Print the run report as JSON
    #[arg(long = "json")]
    json_output: bool,

    /// Arguments for the host compiler, after `--`
    #[arg(last = true, value_name = "HOST_ARGS")]
    host_args: Vec<String>,
}

impl Args {
    fn into_options(self) -> DriverOptions {
        let install_dir = self.install_dir.unwrap_or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent()?.parent().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        let mut options = DriverOptions::new(self.input);
        options.work_dir = self.tmpdir;
        options.sysroot = self.sysroot;
        options.peano = self.peano;
        options.host_target = self.host_target;
        options.host_args = self.host_args;
        options.install_dir = install_dir;
        options.verbose = self.verbose;
        options.dry_run = self.dry_run;
        options.compile = self.compile && !self.no_compile;
        options.link = self.link && !self.no_link;
        options.compile_host = self.compile_host && !self.no_compile_host;
        options.unified = self.unified;
        options.generate_ipu = self.generate_ipu;
        options.only_generate_ipu = self.only_generate_ipu;
        options.generate_xclbin = self.generate_xclbin;
        options.ipu_insts_name = self.ipu_insts_name;
        options.xclbin_name = self.xclbin_name;
        options.xclbin_kernel_name = self.xclbin_kernel_name;
        options.xclbin_instance_name = self.xclbin_instance_name;
        options.xclbin_kernel_id = self.xclbin_kernel_id;
        options
    }
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let json_output = args.json_output;
    let profile = args.profile;
    let options = args.into_options();

    if options.verbose {
        println!("{}", "AIE Compiler Driver".bold().blue());
        println!("{}", "=".repeat(35));
        println!("{}: {}", "Input".green(), options.input.display());
        println!();
    }

    let toolchain = Toolchain::discover(options.peano.as_deref(), &HostEnv::capture());
    let report = match Driver::new(options, toolchain).run() {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };

    if json_output {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{}: Failed to serialize to JSON: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
    } else {
        print_report(&report);
    }

    if profile {
        print_profile(&report);
    }
}

fn print_report(report: &CompileReport) {
    println!("{}", "Compilation Results".bold().green());
    println!("{}", "=".repeat(50));
    println!("{}: {}", "Target".cyan(), report.target_arch);
    println!("{}: {}", "Working directory".cyan(), report.work_dir.display());
    println!("{}: {:?}", "Branches".cyan(), report.branches);
    for artifact in &report.artifacts {
        println!("  {:<16} {}", format!("{:?}", artifact.kind), artifact.path.display());
    }
}

fn print_profile(report: &CompileReport) {
    println!();
    println!("{}", "Slowest commands".bold().yellow());
    println!("{}", "-".repeat(50));
    print!("{}", profile_report(&report.invocations, 10));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_has_no_short_flag() {
        let args = Args::try_parse_from(["aiecc", "--json", "aie.mlir"]).unwrap();
        assert!(args.json_output);
        assert!(Args::try_parse_from(["aiecc", "-j", "aie.mlir"]).is_err());
    }

    #[test]
    fn test_host_args_follow_separator() {
        let args = Args::try_parse_from(["aiecc", "aie.mlir", "--", "test.cpp", "-o", "test.elf"])
            .unwrap();
        assert_eq!(args.host_args, vec!["test.cpp", "-o", "test.elf"]);
    }
}
