//! External tool invocation
//!
//! Every command goes through `ToolRunner`, which traces it in verbose mode,
//! skips it in dry-run mode and records how long it took.

use std::process::Command;
use std::time::{Duration, Instant};

use colored::Colorize;
use serde::Serialize;

use crate::error::{CompileError, CompileResult};
use crate::toolchain::Toolchain;

/// One external command and its outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub code: i32,
    pub elapsed: Duration,
    pub skipped: bool,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct ToolRunner {
    toolchain: Toolchain,
    verbose: bool,
    dry_run: bool,
    invocations: Vec<Invocation>,
}

impl ToolRunner {
    pub fn new(toolchain: Toolchain, verbose: bool, dry_run: bool) -> Self {
        Self {
            toolchain,
            verbose,
            dry_run,
            invocations: Vec::new(),
        }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn invocations(&self) -> &[Invocation] {
        &self.invocations
    }

    pub fn into_invocations(self) -> Vec<Invocation> {
        self.invocations
    }

    /// Run `program` to completion and return its exit code
    pub fn run(&mut self, program: &str, args: &[String]) -> CompileResult<i32> {
        let mut invocation = Invocation {
            program: program.to_string(),
            args: args.to_vec(),
            code: 0,
            elapsed: Duration::ZERO,
            skipped: self.dry_run,
        };
        if self.verbose {
            println!("{} {}", "Run:".cyan(), invocation.command_line());
        }
        log::debug!("run {}", invocation.command_line());

        if self.dry_run {
            self.invocations.push(invocation);
            return Ok(0);
        }

        let start = Instant::now();
        let mut command = Command::new(program);
        command.args(args);
        for (key, value) in self.toolchain.child_env() {
            command.env(key, value);
        }
        let status = command.status().map_err(|source| CompileError::ToolSpawn {
            program: program.to_string(),
            source,
        })?;
        invocation.elapsed = start.elapsed();
        // Killed by a signal
        invocation.code = status.code().unwrap_or(-1);

        if self.verbose {
            let outcome = if status.success() {
                "Succeeded".green()
            } else {
                "Failed".red()
            };
            println!(
                "{} in {:.3}s code: {}",
                outcome,
                invocation.elapsed.as_secs_f64(),
                invocation.code
            );
        }
        let code = invocation.code;
        self.invocations.push(invocation);
        Ok(code)
    }

    /// Like `run`, but a non-zero exit is an error
    pub fn run_checked(&mut self, program: &str, args: &[String]) -> CompileResult<()> {
        match self.run(program, args)? {
            0 => Ok(()),
            code => Err(CompileError::ToolFailed {
                program: program.to_string(),
                code,
            }),
        }
    }
}

/// The `limit` slowest commands, slowest first
pub fn slowest(invocations: &[Invocation], limit: usize) -> Vec<&Invocation> {
    let mut ranked: Vec<&Invocation> = invocations.iter().collect();
    ranked.sort_by(|a, b| b.elapsed.cmp(&a.elapsed));
    ranked.truncate(limit);
    ranked
}

pub fn profile_report(invocations: &[Invocation], limit: usize) -> String {
    let mut report = String::new();
    for invocation in slowest(invocations, limit) {
        report.push_str(&format!(
            "{:>9.3}s  {}\n",
            invocation.elapsed.as_secs_f64(),
            invocation.command_line()
        ));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dry_run_records_without_spawning() {
        let mut runner = ToolRunner::new(Toolchain::default(), false, true);
        let code = runner
            .run("definitely-not-a-real-tool", &args(&["-o", "x"]))
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(runner.invocations().len(), 1);
        assert!(runner.invocations()[0].skipped);
        assert_eq!(
            runner.invocations()[0].command_line(),
            "definitely-not-a-real-tool -o x"
        );
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let mut runner = ToolRunner::new(Toolchain::default(), false, false);
        let err = runner.run("/nonexistent/aiecc-tool", &[]).unwrap_err();
        assert!(matches!(err, CompileError::ToolSpawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit() {
        let mut runner = ToolRunner::new(Toolchain::default(), false, false);
        let err = runner
            .run_checked("/bin/sh", &args(&["-c", "exit 3"]))
            .unwrap_err();
        match err {
            CompileError::ToolFailed { code, .. } => assert_eq!(code, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runner.invocations()[0].code, 3);
    }

    #[test]
    fn test_profile_orders_by_elapsed() {
        let mut runner = ToolRunner::new(Toolchain::default(), false, true);
        runner.run("fast", &[]).unwrap();
        runner.run("slow", &[]).unwrap();
        let mut invocations = runner.into_invocations();
        invocations[1].elapsed = Duration::from_secs(2);
        assert_eq!(slowest(&invocations, 1)[0].program, "slow");
        assert!(profile_report(&invocations, 5).starts_with("    2.000s  slow"));
    }
}
