//! FileCheck-style validation for `.sir` shader tests.
//!
//! A test file is a textual shader program with `; RUN:` and `; CHECK…`
//! comment lines. Each RUN line compiles the program with the flags it
//! names, and the CHECK directives are matched in order against the output:
//! the optional IR dump, the instruction listing and the optional report.
//! Compilation errors are not test failures by themselves; they are printed
//! as `error: <message>` so that tests can check for them.

use clap::Parser;

use crate::ir::ShaderProgram;
use crate::shader::{compile_with_options, CompileArgs};

/// A CHECK directive extracted from a test file
#[derive(Debug, Clone, PartialEq)]
pub enum CheckDirective {
    /// CHECK: pattern - Match on any later line
    Check(String),
    /// CHECK-LABEL: pattern - Label for a section
    CheckLabel(String),
    /// CHECK-NEXT: pattern - Match on the next line
    CheckNext(String),
    /// CHECK-NOT: pattern - No line up to the next match contains pattern
    CheckNot(String),
    /// CHECK-EMPTY - Match empty line
    CheckEmpty,
    /// COM: comment - Comment, ignored
    Comment(String),
}

/// A RUN directive specifying how to compile the test
#[derive(Debug, Clone)]
pub struct RunDirective {
    pub command: String,
    pub args: Vec<String>,
}

/// Test specification extracted from a test file
#[derive(Debug)]
pub struct TestSpec {
    pub run_directives: Vec<RunDirective>,
    pub check_directives: Vec<CheckDirective>,
    pub source: String,
}

impl TestSpec {
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut run_directives = Vec::new();
        let mut check_directives = Vec::new();
        let mut source_lines = Vec::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if let Some(run_cmd) = trimmed.strip_prefix("; RUN:") {
                let parts: Vec<&str> = run_cmd.split_whitespace().collect();
                if let Some((command, args)) = parts.split_first() {
                    run_directives.push(RunDirective {
                        command: command.to_string(),
                        args: args.iter().map(|s| s.to_string()).collect(),
                    });
                }
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-LABEL:") {
                check_directives.push(CheckDirective::CheckLabel(pattern.trim().to_string()));
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-NEXT:") {
                check_directives.push(CheckDirective::CheckNext(pattern.trim().to_string()));
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-NOT:") {
                check_directives.push(CheckDirective::CheckNot(pattern.trim().to_string()));
            } else if trimmed.starts_with("; CHECK-EMPTY") {
                check_directives.push(CheckDirective::CheckEmpty);
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK:") {
                check_directives.push(CheckDirective::Check(pattern.trim().to_string()));
            } else if let Some(comment) = trimmed.strip_prefix("; COM:") {
                check_directives.push(CheckDirective::Comment(comment.trim().to_string()));
            } else {
                source_lines.push(line);
            }
        }

        if run_directives.is_empty() {
            return Err("test has no RUN line".to_string());
        }
        Ok(TestSpec {
            run_directives,
            check_directives,
            source: source_lines.join("\n"),
        })
    }
}

/// Flags of one RUN line, parsed like the `sfn-compile` command line.
#[derive(Parser)]
#[command(no_binary_name = true)]
struct RunLine {
    /// Input file placeholder (`%s`)
    input: Option<String>,
    #[command(flatten)]
    args: CompileArgs,
}

impl RunLine {
    fn from_args(args: &[String]) -> Result<Self, String> {
        RunLine::try_parse_from(args).map_err(|e| format!("bad RUN line: {}", e))
    }
}

/// Test runner that compiles `.sir` tests and validates their output
pub struct TestRunner {
    verbose: bool,
}

impl TestRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn run_test(&self, spec: &TestSpec) -> Result<(), String> {
        let program = ShaderProgram::parse(&spec.source).map_err(|e| e.to_string())?;
        for run_dir in &spec.run_directives {
            let output = self.execute_command(&program, run_dir)?;
            if self.verbose {
                println!("{}", output);
            }
            self.validate_output(&output, &spec.check_directives)?;
        }
        Ok(())
    }

    /// Compile `program` as the RUN line asks and return the output text.
    pub fn execute_command(&self, program: &ShaderProgram, run_dir: &RunDirective) -> Result<String, String> {
        let config = RunLine::from_args(&run_dir.args)?.args;
        let mut output = Vec::new();

        if config.print_ir {
            output.push("; program".to_string());
            output.push(program.to_string());
        }
        match compile_with_options(program, &config.device_caps(), &config.bindings(), config.options()) {
            Ok(shader) => {
                output.push(format!("; {} shader", shader.stage));
                output.push(shader.listing());
                if config.report {
                    output.push("; report".to_string());
                    output.push(shader.report.to_string());
                }
            }
            Err(e) => output.push(format!("error: {}", e)),
        }
        Ok(output.join("\n"))
    }

    /// Validate output against CHECK directives
    pub fn validate_output(&self, output: &str, directives: &[CheckDirective]) -> Result<(), String> {
        let output_lines: Vec<&str> = output.lines().collect();
        let mut line_idx = 0;
        let mut pending_not: Vec<&str> = Vec::new();

        // No text in `region` may contain a pending CHECK-NOT pattern.
        let check_nots = |pending: &mut Vec<&str>, region: &[&str]| -> Result<(), String> {
            for pattern in pending.drain(..) {
                if let Some(line) = region.iter().find(|l| l.contains(pattern)) {
                    return Err(format!("CHECK-NOT: pattern '{}' found in '{}'", pattern, line));
                }
            }
            Ok(())
        };

        for directive in directives {
            match directive {
                CheckDirective::Comment(_) => continue,

                CheckDirective::CheckNot(pattern) => pending_not.push(pattern),

                CheckDirective::Check(pattern) | CheckDirective::CheckLabel(pattern) => {
                    let found = output_lines
                        .iter()
                        .skip(line_idx)
                        .position(|line| line.contains(pattern.as_str()));
                    let Some(idx) = found else {
                        let what = match directive {
                            CheckDirective::CheckLabel(_) => "CHECK-LABEL",
                            _ => "CHECK",
                        };
                        return Err(format!("{}: pattern '{}' not found in output", what, pattern));
                    };
                    let matched = line_idx + idx;
                    let mut region = output_lines[line_idx..matched].to_vec();
                    region.push(before_match(output_lines[matched], pattern));
                    check_nots(&mut pending_not, &region)?;
                    line_idx = matched + 1;
                    if self.verbose {
                        println!("CHECK: '{}' found at line {}", pattern, matched);
                    }
                }

                CheckDirective::CheckNext(pattern) => {
                    let Some(&line) = output_lines.get(line_idx) else {
                        return Err(format!("CHECK-NEXT: no more lines, expected '{}'", pattern));
                    };
                    if !line.contains(pattern.as_str()) {
                        return Err(format!("CHECK-NEXT: expected '{}' but got '{}'", pattern, line));
                    }
                    check_nots(&mut pending_not, &[before_match(line, pattern)])?;
                    line_idx += 1;
                }

                CheckDirective::CheckEmpty => {
                    let Some(&line) = output_lines.get(line_idx) else {
                        return Err("CHECK-EMPTY: no more lines, expected an empty line".to_string());
                    };
                    if !line.trim().is_empty() {
                        return Err(format!("CHECK-EMPTY: expected empty line but got '{}'", line));
                    }
                    check_nots(&mut pending_not, &[])?;
                    line_idx += 1;
                }
            }
        }
        check_nots(&mut pending_not, &output_lines[line_idx.min(output_lines.len())..])
    }
}

/// Text of `line` in front of the first occurrence of `pattern`.
fn before_match<'a>(line: &'a str, pattern: &str) -> &'a str {
    line.find(pattern).map_or(line, |pos| &line[..pos])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BindingSpace;

    #[test]
    fn test_parse_directives() {
        let content = r#"; RUN: sfn-compile --print-ir %s
; CHECK: ; program
; CHECK-LABEL: ; vertex shader
; CHECK-NEXT: EXPORT
; CHECK-NOT: error
; COM: This is a comment
shader vertex
"#;
        let spec = TestSpec::parse(content).unwrap();
        assert_eq!(spec.run_directives.len(), 1);
        assert_eq!(spec.run_directives[0].args, vec!["--print-ir", "%s"]);
        assert_eq!(spec.check_directives.len(), 5);
        assert_eq!(spec.source.trim(), "shader vertex");
    }

    #[test]
    fn test_check_matching() {
        let runner = TestRunner::new(false);
        let output = "; vertex shader\nALU MOV\nALU ADD\n\nEXPORT\n";
        let directives = vec![
            CheckDirective::CheckLabel("vertex shader".to_string()),
            CheckDirective::CheckNext("MOV".to_string()),
            CheckDirective::CheckNot("MUL".to_string()),
            CheckDirective::Check("ADD".to_string()),
            CheckDirective::CheckEmpty,
        ];
        runner.validate_output(output, &directives).unwrap();
    }

    #[test]
    fn test_check_failures() {
        let runner = TestRunner::new(false);
        let output = "Line 1\nLine 2\nLine 3\n";

        let next = vec![
            CheckDirective::Check("Line 1".to_string()),
            CheckDirective::CheckNext("Line 3".to_string()),
        ];
        assert!(runner.validate_output(output, &next).unwrap_err().contains("CHECK-NEXT"));

        let not = vec![
            CheckDirective::CheckNot("Line 2".to_string()),
            CheckDirective::Check("Line 3".to_string()),
        ];
        assert!(runner.validate_output(output, &not).unwrap_err().contains("CHECK-NOT"));
    }

    #[test]
    fn test_check_not_before_next_line() {
        let runner = TestRunner::new(false);
        let output = "; vertex shader\nALU MUL ADD\nEXPORT\n";

        let hit = vec![
            CheckDirective::CheckLabel("vertex shader".to_string()),
            CheckDirective::CheckNot("MUL".to_string()),
            CheckDirective::CheckNext("ADD".to_string()),
        ];
        assert!(runner.validate_output(output, &hit).unwrap_err().contains("'MUL'"));

        // Text after the match belongs to the next region.
        let after = vec![
            CheckDirective::CheckLabel("vertex shader".to_string()),
            CheckDirective::CheckNot("ADD".to_string()),
            CheckDirective::CheckNext("MUL".to_string()),
        ];
        runner.validate_output(output, &after).unwrap();
    }

    #[test]
    fn test_check_empty_past_end() {
        let runner = TestRunner::new(false);
        let directives = vec![CheckDirective::Check("EXPORT".to_string()), CheckDirective::CheckEmpty];
        let err = runner.validate_output("ALU MOV\nEXPORT\n", &directives).unwrap_err();
        assert!(err.contains("CHECK-EMPTY"));
        runner.validate_output("ALU MOV\nEXPORT\n\n; report", &directives).unwrap();
    }

    #[test]
    fn test_run_flags() {
        let args: Vec<String> = ["--gpr-budget", "8", "--textures", "4", "--no-dummy-exports", "--print-report", "%s"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let run = RunLine::from_args(&args).unwrap();
        assert_eq!(run.input.as_deref(), Some("%s"));
        let config = run.args;
        assert_eq!(config.device_caps().budget(crate::ir::ShaderStage::Vertex).gprs, 8);
        let bindings = config.bindings();
        assert!(bindings.contains(BindingSpace::Texture, 3));
        assert!(!bindings.contains(BindingSpace::Texture, 4));
        assert!(!config.options().dummy_exports);
        assert!(config.report);

        let bad = vec!["--frobnicate".to_string()];
        assert!(RunLine::from_args(&bad).is_err());
    }
}
