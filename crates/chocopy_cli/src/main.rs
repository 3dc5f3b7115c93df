//! chococ: translate a typed ChocoPy AST to RISC-V assembly, or run it on the
//! reference machine.

use anyhow::{bail, Context, Result};
use chocopy_codegen_riscv::render;
use chocopy_compiler::print_diagnostics;
use chocopy_config::{default_config_toml, load_config, Config, RegisterMode, CONFIG_FILE_NAME};
use chocopy_runtime::Machine;
use chocopy_syntax::AsmProgram;
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "chococ")]
#[command(about = "ChocoPy RISC-V code generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a typed AST (JSON) to RISC-V assembly
    Build {
        path: PathBuf,
        /// Output file; defaults to the input with a `.s` extension
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        codegen: CodegenArgs,
    },
    /// Translate and execute on the reference machine; exits with the program's status
    Run {
        path: PathBuf,
        #[command(flatten)]
        codegen: CodegenArgs,
        /// Instruction budget
        #[arg(long)]
        max_steps: Option<u64>,
    },
    /// Write a default chocopy.toml
    Init {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

/// Settings that override chocopy.toml.
#[derive(Args, Default)]
struct CodegenArgs {
    /// Config file; defaults to the nearest chocopy.toml above the input
    #[arg(long)]
    config: Option<PathBuf>,
    /// `physical` or `virtual`
    #[arg(long)]
    registers: Option<RegisterMode>,
    #[arg(long)]
    pool_size: Option<usize>,
    /// Omit instruction comments from the assembly
    #[arg(long)]
    no_comments: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::new().filter("CHOCOPY_LOG")).init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Build {
            path,
            output,
            codegen,
        } => {
            let out = cmd_build(&path, output.as_deref(), &codegen)?;
            println!("Wrote {}", out.display());
            Ok(0)
        }
        Commands::Run {
            path,
            codegen,
            max_steps,
        } => cmd_run(&path, &codegen, max_steps),
        Commands::Init { dir } => {
            let path = cmd_init(&dir)?;
            println!("Created {}", path.display());
            Ok(0)
        }
    }
}

/// Nearest chocopy.toml in the input's directory or above it.
fn find_config(input: &Path) -> Option<PathBuf> {
    input
        .ancestors()
        .skip(1)
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|p| p.is_file())
}

fn resolve_config(input: &Path, args: &CodegenArgs) -> Result<Config> {
    let file = match &args.config {
        Some(p) => Some(p.clone()),
        None => input.canonicalize().ok().and_then(|p| find_config(&p)),
    };
    let mut config = match &file {
        Some(p) => {
            debug!("using config {}", p.display());
            load_config(p).with_context(|| format!("reading {}", p.display()))?
        }
        None => Config::default(),
    };
    if let Some(mode) = args.registers {
        config.codegen.registers = mode;
    }
    if let Some(n) = args.pool_size {
        config.codegen.pool_size = n;
    }
    if args.no_comments {
        config.codegen.comments = false;
    }
    if config.codegen.effective_pool_size() == 0 {
        bail!("pool_size must be at least 1");
    }
    Ok(config)
}

fn compile(path: &Path, config: &Config) -> Result<AsmProgram> {
    info!(
        "compiling {} ({:?} registers, pool of {})",
        path.display(),
        config.codegen.registers,
        config.codegen.effective_pool_size()
    );
    chocopy_compiler::compile_file(path, &config.codegen).map_err(|diags| {
        print_diagnostics(&path.display().to_string(), &diags);
        anyhow::anyhow!("compilation failed")
    })
}

fn cmd_build(path: &Path, output: Option<&Path>, args: &CodegenArgs) -> Result<PathBuf> {
    let config = resolve_config(path, args)?;
    let program = compile(path, &config)?;
    let text = render(&program).context("rendering assembly")?;
    let out = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.with_extension("s"));
    std::fs::write(&out, text).with_context(|| format!("writing {}", out.display()))?;
    Ok(out)
}

fn cmd_run(path: &Path, args: &CodegenArgs, max_steps: Option<u64>) -> Result<i32> {
    let config = resolve_config(path, args)?;
    let program = compile(path, &config)?;
    let mut machine = Machine::new(&program)
        .context("loading program")?
        .with_max_steps(max_steps.unwrap_or(config.run.max_steps));
    let outcome = machine.run().context("executing program")?;
    debug!("{} instructions executed", outcome.steps);
    let mut stdout = std::io::stdout();
    stdout.write_all(outcome.stdout.as_bytes())?;
    stdout.flush()?;
    Ok(outcome.exit_code)
}

fn cmd_init(dir: &Path) -> Result<PathBuf> {
    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    std::fs::write(&path, default_config_toml())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `print(6 * 7)` as the front end serializes it.
    const PRINT_42: &str = r#"{
        "statements": [
            {"kind": "ExprStmt",
             "expr": {"kind": "CallExpr", "function": "print",
                      "inferredType": {"kind": "ClassValueType", "className": "<None>"},
                      "args": [
                          {"kind": "BinaryExpr", "operator": "*",
                           "inferredType": {"kind": "ClassValueType", "className": "int"},
                           "left": {
                               "kind": "IntegerLiteral", "value": 6,
                               "inferredType": {"kind": "ClassValueType", "className": "int"}
                           },
                           "right": {
                               "kind": "IntegerLiteral", "value": 7,
                               "inferredType": {"kind": "ClassValueType", "className": "int"}
                           }}
                      ]}}
        ]
    }"#;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chococ_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[test]
    fn build_writes_assembly_next_to_input() {
        let dir = scratch("build");
        let input = dir.join("prog.json");
        std::fs::write(&input, PRINT_42).expect("write ast");
        let out = cmd_build(&input, None, &CodegenArgs::default()).expect("build");
        assert_eq!(out, dir.join("prog.s"));
        let text = std::fs::read_to_string(&out).expect("read asm");
        assert!(text.contains("main:"));
        assert!(text.contains("error.Div:"));
        assert!(text.contains(".data"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn run_reports_program_exit_status() {
        let dir = scratch("run");
        let input = dir.join("prog.json");
        std::fs::write(&input, PRINT_42).expect("write ast");
        let args = CodegenArgs {
            registers: Some(RegisterMode::Virtual),
            ..CodegenArgs::default()
        };
        assert_eq!(cmd_run(&input, &args, None).expect("run"), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn config_is_found_above_input_and_flags_override_it() {
        let dir = scratch("config");
        std::fs::write(
            dir.join(CONFIG_FILE_NAME),
            "[codegen]\nregisters = \"virtual\"\npool_size = 3\n",
        )
        .expect("write config");
        let sub = dir.join("src");
        std::fs::create_dir_all(&sub).expect("mkdir");
        let input = sub.join("prog.json");
        std::fs::write(&input, PRINT_42).expect("write ast");

        let config = resolve_config(&input, &CodegenArgs::default()).expect("config");
        assert_eq!(config.codegen.registers, RegisterMode::Virtual);
        assert_eq!(config.codegen.pool_size, 3);

        let args = CodegenArgs {
            registers: Some(RegisterMode::Physical),
            no_comments: true,
            ..CodegenArgs::default()
        };
        let config = resolve_config(&input, &args).expect("config");
        assert_eq!(config.codegen.registers, RegisterMode::Physical);
        assert!(!config.codegen.comments);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = scratch("init");
        let path = cmd_init(&dir).expect("init");
        assert!(load_config(&path).is_ok());
        assert!(cmd_init(&dir).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn zero_pool_is_rejected() {
        let args = CodegenArgs {
            pool_size: Some(0),
            ..CodegenArgs::default()
        };
        assert!(resolve_config(Path::new("/nonexistent/prog.json"), &args).is_err());
    }

    #[test]
    fn malformed_input_fails_compilation() {
        let dir = scratch("malformed");
        let input = dir.join("bad.json");
        std::fs::write(&input, "{ not json").expect("write");
        let err = cmd_build(&input, None, &CodegenArgs::default()).expect_err("bad input");
        assert!(err.to_string().contains("compilation failed"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
