//! segcpu - CLI Entry Point
//!
//! Commands:
//! - `segcpu run <program>` - Run a raw image or ASM file until it halts
//! - `segcpu debug <program>` - Interactive debugger
//! - `segcpu asm <source>` - Assemble to a raw image
//! - `segcpu disasm <image>` - Disassemble a raw image

use clap::{Parser, Subcommand};
use segcpu::{CpuError, Halt, MachineConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "segcpu")]
#[command(version)]
#[command(about = "A minimal 8-bit virtual CPU with segmented memory")]
struct Cli {
    /// Log every executed instruction (same as RUST_LOG=segcpu=trace)
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the raw image or ASM file to execute
        program: String,
        /// JSON machine configuration
        #[arg(short, long)]
        config: Option<String>,
        /// Segment to load the program into (becomes cs)
        #[arg(long, value_parser = parse_byte)]
        segment: Option<u8>,
        /// Offset to load the program at (becomes ip)
        #[arg(long, value_parser = parse_byte)]
        offset: Option<u8>,
        /// Stop after this many instructions
        #[arg(short, long)]
        max_cycles: Option<u64>,
        /// Print the final machine state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive debugger
    Debug {
        /// Path to the raw image or ASM file to debug
        program: String,
        /// JSON machine configuration
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Assemble source to a raw image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
        /// Offset the image will be loaded at (label values are relative to cs)
        #[arg(long, value_parser = parse_byte, default_value = "0")]
        offset: u8,
    },
    /// Disassemble a raw image to readable text
    Disasm {
        /// Path to the image file
        image: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.trace);

    match cli.command {
        Commands::Run { program, config, segment, offset, max_cycles, json } => {
            let mut config = load_config(config.as_deref());
            if let Some(segment) = segment {
                config.load_segment = segment;
            }
            if let Some(offset) = offset {
                config.load_offset = offset;
            }
            if max_cycles.is_some() {
                config.max_cycles = max_cycles;
            }
            if let Err(e) = config.validate() {
                fail(&format!("Invalid configuration: {}", e));
            }
            run_program(&program, &config, json);
        }
        Commands::Debug { program, config } => {
            debug_program(&program, load_config(config.as_deref()));
        }
        Commands::Asm { source, output, offset } => {
            assemble_file(&source, output, offset);
        }
        Commands::Disasm { image } => {
            disassemble_file(&image);
        }
    }
}

fn init_logging(trace: bool) {
    let filter = if trace {
        EnvFilter::new("segcpu=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_byte(text: &str) -> Result<u8, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse::<u8>(),
    };
    parsed.map_err(|e| format!("expected a byte (0-255 or 0x00-0xFF): {}", e))
}

fn fail(message: &str) -> ! {
    eprintln!("❌ {}", message);
    std::process::exit(1);
}

fn load_config(path: Option<&str>) -> MachineConfig {
    match path {
        Some(path) => MachineConfig::from_file(path)
            .unwrap_or_else(|e| fail(&format!("Failed to load config: {}", e))),
        None => MachineConfig::default(),
    }
}

/// Load a program, assembling it first if it is an ASM file.
///
/// Source is assembled for the configured load offset so labels match the
/// addresses the program runs at.
fn load_program(path: &str, config: &MachineConfig) -> Vec<u8> {
    use segcpu::{assemble_at, load_image};

    if path.ends_with(".asm") {
        let source = std::fs::read_to_string(path)
            .unwrap_or_else(|e| fail(&format!("Failed to read file: {}", e)));

        let program = assemble_at(&source, config.load_offset)
            .unwrap_or_else(|e| fail(&format!("Assembly error: {}", e)));
        println!("📝 Assembled {} bytes", program.len());
        program
    } else {
        let program = load_image(path)
            .unwrap_or_else(|e| fail(&format!("Failed to load image: {}", e)));
        println!("📂 Loaded {} bytes", program.len());
        program
    }
}

fn run_program(path: &str, config: &MachineConfig, json: bool) {
    use segcpu::Cpu;

    println!("🔧 Running: {}", path);
    let program = load_program(path, config);

    let mut cpu = Cpu::with_config(config);
    if let Err(e) = cpu.load_with_config(config, &program) {
        fail(&format!("Failed to load program: {}", e));
    }

    println!();
    println!("━━━ Execution ━━━");

    let result = match config.max_cycles {
        Some(limit) => cpu.run_limited(limit),
        None => cpu.run().map(Some),
    };

    println!();
    println!("━━━ Result ━━━");
    match &result {
        Ok(Some(halt)) => println!("{}", halt),
        Ok(None) => {
            println!("⚠️  Reached max cycles limit ({}). Use --max-cycles to increase.",
                config.max_cycles.unwrap_or_default());
        }
        Err(e) => {
            eprintln!("❌ CPU error at 0x{:02X}:0x{:02X}: {}",
                cpu.regs.cs(), cpu.regs.ip, e);
        }
    }
    let exit_code = exit_status(&result);

    println!("Cycles: {}", cpu.cycles);
    println!("State: {:?}", cpu.state);
    print!("{}", cpu.regs.dump());

    if json {
        match serde_json::to_string_pretty(&cpu.regs) {
            Ok(snapshot) => println!("{}", snapshot),
            Err(e) => eprintln!("❌ Failed to serialize state: {}", e),
        }
    }

    std::process::exit(exit_code);
}

/// Process exit status for a run: 0 on halt, 1 on a fault, 2 when the
/// cycle limit stopped a program that never halted.
fn exit_status(result: &Result<Option<Halt>, CpuError>) -> i32 {
    match result {
        Ok(Some(_)) => 0,
        Err(_) => 1,
        Ok(None) => 2,
    }
}

#[cfg(feature = "tui")]
fn debug_program(path: &str, config: MachineConfig) {
    use segcpu::tui::run_debugger;

    println!("🔍 Loading: {}", path);
    let program = load_program(path, &config);

    println!("🚀 Launching debugger...");
    println!();

    if let Err(e) = run_debugger(program, config) {
        fail(&format!("Debugger error: {}", e));
    }
}

#[cfg(not(feature = "tui"))]
fn debug_program(_path: &str, _config: MachineConfig) {
    fail("this build has no debugger; rebuild with --features tui");
}

fn assemble_file(source_path: &str, output: Option<String>, offset: u8) {
    use segcpu::{assemble_at, save_image};

    let out_path = output.unwrap_or_else(|| {
        match source_path.strip_suffix(".asm") {
            Some(stem) => format!("{}.bin", stem),
            None => format!("{}.bin", source_path),
        }
    });

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let source = std::fs::read_to_string(source_path)
        .unwrap_or_else(|e| fail(&format!("Failed to read file: {}", e)));

    let program = assemble_at(&source, offset)
        .unwrap_or_else(|e| fail(&format!("Assembly error: {}", e)));

    println!("✓ Assembled {} bytes", program.len());

    if let Err(e) = save_image(&out_path, &program) {
        fail(&format!("Failed to save image: {}", e));
    }

    println!("✓ Saved to {}", out_path);
}

fn disassemble_file(image_path: &str) {
    use segcpu::{disassemble, load_image};

    let program = load_image(image_path)
        .unwrap_or_else(|e| fail(&format!("Failed to load image: {}", e)));

    println!("{}", disassemble(&program, 0));
}
