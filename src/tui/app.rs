//! Debugger application state and logic.

use crate::{Cpu, MachineConfig, Step};
use crate::asm::disasm::disassemble_instruction;
use crate::cpu::memory::{flat_address, SEGMENT_SIZE};
use std::collections::HashSet;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged.
    pub cpu: Cpu,
    /// Program image, reloaded on reset.
    pub program: Vec<u8>,
    /// Machine layout the program was loaded with.
    pub config: MachineConfig,
    /// Breakpoints (by flat address).
    pub breakpoints: HashSet<usize>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// First segment shown in the memory view.
    pub mem_scroll: usize,
    /// Breakpoint address to step past once when resuming.
    resume_from: Option<usize>,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded program.
    pub fn new(program: Vec<u8>, config: MachineConfig) -> Self {
        let (cpu, status) = Self::boot(&program, &config);
        let mem_scroll = config.data_segment as usize;

        Self {
            cpu,
            program,
            config,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status,
            mem_scroll,
            resume_from: None,
        }
    }

    fn boot(program: &[u8], config: &MachineConfig) -> (Cpu, String) {
        let mut cpu = Cpu::with_config(config);
        let status = match cpu.load_with_config(config, program) {
            Ok(()) => "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into(),
            Err(e) => format!("Load failed: {}", e),
        };
        (cpu, status)
    }

    /// Flat address of cs:ip.
    pub fn pc(&self) -> usize {
        flat_address(self.cpu.regs.cs(), self.cpu.regs.ip)
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU stopped: {:?}", self.cpu.state);
            self.running = false;
            return;
        }

        let (cs, ip) = (self.cpu.regs.cs(), self.cpu.regs.ip);
        match self.cpu.step() {
            Ok(Step::Continue(instr)) => {
                self.status = format!("0x{:02X}:0x{:02X}: {}", cs, ip, instr);
            }
            Ok(Step::Halted(flags)) => {
                self.status = format!("Program exited with flags {}", flags);
                self.running = false;
            }
            Err(e) => {
                self.status = format!("Error: {}", e);
                self.running = false;
            }
        }
    }

    /// Run until halt, breakpoint, or error.
    ///
    /// A breakpoint at the current address is stepped past.
    pub fn run(&mut self) {
        self.running = true;
        self.resume_from = Some(self.pc());
        self.status = "Running...".into();
    }

    /// Run one iteration of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.cpu.is_running() {
            self.running = false;
            self.status = format!("Stopped after {} cycles", self.cpu.cycles);
            return;
        }

        let pc = self.pc();
        if self.breakpoints.contains(&pc) && self.resume_from != Some(pc) {
            self.running = false;
            self.status = format!("Breakpoint at 0x{:04X}", pc);
            return;
        }

        self.resume_from = None;
        self.step();
        if self.running {
            self.status = "Running...".into();
        }
    }

    /// Toggle breakpoint at current PC.
    pub fn toggle_breakpoint(&mut self) {
        let pc = self.pc();
        if self.breakpoints.remove(&pc) {
            self.status = format!("Removed breakpoint at 0x{:04X}", pc);
        } else {
            self.breakpoints.insert(pc);
            self.status = format!("Set breakpoint at 0x{:04X}", pc);
        }
    }

    /// Reset CPU to initial state.
    pub fn reset(&mut self) {
        let (cpu, _) = Self::boot(&self.program, &self.config);
        self.cpu = cpu;
        self.running = false;
        self.resume_from = None;
        self.status = "Reset. Ready.".into();
    }

    /// Disassembly starting at the code segment base, windowed around cs:ip.
    ///
    /// Returns (flat address, text, is current).
    pub fn get_disassembly(&self, lines: usize) -> Vec<(usize, String, bool)> {
        let pc = self.pc();
        let mut start = self.cpu.regs.cs() as usize * SEGMENT_SIZE;
        let mut listing = self.walk(start, pc + lines * 2);

        // Sequential decoding from the segment base may not line up with ip
        if !listing.iter().any(|(addr, _, _)| *addr == pc) {
            start = pc;
            listing = self.walk(start, pc + lines * 2);
        }

        let current = listing.iter().position(|(_, _, cur)| *cur).unwrap_or(0);
        let first = current.saturating_sub(lines / 2);
        listing.into_iter().skip(first).take(lines).collect()
    }

    fn walk(&self, start: usize, end: usize) -> Vec<(usize, String, bool)> {
        let pc = self.pc();
        let mut out = Vec::new();
        let mut addr = start;
        while addr < end {
            let bytes = self.cpu.mem.dump(addr, 2);
            match disassemble_instruction(bytes) {
                Some((text, len)) => {
                    out.push((addr, text, addr == pc));
                    addr += len;
                }
                None => break,
            }
        }
        out
    }
}

/// Run the debugger with a program.
pub fn run_debugger(program: Vec<u8>, config: MachineConfig) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = DebuggerApp::new(program, config);
    let max_scroll = app.cpu.mem.len().div_ceil(SEGMENT_SIZE).saturating_sub(1);

    // Main loop
    loop {
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Up => {
                            app.mem_scroll = app.mem_scroll.saturating_sub(1);
                        }
                        KeyCode::Down => {
                            if app.mem_scroll < max_scroll {
                                app.mem_scroll += 1;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}
