//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem},
    style::{Color, Style, Modifier},
};
use crate::Flags;
use crate::cpu::memory::{flat_address, SEGMENT_SIZE};
use super::app::DebuggerApp;

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(45),
            Constraint::Percentage(55),
        ])
        .split(frame.area());

    // Left side: code and status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(7),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_registers(frame, left_chunks[1], app);
    draw_status(frame, left_chunks[2], app);

    // Right side: memory and help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app);
    draw_help(frame, right_chunks[1]);
}

/// Draw disassembly view.
fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let disasm = app.get_disassembly((area.height as usize).saturating_sub(2));

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(addr, instr, is_current)| {
            let prefix = if *is_current { "▶ " } else { "  " };
            let bp = if app.breakpoints.contains(addr) { "●" } else { " " };
            let text = format!("{}{:04X}: {}", prefix, addr, instr);

            let style = if *is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if app.breakpoints.contains(addr) {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(format!("{} {}", bp, text)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

/// Draw register state.
fn draw_registers(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let regs = &app.cpu.regs;
    let reg = |i: u8| regs.get(i).unwrap_or_default();
    let hex = |v: u8| Span::styled(format!("0x{:02X}", v), Style::default().fg(Color::White));

    let content = vec![
        Line::from(vec![
            Span::raw("r0: "), hex(reg(0)),
            Span::raw("   r1: "), hex(reg(1)),
            Span::raw("   r2: "), hex(reg(2)),
            Span::raw("   r3: "), hex(reg(3)),
        ]),
        Line::from(vec![
            Span::raw("cs: "),
            Span::styled(format!("0x{:02X}", regs.cs()), Style::default().fg(Color::Yellow)),
            Span::raw("   ds: "),
            Span::styled(format!("0x{:02X}", regs.ds()), Style::default().fg(Color::Magenta)),
            Span::raw("   ip: "),
            Span::styled(format!("0x{:02X}", regs.ip), Style::default().fg(Color::Yellow)),
            Span::raw("   fl: "),
            Span::styled(format!("{} ({:?})", regs.flags, regs.flags), flags_style(regs.flags)),
        ]),
        Line::from(vec![
            Span::raw("Cycles: "),
            Span::styled(format!("{}", app.cpu.cycles), Style::default().fg(Color::Cyan)),
            Span::raw("   State: "),
            Span::styled(format!("{:?}", app.cpu.state),
                if app.cpu.is_running() {
                    Style::default().fg(Color::Green)
                } else {
                    Style::default().fg(Color::Red)
                }),
        ]),
    ];

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// Draw memory view, one segment per row.
fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let pc = flat_address(app.cpu.regs.cs(), app.cpu.regs.ip);
    let ds = app.cpu.regs.ds() as usize;
    let segments = app.cpu.mem.len().div_ceil(SEGMENT_SIZE);

    let items: Vec<ListItem> = (app.mem_scroll..segments)
        .take(visible_rows)
        .map(|segment| {
            let base = segment * SEGMENT_SIZE;
            let mut spans = vec![Span::raw(format!("{:02X}: ", segment))];

            for (i, byte) in app.cpu.mem.dump(base, SEGMENT_SIZE).iter().enumerate() {
                let style = if base + i == pc {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else if *byte != 0 {
                    Style::default().fg(Color::White)
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                spans.push(Span::styled(format!("{:02X} ", byte), style));
            }

            let item = ListItem::new(Line::from(spans));
            if segment == ds {
                item.style(Style::default().bg(Color::Rgb(40, 0, 40)))
            } else {
                item
            }
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Memory (segment: bytes) ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

/// Draw status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw help panel.
fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint  x: Reset  ↑↓: Scroll  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}

/// Color for the flags byte.
fn flags_style(flags: Flags) -> Style {
    match flags {
        Flags::Less => Style::default().fg(Color::Red),
        Flags::Equal => Style::default().fg(Color::Gray),
        Flags::Greater => Style::default().fg(Color::Green),
    }
}
