// src/gui.rs
use anyhow::{Context, Result};
use crate::config::AppConfig;
use crate::engine::{BlockAction, Engine, LoopHandle};
use crate::instruments::SimBench;
use crate::recorder;
use crate::types::*;
use crate::visualizer::{StreamPlot, SweepPlot};
use eframe::egui;
use egui::{Color32, RichText};
use log::{info, warn};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const LOG_LINES: usize = 8;
const REPAINT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, PartialEq, Eq)]
enum ViewTab {
    Setup,
    Nrx,
}

/// A finished scan waiting for the user to pick a file (or give up).
struct PendingSave {
    result: SweepResult,
    path: String,
}

pub struct SisLabApp {
    config: AppConfig,
    config_path: PathBuf,
    engine: Engine,
    stream: Option<LoopHandle>,
    sweep: Option<LoopHandle>,
    /// Plot toggle as it was when the current stream started.
    stream_plotting: bool,
    power_text: String,
    block_status: String,
    vna_status: String,
    ctrl_current_ma: f64,
    stream_plot: Option<StreamPlot>,
    sweep_plot: Option<SweepPlot>,
    sweep_points_seen: usize,
    /// Finished scans, oldest first. The prompt always shows the front one.
    pending_saves: VecDeque<PendingSave>,
    load_path: String,
    selected_tab: ViewTab,
    log_messages: Vec<String>,
}

impl SisLabApp {
    pub fn new(config: AppConfig, config_path: PathBuf) -> Self {
        let engine = Engine::new(config.mode, SimBench::default());
        Self::with_engine(config, config_path, engine)
    }

    fn with_engine(config: AppConfig, config_path: PathBuf, engine: Engine) -> Self {
        Self {
            config,
            config_path,
            engine,
            stream: None,
            sweep: None,
            stream_plotting: false,
            power_text: "0.0".to_owned(),
            block_status: String::new(),
            vna_status: String::new(),
            ctrl_current_ma: 0.0,
            stream_plot: None,
            sweep_plot: None,
            sweep_points_seen: 0,
            pending_saves: VecDeque::new(),
            load_path: String::new(),
            selected_tab: ViewTab::Nrx,
            log_messages: vec![],
        }
    }

    fn log(&mut self, msg: &str) {
        self.log_messages.push(format!("> {}", msg));
        if self.log_messages.len() > LOG_LINES {
            self.log_messages.remove(0);
        }
    }

    fn loops_active(&self) -> bool {
        self.stream.is_some() || self.sweep.is_some()
    }

    fn set_mode(&mut self, mode: ConnectionMode) {
        if mode == self.engine.mode() {
            return;
        }
        if self.loops_active() {
            self.config.mode = self.engine.mode();
            self.log("Stop running loops before switching mode");
            return;
        }
        self.engine = Engine::new(mode, SimBench::default());
        self.log(&format!("Mode: {:?}", mode));
    }

    // ---------------------------------------------------------------------
    // Loop control
    // ---------------------------------------------------------------------

    fn start_stream(&mut self) {
        match self.engine.spawn_power_stream(&self.config) {
            Ok(handle) => {
                self.stream_plotting = self.config.stream.plot;
                self.stream = Some(handle);
                self.log("Power stream started");
            }
            Err(e) => self.log(&format!("Stream not started: {e}")),
        }
    }

    fn stop_stream(&mut self) {
        if let Some(h) = &self.stream {
            h.stop();
        }
    }

    fn start_sweep(&mut self) {
        match self.engine.spawn_bias_sweep(&self.config) {
            Ok(handle) => {
                self.sweep_points_seen = 0;
                self.sweep = Some(handle);
                self.log(&format!(
                    "Scan started: {:.3} .. {:.3} mV, {} points",
                    self.config.sweep.volt_from_mv,
                    self.config.sweep.volt_to_mv,
                    self.config.sweep.points
                ));
            }
            Err(e) => self.log(&format!("Scan not started: {e}")),
        }
    }

    fn stop_sweep(&mut self) {
        if let Some(h) = &self.sweep {
            h.stop();
        }
    }

    /// Stops both loops and waits for their threads, so a running sweep has
    /// written the original bias back before the app goes away.
    fn shutdown(&mut self) {
        let handles: Vec<LoopHandle> = self
            .stream
            .take()
            .into_iter()
            .chain(self.sweep.take())
            .collect();
        for h in &handles {
            h.stop();
        }
        for h in handles {
            let unsaved = h
                .join()
                .iter()
                .filter(|m| matches!(m, AcqMessage::SweepComplete(_)))
                .count();
            if unsaved > 0 {
                warn!("Shutting down with an unsaved scan");
            }
        }
        if !self.pending_saves.is_empty() {
            warn!("{} scan(s) were never saved", self.pending_saves.len());
        }
    }

    fn run_block(&mut self, action: BlockAction) {
        self.block_status = "...".to_owned();
        if let Err(e) = self.engine.block_action(&self.config, action) {
            self.block_status.clear();
            self.log(&format!("Block {}: {e}", action.label()));
        }
    }

    fn poll_loops(&mut self) {
        let mut msgs = Vec::new();
        if let Some(h) = &self.stream {
            msgs.extend(h.drain());
        }
        if let Some(h) = &self.sweep {
            msgs.extend(h.drain());
        }
        msgs.extend(self.engine.drain_status());
        for msg in msgs {
            self.handle_message(msg);
        }
    }

    fn handle_message(&mut self, msg: AcqMessage) {
        match msg {
            AcqMessage::StreamSample(s) => {
                self.power_text = format!("{:.3}", s.power);
                if self.stream_plotting {
                    let window = self.config.stream.window_points;
                    self.stream_plot
                        .get_or_insert_with(|| StreamPlot::new(window))
                        .push(s.elapsed_s, s.power, s.is_first);
                }
            }
            AcqMessage::SweepIncrement(inc) => {
                self.sweep_points_seen += inc.x.len();
                self.sweep_plot
                    .get_or_insert_with(SweepPlot::default)
                    .plot_new(&inc.x, &inc.y, inc.new_plot);
            }
            AcqMessage::SweepComplete(result) => {
                self.log(&format!("Scan complete: {} points", result.len()));
                self.pending_saves.push_back(PendingSave {
                    result,
                    path: default_scan_file(),
                });
            }
            AcqMessage::Failed(kind, err) => {
                self.log(&format!("{} failed: {err}", kind.label()));
            }
            AcqMessage::Finished(kind) => {
                let handle = match kind {
                    LoopKind::PowerStream => self.stream.take(),
                    LoopKind::BiasSweep => self.sweep.take(),
                };
                // Finished is the last message, so nothing is lost here.
                drop(handle);
                self.log(&format!("{} finished", kind.label()));
            }
            AcqMessage::Status(Instrument::Block, text) => self.block_status = text,
            AcqMessage::Status(Instrument::Vna, text) => self.vna_status = text,
            AcqMessage::Status(Instrument::Nrx, text) => self.log(&text),
        }
    }

    fn save_config(&mut self) {
        match self.config.save(&self.config_path) {
            Ok(()) => {
                let msg = format!("Settings saved to {}", self.config_path.display());
                self.log(&msg);
            }
            Err(e) => self.log(&format!("Settings not saved: {e}")),
        }
    }

    fn save_scan(&mut self, pending: PendingSave) {
        let path = pending.path.trim().to_owned();
        if path.is_empty() {
            return;
        }
        match write_scan(Path::new(&path), &pending.result) {
            Ok(()) => self.log(&format!("Scan saved: {path}")),
            Err(e) => {
                warn!("{e:#}");
                self.log(&format!("Scan not saved: {e:#}"));
            }
        }
    }

    fn load_scan(&mut self) {
        let path = self.load_path.trim().to_owned();
        match read_scan(Path::new(&path)) {
            Ok(result) => {
                let x: Vec<f64> = result.voltage_get.iter().map(|v| v * 1e3).collect();
                self.sweep_plot
                    .get_or_insert_with(SweepPlot::default)
                    .plot_new(&x, &result.power, true);
                self.log(&format!("Loaded {} points from {path}", result.len()));
            }
            Err(e) => self.log(&format!("Load failed: {e:#}")),
        }
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    fn show_setup(&mut self, ui: &mut egui::Ui) {
        let block_busy = self.sweep.is_some();

        ui.group(|ui| {
            ui.label(RichText::new("Block").strong());
            egui::Grid::new("block_grid")
                .num_columns(2)
                .spacing([12.0, 6.0])
                .show(ui, |ui| {
                    ui.label("Address");
                    ui.text_edit_singleline(&mut self.config.block.address);
                    ui.end_row();
                    ui.label("Port");
                    ui.add(egui::DragValue::new(&mut self.config.block.port));
                    ui.end_row();
                    ui.label("Bias device");
                    ui.text_edit_singleline(&mut self.config.block.bias_dev);
                    ui.end_row();
                    ui.label("CTRL device");
                    ui.text_edit_singleline(&mut self.config.block.ctrl_dev);
                    ui.end_row();
                });

            let mut action = None;
            ui.add_enabled_ui(!block_busy, |ui| {
                ui.horizontal(|ui| {
                    if ui.button("Check Block").clicked() {
                        action = Some(BlockAction::BiasData);
                    }
                    if ui.button("Self test").clicked() {
                        action = Some(BlockAction::SelfTest);
                    }
                    if ui.button("CTRL data").clicked() {
                        action = Some(BlockAction::CtrlData);
                    }
                });
                ui.horizontal(|ui| {
                    if ui.button("Short bias").clicked() {
                        action = Some(BlockAction::SetBiasShort(true));
                    }
                    if ui.button("Open bias").clicked() {
                        action = Some(BlockAction::SetBiasShort(false));
                    }
                    if ui.button("Short CTRL").clicked() {
                        action = Some(BlockAction::SetCtrlShort(true));
                    }
                    if ui.button("Open CTRL").clicked() {
                        action = Some(BlockAction::SetCtrlShort(false));
                    }
                });
                ui.horizontal(|ui| {
                    ui.label("CTRL current, mA");
                    ui.add(
                        egui::DragValue::new(&mut self.ctrl_current_ma)
                            .speed(0.01)
                            .clamp_range(-50.0..=50.0),
                    );
                    if ui.button("Set").clicked() {
                        action = Some(BlockAction::SetCtrlCurrent(self.ctrl_current_ma * 1e-3));
                    }
                    if ui.button("Read").clicked() {
                        action = Some(BlockAction::ReadCtrlCurrent);
                    }
                });
            });
            if let Some(action) = action {
                self.run_block(action);
            }
            ui.label(format!("Status: {}", self.block_status));
        });

        ui.add_space(8.0);
        ui.group(|ui| {
            ui.label(RichText::new("VNA").strong());
            egui::Grid::new("vna_grid")
                .num_columns(2)
                .spacing([12.0, 6.0])
                .show(ui, |ui| {
                    ui.label("Address");
                    ui.text_edit_singleline(&mut self.config.vna.address);
                    ui.end_row();
                    ui.label("Port");
                    ui.add(egui::DragValue::new(&mut self.config.vna.port));
                    ui.end_row();
                });
            ui.horizontal(|ui| {
                if ui.button("Test VNA").clicked() {
                    self.vna_status = "...".to_owned();
                    if let Err(e) = self.engine.test_vna(&self.config) {
                        self.vna_status.clear();
                        self.log(&format!("VNA test: {e}"));
                    }
                }
                let color = if self.vna_status.starts_with("Test passed") {
                    Color32::from_rgb(40, 150, 60)
                } else {
                    Color32::from_rgb(200, 60, 60)
                };
                ui.label(RichText::new(&self.vna_status).color(color));
            });
        });

        ui.add_space(8.0);
        ui.group(|ui| {
            ui.label(RichText::new("NRX").strong());
            egui::Grid::new("nrx_grid")
                .num_columns(2)
                .spacing([12.0, 6.0])
                .show(ui, |ui| {
                    ui.label("Address");
                    ui.text_edit_singleline(&mut self.config.nrx.address);
                    ui.end_row();
                    ui.label("Port");
                    ui.add(egui::DragValue::new(&mut self.config.nrx.port));
                    ui.end_row();
                    ui.label("Filter time, s");
                    ui.add(
                        egui::DragValue::new(&mut self.config.nrx.filter_time)
                            .speed(0.001)
                            .clamp_range(0.0..=10.0),
                    );
                    ui.end_row();
                    ui.label("Aperture time, s");
                    ui.add(
                        egui::DragValue::new(&mut self.config.nrx.aperture_time)
                            .speed(1e-5)
                            .clamp_range(0.0..=1.0),
                    );
                    ui.end_row();
                });
        });

        ui.add_space(8.0);
        if ui.button("Save settings").clicked() {
            self.save_config();
        }
    }

    fn show_nrx(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label(RichText::new("Power meter monitor").strong());
            ui.horizontal(|ui| {
                ui.label("Power, dBm:");
                ui.label(RichText::new(&self.power_text).size(23.0).strong());
            });
            let streaming = self.stream.is_some();
            let stoppable = self.stream.as_ref().is_some_and(LoopHandle::is_running);
            ui.horizontal(|ui| {
                if ui
                    .add_enabled(!streaming, egui::Button::new("Start Stream"))
                    .clicked()
                {
                    self.start_stream();
                }
                if ui
                    .add_enabled(stoppable, egui::Button::new("Stop Stream"))
                    .clicked()
                {
                    self.stop_stream();
                }
            });
            ui.checkbox(&mut self.config.stream.plot, "Plot stream time line");
            ui.horizontal(|ui| {
                ui.label("Window points");
                let changed = ui
                    .add(
                        egui::DragValue::new(&mut self.config.stream.window_points)
                            .clamp_range(10..=1000),
                    )
                    .changed();
                if changed {
                    if let Some(plot) = &mut self.stream_plot {
                        plot.set_window(self.config.stream.window_points);
                    }
                }
            });
        });

        ui.add_space(8.0);
        ui.group(|ui| {
            ui.label(RichText::new("Scan Bias Power").strong());
            let (lo, hi) = (self.config.block.volt_min_mv, self.config.block.volt_max_mv);
            let sweep_cfg = &mut self.config.sweep;
            egui::Grid::new("scan_grid")
                .num_columns(2)
                .spacing([12.0, 6.0])
                .show(ui, |ui| {
                    ui.label("Voltage from, mV");
                    ui.add(
                        egui::DragValue::new(&mut sweep_cfg.volt_from_mv)
                            .speed(0.01)
                            .clamp_range(lo..=hi),
                    );
                    ui.end_row();
                    ui.label("Voltage to, mV");
                    ui.add(
                        egui::DragValue::new(&mut sweep_cfg.volt_to_mv)
                            .speed(0.01)
                            .clamp_range(lo..=hi),
                    );
                    ui.end_row();
                    ui.label("Points");
                    let max_points = sweep_cfg.points_max.max(1);
                    ui.add(egui::DragValue::new(&mut sweep_cfg.points).clamp_range(1..=max_points));
                    ui.end_row();
                    ui.label("Step delay, s");
                    ui.add(
                        egui::DragValue::new(&mut sweep_cfg.step_delay_s)
                            .speed(0.01)
                            .clamp_range(0.0..=10.0),
                    );
                    ui.end_row();
                });

            let scanning = self.sweep.is_some();
            let stoppable = self.sweep.as_ref().is_some_and(LoopHandle::is_running);
            ui.horizontal(|ui| {
                if ui
                    .add_enabled(!scanning, egui::Button::new("Start Scan"))
                    .clicked()
                {
                    self.start_sweep();
                }
                if ui
                    .add_enabled(stoppable, egui::Button::new("Stop Scan"))
                    .clicked()
                {
                    self.stop_sweep();
                }
                if scanning {
                    ui.spinner();
                    ui.label(format!("{} points", self.sweep_points_seen));
                }
            });
            ui.horizontal(|ui| {
                ui.label("Load scan");
                ui.text_edit_singleline(&mut self.load_path);
                if ui.button("Open").clicked() {
                    self.load_scan();
                }
            });
        });
    }

    /// Saves (or drops) the oldest finished scan.
    fn resolve_pending(&mut self, save: bool) {
        let Some(pending) = self.pending_saves.pop_front() else {
            return;
        };
        if save {
            self.save_scan(pending);
        } else {
            info!("Scan discarded");
        }
    }

    fn show_save_prompt(&mut self, ctx: &egui::Context) {
        let queued = self.pending_saves.len();
        let Some(pending) = self.pending_saves.front_mut() else {
            return;
        };
        let mut choice = None;
        egui::Window::new("Save bias-power scan")
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                ui.label(format!("{} points recorded", pending.result.len()));
                if queued > 1 {
                    ui.label(format!("{} more scans waiting", queued - 1));
                }
                ui.horizontal(|ui| {
                    ui.label("File");
                    ui.text_edit_singleline(&mut pending.path);
                });
                ui.horizontal(|ui| {
                    if ui.button("Save").clicked() {
                        choice = Some(true);
                    }
                    if ui.button("Cancel").clicked() {
                        choice = Some(false);
                    }
                });
            });
        if let Some(save) = choice {
            self.resolve_pending(save);
        }
    }
}

fn write_scan(path: &Path, result: &SweepResult) -> Result<()> {
    recorder::save_sweep_csv(path, result)
        .with_context(|| format!("saving scan to {}", path.display()))
}

fn read_scan(path: &Path) -> Result<SweepResult> {
    recorder::load_sweep_csv(path).with_context(|| format!("reading {}", path.display()))
}

fn default_scan_file() -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("bias_power_{}.csv", ts)
}

impl eframe::App for SisLabApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_loops();

        egui::TopBottomPanel::top("topbar").show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                ui.heading("SIS lab");
                ui.separator();
                let mut mode = self.config.mode;
                ui.add_enabled_ui(!self.loops_active(), |ui| {
                    ui.selectable_value(&mut mode, ConnectionMode::Simulation, "Simulation");
                    ui.selectable_value(&mut mode, ConnectionMode::Hardware, "Hardware");
                });
                if mode != self.config.mode {
                    self.config.mode = mode;
                    self.set_mode(mode);
                }
                ui.separator();
                for (label, tab) in [("Setup", ViewTab::Setup), ("NRX", ViewTab::Nrx)] {
                    ui.selectable_value(&mut self.selected_tab, tab, label);
                }
            });
        });

        egui::TopBottomPanel::bottom("log_panel")
            .resizable(false)
            .show(ctx, |ui| {
                ui.label("Logs");
                for m in &self.log_messages {
                    ui.monospace(m);
                }
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical()
                .auto_shrink([false; 2])
                .show(ui, |ui| match self.selected_tab {
                    ViewTab::Setup => self.show_setup(ui),
                    ViewTab::Nrx => self.show_nrx(ui),
                });
        });

        if let Some(plot) = &mut self.stream_plot {
            plot.show(ctx);
        }
        if let Some(plot) = &mut self.sweep_plot {
            plot.show(ctx);
        }
        self.show_save_prompt(ctx);

        if self.loops_active() || self.block_status == "..." || self.vna_status == "..." {
            ctx.request_repaint_after(REPAINT_INTERVAL);
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.shutdown();
    }
}

impl Drop for SisLabApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}
