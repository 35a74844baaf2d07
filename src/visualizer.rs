// src/visualizer.rs
use eframe::egui;
use egui::Color32;
use egui_plot::{Legend, Line, Plot, PlotPoints, Points};
use std::collections::VecDeque;

/// Rolling power-vs-time window, fed by stream samples.
pub struct StreamPlot {
    points: VecDeque<[f64; 2]>,
    window: usize,
    pub open: bool,
}

impl StreamPlot {
    pub fn new(window: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(window),
            window: window.max(1),
            open: true,
        }
    }

    pub fn set_window(&mut self, window: usize) {
        self.window = window.max(1);
        self.trim();
    }

    /// `reset` starts a fresh trace (first sample of a new stream).
    pub fn push(&mut self, x: f64, y: f64, reset: bool) {
        if reset {
            self.points.clear();
        }
        self.points.push_back([x, y]);
        self.trim();
        self.open = true;
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<[f64; 2]> {
        self.points.back().copied()
    }

    fn trim(&mut self) {
        while self.points.len() > self.window {
            self.points.pop_front();
        }
    }

    pub fn show(&mut self, ctx: &egui::Context) {
        let pts: Vec<[f64; 2]> = self.points.iter().copied().collect();
        egui::Window::new("Power stream")
            .open(&mut self.open)
            .default_size([520.0, 300.0])
            .show(ctx, |ui| {
                Plot::new("power_stream_plot")
                    .x_axis_label("Time, s")
                    .y_axis_label("Power, dBm")
                    .show(ui, |plot_ui| {
                        plot_ui.line(
                            Line::new(PlotPoints::new(pts))
                                .name("power")
                                .color(Color32::from_rgb(0, 120, 160)),
                        );
                    });
            });
    }
}

/// Bias-power curves. Each sweep is its own curve; earlier ones stay visible.
pub struct SweepPlot {
    curves: Vec<Vec<[f64; 2]>>,
    pub open: bool,
}

impl Default for SweepPlot {
    fn default() -> Self {
        Self {
            curves: Vec::new(),
            open: true,
        }
    }
}

impl SweepPlot {
    pub fn plot_new(&mut self, x: &[f64], y: &[f64], new_plot: bool) {
        if new_plot || self.curves.is_empty() {
            self.curves.push(Vec::new());
        }
        if let Some(curve) = self.curves.last_mut() {
            curve.extend(x.iter().zip(y).map(|(x, y)| [*x, *y]));
        }
        self.open = true;
    }

    pub fn clear(&mut self) {
        self.curves.clear();
    }

    #[cfg(test)]
    pub fn curve_count(&self) -> usize {
        self.curves.len()
    }

    #[cfg(test)]
    pub fn curve(&self, idx: usize) -> Option<&[[f64; 2]]> {
        self.curves.get(idx).map(Vec::as_slice)
    }

    pub fn show(&mut self, ctx: &egui::Context) {
        let curves = &self.curves;
        let mut clear = false;
        egui::Window::new("Bias - power")
            .open(&mut self.open)
            .default_size([560.0, 340.0])
            .show(ctx, |ui| {
                if ui.button("Clear").clicked() {
                    clear = true;
                }
                Plot::new("bias_power_plot")
                    .legend(Legend::default())
                    .x_axis_label("Bias voltage, mV")
                    .y_axis_label("Power, dBm")
                    .show(ui, |plot_ui| {
                        for (idx, curve) in curves.iter().enumerate() {
                            let name = format!("Scan {}", idx + 1);
                            plot_ui.line(Line::new(PlotPoints::new(curve.clone())).name(&name));
                            plot_ui.points(Points::new(PlotPoints::new(curve.clone())).radius(2.0).name(&name));
                        }
                    });
            });
        if clear {
            self.clear();
        }
    }
}
