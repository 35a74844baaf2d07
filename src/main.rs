// src/main.rs
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod config;
mod engine;
mod error;
mod gui;
mod instruments;
mod recorder;
mod stream;
mod sweep;
mod types;
mod visualizer;

#[cfg(test)]
mod testing;

use config::AppConfig;
use eframe::egui;

fn main() -> eframe::Result<()> {
    env_logger::init();

    let config_path = AppConfig::default_path();
    let config = AppConfig::load_or_default(&config_path);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([760.0, 680.0])
            .with_title("SIS lab"),
        ..Default::default()
    };

    eframe::run_native(
        "sislab",
        options,
        Box::new(move |_cc| Box::new(gui::SisLabApp::new(config, config_path))),
    )
}
