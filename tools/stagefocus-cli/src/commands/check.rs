//! Check system capabilities.

use std::path::Path;

use stagefocus_capture_engine::pipeline::{element_available, init_gstreamer};
use stagefocus_capture_engine::source::webcam_factory;
use stagefocus_capture_engine::SinkKind;

pub fn run(settings_path: &Path) -> anyhow::Result<()> {
    println!("StageFocus System Check");
    println!("{}", "=".repeat(50));

    // Video devices
    let devices = video_devices();
    if devices.is_empty() {
        println!("[WARN] No /dev/video* devices found");
    } else {
        println!("[OK] Video devices: {}", devices.len());
        for device in &devices {
            println!("     {device}");
        }
    }

    // GStreamer elements
    println!();
    match init_gstreamer() {
        Ok(()) => println!("[OK] GStreamer initialized"),
        Err(e) => {
            println!("[FAIL] {e}");
            return Ok(());
        }
    }

    let preview = SinkKind::Preview;
    let virtual_camera = SinkKind::VirtualCamera {
        device: String::new(),
    };
    let elements = [
        (webcam_factory(), "webcam capture", true),
        ("videoconvert", "color conversion", true),
        ("appsink", "frame readback", true),
        ("appsrc", "frame output", true),
        (virtual_camera.factory(), "virtual camera", false),
        (preview.factory(), "preview window", false),
    ];

    let mut required_ok = true;
    for (factory, purpose, required) in elements {
        let available = element_available(factory);
        let tag = match (available, required) {
            (true, _) => "[OK]",
            (false, true) => "[FAIL]",
            (false, false) => "[WARN]",
        };
        println!("{tag} {factory:<14} ({purpose})");
        required_ok &= available || !required;
    }

    println!();
    println!("Settings file: {}", settings_path.display());
    println!();
    if required_ok {
        println!("All required capabilities are available. StageFocus is ready.");
    } else {
        println!("Some required GStreamer elements are missing. Install the base and good plugin sets.");
    }

    Ok(())
}

fn video_devices() -> Vec<String> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };
    let mut devices: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("video"))
        .map(|name| format!("/dev/{name}"))
        .collect();
    devices.sort();
    devices
}
