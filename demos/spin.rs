//! Drives the register interface the way a guest would: a Gouraud
//! triangle spinning over a few frames, with the last frame written out
//! as a PNG.

use std::f32::consts::TAU;

use anyhow::Result;
use log::info;

use ariel::fixed::{to_fixed_12_12, to_fixed_12_4, to_fixed_20_12};
use ariel::{reg, BackendKind, Engine};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

fn write_position(engine: &Engine, slot: usize, x: f32, y: f32) {
    let (reg_x, reg_y) = match slot {
        0 => (reg::VERTEX_AX, reg::VERTEX_AY),
        1 => (reg::VERTEX_BX, reg::VERTEX_BY),
        _ => (reg::VERTEX_CX, reg::VERTEX_CY),
    };
    engine.handle_write(reg_x, to_fixed_12_4(x));
    engine.handle_write(reg_y, to_fixed_12_4(y));
}

fn write_color(engine: &Engine, r: f32, g: f32, b: f32, a: f32) {
    engine.handle_write(reg::START_R, to_fixed_12_12(r));
    engine.handle_write(reg::START_G, to_fixed_12_12(g));
    engine.handle_write(reg::START_B, to_fixed_12_12(b));
    engine.handle_write(reg::START_A, to_fixed_12_12(a));
}

fn main() -> Result<()> {
    std::env::set_var("RUST_LOG", "info");
    pretty_env_logger::init();

    // Ask for the GPU backend; a machine without Vulkan silently falls
    // back to the software reference.
    let engine = Engine::new(BackendKind::Gpu)?;
    engine.handle_write(reg::VIDEO_DIM, (WIDTH << 16) | HEIGHT);
    engine.handle_write(reg::COLOR0, 0xFF10_1018);
    engine.handle_write(reg::FAST_FILL_CMD, 1);

    let colors = [
        (1.0, 0.1, 0.1, 1.0),
        (0.1, 1.0, 0.1, 1.0),
        (0.1, 0.1, 1.0, 1.0),
    ];

    for frame in 0..60 {
        let angle = frame as f32 / 60.0 * TAU;
        for (slot, &(r, g, b, a)) in colors.iter().enumerate() {
            let vertex_angle = angle + slot as f32 / 3.0 * TAU;
            // Latch Gouraud mode and fill this vertex's color slot.
            engine.handle_write(reg::COLOR_SELECT, slot as u32);
            write_color(&engine, r, g, b, a);
            engine.handle_write(reg::START_Z, to_fixed_20_12(0.5));
            write_position(
                &engine,
                slot,
                WIDTH as f32 / 2.0 + vertex_angle.cos() * 180.0,
                HEIGHT as f32 / 2.0 + vertex_angle.sin() * 180.0,
            );
        }
        engine.handle_write(reg::TRIANGLE_CMD, 1);
        engine.handle_write(reg::SWAP_BUFFER_CMD, 1);
        engine.signal_vsync();
    }

    let frame = engine.get_frame().expect("engine is enabled");
    let (width, height) = engine.get_dimensions();

    let file = std::fs::File::create("spin.png")?;
    let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(frame)?;

    info!("Wrote spin.png at {width}x{height}.");
    Ok(())
}
