//! End-to-end scenarios through the register interface, rendered by the
//! software reference backend: flat and Gouraud shading, Z-buffering,
//! alpha test, chroma key, textured modulation, fog and dithering.

use std::collections::HashSet;

use ariel::fixed::{to_fixed_12_12, to_fixed_12_4, to_fixed_14_18, to_fixed_20_12};
use ariel::{reg, BackendKind, Engine};

fn engine() -> Engine {
    Engine::new(BackendKind::Software).unwrap()
}

fn set_positions(engine: &Engine, points: [(f32, f32); 3]) {
    let regs = [
        (reg::VERTEX_AX, reg::VERTEX_AY),
        (reg::VERTEX_BX, reg::VERTEX_BY),
        (reg::VERTEX_CX, reg::VERTEX_CY),
    ];
    for ((reg_x, reg_y), (x, y)) in regs.iter().zip(points.iter()) {
        engine.handle_write(*reg_x, to_fixed_12_4(*x));
        engine.handle_write(*reg_y, to_fixed_12_4(*y));
    }
}

fn set_color(engine: &Engine, r: f32, g: f32, b: f32, a: f32) {
    engine.handle_write(reg::START_R, to_fixed_12_12(r));
    engine.handle_write(reg::START_G, to_fixed_12_12(g));
    engine.handle_write(reg::START_B, to_fixed_12_12(b));
    engine.handle_write(reg::START_A, to_fixed_12_12(a));
}

fn set_z(engine: &Engine, z: f32) {
    engine.handle_write(reg::START_Z, to_fixed_20_12(z));
}

fn pixel(frame: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let offset = ((y * width + x) * 4) as usize;
    frame[offset..offset + 4].try_into().unwrap()
}

/// S1: flat red triangle over a black clear; the center pixel is red.
#[test]
fn flat_triangle_center() {
    let engine = engine();
    engine.handle_write(reg::COLOR0, 0xFF00_0000);
    engine.handle_write(reg::FAST_FILL_CMD, 1);

    set_positions(&engine, [(320.0, 100.0), (420.0, 300.0), (220.0, 300.0)]);
    set_color(&engine, 1.0, 0.0, 0.0, 1.0);
    set_z(&engine, 0.5);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    let [r, g, b, _] = pixel(frame, 640, 320, 200);
    assert!(r >= 200 && g <= 50 && b <= 50, "got {r} {g} {b}");
}

/// S2: with a LESS depth test, the near red triangle beats the far blue
/// one no matter the draw order.
#[test]
fn z_buffer_less() {
    let engine = engine();
    let fbz = (1 << 4) | (1 << 5) | (1 << 10); // depth test, LESS, depth write
    engine.handle_write(reg::FBZ_MODE, fbz);
    engine.handle_write(reg::COLOR0, 0xFF00_0000);
    engine.handle_write(reg::FAST_FILL_CMD, 1);

    let points = [(270.0, 150.0), (370.0, 350.0), (170.0, 350.0)];
    set_positions(&engine, points);
    set_color(&engine, 0.0, 0.0, 1.0, 1.0);
    set_z(&engine, 0.8);
    engine.handle_write(reg::TRIANGLE_CMD, 1);

    set_color(&engine, 1.0, 0.0, 0.0, 1.0);
    set_z(&engine, 0.2);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    let [r, _, b, _] = pixel(frame, 640, 270, 250);
    assert!(r >= 200 && b <= 50, "near red should win: {r} {b}");
}

/// S3: the same overlap with a GREATER compare flips the survivor; the
/// triangle at the greater depth wins.
#[test]
fn z_buffer_dynamic_flip() {
    let engine = engine();
    let fbz = (1 << 4) | (4 << 5) | (1 << 10); // depth test, GREATER, depth write
    engine.handle_write(reg::FBZ_MODE, fbz);
    engine.handle_write(reg::COLOR0, 0xFF00_0000);
    engine.handle_write(reg::FAST_FILL_CMD, 1);

    let points = [(270.0, 150.0), (370.0, 350.0), (170.0, 350.0)];
    set_positions(&engine, points);
    set_color(&engine, 0.0, 0.0, 1.0, 1.0);
    set_z(&engine, 0.2);
    engine.handle_write(reg::TRIANGLE_CMD, 1);

    set_color(&engine, 1.0, 0.0, 0.0, 1.0);
    set_z(&engine, 0.8);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    let [r, _, b, _] = pixel(frame, 640, 270, 250);
    assert!(r >= 200 && b <= 50, "far red should win under GREATER: {r} {b}");
}

/// S4: an alpha test with GREATER ref=128 discards a 0.3-alpha triangle.
#[test]
fn alpha_test_discard() {
    let engine = engine();
    engine.handle_write(reg::COLOR0, 0xFF00_00FF);
    engine.handle_write(reg::FAST_FILL_CMD, 1);
    let alpha_mode = 1 | (4 << 1) | (128 << 24); // enable, GREATER, ref 128
    engine.handle_write(reg::ALPHA_MODE, alpha_mode);

    set_positions(&engine, [(320.0, 100.0), (420.0, 300.0), (220.0, 300.0)]);
    set_color(&engine, 1.0, 0.0, 0.0, 0.3);
    set_z(&engine, 0.5);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    let [r, _, b, _] = pixel(frame, 640, 320, 200);
    assert!(r <= 50 && b >= 200, "triangle should be discarded: {r} {b}");
}

/// S5: a magenta triangle matching the chroma key vanishes.
#[test]
fn chroma_key_discard() {
    let engine = engine();
    engine.handle_write(reg::COLOR0, 0xFF00_00FF);
    engine.handle_write(reg::FAST_FILL_CMD, 1);
    engine.handle_write(reg::CHROMA_KEY, 0x00FF_00FF);
    engine.handle_write(reg::FBZ_MODE, 1 << 1);

    set_positions(&engine, [(320.0, 100.0), (420.0, 300.0), (220.0, 300.0)]);
    set_color(&engine, 1.0, 0.0, 1.0, 1.0);
    set_z(&engine, 0.5);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    let [r, _, b, _] = pixel(frame, 640, 320, 200);
    assert!(r <= 50 && b >= 200, "keyed triangle should vanish: {r} {b}");
}

/// S6: a solid red texture modulated by a white vertex color lands red.
#[test]
fn textured_modulate() {
    let engine = engine();
    engine.handle_write(reg::VIDEO_DIM, (100 << 16) | 100);
    engine.handle_write(reg::COLOR0, 0xFF00_00FF);
    engine.handle_write(reg::FAST_FILL_CMD, 1);

    // 2x2 solid red, ARGB words in the texture window.
    for i in 0..4 {
        engine.handle_write(reg::TEX_MEM_BASE + i * 4, 0xFFFF_0000);
    }
    engine.handle_write(reg::TEX_WIDTH, 2);
    engine.handle_write(reg::TEX_HEIGHT, 2);
    engine.handle_write(reg::TEXTURE_MODE, 1);
    engine.handle_write(reg::TEX_UPLOAD, 1);

    set_positions(&engine, [(50.0, 10.0), (90.0, 90.0), (10.0, 90.0)]);
    set_color(&engine, 1.0, 1.0, 1.0, 1.0);
    set_z(&engine, 0.5);
    engine.handle_write(reg::START_S, to_fixed_14_18(0.5));
    engine.handle_write(reg::START_T, to_fixed_14_18(0.5));
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    let [r, g, b, _] = pixel(frame, 100, 50, 50);
    assert!(r >= 200 && g <= 50 && b <= 50, "got {r} {g} {b}");
}

/// S7: depth-linear fog pulls the far triangle toward the gray fog color.
#[test]
fn depth_linear_fog() {
    let engine = engine();
    engine.handle_write(reg::FBZ_MODE, (1 << 4) | (1 << 5) | (1 << 10));
    engine.handle_write(reg::FOG_MODE, 1);
    engine.handle_write(reg::FOG_COLOR, 0x0080_8080);
    engine.handle_write(reg::COLOR0, 0xFF00_0000);
    engine.handle_write(reg::FAST_FILL_CMD, 1);

    // Near red triangle on the left, far red triangle on the right.
    set_positions(&engine, [(160.0, 140.0), (260.0, 340.0), (60.0, 340.0)]);
    set_color(&engine, 1.0, 0.0, 0.0, 1.0);
    set_z(&engine, 0.1);
    engine.handle_write(reg::TRIANGLE_CMD, 1);

    set_positions(&engine, [(480.0, 140.0), (580.0, 340.0), (380.0, 340.0)]);
    set_z(&engine, 0.9);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    let [near_r, near_g, near_b, _] = pixel(frame, 640, 160, 240);
    let [far_r, far_g, far_b, _] = pixel(frame, 640, 480, 240);
    assert!(near_r > far_r, "near {near_r} should be redder than far {far_r}");
    assert!(far_g > near_g && far_b > near_b, "far should be grayer");
}

/// S8: 4x4 ordered dithering on a mid-gray triangle produces at least two
/// distinct red levels within an 8x8 sample.
#[test]
fn dither_4x4_variation() {
    let engine = engine();
    engine.handle_write(reg::FBZ_MODE, 1 << 8);
    engine.handle_write(reg::COLOR0, 0xFF00_0000);
    engine.handle_write(reg::FAST_FILL_CMD, 1);

    set_positions(&engine, [(320.0, 50.0), (520.0, 400.0), (120.0, 400.0)]);
    set_color(&engine, 0.502, 0.502, 0.502, 1.0);
    set_z(&engine, 0.5);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    let mut reds = HashSet::new();
    for y in 250..258 {
        for x in 300..308 {
            reds.insert(pixel(frame, 640, x, y)[0]);
        }
    }
    assert!(reds.len() >= 2, "dither collapsed to {reds:?}");
}

/// Gouraud shading: three vertex colors interpolate across the face.
#[test]
fn gouraud_interpolation() {
    let engine = engine();
    engine.handle_write(reg::COLOR0, 0xFF00_0000);
    engine.handle_write(reg::FAST_FILL_CMD, 1);

    let colors = [(1.0, 0.0, 0.0), (0.0, 1.0, 0.0), (0.0, 0.0, 1.0)];
    for (slot, &(r, g, b)) in colors.iter().enumerate() {
        engine.handle_write(reg::COLOR_SELECT, slot as u32);
        set_color(&engine, r, g, b, 1.0);
        set_z(&engine, 0.5);
    }
    set_positions(&engine, [(320.0, 100.0), (520.0, 400.0), (120.0, 400.0)]);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    // Near vertex A the red channel dominates.
    let [r, g, b, _] = pixel(frame, 640, 320, 130);
    assert!(r > g && r > b, "vertex A corner should be red: {r} {g} {b}");
    // Near vertex B green dominates.
    let [r, g, b, _] = pixel(frame, 640, 490, 390);
    assert!(g > r && g > b, "vertex B corner should be green: {r} {g} {b}");
}

/// Alpha blending: a half-transparent white over a blue clear keeps a
/// strong blue component.
#[test]
fn alpha_blend_over_clear() {
    let engine = engine();
    engine.handle_write(reg::COLOR0, 0xFF00_00FF);
    engine.handle_write(reg::FAST_FILL_CMD, 1);
    // Blend enable, SRC_ALPHA / INV_SRC_ALPHA.
    let alpha_mode = (1 << 4) | (1 << 8) | (5 << 12);
    engine.handle_write(reg::ALPHA_MODE, alpha_mode);

    set_positions(&engine, [(320.0, 100.0), (420.0, 300.0), (220.0, 300.0)]);
    set_color(&engine, 1.0, 1.0, 1.0, 0.5);
    set_z(&engine, 0.5);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    let [r, g, b, _] = pixel(frame, 640, 320, 200);
    // 0.5 * white + 0.5 * blue.
    assert!((120..=135).contains(&r), "r: {r}");
    assert!((120..=135).contains(&g), "g: {g}");
    assert!(b >= 200, "b: {b}");
}

/// Two swaps with no draws in between publish identical frames.
#[test]
fn swap_without_draws_is_idempotent() {
    let engine = engine();
    engine.handle_write(reg::COLOR0, 0xFF20_4060);
    engine.handle_write(reg::FAST_FILL_CMD, 1);

    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);
    let first = engine.get_frame().unwrap().to_vec();
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);
    let second = engine.get_frame().unwrap().to_vec();
    assert_eq!(first, second);
}

/// Two fast fills without state change produce the same cleared buffer.
#[test]
fn fast_fill_is_idempotent() {
    let engine = engine();
    engine.handle_write(reg::COLOR0, 0xFF11_2233);

    engine.handle_write(reg::FAST_FILL_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);
    let first = engine.get_frame().unwrap().to_vec();

    engine.handle_write(reg::FAST_FILL_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);
    let second = engine.get_frame().unwrap().to_vec();
    assert_eq!(first, second);
}

/// The scissor rectangle shrinks the drawn area when clipping is on, and
/// offscreen vertices never write out of bounds.
#[test]
fn scissor_and_offscreen_clipping() {
    let engine = engine();
    engine.handle_write(reg::FBZ_MODE, 1 << 0);
    engine.handle_write(reg::CLIP_LEFT_RIGHT, (300 << 16) | 639);
    engine.handle_write(reg::CLIP_LOW_Y_HIGH, 479); // top 0, bottom 479
    engine.handle_write(reg::COLOR0, 0xFF00_0000);
    engine.handle_write(reg::FAST_FILL_CMD, 1);

    // Spills past every edge of the framebuffer.
    set_positions(&engine, [(320.0, -200.0), (900.0, 500.0), (-300.0, 500.0)]);
    set_color(&engine, 1.0, 1.0, 1.0, 1.0);
    set_z(&engine, 0.5);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    assert_eq!(frame.len(), 640 * 480 * 4);
    // Left of the scissor: untouched clear color.
    assert_eq!(pixel(frame, 640, 200, 240), [0, 0, 0, 255]);
    // Inside the scissor: drawn.
    assert_eq!(pixel(frame, 640, 400, 240), [255, 255, 255, 255]);
}

/// A backend switch replays the full state; rendering continues as if
/// nothing happened. (Switching to the GPU may quietly stay on software
/// when no Vulkan driver is present, which must also keep rendering.)
#[test]
fn backend_switch_preserves_output() {
    let engine = engine();
    engine.handle_write(reg::COLOR0, 0xFF00_0000);
    engine.handle_write(reg::FAST_FILL_CMD, 1);
    set_positions(&engine, [(320.0, 100.0), (420.0, 300.0), (220.0, 300.0)]);
    set_color(&engine, 1.0, 0.0, 0.0, 1.0);
    set_z(&engine, 0.5);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);
    let before = engine.get_frame().unwrap().to_vec();

    // GPU init may fail on headless machines; either way the engine must
    // keep producing frames.
    let _ = engine.set_backend(BackendKind::Gpu);

    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);
    let frame = engine.get_frame().unwrap();
    let [r, g, b, _] = pixel(frame, 640, 320, 200);
    assert!(r >= 200 && g <= 50 && b <= 50, "got {r} {g} {b}");
    assert_eq!(before.len(), frame.len());
}
