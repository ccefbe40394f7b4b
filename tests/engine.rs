//! Engine-level behavior: register shadowing, vertex assembly, the
//! triangle batch, STATUS, texture memory and the port shim. Everything
//! runs on the software backend so the results are deterministic on any
//! machine.

use ariel::fixed::{to_fixed_12_12, to_fixed_12_4};
use ariel::{reg, BackendKind, Engine, PortShim};

fn engine() -> Engine {
    Engine::new(BackendKind::Software).unwrap()
}

fn pixel(frame: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let offset = ((y * width + x) * 4) as usize;
    frame[offset..offset + 4].try_into().unwrap()
}

#[test]
fn ordinary_registers_shadow_the_last_write() {
    let engine = engine();
    let cases = [
        (reg::FBZ_MODE, 0x0000_0631),
        (reg::ALPHA_MODE, 0x80AB_0113),
        (reg::CHROMA_KEY, 0x00FF_00FF),
        (reg::FOG_COLOR, 0x0080_8080),
        (reg::COLOR0, 0xFF00_0000),
        (reg::COLOR1, 0x1122_3344),
        (reg::TEX_WIDTH, 16),
        (reg::DELTA_FIRST, 0xDEAD_BEEF),
        (reg::DELTA_LAST, 0x1234_5678),
        (reg::VERTEX_AX, to_fixed_12_4(320.0)),
    ];
    for (addr, value) in cases {
        engine.handle_write(addr, value);
        assert_eq!(engine.handle_read(addr), value, "register {addr:#x}");
        // Idempotent: reading twice returns the same shadow.
        assert_eq!(engine.handle_read(addr), value);
    }
}

#[test]
fn status_reports_drained_fifos_and_vretrace_edge() {
    let engine = engine();
    let status = engine.handle_read(reg::STATUS);
    assert_eq!((status >> 12) & 0xFF, 0xFF, "memory FIFO free count");
    assert_eq!((status >> 20) & 0x1F, 0x1F, "PCI FIFO free count");
    assert_eq!(status & reg::STATUS_VRETRACE, 0);

    engine.signal_vsync();
    let status = engine.handle_read(reg::STATUS);
    assert_ne!(status & reg::STATUS_VRETRACE, 0, "vretrace after vsync");
    // Edge triggered: the read cleared it.
    let status = engine.handle_read(reg::STATUS);
    assert_eq!(status & reg::STATUS_VRETRACE, 0);
}

#[test]
fn triangle_batch_grows_and_swap_empties_it() {
    let engine = engine();
    assert_eq!(engine.triangle_batch_count(), 0);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::FTRIANGLE_CMD, 1);
    assert_eq!(engine.triangle_batch_count(), 2);

    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);
    assert_eq!(engine.triangle_batch_count(), 0);
}

#[test]
fn triangle_batch_is_bounded_and_recovers() {
    let engine = engine();
    for _ in 0..1500 {
        engine.handle_write(reg::TRIANGLE_CMD, 1);
    }
    assert_eq!(engine.triangle_batch_count(), 1024);

    // The dropped writes must not destabilize anything afterwards.
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);
    assert_eq!(engine.triangle_batch_count(), 0);
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    assert_eq!(engine.triangle_batch_count(), 1);
}

#[test]
fn vertex_and_color_writes_do_not_touch_the_batch() {
    let engine = engine();
    engine.handle_write(reg::VERTEX_AX, to_fixed_12_4(10.0));
    engine.handle_write(reg::START_R, to_fixed_12_12(1.0));
    engine.handle_write(reg::START_Z, 0x800);
    engine.handle_write(reg::COLOR_SELECT, 1);
    assert_eq!(engine.triangle_batch_count(), 0);
}

#[test]
fn texture_window_roundtrips_and_drops_out_of_range() {
    let engine = engine();
    engine.handle_write(reg::TEX_MEM_BASE + 0x100, 0xCAFEBABE);
    assert_eq!(engine.handle_read(reg::TEX_MEM_BASE + 0x100), 0xCAFEBABE);

    // One word past the end: dropped, and nothing else changed.
    engine.handle_write(reg::TEX_MEM_BASE + reg::TEX_MEM_SIZE, 0xFFFF_FFFF);
    assert_eq!(engine.handle_read(reg::TEX_MEM_BASE + 0x100), 0xCAFEBABE);
}

#[test]
fn video_dim_resizes_and_drops_oversized() {
    let engine = engine();
    assert_eq!(engine.get_dimensions(), (640, 480));

    engine.handle_write(reg::VIDEO_DIM, (800 << 16) | 600);
    assert_eq!(engine.get_dimensions(), (800, 600));

    // Oversized or degenerate dimensions fall back to the previous ones.
    engine.handle_write(reg::VIDEO_DIM, (4096 << 16) | 4096);
    assert_eq!(engine.get_dimensions(), (800, 600));
    engine.handle_write(reg::VIDEO_DIM, 0);
    assert_eq!(engine.get_dimensions(), (800, 600));
}

#[test]
fn disabled_engine_returns_no_frame() {
    let engine = engine();
    assert!(engine.get_frame().is_some());
    engine.set_enabled(false);
    assert!(!engine.is_enabled());
    assert!(engine.get_frame().is_none());
    engine.set_enabled(true);
    assert!(engine.get_frame().is_some());
}

#[test]
fn frame_is_published_with_current_dimensions() {
    let engine = engine();
    engine.handle_write(reg::VIDEO_DIM, (320 << 16) | 240);
    engine.handle_write(reg::COLOR0, 0xFFFF_0000);
    engine.handle_write(reg::FAST_FILL_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    assert_eq!(frame.len(), 320 * 240 * 4);
    assert_eq!(pixel(frame, 320, 10, 10), [255, 0, 0, 255]);
}

#[test]
fn unsupported_texture_format_samples_as_white() {
    let engine = engine();
    engine.handle_write(reg::VIDEO_DIM, (100 << 16) | 100);
    // A 2x2 green texture the upload must ignore in favor of white.
    for i in 0..4 {
        engine.handle_write(reg::TEX_MEM_BASE + i * 4, 0xFF00_FF00);
    }
    engine.handle_write(reg::TEX_WIDTH, 2);
    engine.handle_write(reg::TEX_HEIGHT, 2);
    // Enable + an unsupported format code in bits 8..11.
    engine.handle_write(reg::TEXTURE_MODE, 1 | (5 << 8));
    engine.handle_write(reg::TEX_UPLOAD, 1);

    // A red triangle modulated by white stays red.
    engine.handle_write(reg::START_R, to_fixed_12_12(1.0));
    engine.handle_write(reg::START_G, 0);
    engine.handle_write(reg::START_B, 0);
    engine.handle_write(reg::START_A, to_fixed_12_12(1.0));
    engine.handle_write(reg::VERTEX_AX, to_fixed_12_4(50.0));
    engine.handle_write(reg::VERTEX_AY, to_fixed_12_4(10.0));
    engine.handle_write(reg::VERTEX_BX, to_fixed_12_4(90.0));
    engine.handle_write(reg::VERTEX_BY, to_fixed_12_4(90.0));
    engine.handle_write(reg::VERTEX_CX, to_fixed_12_4(10.0));
    engine.handle_write(reg::VERTEX_CY, to_fixed_12_4(90.0));
    engine.handle_write(reg::TRIANGLE_CMD, 1);
    engine.handle_write(reg::SWAP_BUFFER_CMD, 1);

    let frame = engine.get_frame().unwrap();
    let [r, g, b, _] = pixel(frame, 100, 50, 60);
    assert!(r >= 200 && g <= 50 && b <= 50, "got {r} {g} {b}");
}

#[test]
fn port_shim_commits_register_writes() {
    let engine = engine();
    let mut shim = PortShim::new();

    // Stage offset 0x110 (FBZ_MODE) and the word 0x00000631, committing
    // on the final data byte.
    shim.write(&engine, 0, 0x10);
    shim.write(&engine, 1, 0x01);
    shim.write(&engine, 2, 0x31);
    shim.write(&engine, 3, 0x06);
    shim.write(&engine, 4, 0x00);
    assert_eq!(engine.handle_read(reg::FBZ_MODE), 0, "not committed yet");
    shim.write(&engine, 5, 0x00);
    assert_eq!(engine.handle_read(reg::FBZ_MODE), 0x0000_0631);
}

#[test]
fn port_shim_dma_fills_the_texture_window() {
    let engine = engine();
    let mut shim = PortShim::new();

    engine.handle_write(reg::TEX_WIDTH, 2);
    engine.handle_write(reg::TEX_HEIGHT, 1);
    engine.handle_write(reg::TEXTURE_MODE, 1);

    // Two ARGB texels at guest address 0x40.
    let mut guest_ram = vec![0u8; 0x100];
    guest_ram[0x40..0x48].copy_from_slice(&[
        0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88,
    ]);
    shim.write(&engine, 7, 0x40);
    shim.write(&engine, 8, 0x00);
    shim.write_with_memory(&engine, 6, 0, &guest_ram);

    assert_eq!(engine.handle_read(reg::TEX_MEM_BASE), 0x4433_2211);
    assert_eq!(engine.handle_read(reg::TEX_MEM_BASE + 4), 0x8877_6655);
}
