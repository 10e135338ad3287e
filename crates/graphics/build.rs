use std::path::PathBuf;

const SHADERS: [(&str, ShaderKind, &str, &str); 2] = [
    ("shaders/particle_vs.hlsl", ShaderKind::Vertex, "vertex_main", "particle_vs.cso"),
    ("shaders/particle_ps.hlsl", ShaderKind::Pixel, "pixel_main", "particle_ps.cso"),
];

#[derive(Clone, Copy)]
enum ShaderKind {
    Vertex,
    Pixel,
}

fn main() {
    println!("cargo:rerun-if-changed=shaders");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("cargo sets OUT_DIR"));
    let targets_windows = std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("windows");

    for (path, kind, entrypoint, artifact) in SHADERS {
        let bytes = if targets_windows {
            compile(path, kind, entrypoint)
        } else {
            // The headless device never executes shaders.
            Vec::new()
        };

        std::fs::write(out_dir.join(artifact), bytes).expect("failed to write shader artifact");
    }
}

#[cfg(windows)]
fn compile(path: &str, kind: ShaderKind, entrypoint: &str) -> Vec<u8> {
    use windows::{
        core::{HSTRING, PCSTR},
        s,
        Win32::Graphics::Direct3D::Fxc::{
            D3DCompileFromFile, D3DCOMPILE_DEBUG, D3DCOMPILE_SKIP_OPTIMIZATION,
        },
    };

    let mut code = None;
    let mut errors = None;

    let target = match kind {
        ShaderKind::Vertex => s!("vs_5_1"),
        ShaderKind::Pixel => s!("ps_5_1"),
    };

    let flags = if cfg!(debug_assertions) {
        D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
    } else {
        0
    };

    let entrypoint = format!("{entrypoint}\0");

    let _basic_error = unsafe {
        D3DCompileFromFile(
            &HSTRING::from(path),
            None,
            None,
            PCSTR(entrypoint.as_ptr()),
            target,
            flags,
            0,
            &mut code,
            Some(&mut errors),
        )
    };

    if let Some(errors) = errors {
        let estr = unsafe {
            let eptr = errors.GetBufferPointer();
            std::slice::from_raw_parts(eptr.cast(), errors.GetBufferSize())
        };
        let errors = String::from_utf8_lossy(estr);
        panic!("{path}: {errors}");
    }

    let code = code.unwrap_or_else(|| panic!("{path}: compiler produced no bytecode"));
    unsafe { std::slice::from_raw_parts(code.GetBufferPointer().cast(), code.GetBufferSize()) }
        .to_vec()
}

#[cfg(not(windows))]
fn compile(path: &str, _kind: ShaderKind, _entrypoint: &str) -> Vec<u8> {
    panic!("{path}: HLSL can only be compiled on a Windows host");
}
