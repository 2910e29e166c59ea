// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lumo - node-graph shader authoring tool.
//!
//! Headless application shell: builds the demo graph (a gradient source
//! feeding a blur effect), drives it through the node manager at the
//! configured frame rate, and hot-reloads shader files as they change on
//! disk.

mod file_watcher;
mod settings;
mod wgpu_provider;

use file_watcher::{ShaderWatcher, ShaderWatcherConfig};
use lumo_graph::nodes::ModuleNode;
use lumo_graph::{NodeManager, SlotRef};
use lumo_render::provider::{BindingDesc, BindingKind, ResourceProvider, ShaderSource};
use lumo_render::{Module, Pass};
use settings::AppSettings;
use std::path::Path;
use std::time::{Duration, Instant};
use wgpu_provider::WgpuProvider;

const GRADIENT_SHADER: &str = r"#version 450
layout(local_size_x = 8, local_size_y = 8) in;
layout(set = 0, binding = 1, rgba8) uniform writeonly image2D outImage;
void main() {
    ivec2 pixel = ivec2(gl_GlobalInvocationID.xy);
    ivec2 size = imageSize(outImage);
    vec2 uv = vec2(pixel) / vec2(size);
    imageStore(outImage, pixel, vec4(uv, 0.5, 1.0));
}
";

const BLUR_SHADER: &str = r"#version 450
layout(local_size_x = 8, local_size_y = 8) in;
layout(set = 0, binding = 0) uniform texture2D inImage;
layout(set = 0, binding = 1, rgba8) uniform writeonly image2D outImage;
layout(set = 0, binding = 2) uniform Params { int radius; } params;
void main() {
    ivec2 pixel = ivec2(gl_GlobalInvocationID.xy);
    vec4 sum = vec4(0.0);
    int taps = 0;
    for (int y = -params.radius; y <= params.radius; y++) {
        for (int x = -params.radius; x <= params.radius; x++) {
            sum += texelFetch(inImage, pixel + ivec2(x, y), 0);
            taps++;
        }
    }
    imageStore(outImage, pixel, sum / float(taps));
}
";

/// Uniform block layout of the blur pass.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct BlurParams {
    radius: i32,
    _pad: [i32; 3],
}

/// Load a shader from the watched directory when present, falling back to
/// the embedded source. The path is attached either way so hot reload can
/// pick the file up once the user creates it.
fn demo_shader(shader_dir: &Path, file: &str, fallback: &str) -> ShaderSource {
    let path = shader_dir.join(file);
    let text = std::fs::read_to_string(&path).unwrap_or_else(|_| fallback.to_string());
    ShaderSource::compute_glsl(file, text).with_path(path)
}

fn build_demo_graph(
    manager: &mut NodeManager,
    provider: &mut dyn ResourceProvider,
    settings: &AppSettings,
) -> Result<(), lumo_render::ProviderError> {
    let gradient_pass = Pass::compute(
        "gradient",
        demo_shader(&settings.shader_dir, "gradient.comp", GRADIENT_SHADER),
        vec![BindingDesc {
            binding: 1,
            kind: BindingKind::StorageImage,
        }],
        [8, 8],
    );
    let mut gradient = Module::new("gradient", vec![gradient_pass]);
    gradient.init(provider, settings.output_size)?;

    let blur_pass = Pass::compute(
        "blur",
        demo_shader(&settings.shader_dir, "blur.comp", BLUR_SHADER),
        vec![
            BindingDesc {
                binding: 0,
                kind: BindingKind::SampledImage,
            },
            BindingDesc {
                binding: 1,
                kind: BindingKind::StorageImage,
            },
            BindingDesc {
                binding: 2,
                kind: BindingKind::UniformBuffer,
            },
        ],
        [8, 8],
    )
    .with_ping_pong()
    .with_ubo(std::mem::size_of::<BlurParams>() as u64);
    let mut blur = Module::new("blur", vec![blur_pass]);
    blur.init(provider, settings.output_size)?;
    // The uniform buffer only exists after init.
    blur.passes_mut()[0].set_ubo_bytes(bytemuck::bytes_of(&BlurParams {
        radius: 1,
        _pad: [0; 3],
    }));

    let graph = manager.root_mut();
    let source = graph.add_node(ModuleNode::effect_node("gradient", gradient));
    let effect = graph.add_node(ModuleNode::effect_node("blur", blur));

    let from = SlotRef::new(
        source,
        graph
            .node(source)
            .and_then(|n| n.slot_by_name("out"))
            .map(|s| s.id)
            .expect("demo node declares an output"),
    );
    let to = SlotRef::new(
        effect,
        graph
            .node(effect)
            .and_then(|n| n.slot_by_name("in"))
            .map(|s| s.id)
            .expect("demo node declares an input"),
    );
    graph.connect(from, to).expect("demo graph is acyclic");
    Ok(())
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("lumo_app=debug".parse().expect("static directive"))
        .add_directive("lumo_graph=debug".parse().expect("static directive"))
        .add_directive("lumo_render=debug".parse().expect("static directive"))
        .add_directive("wgpu=warn".parse().expect("static directive"))
        .add_directive("naga=warn".parse().expect("static directive"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!("starting Lumo v{}", env!("CARGO_PKG_VERSION"));

    let settings = match AppSettings::load(Path::new("lumo.ron")) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!("failed to load settings: {err}");
            std::process::exit(1);
        }
    };

    let mut provider = match WgpuProvider::new() {
        Ok(provider) => provider,
        Err(err) => {
            tracing::error!("failed to initialize graphics backend: {err}");
            std::process::exit(1);
        }
    };

    let watcher_config = ShaderWatcherConfig {
        debounce_duration: Duration::from_millis(settings.watch_debounce_ms),
        ..ShaderWatcherConfig::default()
    };
    let mut watcher = match ShaderWatcher::new(watcher_config) {
        Ok(mut watcher) => {
            if settings.shader_dir.is_dir() {
                if let Err(err) = watcher.watch(&settings.shader_dir) {
                    tracing::warn!("cannot watch {:?}: {err}", settings.shader_dir);
                }
            }
            Some(watcher)
        }
        Err(err) => {
            tracing::warn!("shader hot reload disabled: {err}");
            None
        }
    };

    let mut manager = NodeManager::new();
    if let Err(err) = build_demo_graph(&mut manager, &mut provider, &settings) {
        tracing::error!("failed to build demo graph: {err}");
        std::process::exit(1);
    }

    let frame_budget = Duration::from_secs(1) / settings.target_fps.max(1);
    tracing::info!(
        size = ?settings.output_size,
        fps = settings.target_fps,
        "entering frame loop"
    );

    loop {
        let frame_start = Instant::now();

        if let Some(watcher) = watcher.as_mut() {
            let changed = watcher.take_changed();
            if !changed.is_empty() {
                manager.update_shaders(&mut provider, &changed);
            }
        }

        if !manager.try_frame(&mut provider) {
            break;
        }

        // The headless loop has no frame fence beyond a full device wait;
        // swap only once the submitted work is known complete.
        provider.wait_idle();
        manager.end_frame();

        let elapsed = frame_start.elapsed();
        if elapsed < frame_budget {
            std::thread::sleep(frame_budget - elapsed);
        }
    }

    manager.unit(&mut provider);
    tracing::info!("shut down after {} frames", manager.frame());
}
