use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};

use kiln_engine::RenderContext;
use kiln_engine::gpu::{TextureFormat, TextureInfo};
use kiln_engine::resources::{PipelineStateDesc, ResourceHandle};

pub const TEXTURE_SIZE: u32 = 128;

/// Per-frame constants, one element of the scene's constant buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct FrameConstants {
    pub time: f32,
    pub dt: f32,
    pub frame: u32,
    pub _pad: u32,
    pub tint: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct Vertex {
    position: [f32; 2],
    uv: [f32; 2],
}

const QUAD: [Vertex; 4] = [
    Vertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    Vertex { position: [1.0, -1.0], uv: [1.0, 1.0] },
    Vertex { position: [1.0, 1.0], uv: [1.0, 0.0] },
    Vertex { position: [-1.0, 1.0], uv: [0.0, 0.0] },
];

/// Demo content: a quad, an animated texture and a constant buffer that are
/// rewritten every frame.
pub struct Scene {
    mesh: ResourceHandle,
    texture: ResourceHandle,
    constants: ResourceHandle,
    pipeline: ResourceHandle,
    elapsed: f32,
    pixels: Vec<u8>,
}

impl Scene {
    pub fn new(ctx: &RenderContext) -> Result<Self> {
        let mesh = ctx
            .create_mesh("quad", size_of::<Vertex>() as u32, bytemuck::cast_slice(&QUAD), &[0, 1, 2, 0, 2, 3])
            .context("failed to create quad mesh")?;
        let texture = ctx
            .create_texture("plasma", TextureInfo::square(TextureFormat::Rgba8Unorm, TEXTURE_SIZE))
            .context("failed to create texture")?;
        let constants = ctx
            .create_constant_buffer("frame constants", size_of::<FrameConstants>() as u32, 1)
            .context("failed to create constant buffer")?;
        let pipeline = ctx.create_pipeline_state(PipelineStateDesc {
            label: "textured quad".to_string(),
            ..Default::default()
        })?;
        log::info!("scene ready: {mesh:?} {texture:?} {constants:?} {pipeline:?}");

        Ok(Self {
            mesh,
            texture,
            constants,
            pipeline,
            elapsed: 0.0,
            pixels: vec![0; (TEXTURE_SIZE * TEXTURE_SIZE * 4) as usize],
        })
    }

    /// Stages this frame's constants and texture contents.
    pub fn update(&mut self, ctx: &RenderContext, dt: f32, frame: u64) -> Result<()> {
        self.elapsed += dt;
        let t = self.elapsed;

        let constants = FrameConstants {
            time: t,
            dt,
            frame: frame as u32,
            _pad: 0,
            tint: [0.5 + 0.5 * t.sin(), 0.5 + 0.5 * (t * 0.7).cos(), 0.8, 1.0],
        };
        ctx.constant_buffer(self.constants)?
            .buffer
            .write_typed(ctx, &[constants], 0)?;

        self.paint(t);
        ctx.texture(self.texture)?.image.write_texture(ctx, &self.pixels, 0)?;
        Ok(())
    }

    fn paint(&mut self, t: f32) {
        let size = TEXTURE_SIZE as f32;
        for (i, texel) in self.pixels.chunks_exact_mut(4).enumerate() {
            let x = (i as u32 % TEXTURE_SIZE) as f32 / size;
            let y = (i as u32 / TEXTURE_SIZE) as f32 / size;
            let v = ((x * 10.0 + t).sin() + (y * 8.0 - t * 1.3).sin() + ((x + y) * 6.0 + t * 0.5).sin()) / 3.0;
            texel[0] = (127.5 + 127.5 * v) as u8;
            texel[1] = (127.5 + 127.5 * (v * 2.0).sin()) as u8;
            texel[2] = (127.5 - 127.5 * v) as u8;
            texel[3] = 255;
        }
    }

    pub fn release(self, ctx: &RenderContext) -> Result<()> {
        for handle in [self.mesh, self.texture, self.constants, self.pipeline] {
            ctx.release_resource(handle)?;
        }
        Ok(())
    }
}
