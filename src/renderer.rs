// ============================================================================
// renderer.rs — Linestream
// HUD text rendering via glyphon, drawn over the particle frame.
// ============================================================================

use glyphon::{
    Attrs, Buffer as TextBuffer, Cache as GlyphCache, Color as GlyphColor, Family, FontSystem,
    Metrics, Resolution, Shaping, SwashCache, TextArea, TextAtlas, TextBounds, TextRenderer,
    Viewport as GlyphViewport,
};

use crate::config::RunMode;
use crate::driver::DriverState;
use crate::tiler::TileLayout;

/// Numbers shown in the HUD for one frame.
#[derive(Clone, Debug)]
pub struct HudStats {
    pub frame: u64,
    pub fps: f32,
    pub particle_limit: u32,
    pub layout: TileLayout,
    pub mode: RunMode,
    pub state: DriverState,
    pub debug: bool,
    pub seed: u32,
}

/// All glyphon resources needed for HUD text rendering.
pub struct HudRenderer {
    font_system: FontSystem,
    swash_cache: SwashCache,
    glyph_viewport: GlyphViewport,
    text_atlas: TextAtlas,
    text_renderer: TextRenderer,
    text_buffer: TextBuffer,
}

impl HudRenderer {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let mut font_system = FontSystem::new();
        let swash_cache = SwashCache::new();
        let glyph_cache = GlyphCache::new(device);
        let glyph_viewport = GlyphViewport::new(device, &glyph_cache);
        let mut text_atlas = TextAtlas::new(device, queue, &glyph_cache, surface_format);
        let text_renderer =
            TextRenderer::new(&mut text_atlas, device, wgpu::MultisampleState::default(), None);
        let text_buffer = TextBuffer::new(&mut font_system, Metrics::new(14.0, 18.0));

        Self {
            font_system,
            swash_cache,
            glyph_viewport,
            text_atlas,
            text_renderer,
            text_buffer,
        }
    }

    /// Shape and upload HUD text for the current frame.
    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        stats: &HudStats,
        win_w: u32,
        win_h: u32,
    ) -> Result<(), glyphon::PrepareError> {
        self.glyph_viewport.update(
            queue,
            Resolution {
                width: win_w,
                height: win_h,
            },
        );

        let text = build_hud_text(stats);
        self.text_buffer
            .set_size(&mut self.font_system, Some(win_w as f32), Some(win_h as f32));
        self.text_buffer.set_text(
            &mut self.font_system,
            &text,
            Attrs::new().family(Family::Monospace),
            Shaping::Basic,
        );
        self.text_buffer
            .shape_until_scroll(&mut self.font_system, false);

        // Leave the top-left corner to the debug overlay when it is shown.
        let top = if stats.debug { 74.0 } else { 10.0 };
        self.text_renderer.prepare(
            device,
            queue,
            &mut self.font_system,
            &mut self.text_atlas,
            &self.glyph_viewport,
            [TextArea {
                buffer: &self.text_buffer,
                left: 10.0,
                top,
                scale: 1.0,
                bounds: TextBounds {
                    left: 0,
                    top: 0,
                    right: win_w as i32,
                    bottom: win_h as i32,
                },
                default_color: GlyphColor::rgb(220, 220, 220),
                custom_glyphs: &[],
            }],
            &mut self.swash_cache,
        )
    }

    /// Render prepared text into `view` on top of what is already there.
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
    ) -> Result<(), glyphon::RenderError> {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("hud_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.text_renderer
            .render(&self.text_atlas, &self.glyph_viewport, &mut pass)
    }

    /// Trim the glyph atlas after presenting.
    pub fn trim(&mut self) {
        self.text_atlas.trim();
    }
}

// ======================== HUD Text Builder ========================

pub fn build_hud_text(stats: &HudStats) -> String {
    let status = match stats.state {
        DriverState::Running => stats.mode.name(),
        DriverState::Uninitialized => "Starting",
        DriverState::Faulted => "FAULTED (R to retry)",
    };
    format!(
        "Linestream  |  Frame: {}  FPS: {:.0}  |  {}\n\
         Particles: {}  Buffer: {}x{}  Tiles: {} x {} rows\n\
         Seed: {}  Debug: {}\n\
         Space: play/preview  R: reset  Shift+R: reseed  F3: debug  F12: screenshot  H: HUD\n\
         Camera: WASD orbit  Q/E or wheel zoom",
        stats.frame,
        stats.fps,
        status,
        stats.particle_limit,
        stats.layout.buffer_width,
        stats.layout.buffer_height,
        stats.layout.num_tiles,
        stats.layout.rows_per_tile,
        stats.seed,
        if stats.debug { "on" } else { "off" },
    )
}
