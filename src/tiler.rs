// ============================================================================
// tiler.rs — Linestream
// Partitions the W x H particle grid into draw-call-sized tiles and builds the
// shared quad mesh whose UVs address state-buffer cells relative to a tile.
// ============================================================================

use bytemuck::{Pod, Zeroable};

pub const VERTICES_PER_QUAD: u32 = 4;
pub const INDICES_PER_QUAD: u32 = 6;

/// Upper bound on tile height regardless of how generous the vertex ceiling is.
pub const MAX_TILE_ROWS: u32 = 8192;

/// Half extent of the fixed bounding box; particle positions are only known
/// on the GPU.
pub const MESH_BOUNDS_HALF_EXTENT: f32 = 500.0;

// ======================== Layout ========================

/// How the buffer is split into draw calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileLayout {
    pub buffer_width: u32,
    pub buffer_height: u32,
    pub rows_per_tile: u32,
    pub num_tiles: u32,
}

/// Per-draw inputs for one tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileDraw {
    pub index: u32,
    /// First row of the tile, normalized by buffer height.
    pub row_offset: f32,
    /// Tile height over buffer height: maps tile-relative V to buffer V.
    pub row_scale: f32,
}

impl TileLayout {
    /// `rows = clamp(min(H, V_max / (4 W)), 1, MAX_TILE_ROWS)`,
    /// `tiles = ceil(H / rows)`. Zero dimensions are treated as 1.
    pub fn solve(width: u32, height: u32, max_vertices_per_draw: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let per_draw = max_vertices_per_draw / (VERTICES_PER_QUAD * width);
        let rows_per_tile = per_draw.min(height).clamp(1, MAX_TILE_ROWS);
        let num_tiles = height.div_ceil(rows_per_tile);
        Self {
            buffer_width: width,
            buffer_height: height,
            rows_per_tile,
            num_tiles,
        }
    }

    pub fn quads_per_tile(&self) -> u32 {
        self.buffer_width * self.rows_per_tile
    }

    pub fn vertices_per_tile(&self) -> u32 {
        self.quads_per_tile() * VERTICES_PER_QUAD
    }

    /// Normalized row offset of `tile`.
    pub fn row_offset(&self, tile: u32) -> f32 {
        (tile * self.rows_per_tile) as f32 / self.buffer_height as f32
    }

    pub fn row_scale(&self) -> f32 {
        self.rows_per_tile as f32 / self.buffer_height as f32
    }

    pub fn draws(&self) -> Vec<TileDraw> {
        (0..self.num_tiles)
            .map(|index| TileDraw {
                index,
                row_offset: self.row_offset(index),
                row_scale: self.row_scale(),
            })
            .collect()
    }

    /// True if a mesh built for `self` can serve `other`.
    pub fn same_mesh(&self, other: &TileLayout) -> bool {
        self.buffer_width == other.buffer_width && self.rows_per_tile == other.rows_per_tile
    }
}

// ======================== Mesh ========================

/// One mesh vertex: which quad corner it is, and the cell address.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub corner: f32,
    pub uv: [f32; 2],
}

#[derive(Clone, Debug, PartialEq)]
pub enum MeshIndices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl MeshIndices {
    pub fn len(&self) -> usize {
        match self {
            MeshIndices::U16(v) => v.len(),
            MeshIndices::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub center: [f32; 3],
    pub half_extent: [f32; 3],
}

/// CPU-side geometry for one tile; uploaded once per layout.
#[derive(Clone, Debug)]
pub struct TiledMesh {
    pub layout: TileLayout,
    pub vertices: Vec<MeshVertex>,
    pub indices: MeshIndices,
    pub bounds: Bounds,
}

impl TiledMesh {
    /// `W x rows` quads. Vertices are placeholders (corner id only); the UV
    /// of every corner is the cell address `(x / W, y / rows)`.
    pub fn build(layout: &TileLayout) -> Self {
        let nx = layout.buffer_width;
        let ny = layout.rows_per_tile;
        let quads = (nx * ny) as usize;

        let mut vertices = Vec::with_capacity(quads * VERTICES_PER_QUAD as usize);
        for x in 0..nx {
            for y in 0..ny {
                let uv = [x as f32 / nx as f32, y as f32 / ny as f32];
                for corner in 0..VERTICES_PER_QUAD {
                    vertices.push(MeshVertex {
                        corner: corner as f32,
                        uv,
                    });
                }
            }
        }

        let quad_indices = |q: u32| {
            let b = q * VERTICES_PER_QUAD;
            [b, b + 1, b + 2, b, b + 2, b + 3]
        };
        let quad_range = 0..quads as u32;
        let indices = if vertices.len() <= u16::MAX as usize + 1 {
            MeshIndices::U16(
                quad_range
                    .flat_map(quad_indices)
                    .map(|i| i as u16)
                    .collect(),
            )
        } else {
            MeshIndices::U32(quad_range.flat_map(quad_indices).collect())
        };

        Self {
            layout: *layout,
            vertices,
            indices,
            bounds: Bounds {
                center: [0.0; 3],
                half_extent: [MESH_BOUNDS_HALF_EXTENT; 3],
            },
        }
    }
}
