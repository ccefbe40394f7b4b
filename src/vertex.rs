use glam::{Vec2, Vec4};
use vulkanalia::{
    prelude::v1_0::*,
    vk::HasBuilder,
};

/// A fully assembled vertex, after fixed-point decode. Screen coordinates
/// are in pixel units with the origin at the top-left; color channels and
/// texture coordinates are plain floats. `w` carries the reciprocal W the
/// guest wrote; interpolation is affine, so it is stored but not consumed.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Vertex {
    pub pos: Vec2,
    pub z: f32,
    pub w: f32,
    pub color: Vec4,
    pub uv: Vec2,
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            pos: Vec2::ZERO,
            z: 0.0,
            w: 1.0,
            color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            uv: Vec2::ZERO,
        }
    }
}

impl Vertex {
    /// Vertex binding info for the GPU backend: one tightly packed
    /// per-vertex binding, matching the `#[repr(C)]` layout above.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    /// Vertex attribute descriptions: position, (z, w), color and texture
    /// coordinates, in the locations the vertex shader declares.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        let pos = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(0)
            .build();

        let zw = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(1)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(std::mem::size_of::<Vec2>() as u32)
            .build();

        let color = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(2)
            .format(vk::Format::R32G32B32A32_SFLOAT)
            .offset((std::mem::size_of::<Vec2>() + 2 * std::mem::size_of::<f32>()) as u32)
            .build();

        let uv = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(3)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(
                (std::mem::size_of::<Vec2>()
                    + 2 * std::mem::size_of::<f32>()
                    + std::mem::size_of::<Vec4>()) as u32,
            )
            .build();

        [pos, zw, color, uv]
    }
}

/// Three vertices in source order. Winding is normalized at raster time;
/// culling is disabled, so both windings draw. `repr(C)` because batches
/// are copied verbatim into the GPU backend's vertex buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Triangle {
    pub vertices: [Vertex; 3],
}

impl Triangle {
    /// Signed edge-function area of the triangle,
    /// `(cx-ax)(by-ay) - (cy-ay)(bx-ax)`.
    pub fn signed_area(&self) -> f32 {
        let [a, b, c] = &self.vertices;
        edge(a.pos, b.pos, c.pos)
    }

    /// Normalize winding so the signed area is positive. Returns `None`
    /// for degenerate (zero-area) triangles, which are discarded.
    pub fn normalized(mut self) -> Option<Self> {
        let area = self.signed_area();
        if area == 0.0 {
            return None;
        }
        if area < 0.0 {
            self.vertices.swap(0, 2);
        }
        Some(self)
    }
}

/// Edge function: twice the signed area of the triangle `(a, b, p)`.
/// The sign tells which side of the directed edge `a -> b` the point
/// falls on; a pixel center is inside a (re-wound) triangle iff all three
/// edge functions are non-negative.
pub fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (p.x - a.x) * (b.y - a.y) - (p.y - a.y) * (b.x - a.x)
}

/// Bring a guest depth value into the 0..1 range the depth buffer uses.
/// Values above 1 are legacy raw 20.12 words scaled by 1/65536; negatives
/// clamp to the near plane. Both backends share this so they agree on what
/// a depth register means.
pub fn normalize_depth(z: f32) -> f32 {
    let z = if z > 1.0 { z / 65536.0 } else { z };
    z.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri(a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> Triangle {
        let mut t = Triangle::default();
        t.vertices[0].pos = Vec2::new(a.0, a.1);
        t.vertices[1].pos = Vec2::new(b.0, b.1);
        t.vertices[2].pos = Vec2::new(c.0, c.1);
        t
    }

    #[test]
    fn degenerate_is_discarded() {
        assert!(tri((0.0, 0.0), (1.0, 1.0), (2.0, 2.0)).normalized().is_none());
    }

    #[test]
    fn negative_winding_is_rewound() {
        let t = tri((0.0, 0.0), (10.0, 0.0), (0.0, 10.0));
        assert!(t.signed_area() < 0.0);
        let n = t.normalized().unwrap();
        assert!(n.signed_area() > 0.0);

        let already_positive = tri((0.0, 0.0), (0.0, 10.0), (10.0, 0.0));
        assert!(already_positive.signed_area() > 0.0);
    }

    #[test]
    fn depth_normalization() {
        assert_eq!(normalize_depth(0.5), 0.5);
        assert_eq!(normalize_depth(-2.0), 0.0);
        assert_eq!(normalize_depth(32768.0), 0.5);
        assert_eq!(normalize_depth(1e9), 1.0);
    }
}
