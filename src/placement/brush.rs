//! Multi-cell placement brushes.
//!
//! A brush only computes target cells; it has no side effects. The placement
//! controller then places each cell on its own, so a partially blocked brush
//! still fills every free cell.

use std::collections::BTreeSet;

use cgmath::Vector3;

/// Upper bound on cells produced by one brush stroke.
pub const MAX_BRUSH_CELLS: usize = 4096;

/// Largest sphere radius in cells. A ball this size already exceeds [`MAX_BRUSH_CELLS`].
pub const MAX_SPHERE_RADIUS: u32 = 16;

/// How a pointer stroke turns into cells.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum BrushKind {
    #[default]
    Single,
    Line,
    /// Outline of the rectangle spanned by the stroke.
    Rect,
    /// Full area of the rectangle spanned by the stroke.
    Fill,
    /// Ball of cells around the stroke start; radius in cells.
    Sphere { radius: u32 },
}

impl BrushKind {
    /// Whether the brush needs a drag from start to end.
    pub fn is_stroke(&self) -> bool {
        matches!(self, BrushKind::Line | BrushKind::Rect | BrushKind::Fill)
    }
}

/// Cell centers covered by a brush stroke from `start` to `end`.
///
/// Horizontal cells lie on the `cell_size` grid at the height of `start`;
/// sphere layers are stacked `layer_height` apart.
pub fn brush_cells(
    kind: BrushKind,
    start: Vector3<f32>,
    end: Vector3<f32>,
    cell_size: f32,
    layer_height: f32,
) -> Vec<Vector3<f32>> {
    let to_cell = |v: f32| (v / cell_size).round() as i32;
    let a = (to_cell(start.x), to_cell(start.z));
    let b = (to_cell(end.x), to_cell(end.z));

    let planar: Vec<(i32, i32)> = match kind {
        BrushKind::Single => vec![a],
        BrushKind::Line => line_cells(a, b),
        BrushKind::Rect => rect_cells(a, b, false),
        BrushKind::Fill => rect_cells(a, b, true),
        BrushKind::Sphere { radius } => {
            return sphere_cells(start, radius, cell_size, layer_height);
        }
    };

    let mut cells: Vec<Vector3<f32>> = planar
        .into_iter()
        .map(|(x, z)| Vector3::new(x as f32 * cell_size, start.y, z as f32 * cell_size))
        .collect();
    truncate(&mut cells);
    cells
}

fn truncate(cells: &mut Vec<Vector3<f32>>) {
    if cells.len() > MAX_BRUSH_CELLS {
        log::warn!(
            "Brush stroke covers {} cells, only the first {} are placed",
            cells.len(),
            MAX_BRUSH_CELLS
        );
        cells.truncate(MAX_BRUSH_CELLS);
    }
}

/// Bresenham line between two grid cells, both ends included.
///
/// Stops after [`MAX_BRUSH_CELLS`] + 1 cells so callers can tell a truncated line apart.
pub fn line_cells(a: (i32, i32), b: (i32, i32)) -> Vec<(i32, i32)> {
    let (a64, b64) = ((a.0 as i64, a.1 as i64), (b.0 as i64, b.1 as i64));
    let dx = (b64.0 - a64.0).abs();
    let dz = -(b64.1 - a64.1).abs();
    let sx = if a.0 < b.0 { 1 } else { -1 };
    let sz = if a.1 < b.1 { 1 } else { -1 };
    let mut err = dx + dz;
    let (mut x, mut z) = a64;
    let length = (dx - dz + 1).min(MAX_BRUSH_CELLS as i64 + 1);
    let mut cells = Vec::with_capacity(length as usize);
    loop {
        // x and z stay between the endpoints, so they fit in i32.
        cells.push((x as i32, z as i32));
        if (x, z) == b64 || cells.len() > MAX_BRUSH_CELLS {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dz {
            err += dz;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            z += sz;
        }
    }
    cells
}

fn rect_cells(a: (i32, i32), b: (i32, i32), filled: bool) -> Vec<(i32, i32)> {
    let (x0, x1) = (a.0.min(b.0), a.0.max(b.0));
    let (z0, z1) = (a.1.min(b.1), a.1.max(b.1));
    let mut cells = Vec::new();
    for z in z0..=z1 {
        for x in x0..=x1 {
            let edge = x == x0 || x == x1 || z == z0 || z == z1;
            if filled || edge {
                cells.push((x, z));
            }
            if cells.len() > MAX_BRUSH_CELLS {
                return cells;
            }
        }
    }
    cells
}

fn sphere_cells(center: Vector3<f32>, radius: u32, cell_size: f32, layer_height: f32) -> Vec<Vector3<f32>> {
    if radius > MAX_SPHERE_RADIUS {
        log::warn!("Sphere brush radius {} clamped to {}", radius, MAX_SPHERE_RADIUS);
    }
    let r = radius.min(MAX_SPHERE_RADIUS) as i64;
    let mut offsets = BTreeSet::new();
    for dy in -r..=r {
        for dz in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy + dz * dz <= r * r {
                    offsets.insert((dy, dz, dx));
                }
            }
        }
    }
    let cx = (center.x / cell_size).round() * cell_size;
    let cz = (center.z / cell_size).round() * cell_size;
    let mut cells: Vec<Vector3<f32>> = offsets
        .into_iter()
        .map(|(dy, dz, dx)| {
            Vector3::new(
                cx + dx as f32 * cell_size,
                center.y + dy as f32 * layer_height,
                cz + dz as f32 * cell_size,
            )
        })
        .collect();
    truncate(&mut cells);
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f32, z: f32) -> Vector3<f32> {
        Vector3::new(x, 0.5, z)
    }

    #[test]
    fn line_covers_both_ends() {
        let cells = brush_cells(BrushKind::Line, v(0.0, 0.0), v(3.0, 0.0), 1.0, 1.0);
        assert_eq!(cells.len(), 4);
        assert_eq!(cells[3], v(3.0, 0.0));

        let diagonal = line_cells((0, 0), (-3, 3));
        assert_eq!(diagonal, vec![(0, 0), (-1, 1), (-2, 2), (-3, 3)]);
    }

    #[test]
    fn rect_is_outline_and_fill_is_area() {
        assert_eq!(brush_cells(BrushKind::Rect, v(0.0, 0.0), v(2.0, 2.0), 1.0, 1.0).len(), 8);
        assert_eq!(brush_cells(BrushKind::Fill, v(2.0, 2.0), v(0.0, 0.0), 1.0, 1.0).len(), 9);
        assert_eq!(brush_cells(BrushKind::Rect, v(0.0, 0.0), v(0.0, 0.0), 1.0, 1.0).len(), 1);
    }

    #[test]
    fn sphere_of_radius_one_is_a_cross() {
        let cells = brush_cells(BrushKind::Sphere { radius: 1 }, v(0.2, 0.0), v(0.0, 0.0), 1.0, 1.0);
        assert_eq!(cells.len(), 7);
        assert!(cells.contains(&Vector3::new(0.0, 1.5, 0.0)));
        assert!(cells.contains(&Vector3::new(0.0, -0.5, 0.0)));
    }

    #[test]
    fn cells_snap_to_the_grid() {
        let cells = brush_cells(BrushKind::Line, v(0.4, 0.0), v(2.6, 0.0), 0.5, 1.0);
        assert_eq!(cells.first().map(|c| c.x), Some(0.5));
        assert_eq!(cells.last().map(|c| c.x), Some(2.5));
    }

    #[test]
    fn huge_strokes_are_truncated() {
        let cells = brush_cells(BrushKind::Fill, v(0.0, 0.0), v(500.0, 500.0), 1.0, 1.0);
        assert!(cells.len() <= MAX_BRUSH_CELLS);
    }

    #[test]
    fn huge_sphere_radius_is_clamped() {
        let cells = brush_cells(BrushKind::Sphere { radius: 50_000 }, v(0.0, 0.0), v(0.0, 0.0), 1.0, 1.0);
        assert_eq!(cells.len(), MAX_BRUSH_CELLS);
        assert!(cells.iter().all(|c| c.x.abs() <= MAX_SPHERE_RADIUS as f32));
    }

    #[test]
    fn far_line_endpoints_do_not_overflow() {
        let cells = brush_cells(BrushKind::Line, v(-3e9, 0.0), v(3e9, 0.0), 1.0, 1.0);
        assert_eq!(cells.len(), MAX_BRUSH_CELLS);

        let extreme = line_cells((i32::MIN, i32::MIN), (i32::MAX, i32::MAX));
        assert_eq!(extreme.len(), MAX_BRUSH_CELLS + 1);
        assert_eq!(extreme[1], (i32::MIN + 1, i32::MIN + 1));
    }
}
