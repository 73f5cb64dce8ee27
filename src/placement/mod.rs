//! Interactive block placement.
//!
//! The [`PlacementController`] turns cursor rays into grid-snapped positions,
//! keeps the ghost preview in sync, rejects overlapping placements and drives
//! multi-cell brushes and drag-moves of existing blocks.

pub mod brush;
pub mod collision;
pub mod ghost;

use std::collections::HashMap;

use cgmath::{Vector3, Zero};

pub use brush::{BrushKind, brush_cells};
pub use collision::{COLLISION_EPSILON, Footprint, check_collision};
pub use ghost::{CancelReason, Drag, Ghost, Interaction};

use crate::{
    config::GridConfig,
    data_structures::{
        block::{BlockId, BlockSpec, BlockType, EditorMeta, GameplayTag},
        instance::InstanceRaw,
    },
    pick::{self, PickHit, PickTarget, Ray},
    pool::BlockPool,
    scene::Scene,
};

/// Per-placement overrides.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaceOptions {
    pub rotation: Vector3<f32>,
    pub scale: f32,
    /// Falls back to the last color used for the type, then the type default.
    pub color: Option<u32>,
    pub tag: Option<GameplayTag>,
    pub meta: EditorMeta,
}

impl Default for PlaceOptions {
    fn default() -> Self {
        Self {
            rotation: Vector3::zero(),
            scale: 1.0,
            color: None,
            tag: None,
            meta: EditorMeta::default(),
        }
    }
}

#[derive(Debug)]
pub struct PlacementController {
    grid: GridConfig,
    interaction: Interaction,
    last_colors: HashMap<BlockType, u32>,
    pub brush: BrushKind,
    /// Rotation and scale applied to the ghost and to placements made through it.
    rotation: Vector3<f32>,
    scale: f32,
}

impl PlacementController {
    pub fn new(grid: GridConfig) -> Self {
        Self {
            grid,
            interaction: Interaction::default(),
            last_colors: HashMap::new(),
            brush: BrushKind::default(),
            rotation: Vector3::zero(),
            scale: 1.0,
        }
    }

    pub fn grid(&self) -> &GridConfig {
        &self.grid
    }

    pub fn set_snap(&mut self, snap: bool) {
        self.grid.snap = snap;
    }

    pub fn set_cell_size(&mut self, cell_size: f32) -> bool {
        if !(cell_size > 0.0) || !cell_size.is_finite() {
            return false;
        }
        self.grid.cell_size = cell_size;
        true
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn is_dragging(&self) -> bool {
        self.interaction.is_dragging()
    }

    pub fn last_color(&self, block_type: BlockType) -> Option<u32> {
        self.last_colors.get(&block_type).copied()
    }

    pub fn rotation(&self) -> Vector3<f32> {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: Vector3<f32>) {
        self.rotation = rotation;
        if let Some(ghost) = self.interaction.ghost_mut() {
            ghost.rotation = rotation;
        }
    }

    pub fn set_scale(&mut self, scale: f32) -> bool {
        if !(scale > 0.0) || !scale.is_finite() {
            return false;
        }
        self.scale = scale;
        if let Some(ghost) = self.interaction.ghost_mut() {
            ghost.scale = scale;
        }
        true
    }

    fn ghost_options(&self) -> PlaceOptions {
        PlaceOptions {
            rotation: self.rotation,
            scale: self.scale,
            ..Default::default()
        }
    }

    fn snap_value(&self, v: f32) -> f32 {
        if self.grid.snap {
            (v / self.grid.cell_size).round() * self.grid.cell_size
        } else {
            v
        }
    }

    /// Snap X and Z to the grid when snapping is enabled. Y is left alone.
    pub fn snap(&self, position: Vector3<f32>) -> Vector3<f32> {
        Vector3::new(self.snap_value(position.x), position.y, self.snap_value(position.z))
    }

    fn in_bounds(&self, position: Vector3<f32>) -> bool {
        position.x.abs() <= self.grid.half_extent && position.z.abs() <= self.grid.half_extent
    }

    /// Closest terrain or block hit, ignoring the block being dragged.
    pub fn pick(&self, ray: &Ray, scene: &Scene) -> Option<PickHit> {
        let dragged = scene.dragged();
        pick::pick(
            ray,
            Some(scene.terrain()),
            scene.specs().filter(|(id, _)| Some(*id) != dragged),
        )
    }

    /// Where a block of `block_type` lands for a pick hit, or `None` if it cannot go there.
    ///
    /// - terrain: resting on the terrain height at the snapped XZ
    /// - top face: stacked on the hit block
    /// - bottom face: hanging under the hit block
    /// - side face: the neighbouring cell, aligned with the hit block's base
    pub fn calculate_position(&self, hit: &PickHit, block_type: BlockType, scene: &Scene) -> Option<Vector3<f32>> {
        let half_new = block_type.dimensions().height * self.scale / 2.0;
        let position = match hit.target {
            PickTarget::Terrain => {
                let snapped = self.snap(hit.point);
                let height = scene.terrain().height_at(snapped.x, snapped.z)?;
                Vector3::new(snapped.x, height + half_new, snapped.z)
            }
            PickTarget::Block(id) => {
                let block = scene.block(id)?;
                let base = block.spec.position;
                let half_hit = block.spec.height() / 2.0;
                let normal = hit.normal;
                if normal.y > 0.5 {
                    let snapped = self.snap(hit.point);
                    Vector3::new(snapped.x, base.y + half_hit + half_new, snapped.z)
                } else if normal.y < -0.5 {
                    let snapped = self.snap(hit.point);
                    Vector3::new(snapped.x, base.y - half_hit - half_new, snapped.z)
                } else {
                    let along_x = normal.x.abs() >= normal.z.abs();
                    let sign = if along_x { normal.x.signum() } else { normal.z.signum() };
                    let offset = if self.grid.snap {
                        self.grid.cell_size
                    } else {
                        let hit_half = block.block_type().dimensions().half_extents * block.spec.scale;
                        let new_half = block_type.dimensions().half_extents * self.scale;
                        if along_x { hit_half.x + new_half.x } else { hit_half.z + new_half.z }
                    };
                    let mut neighbour = base;
                    if along_x {
                        neighbour.x += sign * offset;
                    } else {
                        neighbour.z += sign * offset;
                    }
                    let snapped = self.snap(neighbour);
                    Vector3::new(snapped.x, base.y - half_hit + half_new, snapped.z)
                }
            }
        };
        self.in_bounds(position).then_some(position)
    }

    /// Whether a block would overlap anything in the scene other than `exclude`.
    pub fn check_collision(
        &self,
        scene: &Scene,
        position: Vector3<f32>,
        block_type: BlockType,
        rotation_y: f32,
        scale: f32,
        exclude: Option<BlockId>,
    ) -> bool {
        check_collision(
            position,
            block_type,
            rotation_y,
            scale,
            scene
                .specs()
                .filter(|(id, _)| Some(*id) != exclude)
                .map(|(_, spec)| spec),
        )
    }

    /// Commit a single block. Overlapping placements are silently rejected.
    pub fn place(
        &mut self,
        scene: &mut Scene,
        pool: &BlockPool,
        block_type: BlockType,
        position: Vector3<f32>,
        options: PlaceOptions,
    ) -> Option<BlockId> {
        if !(options.scale > 0.0) || !options.scale.is_finite() {
            log::debug!("Rejecting {:?} with scale {}", block_type, options.scale);
            return None;
        }
        if !self.in_bounds(position) {
            log::debug!("Rejecting {:?} at {:?}: outside the world", block_type, position);
            return None;
        }
        if self.check_collision(scene, position, block_type, options.rotation.y, options.scale, None) {
            log::debug!("Rejecting {:?} at {:?}: occupied", block_type, position);
            return None;
        }
        let color = options
            .color
            .or_else(|| self.last_color(block_type))
            .unwrap_or_else(|| block_type.default_color())
            & 0xffffff;
        let spec = BlockSpec {
            block_type,
            position,
            rotation: options.rotation,
            scale: options.scale,
            color,
            tag: options.tag,
            meta: options.meta,
        };
        let id = scene.spawn(spec, pool);
        self.last_colors.insert(block_type, color);
        Some(id)
    }

    /// Place every free cell of a brush stroke. Returns the ids that were placed.
    pub fn place_brush(
        &mut self,
        scene: &mut Scene,
        pool: &BlockPool,
        block_type: BlockType,
        kind: BrushKind,
        start: Vector3<f32>,
        end: Vector3<f32>,
        options: PlaceOptions,
    ) -> Vec<BlockId> {
        let layer_height = block_type.dimensions().height * options.scale;
        let cells: Vec<Vector3<f32>> = brush_cells(kind, start, end, self.grid.cell_size, layer_height)
            .into_iter()
            .filter(|cell| self.in_bounds(*cell))
            .collect();
        let mut placed = Vec::with_capacity(cells.len());
        for cell in cells {
            if let Some(id) = self.place(scene, pool, block_type, cell, options.clone()) {
                placed.push(id);
            }
        }
        placed
    }

    pub fn remove(&mut self, scene: &mut Scene, pool: &BlockPool, id: BlockId) -> bool {
        if let Some(Drag::Move { block, .. }) = self.interaction.drag() {
            if *block == id {
                self.interaction.cancel(CancelReason::ModeSwitch);
                scene.set_dragged(None);
            }
        }
        scene.despawn(id, pool).is_some()
    }

    /// Show a ghost for `block_type` under the cursor.
    pub fn begin_preview(&mut self, block_type: BlockType) -> anyhow::Result<()> {
        self.interaction.start_preview(block_type)?;
        if let Some(ghost) = self.interaction.ghost_mut() {
            ghost.rotation = self.rotation;
            ghost.scale = self.scale;
        }
        Ok(())
    }

    /// Follow the cursor. Returns the target position, if any.
    pub fn update_preview(&mut self, ray: &Ray, scene: &mut Scene) -> Option<Vector3<f32>> {
        let hit = self.pick(ray, scene);
        match self.interaction.clone() {
            Interaction::Idle => None,
            Interaction::Previewing(ghost) => {
                let position = hit.and_then(|hit| self.calculate_position(&hit, ghost.block_type, scene));
                let valid = position.is_some_and(|p| {
                    !self.check_collision(scene, p, ghost.block_type, ghost.rotation.y, ghost.scale, None)
                });
                if let Some(ghost) = self.interaction.ghost_mut() {
                    ghost.position = position;
                    ghost.valid = valid;
                }
                position
            }
            Interaction::Dragging(Drag::Stroke { ghost, .. }) => {
                let position = hit.and_then(|hit| self.calculate_position(&hit, ghost.block_type, scene))?;
                let valid = !self.check_collision(scene, position, ghost.block_type, ghost.rotation.y, ghost.scale, None);
                self.interaction.update_drag(position, valid).ok()?;
                Some(position)
            }
            Interaction::Dragging(Drag::Move { block, original, .. }) => {
                let position = hit.and_then(|hit| self.calculate_position(&hit, original.block_type, scene))?;
                let valid = !self.check_collision(
                    scene,
                    position,
                    original.block_type,
                    original.rotation.y,
                    original.scale,
                    Some(block),
                );
                self.interaction.update_drag(position, valid).ok()?;
                scene.set_position(block, position);
                Some(position)
            }
        }
    }

    /// Instance data for the ghost, if one is over a placeable surface.
    pub fn ghost_instance(&self) -> Option<InstanceRaw> {
        self.interaction.ghost().and_then(Ghost::to_raw)
    }

    /// Primary button pressed. Single and sphere brushes place immediately,
    /// stroke brushes start dragging.
    pub fn pointer_down(&mut self, scene: &mut Scene, pool: &BlockPool) -> Vec<BlockId> {
        let Some(ghost) = self.interaction.ghost().cloned() else {
            return Vec::new();
        };
        let Some(position) = ghost.position else {
            return Vec::new();
        };
        if self.brush.is_stroke() {
            if let Err(err) = self.interaction.start_stroke() {
                log::debug!("{}", err);
            }
            return Vec::new();
        }
        let (brush, options) = (self.brush, self.ghost_options());
        let placed = self.place_brush(scene, pool, ghost.block_type, brush, position, position, options);
        if let Some(ghost) = self.interaction.ghost_mut() {
            ghost.valid = false;
        }
        placed
    }

    /// Primary button released. Commits a stroke or a move.
    pub fn pointer_up(&mut self, scene: &mut Scene, pool: &BlockPool) -> Vec<BlockId> {
        if !self.interaction.is_dragging() {
            return Vec::new();
        }
        match self.interaction.finish_drag() {
            Ok(Drag::Stroke { ghost, anchor, current }) => {
                let (brush, options) = (self.brush, self.ghost_options());
                self.place_brush(scene, pool, ghost.block_type, brush, anchor, current, options)
            }
            Ok(Drag::Move { block, original, valid, .. }) => {
                let inside = scene
                    .block(block)
                    .is_some_and(|b| self.in_bounds(b.spec.position));
                if !valid || !inside {
                    scene.set_position(block, original.position);
                }
                scene.set_dragged(None);
                Vec::new()
            }
            Err(err) => {
                log::debug!("{}", err);
                Vec::new()
            }
        }
    }

    /// Start dragging an existing block.
    pub fn begin_move(&mut self, scene: &mut Scene, id: BlockId) -> anyhow::Result<()> {
        let Some(block) = scene.block(id) else {
            anyhow::bail!("no block with id {}", id);
        };
        self.interaction.start_move(id, block.spec.clone())?;
        scene.set_dragged(Some(id));
        Ok(())
    }

    /// Abandon the current interaction, reverting an in-flight move.
    pub fn cancel(&mut self, reason: CancelReason, scene: &mut Scene) {
        if let Some(Drag::Move { block, original, .. }) = self.interaction.cancel(reason) {
            scene.set_position(block, original.position);
            scene.set_dragged(None);
        }
    }
}
