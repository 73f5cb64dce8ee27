//! Engine configuration and render quality tiers.
//!
//! [`EngineConfig`] collects every tunable constant of a session: physics
//! timing, pool capacities, placement grid, frame pacing and terrain layout.
//! All fields have defaults so a session can be mounted without any
//! configuration file; partial JSON documents override only the fields they name.

use serde::{Deserialize, Serialize};

/// Tri-level render quality chosen by the host application.
///
/// The engine applies a tier but never decides it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Performance,
    #[default]
    Balanced,
    Quality,
}

/// Concrete render parameters derived from a [`QualityTier`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualitySettings {
    pub shadow_map_size: u32,
    pub post_processing: bool,
    pub msaa_samples: u32,
    /// Internal render resolution relative to the surface size.
    pub render_scale: f32,
    /// Blocks further away than this are culled from their instance batch.
    pub draw_distance: f32,
}

impl QualityTier {
    pub fn settings(self) -> QualitySettings {
        match self {
            QualityTier::Performance => QualitySettings {
                shadow_map_size: 512,
                post_processing: false,
                msaa_samples: 1,
                render_scale: 0.75,
                draw_distance: 120.0,
            },
            QualityTier::Balanced => QualitySettings {
                shadow_map_size: 1024,
                post_processing: false,
                msaa_samples: 1,
                render_scale: 1.0,
                draw_distance: 200.0,
            },
            QualityTier::Quality => QualitySettings {
                shadow_map_size: 2048,
                post_processing: true,
                msaa_samples: 4,
                render_scale: 1.0,
                draw_distance: 350.0,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub gravity: [f32; 3],
    /// Length of one simulation sub-step in seconds.
    pub fixed_dt: f32,
    pub max_sub_steps: u32,
    /// Global time factor applied to both the sub-step and the elapsed time.
    pub time_scale: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, -9.81, 0.0],
            fixed_dt: 1.0 / 60.0,
            max_sub_steps: 3,
            time_scale: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub world_capacity: usize,
    /// Free-list bound per block type.
    pub block_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            world_capacity: 2,
            block_capacity: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub cell_size: f32,
    pub snap: bool,
    /// Placement is rejected outside `[-half_extent, half_extent]` on X and Z.
    pub half_extent: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size: 1.0,
            snap: true,
            half_extent: 64.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Render-side frame cap, independent of the physics rate.
    pub target_fps: f32,
    /// Overrides the quality tier's draw distance when set.
    pub cull_distance: Option<f32>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            cull_distance: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// World-space edge length of the square terrain.
    pub size: f32,
    /// Number of grid segments per edge; the mesh has `resolution + 1` vertices per edge.
    pub resolution: usize,
    pub brush_interval_millis: u64,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            size: 128.0,
            resolution: 128,
            brush_interval_millis: 16,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub physics: PhysicsConfig,
    pub pools: PoolConfig,
    pub grid: GridConfig,
    pub frame: FrameConfig,
    pub terrain: TerrainConfig,
    pub quality: QualityTier,
}

impl EngineConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "grid": { "cell_size": 0.5 }, "quality": "quality" }"#)
            .unwrap();
        assert_eq!(config.grid.cell_size, 0.5);
        assert!(config.grid.snap);
        assert_eq!(config.physics, PhysicsConfig::default());
        assert_eq!(config.quality, QualityTier::Quality);
    }

    #[test]
    fn higher_tiers_never_draw_less() {
        let perf = QualityTier::Performance.settings();
        let bal = QualityTier::Balanced.settings();
        let qual = QualityTier::Quality.settings();
        assert!(perf.draw_distance < bal.draw_distance && bal.draw_distance < qual.draw_distance);
        assert!(perf.shadow_map_size <= bal.shadow_map_size);
        assert!(qual.post_processing);
    }
}
