//! Ghost preview and the pointer interaction state machine.
//!
//! ```text
//! Idle ──start_preview──▶ Previewing ──start_stroke──▶ Dragging(Stroke)
//!  │                          │  ▲                          │
//!  └────────start_move────────┴──┼──────▶ Dragging(Move)    │
//!                                └──────── finish_drag ─────┘
//! cancel: any state ──▶ Idle
//! ```
//!
//! Transitions that make no sense from the current state are errors; nothing
//! is mutated in that case.

use cgmath::{Vector3, Zero};

use crate::data_structures::{
    block::{BlockId, BlockSpec, BlockType},
    instance::{Instance, InstanceRaw},
};

const VALID_TINT: [f32; 4] = [0.25, 0.9, 0.35, 0.45];
const INVALID_TINT: [f32; 4] = [0.95, 0.2, 0.2, 0.45];

/// Non-physical preview of a pending placement.
#[derive(Clone, Debug, PartialEq)]
pub struct Ghost {
    pub block_type: BlockType,
    /// `None` while the cursor is over nothing placeable.
    pub position: Option<Vector3<f32>>,
    pub rotation: Vector3<f32>,
    pub scale: f32,
    pub valid: bool,
}

impl Ghost {
    pub fn new(block_type: BlockType) -> Self {
        Self {
            block_type,
            position: None,
            rotation: Vector3::zero(),
            scale: 1.0,
            valid: false,
        }
    }

    pub fn tint(&self) -> [f32; 4] {
        if self.valid { VALID_TINT } else { INVALID_TINT }
    }

    /// The semi-transparent instance to draw, if the ghost is over something.
    pub fn to_raw(&self) -> Option<InstanceRaw> {
        self.position.map(|position| {
            Instance::from_block(position, self.rotation, self.scale).to_raw(self.tint())
        })
    }
}

/// Why an interaction was abandoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    Escape,
    RightClick,
    PointerCaptureLost,
    ModeSwitch,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Drag {
    /// Multi-cell brush stroke started at `anchor`.
    Stroke {
        ghost: Ghost,
        anchor: Vector3<f32>,
        current: Vector3<f32>,
    },
    /// An existing block being moved; `original` is restored on cancel.
    Move {
        block: BlockId,
        original: BlockSpec,
        current: Vector3<f32>,
        valid: bool,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Interaction {
    #[default]
    Idle,
    Previewing(Ghost),
    Dragging(Drag),
}

impl Interaction {
    pub fn is_idle(&self) -> bool {
        matches!(self, Interaction::Idle)
    }

    pub fn is_previewing(&self) -> bool {
        matches!(self, Interaction::Previewing(_))
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self, Interaction::Dragging(_))
    }

    pub fn ghost(&self) -> Option<&Ghost> {
        match self {
            Interaction::Previewing(ghost) => Some(ghost),
            Interaction::Dragging(Drag::Stroke { ghost, .. }) => Some(ghost),
            _ => None,
        }
    }

    pub fn ghost_mut(&mut self) -> Option<&mut Ghost> {
        match self {
            Interaction::Previewing(ghost) => Some(ghost),
            Interaction::Dragging(Drag::Stroke { ghost, .. }) => Some(ghost),
            _ => None,
        }
    }

    pub fn drag(&self) -> Option<&Drag> {
        match self {
            Interaction::Dragging(drag) => Some(drag),
            _ => None,
        }
    }

    /// Show a ghost for `block_type`, replacing any current preview.
    pub fn start_preview(&mut self, block_type: BlockType) -> anyhow::Result<()> {
        match self {
            Interaction::Idle => {
                *self = Interaction::Previewing(Ghost::new(block_type));
                Ok(())
            }
            Interaction::Previewing(ghost) => {
                ghost.block_type = block_type;
                ghost.valid = false;
                Ok(())
            }
            Interaction::Dragging(_) => anyhow::bail!("cannot start a preview while dragging"),
        }
    }

    /// Begin a brush stroke from the current ghost position.
    pub fn start_stroke(&mut self) -> anyhow::Result<Vector3<f32>> {
        let Interaction::Previewing(ghost) = self else {
            anyhow::bail!("a stroke can only start from a preview");
        };
        let Some(anchor) = ghost.position else {
            anyhow::bail!("the preview is not over a placeable surface");
        };
        let ghost = ghost.clone();
        *self = Interaction::Dragging(Drag::Stroke {
            ghost,
            anchor,
            current: anchor,
        });
        Ok(anchor)
    }

    /// Begin moving an existing block.
    pub fn start_move(&mut self, block: BlockId, original: BlockSpec) -> anyhow::Result<()> {
        if self.is_dragging() {
            anyhow::bail!("already dragging");
        }
        let current = original.position;
        *self = Interaction::Dragging(Drag::Move {
            block,
            original,
            current,
            valid: true,
        });
        Ok(())
    }

    pub fn update_drag(&mut self, position: Vector3<f32>, is_valid: bool) -> anyhow::Result<()> {
        match self {
            Interaction::Dragging(Drag::Stroke { ghost, current, .. }) => {
                *current = position;
                ghost.position = Some(position);
                ghost.valid = is_valid;
                Ok(())
            }
            Interaction::Dragging(Drag::Move { current, valid, .. }) => {
                *current = position;
                *valid = is_valid;
                Ok(())
            }
            _ => anyhow::bail!("no drag in progress"),
        }
    }

    /// End the drag. Strokes fall back to previewing, moves to idle.
    pub fn finish_drag(&mut self) -> anyhow::Result<Drag> {
        let drag = match std::mem::take(self) {
            Interaction::Dragging(drag) => drag,
            other => {
                *self = other;
                anyhow::bail!("no drag in progress");
            }
        };
        *self = match &drag {
            Drag::Stroke { ghost, .. } => Interaction::Previewing(ghost.clone()),
            Drag::Move { .. } => Interaction::Idle,
        };
        Ok(drag)
    }

    /// Abandon whatever is going on. Returns the interrupted drag so it can be reverted.
    pub fn cancel(&mut self, reason: CancelReason) -> Option<Drag> {
        log::debug!("Interaction cancelled ({:?})", reason);
        match std::mem::take(self) {
            Interaction::Dragging(drag) => Some(drag),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stroke_round_trip() {
        let mut state = Interaction::default();
        state.start_preview(BlockType::Cube).unwrap();
        assert!(state.start_stroke().is_err(), "no ghost position yet");

        state.ghost_mut().unwrap().position = Some(Vector3::new(1.0, 0.5, 1.0));
        let anchor = state.start_stroke().unwrap();
        assert_eq!(anchor, Vector3::new(1.0, 0.5, 1.0));
        assert!(state.start_preview(BlockType::Slab).is_err());

        state.update_drag(Vector3::new(4.0, 0.5, 1.0), true).unwrap();
        let drag = state.finish_drag().unwrap();
        assert!(matches!(drag, Drag::Stroke { current, .. } if current.x == 4.0));
        assert!(state.is_previewing());
    }

    #[test]
    fn cancel_returns_move_for_revert() {
        let mut state = Interaction::Idle;
        let original = BlockSpec::new(BlockType::Cube, Vector3::new(0.0, 0.5, 0.0));
        state.start_move(3, original.clone()).unwrap();
        state.update_drag(Vector3::new(5.0, 0.5, 0.0), false).unwrap();

        let drag = state.cancel(CancelReason::PointerCaptureLost).unwrap();
        assert!(state.is_idle());
        match drag {
            Drag::Move { block, original: o, .. } => {
                assert_eq!(block, 3);
                assert_eq!(o, original);
            }
            other => panic!("unexpected drag {:?}", other),
        }
    }

    #[test]
    fn illegal_transitions_do_not_mutate() {
        let mut state = Interaction::Idle;
        assert!(state.finish_drag().is_err());
        assert!(state.is_idle());
        assert!(state.update_drag(Vector3::zero(), true).is_err());
        assert!(state.cancel(CancelReason::Escape).is_none());
    }

    #[test]
    fn ghost_tint_follows_validity() {
        let mut ghost = Ghost::new(BlockType::Cube);
        assert!(ghost.to_raw().is_none());
        ghost.position = Some(Vector3::zero());
        ghost.valid = true;
        assert_eq!(ghost.to_raw().unwrap().color, VALID_TINT);
    }
}
