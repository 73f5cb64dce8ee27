//! CPU side of instanced block rendering.
//!
//! Blocks of one [`BlockType`] share a template mesh and are drawn with a
//! single instanced draw call. The [`InstancedRenderer`] keeps a record per
//! block, grouped by type, and a dirty flag per type. Whenever a type is dirty
//! its whole instance array is rebuilt from the records and handed to an
//! [`InstanceSink`] once; records are never patched in place on the GPU.

use std::collections::{BTreeMap, btree_map::Entry};

use crate::data_structures::{
    block::{BlockId, BlockType},
    instance::{Instance, InstanceRaw},
};

/// Receives rebuilt instance arrays, typically a GPU buffer per block type.
pub trait InstanceSink {
    fn upload_instances(&mut self, block_type: BlockType, instances: &[InstanceRaw]);
}

/// What the renderer knows about one block.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceRecord {
    pub instance: Instance,
    pub color: [f32; 4],
    pub visible: bool,
    pub culled: bool,
}

impl InstanceRecord {
    pub fn new(instance: Instance, color: [f32; 4]) -> Self {
        Self {
            instance,
            color,
            visible: true,
            culled: false,
        }
    }

    fn is_drawn(&self) -> bool {
        self.visible && !self.culled
    }
}

#[derive(Debug, Default)]
struct Batch {
    records: BTreeMap<BlockId, InstanceRecord>,
    dirty: bool,
    raw: Vec<InstanceRaw>,
}

#[derive(Debug, Default)]
pub struct InstancedRenderer {
    batches: BTreeMap<BlockType, Batch>,
    dirty_events: usize,
    uploads: usize,
}

impl InstancedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark(&mut self, block_type: BlockType) {
        let batch = self.batches.entry(block_type).or_default();
        if !batch.dirty {
            batch.dirty = true;
            self.dirty_events += 1;
        }
    }

    /// Flag a type for rebuild. Counts as a dirty event only on a clean-to-dirty edge.
    pub fn mark_dirty(&mut self, block_type: BlockType) {
        self.mark(block_type);
    }

    pub fn add_instance(&mut self, block_type: BlockType, id: BlockId, record: InstanceRecord) {
        let batch = self.batches.entry(block_type).or_default();
        if batch.records.insert(id, record).is_some() {
            log::warn!("Instance {} of {:?} was added twice, replacing it", id, block_type);
        }
        self.mark(block_type);
    }

    pub fn remove_instance(&mut self, block_type: BlockType, id: BlockId) -> bool {
        let removed = self
            .batches
            .get_mut(&block_type)
            .and_then(|batch| batch.records.remove(&id))
            .is_some();
        if removed {
            self.mark(block_type);
        }
        removed
    }

    /// Replace a record. Unchanged records do not dirty the batch.
    pub fn update_instance(&mut self, block_type: BlockType, id: BlockId, record: InstanceRecord) -> bool {
        let Some(batch) = self.batches.get_mut(&block_type) else {
            return false;
        };
        match batch.records.entry(id) {
            Entry::Occupied(mut entry) => {
                // culling is owned by the renderer, keep it across transform updates
                let record = InstanceRecord {
                    culled: entry.get().culled,
                    ..record
                };
                if *entry.get() == record {
                    return true;
                }
                entry.insert(record);
            }
            Entry::Vacant(_) => return false,
        }
        self.mark(block_type);
        true
    }

    pub fn set_culled(&mut self, block_type: BlockType, id: BlockId, culled: bool) {
        let changed = match self
            .batches
            .get_mut(&block_type)
            .and_then(|batch| batch.records.get_mut(&id))
        {
            Some(record) if record.culled != culled => {
                record.culled = culled;
                true
            }
            _ => false,
        };
        if changed {
            self.mark(block_type);
        }
    }

    pub fn record(&self, block_type: BlockType, id: BlockId) -> Option<&InstanceRecord> {
        self.batches.get(&block_type)?.records.get(&id)
    }

    pub fn is_dirty(&self, block_type: BlockType) -> bool {
        self.batches.get(&block_type).is_some_and(|b| b.dirty)
    }

    pub fn dirty_types(&self) -> Vec<BlockType> {
        self.batches
            .iter()
            .filter(|(_, b)| b.dirty)
            .map(|(ty, _)| *ty)
            .collect()
    }

    /// Total clean-to-dirty transitions since creation.
    pub fn dirty_events(&self) -> usize {
        self.dirty_events
    }

    /// Number of instance arrays handed to a sink so far.
    pub fn uploads(&self) -> usize {
        self.uploads
    }

    pub fn live_count(&self, block_type: BlockType) -> usize {
        self.batches.get(&block_type).map_or(0, |b| b.records.len())
    }

    /// Instances that were part of the last upload of this type.
    pub fn drawn(&self, block_type: BlockType) -> &[InstanceRaw] {
        self.batches
            .get(&block_type)
            .map(|b| b.raw.as_slice())
            .unwrap_or(&[])
    }

    /// Rebuild and upload every dirty batch. Returns how many batches were uploaded.
    pub fn rebuild_dirty(&mut self, sink: &mut dyn InstanceSink) -> usize {
        let mut uploaded = 0;
        for (block_type, batch) in self.batches.iter_mut().filter(|(_, b)| b.dirty) {
            batch.raw.clear();
            batch.raw.reserve(batch.records.len());
            batch.raw.extend(
                batch
                    .records
                    .values()
                    .filter(|r| r.is_drawn())
                    .map(|r| r.instance.to_raw(r.color)),
            );
            sink.upload_instances(*block_type, &batch.raw);
            batch.dirty = false;
            uploaded += 1;
        }
        self.uploads += uploaded;
        uploaded
    }

    /// Drop every record, leaving each previously known type dirty and empty.
    pub fn clear(&mut self) {
        let types: Vec<BlockType> = self.batches.keys().copied().collect();
        for block_type in types {
            if let Some(batch) = self.batches.get_mut(&block_type) {
                batch.records.clear();
            }
            self.mark(block_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use cgmath::Vector3;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        uploads: Vec<(BlockType, Vec<InstanceRaw>)>,
    }

    impl InstanceSink for Recorder {
        fn upload_instances(&mut self, block_type: BlockType, instances: &[InstanceRaw]) {
            self.uploads.push((block_type, instances.to_vec()));
        }
    }

    fn record_at(x: f32) -> InstanceRecord {
        InstanceRecord::new(Instance::from(Vector3::new(x, 0.0, 0.0)), [1.0; 4])
    }

    #[test]
    fn many_adds_are_one_dirty_event_and_one_upload() {
        let mut renderer = InstancedRenderer::new();
        for id in 0..10 {
            renderer.add_instance(BlockType::Cube, id, record_at(id as f32));
        }
        assert_eq!(renderer.dirty_events(), 1);

        let mut sink = Recorder::default();
        assert_eq!(renderer.rebuild_dirty(&mut sink), 1);
        assert_eq!(sink.uploads.len(), 1);
        assert_eq!(sink.uploads[0].1.len(), 10);
        assert!(!renderer.is_dirty(BlockType::Cube));

        assert_eq!(renderer.rebuild_dirty(&mut sink), 0);
    }

    #[test]
    fn culled_and_hidden_records_are_skipped() {
        let mut renderer = InstancedRenderer::new();
        renderer.add_instance(BlockType::Slab, 1, record_at(1.0));
        renderer.add_instance(BlockType::Slab, 2, record_at(2.0));
        let mut hidden = record_at(3.0);
        hidden.visible = false;
        renderer.add_instance(BlockType::Slab, 3, hidden);
        renderer.set_culled(BlockType::Slab, 2, true);

        let mut sink = Recorder::default();
        renderer.rebuild_dirty(&mut sink);
        let drawn = &sink.uploads[0].1;
        assert_eq!(drawn.len(), 1);
        assert_eq!(drawn[0].translation(), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn unchanged_update_keeps_batch_clean() {
        let mut renderer = InstancedRenderer::new();
        renderer.add_instance(BlockType::Cube, 1, record_at(1.0));
        renderer.rebuild_dirty(&mut Recorder::default());

        assert!(renderer.update_instance(BlockType::Cube, 1, record_at(1.0)));
        assert!(!renderer.is_dirty(BlockType::Cube));
        assert!(renderer.update_instance(BlockType::Cube, 1, record_at(2.0)));
        assert!(renderer.is_dirty(BlockType::Cube));
        assert!(!renderer.update_instance(BlockType::Cube, 99, record_at(2.0)));
    }

    #[test]
    fn removing_last_instance_uploads_empty_batch() {
        let mut renderer = InstancedRenderer::new();
        renderer.add_instance(BlockType::Hazard, 5, record_at(0.0));
        renderer.rebuild_dirty(&mut Recorder::default());
        assert!(renderer.remove_instance(BlockType::Hazard, 5));

        let mut sink = Recorder::default();
        renderer.rebuild_dirty(&mut sink);
        assert_eq!(sink.uploads, vec![(BlockType::Hazard, vec![])]);
    }
}
