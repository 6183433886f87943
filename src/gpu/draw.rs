//! Draw Commands
//!
//! Immutable records describing one draw or dispatch, built through a
//! one-shot builder. The builder validates everything the backend would
//! otherwise have to check per frame — geometry shape, counts, alignment,
//! slot ranges — and clones the bind-group map on `build()` so later
//! mutation of the builder cannot leak into an already-built command.

use smallvec::SmallVec;

use crate::errors::{CathodeError, Result};
use crate::gpu::handle::{BindGroupHandle, BufferHandle, PipelineHandle};

/// Highest bind-group slot.
pub const MAX_BIND_SLOT: u32 = 3;

/// Indirect draw arguments must be 4-byte aligned.
pub const INDIRECT_ALIGNMENT: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Geometry variant of a draw command.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Indexed {
        vbuffers: SmallVec<[BufferHandle; 4]>,
        ibuffer: BufferHandle,
        format: IndexFormat,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    NonIndexed {
        vbuffers: SmallVec<[BufferHandle; 4]>,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    Indirect {
        vbuffers: SmallVec<[BufferHandle; 4]>,
        ibuffer: Option<BufferHandle>,
        format: Option<IndexFormat>,
        indirect_buffer: BufferHandle,
        indirect_offset: u64,
    },
    Compute {
        workgroups: (u32, u32, u32),
    },
}

/// One draw or dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    pub pipeline: PipelineHandle,
    /// `(slot, bind group)`, slot ∈ `0..=MAX_BIND_SLOT`.
    pub bind_groups: SmallVec<[(u32, BindGroupHandle); 4]>,
    pub geometry: Geometry,
    pub label: Option<String>,
    pub debug: bool,
}

/// One-shot builder. `build()` consumes the accumulated state and resets,
/// so a second `build()` without reconfiguration fails.
#[derive(Default)]
pub struct DrawCommandBuilder {
    pipeline: Option<PipelineHandle>,
    bind_groups: SmallVec<[(u32, BindGroupHandle); 4]>,
    geometry: Option<Geometry>,
    label: Option<String>,
    debug: bool,
}

impl DrawCommandBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pipeline(mut self, pipeline: PipelineHandle) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    #[must_use]
    pub fn bind_group(mut self, slot: u32, group: BindGroupHandle) -> Self {
        self.bind_groups.retain(|(s, _)| *s != slot);
        self.bind_groups.push((slot, group));
        self
    }

    #[must_use]
    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets indexed geometry. Exactly one geometry call is allowed.
    #[must_use]
    pub fn indexed(
        mut self,
        vbuffers: &[BufferHandle],
        ibuffer: BufferHandle,
        format: IndexFormat,
        index_count: u32,
    ) -> Self {
        self.geometry = Some(Geometry::Indexed {
            vbuffers: SmallVec::from_slice(vbuffers),
            ibuffer,
            format,
            index_count,
            instance_count: 1,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        });
        self
    }

    /// Sets non-indexed geometry.
    #[must_use]
    pub fn non_indexed(mut self, vbuffers: &[BufferHandle], vertex_count: u32) -> Self {
        self.geometry = Some(Geometry::NonIndexed {
            vbuffers: SmallVec::from_slice(vbuffers),
            vertex_count,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        });
        self
    }

    /// Sets indirect geometry.
    #[must_use]
    pub fn indirect(
        mut self,
        vbuffers: &[BufferHandle],
        ibuffer: Option<(BufferHandle, IndexFormat)>,
        indirect_buffer: BufferHandle,
        indirect_offset: u64,
    ) -> Self {
        self.geometry = Some(Geometry::Indirect {
            vbuffers: SmallVec::from_slice(vbuffers),
            ibuffer: ibuffer.map(|(b, _)| b),
            format: ibuffer.map(|(_, f)| f),
            indirect_buffer,
            indirect_offset,
        });
        self
    }

    /// Sets compute geometry.
    #[must_use]
    pub fn compute(mut self, x: u32, y: u32, z: u32) -> Self {
        self.geometry = Some(Geometry::Compute { workgroups: (x, y, z) });
        self
    }

    /// Overrides instancing parameters on an already-set geometry.
    #[must_use]
    pub fn instances(mut self, count: u32, first: u32) -> Self {
        match &mut self.geometry {
            Some(Geometry::Indexed {
                instance_count,
                first_instance,
                ..
            })
            | Some(Geometry::NonIndexed {
                instance_count,
                first_instance,
                ..
            }) => {
                *instance_count = count;
                *first_instance = first;
            }
            _ => {}
        }
        self
    }

    /// Validates and produces the command, resetting the builder.
    pub fn build(&mut self, max_workgroups_per_dimension: u32) -> Result<DrawCommand> {
        let pipeline = self
            .pipeline
            .take()
            .ok_or_else(|| invalid("no pipeline set"))?;
        let geometry = self
            .geometry
            .take()
            .ok_or_else(|| invalid("no geometry set (or builder already consumed)"))?;

        for (slot, _) in &self.bind_groups {
            if *slot > MAX_BIND_SLOT {
                return Err(invalid(&format!("bind group slot {slot} > {MAX_BIND_SLOT}")));
            }
        }

        match &geometry {
            Geometry::Indexed {
                vbuffers,
                index_count,
                instance_count,
                ..
            } => {
                if vbuffers.is_empty() {
                    return Err(invalid("indexed draw with no vertex buffers"));
                }
                if *index_count == 0 || *instance_count == 0 {
                    return Err(invalid("indexed draw with zero count"));
                }
            }
            Geometry::NonIndexed {
                vbuffers,
                vertex_count,
                instance_count,
                ..
            } => {
                if vbuffers.is_empty() {
                    return Err(invalid("draw with no vertex buffers"));
                }
                if *vertex_count == 0 || *instance_count == 0 {
                    return Err(invalid("draw with zero count"));
                }
            }
            Geometry::Indirect {
                vbuffers,
                ibuffer,
                format,
                indirect_offset,
                ..
            } => {
                if vbuffers.is_empty() {
                    return Err(invalid("indirect draw with no vertex buffers"));
                }
                if indirect_offset % INDIRECT_ALIGNMENT != 0 {
                    return Err(invalid(&format!(
                        "indirect offset {indirect_offset} not {INDIRECT_ALIGNMENT}-aligned"
                    )));
                }
                // Index format present iff index buffer present.
                if ibuffer.is_some() != format.is_some() {
                    return Err(invalid("index format must accompany the index buffer"));
                }
            }
            Geometry::Compute { workgroups } => {
                let (x, y, z) = *workgroups;
                for dim in [x, y, z] {
                    if dim == 0 || dim > max_workgroups_per_dimension {
                        return Err(invalid(&format!(
                            "workgroup dimension {dim} outside 1..={max_workgroups_per_dimension}"
                        )));
                    }
                }
            }
        }

        // Clone the map out; the builder's copy resets with everything else.
        let bind_groups = std::mem::take(&mut self.bind_groups);
        let label = self.label.take();
        let debug = std::mem::take(&mut self.debug);

        Ok(DrawCommand {
            pipeline,
            bind_groups,
            geometry,
            label,
            debug,
        })
    }
}

fn invalid(reason: &str) -> CathodeError {
    CathodeError::InvalidDrawCommand(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn handles() -> (PipelineHandle, BindGroupHandle, BufferHandle, BufferHandle) {
        let mut pipelines: SlotMap<PipelineHandle, ()> = SlotMap::with_key();
        let mut groups: SlotMap<BindGroupHandle, ()> = SlotMap::with_key();
        let mut buffers: SlotMap<BufferHandle, ()> = SlotMap::with_key();
        (
            pipelines.insert(()),
            groups.insert(()),
            buffers.insert(()),
            buffers.insert(()),
        )
    }

    #[test]
    fn builder_is_one_shot() {
        let (p, g, vb, ib) = handles();
        let mut builder = DrawCommandBuilder::new()
            .pipeline(p)
            .bind_group(0, g)
            .indexed(&[vb], ib, IndexFormat::Uint16, 36);

        let cmd = builder.build(65_535).unwrap();
        assert_eq!(cmd.pipeline, p);
        assert!(matches!(cmd.geometry, Geometry::Indexed { index_count: 36, .. }));

        // Second build on the same builder fails: it reset after the first.
        assert!(builder.build(65_535).is_err());
    }

    #[test]
    fn indirect_offset_alignment() {
        let (p, _, vb, indirect) = handles();
        let mut bad = DrawCommandBuilder::new()
            .pipeline(p)
            .indirect(&[vb], None, indirect, 6);
        assert!(bad.build(65_535).is_err());

        let mut good = DrawCommandBuilder::new()
            .pipeline(p)
            .indirect(&[vb], None, indirect, 8);
        assert!(good.build(65_535).is_ok());
    }

    #[test]
    fn slot_range_enforced() {
        let (p, g, vb, _) = handles();
        let mut builder = DrawCommandBuilder::new()
            .pipeline(p)
            .bind_group(4, g)
            .non_indexed(&[vb], 3);
        assert!(builder.build(65_535).is_err());
    }

    #[test]
    fn compute_bounds() {
        let (p, _, _, _) = handles();
        let mut zero = DrawCommandBuilder::new().pipeline(p).compute(0, 1, 1);
        assert!(zero.build(100).is_err());
        let mut over = DrawCommandBuilder::new().pipeline(p).compute(101, 1, 1);
        assert!(over.build(100).is_err());
        let mut ok = DrawCommandBuilder::new().pipeline(p).compute(100, 1, 1);
        assert!(ok.build(100).is_ok());
    }

    #[test]
    fn empty_vbuffers_rejected() {
        let (p, _, _, ib) = handles();
        let mut builder = DrawCommandBuilder::new()
            .pipeline(p)
            .indexed(&[], ib, IndexFormat::Uint32, 3);
        assert!(builder.build(65_535).is_err());
    }
}
