//! Fixed-capacity CPU batch storage and state-run bookkeeping.

use std::ops::Range;

use crate::coords::{Matrix, Vec2};
use crate::paint::{BlendMode, PackedColor};

use super::programs::GraphicsVertex;

// ── state runs ────────────────────────────────────────────────────────────

/// Maximal range of consecutive batch elements sharing one state key.
///
/// `end` is exclusive and counted in the batch's draw unit (indices for
/// geometry, sprites for the sprite batch). A run starts where the previous
/// one ends.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StateRun<K> {
    pub key: K,
    pub end: u32,
}

/// Ordered list of state runs. Consecutive pushes with an equal key merge.
#[derive(Debug, Clone)]
pub struct RunList<K> {
    runs: Vec<StateRun<K>>,
}

impl<K> Default for RunList<K> {
    fn default() -> Self {
        Self { runs: Vec::new() }
    }
}

impl<K: Copy + PartialEq> RunList<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extends the last run to `end` if its key matches, otherwise opens a new run.
    pub fn push(&mut self, key: K, end: u32) {
        match self.runs.last_mut() {
            Some(last) if last.key == key => last.end = end,
            _ => self.runs.push(StateRun { key, end }),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[StateRun<K>] {
        &self.runs
    }

    #[inline]
    pub fn clear(&mut self) {
        self.runs.clear();
    }

    /// Runs as `(key, start..end)`; empty runs are skipped.
    pub fn ranges(&self) -> impl Iterator<Item = (K, Range<u32>)> + '_ {
        run_ranges(&self.runs)
    }
}

/// Converts end offsets to explicit ranges.
pub fn run_ranges<K: Copy>(runs: &[StateRun<K>]) -> impl Iterator<Item = (K, Range<u32>)> + '_ {
    let mut start = 0;
    runs.iter().filter_map(move |run| {
        let range = start..run.end;
        start = run.end;
        (!range.is_empty()).then_some((run.key, range))
    })
}

// ── geometry buffer ───────────────────────────────────────────────────────

/// Vertex and index demand of one primitive.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Need {
    pub vertices: usize,
    pub indices: usize,
}

impl Need {
    /// Demand no buffer can hold.
    pub const UNBOUNDED: Need = Need::new(usize::MAX, usize::MAX);

    #[inline]
    pub const fn new(vertices: usize, indices: usize) -> Self {
        Self { vertices, indices }
    }
}

impl std::ops::Add for Need {
    type Output = Need;
    #[inline]
    fn add(self, rhs: Need) -> Need {
        Need::new(self.vertices.saturating_add(rhs.vertices), self.indices.saturating_add(rhs.indices))
    }
}

/// Position in a [`BatchBuffer`], used to slice recorded geometry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Mark {
    pub vertices: usize,
    pub indices: usize,
}

/// Immutable snapshot of tessellated geometry with its blend runs.
///
/// Indices are relative to the snapshot's first vertex.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrozenShape {
    pub vertices: Vec<GraphicsVertex>,
    pub indices: Vec<u16>,
    pub runs: Vec<StateRun<BlendMode>>,
}

impl FrozenShape {
    #[inline]
    pub fn need(&self) -> Need {
        Need::new(self.vertices.len(), self.indices.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Fixed-capacity vertex and 16-bit index storage.
///
/// Storage is allocated once at full capacity; `used_*` count the live
/// prefix. Blend runs are keyed by index offset.
#[derive(Debug, Clone)]
pub struct BatchBuffer {
    vertices: Vec<GraphicsVertex>,
    indices: Vec<u16>,
    used_vertices: usize,
    used_indices: usize,
    runs: RunList<BlendMode>,
}

impl BatchBuffer {
    /// `max_vertices` is clamped to what 16-bit indices can address.
    pub fn new(max_vertices: usize, max_indices: usize) -> Self {
        let max_vertices = max_vertices.min(u16::MAX as usize + 1);
        Self {
            vertices: vec![GraphicsVertex::default(); max_vertices],
            indices: vec![0; max_indices],
            used_vertices: 0,
            used_indices: 0,
            runs: RunList::new(),
        }
    }

    #[inline]
    pub fn max_vertices(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn max_indices(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.used_vertices
    }

    #[inline]
    pub fn index_count(&self) -> usize {
        self.used_indices
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used_indices == 0
    }

    /// Whether `need` fits in the remaining space.
    #[inline]
    pub fn fits(&self, need: Need) -> bool {
        self.used_vertices + need.vertices <= self.max_vertices()
            && self.used_indices + need.indices <= self.max_indices()
    }

    /// Whether `need` fits in an empty buffer.
    #[inline]
    pub fn can_hold(&self, need: Need) -> bool {
        need.vertices <= self.max_vertices() && need.indices <= self.max_indices()
    }

    #[inline]
    pub fn vertices(&self) -> &[GraphicsVertex] {
        &self.vertices[..self.used_vertices]
    }

    #[inline]
    pub fn indices(&self) -> &[u16] {
        &self.indices[..self.used_indices]
    }

    /// Whole vertex storage, including the unused tail.
    #[inline]
    pub fn vertex_storage(&self) -> &[GraphicsVertex] {
        &self.vertices
    }

    /// Whole index storage, including the unused tail.
    #[inline]
    pub fn index_storage(&self) -> &[u16] {
        &self.indices
    }

    #[inline]
    pub fn runs(&self) -> &RunList<BlendMode> {
        &self.runs
    }

    pub fn clear(&mut self) {
        self.used_vertices = 0;
        self.used_indices = 0;
        self.runs.clear();
    }

    #[inline]
    pub fn mark(&self) -> Mark {
        Mark { vertices: self.used_vertices, indices: self.used_indices }
    }

    /// Starts a primitive whose vertices are transformed by `transform`.
    ///
    /// The caller must have checked [`Self::fits`] for the primitive's need.
    pub fn begin(&mut self, transform: &Matrix) -> PrimitiveWriter<'_> {
        let base = self.used_vertices as u32;
        PrimitiveWriter { buf: self, base, transform: *transform }
    }

    /// Copies everything written since `mark` into a snapshot.
    pub fn snapshot_since(&self, mark: Mark) -> FrozenShape {
        let base = mark.vertices as u16;
        let first = mark.indices as u32;
        let mut runs = Vec::new();
        for (key, range) in self.runs.ranges() {
            let start = range.start.max(first);
            if range.end <= start {
                continue;
            }
            runs.push(StateRun { key, end: range.end - first });
        }
        FrozenShape {
            vertices: self.vertices[mark.vertices..self.used_vertices].to_vec(),
            indices: self.indices[mark.indices..self.used_indices]
                .iter()
                .map(|i| i - base)
                .collect(),
            runs,
        }
    }

    /// Moves the live contents out as a snapshot.
    pub fn into_frozen(self) -> FrozenShape {
        self.snapshot_since(Mark { vertices: 0, indices: 0 })
    }

    /// Appends a snapshot, transforming positions and fading colors.
    ///
    /// The caller must have checked [`Self::fits`] for `frozen.need()`.
    pub fn append_frozen(&mut self, frozen: &FrozenShape, transform: &Matrix, alpha: f32) {
        let base = self.used_vertices;
        let first = self.used_indices as u32;
        let identity = transform.is_identity();
        for (dst, src) in self.vertices[base..base + frozen.vertices.len()]
            .iter_mut()
            .zip(&frozen.vertices)
        {
            let pos = if identity {
                src.pos
            } else {
                let (x, y) = transform.transform_xy(src.pos[0], src.pos[1]);
                [x, y]
            };
            *dst = GraphicsVertex { pos, color: src.color.scale_alpha(alpha) };
        }
        for (dst, src) in self.indices[first as usize..first as usize + frozen.indices.len()]
            .iter_mut()
            .zip(&frozen.indices)
        {
            *dst = src + base as u16;
        }
        self.used_vertices += frozen.vertices.len();
        self.used_indices += frozen.indices.len();
        for run in &frozen.runs {
            self.runs.push(run.key, first + run.end);
        }
    }
}

/// Writes one primitive into a [`BatchBuffer`].
///
/// Vertex handles returned by [`Self::vertex`] are local to the primitive.
pub struct PrimitiveWriter<'a> {
    buf: &'a mut BatchBuffer,
    base: u32,
    transform: Matrix,
}

impl PrimitiveWriter<'_> {
    /// Pushes a vertex in local space and returns its local handle.
    pub fn vertex(&mut self, p: Vec2, color: PackedColor) -> u16 {
        let (x, y) = self.transform.transform_xy(p.x, p.y);
        let slot = self.buf.used_vertices;
        self.buf.vertices[slot] = GraphicsVertex { pos: [x, y], color };
        self.buf.used_vertices += 1;
        (slot as u32 - self.base) as u16
    }

    pub fn triangle(&mut self, a: u16, b: u16, c: u16) {
        let base = self.base as u16;
        let at = self.buf.used_indices;
        self.buf.indices[at..at + 3].copy_from_slice(&[base + a, base + b, base + c]);
        self.buf.used_indices += 3;
    }

    /// Two triangles `a b c` and `a c d`.
    #[inline]
    pub fn quad(&mut self, a: u16, b: u16, c: u16, d: u16) {
        self.triangle(a, b, c);
        self.triangle(a, c, d);
    }

    /// Closes the primitive under `blend`.
    pub fn finish(self, blend: BlendMode) {
        let end = self.buf.used_indices as u32;
        self.buf.runs.push(blend, end);
    }
}
