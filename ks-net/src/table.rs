use std::fmt::{Debug, Formatter};
use std::ops::{Index, IndexMut};

use indexmap::IndexMap;
use itertools::Itertools;

use crate::tensor::Tensor;

/// The number of shared scratch buffers handed to every stage.
pub const SCRATCH_BUFFERS: usize = 2;

/// A tensor in a [TensorTable].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TensorId(usize);

impl TensorId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Owns every named tensor of a linked network, plus the shared scratch arena.
#[derive(Debug, Default)]
pub struct TensorTable {
    pub(crate) tensors: Vec<Tensor>,
    pub(crate) names: Vec<String>,
    pub(crate) index: IndexMap<String, TensorId>,
    pub(crate) scratch: ScratchPool,
}

/// Exactly [SCRATCH_BUFFERS] mutable buffers reused by every stage as working memory.
///
/// The contents are undefined at the start of every stage call:
/// stages run one after the other and each one may resize and overwrite the buffers,
/// so a stage must never read anything it did not write during the same call.
#[derive(Default)]
pub struct ScratchPool {
    buffers: [Vec<f32>; SCRATCH_BUFFERS],
}

/// The resolved sources and destinations of a single stage during a setup, reshape or forward call.
///
/// A destination can be the same tensor as the source at the same position (an in-place alias),
/// [StageIo::is_in_place] tells whether that is the case.
pub struct StageIo<'a> {
    tensors: &'a mut [Tensor],
    src: &'a [TensorId],
    dst: &'a [TensorId],
}

impl TensorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new, empty tensor.
    pub fn alloc(&mut self, name: &str) -> TensorId {
        let id = TensorId(self.tensors.len());
        self.tensors.push(Tensor::empty());
        self.names.push(name.to_owned());
        self.index.insert(name.to_owned(), id);
        id
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// The number of allocated buffers, including the scratch arena.
    pub fn allocated(&self) -> usize {
        self.tensors.len() + SCRATCH_BUFFERS
    }

    pub fn name(&self, id: TensorId) -> &str {
        &self.names[id.0]
    }

    pub fn ids(&self) -> impl Iterator<Item = TensorId> {
        (0..self.tensors.len()).map(TensorId)
    }

    pub fn find(&self, name: &str) -> Option<TensorId> {
        self.index.get(name).copied()
    }

    /// Split into the pieces a stage call needs.
    pub(crate) fn stage_io<'a>(
        &'a mut self,
        src: &'a [TensorId],
        dst: &'a [TensorId],
    ) -> (StageIo<'a>, &'a mut ScratchPool) {
        let io = StageIo {
            tensors: &mut self.tensors,
            src,
            dst,
        };
        (io, &mut self.scratch)
    }
}

impl Index<TensorId> for TensorTable {
    type Output = Tensor;

    fn index(&self, id: TensorId) -> &Tensor {
        &self.tensors[id.0]
    }
}

impl IndexMut<TensorId> for TensorTable {
    fn index_mut(&mut self, id: TensorId) -> &mut Tensor {
        &mut self.tensors[id.0]
    }
}

impl ScratchPool {
    /// Get scratch buffer `index` with at least `len` elements.
    pub fn get(&mut self, index: usize, len: usize) -> &mut [f32] {
        let buffer = &mut self.buffers[index];
        if buffer.len() < len {
            buffer.resize(len, 0.0);
        }
        &mut buffer[..len]
    }

    /// Get both scratch buffers at once.
    pub fn pair(&mut self, len0: usize, len1: usize) -> (&mut [f32], &mut [f32]) {
        let [first, second] = &mut self.buffers;
        if first.len() < len0 {
            first.resize(len0, 0.0);
        }
        if second.len() < len1 {
            second.resize(len1, 0.0);
        }
        (&mut first[..len0], &mut second[..len1])
    }

    /// The current capacity of each buffer in elements.
    pub fn sizes(&self) -> [usize; SCRATCH_BUFFERS] {
        [self.buffers[0].len(), self.buffers[1].len()]
    }
}

impl Debug for ScratchPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchPool").field("sizes", &self.sizes()).finish()
    }
}

impl Debug for StageIo<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageIo")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .finish_non_exhaustive()
    }
}

impl<'a> StageIo<'a> {
    pub fn src_len(&self) -> usize {
        self.src.len()
    }

    pub fn dst_len(&self) -> usize {
        self.dst.len()
    }

    pub fn src(&self, index: usize) -> &Tensor {
        &self.tensors[self.src[index].0]
    }

    pub fn srcs(&self) -> Vec<&Tensor> {
        self.src.iter().map(|id| &self.tensors[id.0]).collect_vec()
    }

    pub fn dst(&mut self, index: usize) -> &mut Tensor {
        &mut self.tensors[self.dst[index].0]
    }

    pub fn dst_ref(&self, index: usize) -> &Tensor {
        &self.tensors[self.dst[index].0]
    }

    /// Whether destination `index` is the same tensor as source `index`.
    pub fn is_in_place(&self, index: usize) -> bool {
        index < self.src.len() && self.src[index] == self.dst[index]
    }

    /// Whether any destination is the same tensor as its source.
    pub fn any_in_place(&self) -> bool {
        (0..self.dst.len()).any(|i| self.is_in_place(i))
    }

    /// Prepare destination `index` for an in-place update: copy source `index` into it unless they alias.
    pub fn in_place(&mut self, index: usize) -> &mut Tensor {
        let src = self.src[index].0;
        let dst = self.dst[index].0;
        if src != dst {
            let (src, dst) = split_pair(self.tensors, src, dst);
            dst.copy_from(src);
        }
        &mut self.tensors[dst]
    }

    /// Run `f` with all sources and mutable access to destination `index`.
    ///
    /// If the destination aliases a source, `f` sees a copy of the original source content.
    pub fn compute<R>(&mut self, index: usize, f: impl FnOnce(&[&Tensor], &mut Tensor) -> R) -> R {
        let id = self.dst[index];
        let mut out = std::mem::take(&mut self.tensors[id.0]);
        let aliased = self.src.contains(&id).then(|| out.clone());

        let result = {
            let srcs = self
                .src
                .iter()
                .map(|&s| match &aliased {
                    Some(copy) if s == id => copy,
                    _ => &self.tensors[s.0],
                })
                .collect_vec();
            f(&srcs, &mut out)
        };

        self.tensors[id.0] = out;
        result
    }
}

fn split_pair<T>(items: &mut [T], read: usize, write: usize) -> (&T, &mut T) {
    assert_ne!(read, write);
    if read < write {
        let (left, right) = items.split_at_mut(write);
        (&left[read], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(read);
        (&right[0], &mut left[write])
    }
}
