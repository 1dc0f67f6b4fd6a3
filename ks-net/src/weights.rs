use std::io::{ErrorKind, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use ndarray::{ArrayD, IxDyn};

use crate::result::{NetworkError, NetworkResult, Node};
use crate::tensor::checked_size;

/// The number of values read at once.
const CHUNK_SIZE: usize = 1 << 16;

/// Sequential reader over a little-endian f32 weight stream.
///
/// Every node reads its slices in declaration order, there is no index or header.
pub struct WeightReader<'r> {
    inner: &'r mut dyn Read,
    consumed: usize,
}

impl<'r> WeightReader<'r> {
    pub fn new(inner: &'r mut dyn Read) -> Self {
        WeightReader { inner, consumed: 0 }
    }

    /// Read weight slice `index` of `node` with the given shape.
    ///
    /// The slice is read in bounded chunks, so a short stream fails before a large declared shape is allocated.
    pub fn read(&mut self, node: &Node, index: usize, shape: &[usize]) -> NetworkResult<ArrayD<f32>> {
        let size = checked_size(shape).map_err(|_| {
            NetworkError::InvalidParam(node.clone(), format!("weight {} shape {:?} is too large", index, shape))
        })?;

        let mut data = Vec::with_capacity(size.min(CHUNK_SIZE));
        while data.len() < size {
            let start = data.len();
            data.resize(start + (size - start).min(CHUNK_SIZE), 0.0);
            self.inner
                .read_f32_into::<LittleEndian>(&mut data[start..])
                .map_err(|e| match e.kind() {
                    ErrorKind::UnexpectedEof => NetworkError::WeightsExhausted(node.clone(), index),
                    _ => NetworkError::InvalidParam(node.clone(), format!("failed to read weight {}: {}", index, e)),
                })?;
        }
        self.consumed += data.len();

        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| NetworkError::InvalidParam(node.clone(), format!("weight {}: {}", index, e)))
    }

    /// The number of f32 values read so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Count the bytes left in the stream, consuming them.
    pub fn remaining_bytes(&mut self) -> usize {
        let mut count = 0;
        let mut buffer = [0; 1024];
        loop {
            match self.inner.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => count += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        count
    }
}

impl std::fmt::Debug for WeightReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightReader").field("consumed", &self.consumed).finish()
    }
}
