//! Fixed-size chunking of the image list. At most one batch of images is
//! resident at a time.

use crate::error::{Result, TaggerError};
use std::path::PathBuf;

pub const MAX_BATCH_SIZE: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchScheduler {
    size: usize,
}

impl BatchScheduler {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 || size > MAX_BATCH_SIZE {
            return Err(TaggerError::Validation(format!(
                "batch size must be within 1..={}, got {}",
                MAX_BATCH_SIZE, size
            )));
        }
        Ok(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn batch_count(&self, total: usize) -> usize {
        total.div_ceil(self.size)
    }

    pub fn batches<'a>(&self, paths: &'a [PathBuf]) -> std::slice::Chunks<'a, PathBuf> {
        paths.chunks(self.size)
    }
}
