//! Creation-time configuration: every knob
//! a writer needs up front, validated eagerly so a bad combination
//! fails before any byte is allocated rather than mid-write.

use crate::io::Width;
use crate::{Error, Result};

/// Bundle of options a new container is created with. Offsets/lengths
/// default to 8 bytes (this crate never needs the smaller v0/v1
/// layouts it only reads); chunking and the filter pipeline are
/// opt-in per dataset via [`DatasetOptions`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub offset_size: u8,
    pub length_size: u8,
}

impl Default for CreateOptions {
    fn default() -> CreateOptions {
        CreateOptions { offset_size: 8, length_size: 8 }
    }
}

impl CreateOptions {
    pub fn validate(&self) -> Result<(Width, Width)> {
        let offset_width = Width::new(self.offset_size)?;
        let length_width = Width::new(self.length_size)?;
        Ok((offset_width, length_width))
    }
}

/// Per-dataset storage options: chunk shape and the filter pipeline
/// applied to each chunk. A dataset with `chunk_dims: None` is stored
/// contiguously and never filtered (filters require
/// chunked storage).
#[derive(Debug, Clone, Default)]
pub struct DatasetOptions {
    pub chunk_dims: Option<Vec<u32>>,
    pub compression: Option<u8>,
    pub shuffle: bool,
    pub fletcher32: bool,
}

impl DatasetOptions {
    pub fn contiguous() -> DatasetOptions {
        DatasetOptions::default()
    }

    pub fn chunked(chunk_dims: Vec<u32>) -> DatasetOptions {
        DatasetOptions { chunk_dims: Some(chunk_dims), ..DatasetOptions::default() }
    }

    pub fn with_compression(mut self, level: u8) -> DatasetOptions {
        self.compression = Some(level);
        self
    }

    pub fn with_shuffle(mut self) -> DatasetOptions {
        self.shuffle = true;
        self
    }

    pub fn with_fletcher32(mut self) -> DatasetOptions {
        self.fletcher32 = true;
        self
    }

    pub fn validate(&self, rank: usize) -> Result<()> {
        if let Some(chunk_dims) = &self.chunk_dims {
            if chunk_dims.is_empty() {
                return Err(Error::invalid("chunk_dims must not be empty"));
            }
            if chunk_dims.len() != rank {
                return Err(Error::invalid(format!(
                    "chunk_dims has rank {} but dataspace has rank {rank}",
                    chunk_dims.len()
                )));
            }
            if chunk_dims.iter().any(|d| *d == 0) {
                return Err(Error::invalid("chunk_dims entries must be nonzero"));
            }
        } else if self.compression.is_some() || self.shuffle || self.fletcher32 {
            return Err(Error::invalid("filters require chunked storage (set chunk_dims)"));
        }
        if let Some(level) = self.compression {
            if level > 9 {
                return Err(Error::invalid("compression level must be 0-9"));
            }
        }
        Ok(())
    }

    pub(crate) fn build_pipeline(&self, element_size: u32) -> crate::message::filter::FilterPipeline {
        use crate::message::filter::Filter;
        let mut filters = Vec::new();
        if self.shuffle {
            filters.push(Filter::Shuffle { element_size });
        }
        if let Some(level) = self.compression {
            filters.push(Filter::Deflate { level });
        }
        if self.fletcher32 {
            filters.push(Filter::Fletcher32);
        }
        crate::message::filter::FilterPipeline { filters }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_use_eight_byte_widths() {
        let (offset_width, length_width) = CreateOptions::default().validate().unwrap();
        assert_eq!(offset_width, Width::EIGHT);
        assert_eq!(length_width, Width::EIGHT);
    }

    #[test]
    fn contiguous_dataset_rejects_filters() {
        let opts = DatasetOptions::contiguous().with_shuffle();
        assert!(opts.validate(1).is_err());
    }

    #[test]
    fn chunked_dataset_rejects_rank_mismatch() {
        let opts = DatasetOptions::chunked(vec![4, 4]);
        assert!(opts.validate(1).is_err());
        assert!(opts.validate(2).is_ok());
    }

    #[test]
    fn rejects_out_of_range_compression_level() {
        let opts = DatasetOptions::chunked(vec![4]).with_compression(42);
        assert!(opts.validate(1).is_err());
    }
}
