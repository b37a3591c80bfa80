//! Splits a job's target count into contiguous chunk ranges.

use chrono::Utc;
use uuid::Uuid;

use super::models::{Chunk, ChunkStatus, ImageRange};

/// Highest priority a chunk may carry
pub const MAX_PRIORITY: u8 = 10;

/// Number of chunks needed to cover `max_images` with chunks of `chunk_size`
pub fn chunk_count(max_images: u32, chunk_size: u32) -> u32 {
    if chunk_size == 0 {
        return 0;
    }
    max_images.div_ceil(chunk_size)
}

/// Contiguous, non-overlapping ranges covering `[0, max_images)`; the last
/// one may be shorter than `chunk_size`.
pub fn image_ranges(max_images: u32, chunk_size: u32) -> Vec<ImageRange> {
    (0..chunk_count(max_images, chunk_size))
        .map(|index| {
            let start = index * chunk_size;
            let end = start.saturating_add(chunk_size).min(max_images);
            ImageRange::new(start, end)
        })
        .collect()
}

/// Builds chunk records for a freshly created job
#[derive(Debug, Clone, Copy)]
pub struct JobPartitioner {
    chunk_size: u32,
    default_priority: u8,
}

impl JobPartitioner {
    pub fn new(chunk_size: u32, default_priority: u8) -> Self {
        Self {
            chunk_size,
            default_priority: default_priority.min(MAX_PRIORITY),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Produce every chunk of the job in `chunk_index` order.
    ///
    /// `max_images == 0` yields no chunks.
    pub fn partition(&self, job_id: &str, max_images: u32, priority: Option<u8>) -> Vec<Chunk> {
        let priority = priority.unwrap_or(self.default_priority).min(MAX_PRIORITY);
        let now = Utc::now();

        image_ranges(max_images, self.chunk_size)
            .into_iter()
            .enumerate()
            .map(|(index, image_range)| Chunk {
                chunk_id: Uuid::now_v7().to_string(),
                job_id: job_id.to_string(),
                chunk_index: index as u32,
                status: ChunkStatus::Pending,
                priority,
                image_range,
                error_message: None,
                retry_count: 0,
                task_id: None,
                created_at: now,
                updated_at: now,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(ranges: &[ImageRange], max_images: u32) {
        let mut expected_start = 0;
        for range in ranges {
            assert_eq!(range.start, expected_start, "gap or overlap at {:?}", range);
            assert!(range.end > range.start);
            expected_start = range.end;
        }
        assert_eq!(expected_start, max_images);
        let total: u32 = ranges.iter().map(ImageRange::len).sum();
        assert_eq!(total, max_images);
    }

    #[test]
    fn test_hundred_images_in_chunks_of_forty() {
        let ranges = image_ranges(100, 40);
        assert_eq!(
            ranges,
            vec![
                ImageRange::new(0, 40),
                ImageRange::new(40, 80),
                ImageRange::new(80, 100)
            ]
        );
    }

    #[test]
    fn test_coverage_for_many_sizes() {
        for max_images in [1, 2, 7, 39, 40, 41, 99, 100, 101, 1000, 1234] {
            for chunk_size in [1, 3, 10, 40, 100, 5000] {
                let ranges = image_ranges(max_images, chunk_size);
                assert_eq!(ranges.len() as u32, chunk_count(max_images, chunk_size));
                assert_covers(&ranges, max_images);
            }
        }
    }

    #[test]
    fn test_small_job_is_single_chunk() {
        let ranges = image_ranges(25, 100);
        assert_eq!(ranges, vec![ImageRange::new(0, 25)]);
    }

    #[test]
    fn test_zero_images_yields_no_chunks() {
        assert!(image_ranges(0, 40).is_empty());
        let partitioner = JobPartitioner::new(40, 5);
        assert!(partitioner.partition("job", 0, None).is_empty());
    }

    #[test]
    fn test_partition_assigns_indexes_and_priority() {
        let partitioner = JobPartitioner::new(40, 5);
        let chunks = partitioner.partition("job-1", 100, None);

        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
            assert_eq!(chunk.job_id, "job-1");
            assert_eq!(chunk.priority, 5);
            assert_eq!(chunk.status, ChunkStatus::Pending);
            assert_eq!(chunk.retry_count, 0);
        }
        assert_eq!(chunks[2].quota(), 20);
    }

    #[test]
    fn test_priority_is_clamped() {
        let partitioner = JobPartitioner::new(10, 42);
        let chunks = partitioner.partition("job", 10, None);
        assert_eq!(chunks[0].priority, MAX_PRIORITY);

        let chunks = partitioner.partition("job", 10, Some(2));
        assert_eq!(chunks[0].priority, 2);
    }
}
