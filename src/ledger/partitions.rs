/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `jobs`: job:{job_id} -> Job (JSON)
/// - `chunks`: chunk:{job_id}:{chunk_index:010} -> Chunk (JSON)
/// - `chunk_ids`: cid:{chunk_id} -> chunk key
/// - `chunk_status`: cs:{job_id}:{status}:{chunk_index:010} -> chunk_id
///
/// Zero-padded indexes keep prefix scans in `chunk_index` order.
use crate::jobs::ChunkStatus;

/// Encode a job key: job:{job_id}
pub fn encode_job_key(job_id: &str) -> Vec<u8> {
    format!("job:{}", job_id).into_bytes()
}

/// Encode a chunk key: chunk:{job_id}:{chunk_index:010}
pub fn encode_chunk_key(job_id: &str, chunk_index: u32) -> Vec<u8> {
    format!("chunk:{}:{:010}", job_id, chunk_index).into_bytes()
}

/// Encode a chunk prefix for range scan: chunk:{job_id}:
pub fn encode_chunk_prefix(job_id: &str) -> Vec<u8> {
    format!("chunk:{}:", job_id).into_bytes()
}

/// Encode a chunk id lookup key: cid:{chunk_id}
pub fn encode_chunk_id_key(chunk_id: &str) -> Vec<u8> {
    format!("cid:{}", chunk_id).into_bytes()
}

/// Encode a status index key: cs:{job_id}:{status}:{chunk_index:010}
pub fn encode_status_key(job_id: &str, status: ChunkStatus, chunk_index: u32) -> Vec<u8> {
    format!("cs:{}:{}:{:010}", job_id, status.as_str(), chunk_index).into_bytes()
}

/// Encode a status index prefix: cs:{job_id}:{status}:
pub fn encode_status_prefix(job_id: &str, status: ChunkStatus) -> Vec<u8> {
    format!("cs:{}:{}:", job_id, status.as_str()).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_encoding() {
        let key = encode_job_key("job_123");
        assert_eq!(key, b"job:job_123");
    }

    #[test]
    fn test_chunk_key_encoding() {
        let key = encode_chunk_key("job_123", 42);
        assert_eq!(key, b"chunk:job_123:0000000042");
    }

    #[test]
    fn test_chunk_keys_sort_by_index() {
        let a = encode_chunk_key("job", 9);
        let b = encode_chunk_key("job", 10);
        assert!(a < b);
        assert!(a.starts_with(&encode_chunk_prefix("job")));
    }

    #[test]
    fn test_status_key_encoding() {
        let key = encode_status_key("job_1", ChunkStatus::Pending, 3);
        assert_eq!(key, b"cs:job_1:pending:0000000003");
        assert!(key.starts_with(&encode_status_prefix("job_1", ChunkStatus::Pending)));
        assert!(!key.starts_with(&encode_status_prefix("job_1", ChunkStatus::Failed)));
    }

    #[test]
    fn test_chunk_id_key_encoding() {
        assert_eq!(encode_chunk_id_key("abc"), b"cid:abc");
    }
}
