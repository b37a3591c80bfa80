use thiserror::Error;

use super::models::CreateJobRequest;
use crate::jobs::MAX_PRIORITY;

const MAX_KEYWORDS: usize = 50;
const MAX_KEYWORD_LEN: usize = 256;
const MAX_PROJECT_ID_LEN: usize = 128;
const MAX_IMAGES_LIMIT: u32 = 1_000_000;

#[derive(Debug, Error)]
pub enum JobRequestError {
    #[error("keywords must contain between 1 and {MAX_KEYWORDS} non-empty entries")]
    InvalidKeywordCount,
    #[error("keyword '{0}' exceeds {MAX_KEYWORD_LEN} characters")]
    KeywordTooLong(String),
    #[error("project_id must be 1 to {MAX_PROJECT_ID_LEN} characters")]
    InvalidProjectId,
    #[error("max_images must not exceed {MAX_IMAGES_LIMIT}")]
    TooManyImages,
    #[error("priority must be between 0 and {MAX_PRIORITY}")]
    InvalidPriority,
}

pub fn validate_create_job(request: &CreateJobRequest) -> Result<(), JobRequestError> {
    let project_id = request.project_id.trim();
    if project_id.is_empty() || project_id.len() > MAX_PROJECT_ID_LEN {
        return Err(JobRequestError::InvalidProjectId);
    }

    let keywords: Vec<&str> = request
        .keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    if !(1..=MAX_KEYWORDS).contains(&keywords.len()) {
        return Err(JobRequestError::InvalidKeywordCount);
    }
    if let Some(long) = keywords.iter().find(|k| k.chars().count() > MAX_KEYWORD_LEN) {
        return Err(JobRequestError::KeywordTooLong(long.to_string()));
    }

    if request.max_images > MAX_IMAGES_LIMIT {
        return Err(JobRequestError::TooManyImages);
    }

    if request.priority.is_some_and(|p| p > MAX_PRIORITY) {
        return Err(JobRequestError::InvalidPriority);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> CreateJobRequest {
        CreateJobRequest {
            project_id: "wildlife".to_string(),
            keywords: vec!["red panda".to_string()],
            max_images: 100,
            priority: Some(5),
        }
    }

    #[test]
    fn validate_accepts_valid_request() {
        assert!(validate_create_job(&sample_request()).is_ok());
    }

    #[test]
    fn validate_rejects_blank_keywords() {
        let mut request = sample_request();
        request.keywords = vec!["".to_string(), "   ".to_string()];
        assert!(matches!(
            validate_create_job(&request),
            Err(JobRequestError::InvalidKeywordCount)
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_priority() {
        let mut request = sample_request();
        request.priority = Some(11);
        assert!(matches!(
            validate_create_job(&request),
            Err(JobRequestError::InvalidPriority)
        ));
    }

    #[test]
    fn validate_limits_sizes() {
        let mut request = sample_request();
        request.max_images = MAX_IMAGES_LIMIT + 1;
        assert!(matches!(
            validate_create_job(&request),
            Err(JobRequestError::TooManyImages)
        ));

        let mut request = sample_request();
        request.keywords = vec!["x".repeat(MAX_KEYWORD_LEN + 1)];
        assert!(matches!(
            validate_create_job(&request),
            Err(JobRequestError::KeywordTooLong(_))
        ));

        let mut request = sample_request();
        request.project_id = " ".to_string();
        assert!(matches!(
            validate_create_job(&request),
            Err(JobRequestError::InvalidProjectId)
        ));
    }

    #[test]
    fn validate_allows_zero_images() {
        let mut request = sample_request();
        request.max_images = 0;
        assert!(validate_create_job(&request).is_ok());
    }
}
