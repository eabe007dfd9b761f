use engine_core::{
    error::{SourceError, StagingError, WarehouseError},
    retry::RetryDisposition,
};

pub fn classify_source_error(err: &SourceError) -> RetryDisposition {
    match err {
        SourceError::Throttled {
            retry_after: Some(hint),
        } => RetryDisposition::RetryAfter(*hint),
        SourceError::Throttled { retry_after: None } => RetryDisposition::Retry,
        SourceError::Server { .. } => RetryDisposition::Retry,
        SourceError::Timeout => RetryDisposition::Retry,
        SourceError::Network(_) => RetryDisposition::Retry,
        SourceError::NotReady { .. } => RetryDisposition::Retry,
        SourceError::Auth { .. } => RetryDisposition::Stop,
        SourceError::BadRequest { .. } => RetryDisposition::Stop,
        SourceError::UnsupportedVersion(_) => RetryDisposition::Stop,
        SourceError::Decode(_) => RetryDisposition::Stop,
        SourceError::Credential(_) => RetryDisposition::Stop,
    }
}

pub fn classify_warehouse_error(err: &WarehouseError) -> RetryDisposition {
    match err {
        WarehouseError::Unavailable(_) => RetryDisposition::Retry,
        WarehouseError::Rejected(_) => RetryDisposition::Stop,
        WarehouseError::Schema(_) => RetryDisposition::Stop,
    }
}

pub fn classify_staging_error(err: &StagingError) -> RetryDisposition {
    match err {
        StagingError::Unavailable(_) | StagingError::Io(_) => RetryDisposition::Retry,
        StagingError::AlreadyExists(_) => RetryDisposition::Stop,
        StagingError::NotFound(_) => RetryDisposition::Stop,
        StagingError::InvalidPath(_) => RetryDisposition::Stop,
        StagingError::Encode(_) => RetryDisposition::Stop,
    }
}
