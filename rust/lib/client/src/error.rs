//! Folding transport and storage failures into [`ApiError`].

use sipreciconts_core::ApiError;
use sipreciconts_kv::KVError;

/// A request that produced no usable response.
///
/// Connectivity failures and timeouts are `NETWORK_ERROR`. A body that
/// arrived but could not be decoded is a server fault.
pub fn from_transport(e: reqwest::Error) -> ApiError {
    if e.is_decode() {
        return ApiError::internal(format!("response body: {e}"));
    }
    if e.is_builder() {
        return ApiError::internal(format!("request: {e}"));
    }
    if e.is_timeout() {
        return ApiError::Network(format!("request timed out: {e}"));
    }
    ApiError::Network(e.to_string())
}

/// Client-side credential storage fault.
pub fn from_storage(e: KVError) -> ApiError {
    ApiError::internal(format!("credential storage: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipreciconts_core::ErrorCode;

    #[test]
    fn storage_faults_have_no_status() {
        let err = from_storage(KVError::Storage("disk full".into()));
        assert_eq!(err.code(), ErrorCode::ServerError);
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::get(format!("http://{addr}/")).await.unwrap_err();
        assert_eq!(from_transport(err).code(), ErrorCode::NetworkError);
    }
}
