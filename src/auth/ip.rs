//! Client IP extraction utilities.

use std::net::SocketAddr;

use axum::{extract::ConnectInfo, http::Request};

use crate::cli::IpExtractor;

/// Extract client IP address based on configuration.
///
/// If `ip_extractor` is set, extracts IP from the configured header and returns an error
/// if the header is missing or invalid (does NOT fall back to SocketAddr).
///
/// If `ip_extractor` is None, uses the SocketAddr from ConnectInfo.
pub fn extract_client_ip<B>(
    request: &Request<B>,
    ip_extractor: Option<&IpExtractor>,
) -> Result<String, &'static str> {
    match ip_extractor {
        Some(extractor) => {
            let header_value = request
                .headers()
                .get(extractor.header_name)
                .ok_or("IP header not present")?
                .to_str()
                .map_err(|_| "IP header contains invalid characters")?;
            extractor.extract(header_value)
        }
        None => request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .ok_or("No client IP available"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ClientIpHeader;
    use axum::body::Body;

    #[test]
    fn test_connect_info_used_without_extractor() {
        let mut request = Request::builder().body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 7], 4000))));

        assert_eq!(extract_client_ip(&request, None).unwrap(), "192.168.1.7");
    }

    #[test]
    fn test_missing_connect_info_is_error() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert!(extract_client_ip(&request, None).is_err());
    }

    #[test]
    fn test_header_used_when_configured() {
        let extractor = IpExtractor::from(ClientIpHeader::XForwardedFor);
        let mut request = Request::builder()
            .header("x-forwarded-for", "10.0.0.1, 172.16.0.1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 7], 4000))));

        assert_eq!(
            extract_client_ip(&request, Some(&extractor)).unwrap(),
            "10.0.0.1"
        );
    }

    #[test]
    fn test_no_fallback_when_header_missing() {
        let extractor = IpExtractor::from(ClientIpHeader::XRealIp);
        let mut request = Request::builder().body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 7], 4000))));

        assert!(extract_client_ip(&request, Some(&extractor)).is_err());
    }
}
