//! 客户端 IP 提取
//!
//! - 默认使用 TCP 对端地址
//! - 对端属于 trusted_proxies（IP 或 CIDR）时使用 X-Forwarded-For 第一跳

use std::net::{IpAddr, SocketAddr};

use actix_web::HttpRequest;
use actix_web::http::header::HeaderMap;
use tracing::debug;

/// 检查 IP 是否在可信代理列表中
pub fn is_trusted_proxy(ip: &str, trusted_proxies: &[String]) -> bool {
    // 先尝试解析为 SocketAddr（支持 ip:port），如果失败再尝试纯 IpAddr
    let ip_addr = if let Ok(socket_addr) = ip.parse::<SocketAddr>() {
        socket_addr.ip()
    } else if let Ok(ip_addr) = ip.parse::<IpAddr>() {
        ip_addr
    } else {
        return false;
    };

    trusted_proxies.iter().any(|proxy| {
        if proxy.contains('/') {
            ip_in_cidr(&ip_addr, proxy)
        } else {
            proxy
                .parse::<IpAddr>()
                .is_ok_and(|proxy_addr| proxy_addr == ip_addr)
        }
    })
}

/// CIDR 检查
pub fn ip_in_cidr(ip: &IpAddr, cidr: &str) -> bool {
    let Some((network, prefix_len)) = cidr.split_once('/') else {
        return false;
    };

    let Ok(prefix_len): Result<u8, _> = prefix_len.parse() else {
        return false;
    };

    let Ok(network_addr) = network.parse::<IpAddr>() else {
        return false;
    };

    match (ip, network_addr) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            if prefix_len > 32 {
                return false;
            }
            let mask = u32::MAX.checked_shl(32 - prefix_len as u32).unwrap_or(0);
            let ip_bits = u32::from_be_bytes(ip.octets());
            let net_bits = u32::from_be_bytes(net.octets());
            (ip_bits & mask) == (net_bits & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            if prefix_len > 128 {
                return false;
            }
            let mask = u128::MAX.checked_shl(128 - prefix_len as u32).unwrap_or(0);
            let ip_bits = u128::from_be_bytes(ip.octets());
            let net_bits = u128::from_be_bytes(net.octets());
            (ip_bits & mask) == (net_bits & mask)
        }
        _ => false,
    }
}

/// 根据对端地址和请求头解析调用方 IP
pub fn resolve_client_ip(
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    trusted_proxies: &[String],
) -> Option<String> {
    let peer_ip = peer?.ip().to_string();

    if !trusted_proxies.is_empty() && is_trusted_proxy(&peer_ip, trusted_proxies) {
        if let Some(forwarded) = forwarded_ip_from_headers(headers) {
            debug!("Trusted proxy {} -> {}", peer_ip, forwarded);
            return Some(forwarded);
        }
    }

    Some(peer_ip)
}

/// 从 HttpRequest 提取调用方 IP
pub fn extract_client_ip(req: &HttpRequest, trusted_proxies: &[String]) -> Option<String> {
    resolve_client_ip(req.peer_addr(), req.headers(), trusted_proxies)
}

/// 从请求头提取转发的 IP（X-Forwarded-For 第一跳，其次 X-Real-IP）
pub fn forwarded_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};

    fn headers_with(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
        headers
    }

    #[test]
    fn test_ip_in_cidr_ipv4() {
        let ip: IpAddr = "192.168.1.100".parse().unwrap();
        assert!(ip_in_cidr(&ip, "192.168.1.0/24"));
        assert!(ip_in_cidr(&ip, "192.168.0.0/16"));
        assert!(!ip_in_cidr(&ip, "192.168.2.0/24"));
        assert!(!ip_in_cidr(&ip, "10.0.0.0/8"));
        assert!(!ip_in_cidr(&ip, "10.0.0.0/40"));
    }

    #[test]
    fn test_ip_in_cidr_ipv6() {
        let ip: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(ip_in_cidr(&ip, "2001:db8::/32"));
        assert!(!ip_in_cidr(&ip, "2001:db9::/32"));
        assert!(!ip_in_cidr(&ip, "10.0.0.0/8"));
    }

    #[test]
    fn test_is_trusted_proxy() {
        let proxies = vec![
            "127.0.0.1".to_string(),
            "192.168.1.0/24".to_string(),
            "10.0.0.1".to_string(),
        ];

        assert!(is_trusted_proxy("127.0.0.1", &proxies));
        assert!(is_trusted_proxy("127.0.0.1:8080", &proxies));
        assert!(is_trusted_proxy("192.168.1.50", &proxies));
        assert!(!is_trusted_proxy("8.8.8.8", &proxies));
        assert!(!is_trusted_proxy("not-an-ip", &proxies));
    }

    #[test]
    fn test_peer_used_without_trusted_proxies() {
        let headers = headers_with("x-forwarded-for", "1.2.3.4");
        let peer: SocketAddr = "10.0.0.5:4000".parse().unwrap();
        assert_eq!(
            resolve_client_ip(Some(peer), &headers, &[]),
            Some("10.0.0.5".to_string())
        );
    }

    #[test]
    fn test_forwarded_used_for_trusted_proxy() {
        let headers = headers_with("x-forwarded-for", "1.2.3.4, 10.0.0.5");
        let peer: SocketAddr = "10.0.0.5:4000".parse().unwrap();
        let proxies = vec!["10.0.0.0/8".to_string()];
        assert_eq!(
            resolve_client_ip(Some(peer), &headers, &proxies),
            Some("1.2.3.4".to_string())
        );
    }

    #[test]
    fn test_forwarded_ignored_for_untrusted_peer() {
        let headers = headers_with("x-forwarded-for", "1.2.3.4");
        let peer: SocketAddr = "8.8.8.8:4000".parse().unwrap();
        let proxies = vec!["10.0.0.0/8".to_string()];
        assert_eq!(
            resolve_client_ip(Some(peer), &headers, &proxies),
            Some("8.8.8.8".to_string())
        );
    }

    #[test]
    fn test_x_real_ip_fallback() {
        let headers = headers_with("x-real-ip", "5.6.7.8");
        assert_eq!(forwarded_ip_from_headers(&headers), Some("5.6.7.8".to_string()));
    }
}
