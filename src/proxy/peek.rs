//! First-line peek parsing
//!
//! The proxy only needs the topic, and RTSP framing puts the request URI in
//! the first line. Anything that does not parse is handed off locally so the
//! RTSP server can produce its own error; the proxy never repairs a stream.

/// Extract the topic from the first request line of peeked bytes.
///
/// Accepts both absolute RTSP URLs (`ANNOUNCE rtsp://host:9191/cam1 RTSP/1.0`)
/// and absolute paths (`ANNOUNCE /cam1 RTSP/1.0`). Returns `None` when no
/// request line can be made out.
pub fn topic_from_request_line(peeked: &[u8]) -> Option<String> {
    if peeked.is_empty() {
        return None;
    }

    let first_line_end = peeked
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(peeked.len());
    let first_line = std::str::from_utf8(&peeked[..first_line_end]).ok()?.trim();

    let mut parts = first_line.splitn(3, ' ');
    let _method = parts.next()?;
    let target = parts.next()?;

    let path = if target.starts_with("rtsp://") {
        url::Url::parse(target).ok()?.path().to_string()
    } else {
        target.to_string()
    };

    let topic = path.strip_prefix('/').unwrap_or(&path);
    if topic.is_empty() {
        return None;
    }
    Some(topic.to_string())
}

/// Whether a name is a valid topic: one or more of `[A-Za-z0-9_-]`
pub fn is_valid_topic_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_url() {
        let peeked = b"ANNOUNCE rtsp://srv1:9191/cam1 RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        assert_eq!(topic_from_request_line(peeked).as_deref(), Some("cam1"));
    }

    #[test]
    fn test_absolute_path() {
        let peeked = b"DESCRIBE /lobby RTSP/1.0\r\n\r\n";
        assert_eq!(topic_from_request_line(peeked).as_deref(), Some("lobby"));
    }

    #[test]
    fn test_url_with_port_and_nested_path() {
        let peeked = b"SETUP rtsp://node-3:9192/cam1/trackID=0 RTSP/1.0\r\n\r\n";
        // nested paths come back whole; validation happens at the router
        assert_eq!(
            topic_from_request_line(peeked).as_deref(),
            Some("cam1/trackID=0")
        );
    }

    #[test]
    fn test_empty_and_garbage() {
        assert_eq!(topic_from_request_line(b""), None);
        assert_eq!(topic_from_request_line(b"\r\n\r\n"), None);
        assert_eq!(topic_from_request_line(b"NOTHING"), None);
        assert_eq!(topic_from_request_line(&[0xff, 0xfe, 0x20, 0x2f]), None);
    }

    #[test]
    fn test_root_path_has_no_topic() {
        assert_eq!(topic_from_request_line(b"OPTIONS / RTSP/1.0\r\n\r\n"), None);
        assert_eq!(
            topic_from_request_line(b"OPTIONS rtsp://srv1/ RTSP/1.0\r\n\r\n"),
            None
        );
    }

    #[test]
    fn test_valid_topic_names() {
        assert!(is_valid_topic_name("cam1"));
        assert!(is_valid_topic_name("front_door-2"));
        assert!(!is_valid_topic_name(""));
        assert!(!is_valid_topic_name("a/b"));
        assert!(!is_valid_topic_name("spaced name"));
        assert!(!is_valid_topic_name("ütf"));
    }
}
