use url::Url;

/// Media container category inferred from a URL.
///
/// Manifest-described adaptive formats (DASH, HLS, SmoothStreaming) cannot
/// be served through the byte-range cache proxy; only `Progressive` URLs
/// are eligible for playback here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Dash,
    Hls,
    SmoothStreaming,
    Progressive,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Dash => "DASH",
            ContentType::Hls => "HLS",
            ContentType::SmoothStreaming => "SmoothStreaming",
            ContentType::Progressive => "Progressive",
        }
    }
}

/// Infer the content type from the URL's last path segment. The query
/// string and fragment are ignored.
pub fn infer_content_type(url: &str) -> ContentType {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        // Not an absolute URL; fall back to the raw string minus any query.
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .to_ascii_lowercase(),
    };

    if path.ends_with(".mpd") {
        ContentType::Dash
    } else if path.ends_with(".m3u8") {
        ContentType::Hls
    } else if path.ends_with(".ism") || path.ends_with(".isml") || path.contains(".ism/") {
        ContentType::SmoothStreaming
    } else {
        ContentType::Progressive
    }
}

/// A progressive media source: a single contiguous resource reachable at
/// `uri`, to be fetched with `user_agent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    pub uri: String,
    pub user_agent: String,
}

impl MediaSource {
    pub fn new(uri: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            user_agent: user_agent.into(),
        }
    }
}
