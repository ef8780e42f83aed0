//! 压缩算法类型模块

use hyper::header::HeaderValue;

/// 压缩算法类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    /// 不压缩
    None,
    /// Gzip 压缩
    Gzip,
}

impl CompressionType {
    /// 获取 HTTP 头部值
    pub fn header_value(&self) -> &'static str {
        match self {
            Self::None => "identity",
            Self::Gzip => "gzip",
        }
    }

    /// 从 Accept-Encoding 头部选择压缩算法
    ///
    /// `gzip;q=0` 视为拒绝；`*` 视为接受 gzip。
    pub fn select_from_accept_encoding(accept_encoding: Option<&HeaderValue>) -> Self {
        let accept_encoding = match accept_encoding.and_then(|v| v.to_str().ok()) {
            Some(s) => s,
            None => return Self::None,
        };

        let mut wildcard = false;
        for part in accept_encoding.split(',') {
            let mut pieces = part.trim().split(';');
            let encoding = pieces.next().unwrap_or("").trim().to_ascii_lowercase();
            let rejected = pieces.any(|p| {
                let p = p.trim();
                p.strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .map(|q| q <= 0.0)
                    .unwrap_or(false)
            });

            match encoding.as_str() {
                "gzip" | "x-gzip" => return if rejected { Self::None } else { Self::Gzip },
                "*" if !rejected => wildcard = true,
                _ => {}
            }
        }

        if wildcard { Self::Gzip } else { Self::None }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.header_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(v: &str) -> CompressionType {
        CompressionType::select_from_accept_encoding(Some(&HeaderValue::from_str(v).unwrap()))
    }

    #[test]
    fn test_select_gzip() {
        assert_eq!(select("gzip, deflate, br"), CompressionType::Gzip);
        assert_eq!(select("br;q=1.0, gzip;q=0.8"), CompressionType::Gzip);
        assert_eq!(select("*"), CompressionType::Gzip);
    }

    #[test]
    fn test_select_none() {
        assert_eq!(select("br, deflate"), CompressionType::None);
        assert_eq!(select("gzip;q=0"), CompressionType::None);
        assert_eq!(select("identity"), CompressionType::None);
        assert_eq!(CompressionType::select_from_accept_encoding(None), CompressionType::None);
    }
}
