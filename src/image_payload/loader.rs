//! # 加载与校验模块
//!
//! ## 设计思路
//!
//! 统一处理不同来源（Base64 / 本地文件 / URL）的原始字节加载，并在"尽可能早"的阶段执行输入校验。
//! 目标是尽快失败，减少不必要内存与 CPU 消耗。
//!
//! ## 实现思路
//!
//! - Base64：格式解析 + 解码前体积估算 + 签名校验。
//! - 文件：存在性 + metadata 体积限制 + 读取 + 签名校验。
//! - URL：协议 + 主机安全 + 手动跟随重定向 + 内容类型 + 体积校验 + 分块读取。
//! - 下载使用阻塞客户端，调用线程会被占用；重试只在 408 / 429 / 5xx 与连接类错误上发生。
//! - 网络错误统一映射到 `ImageError`，便于上层处理。

use base64::{Engine as _, engine::general_purpose};
use std::io::Read;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::source::RawImageData;
use super::{ImageError, ImageSlider, LoaderConfig};

const STREAM_SIGNATURE_PROBE_BYTES: usize = 4096;
const NETWORK_RETRY_MAX_ATTEMPTS: u8 = 3;
const NETWORK_RETRY_BASE_DELAY_MS: u64 = 180;
const READ_CHUNK_BYTES: usize = 16 * 1024;

impl ImageSlider {
    /// 从 Base64 字符串加载图片原始字节。
    pub(crate) fn load_from_base64(data: &str, config: &LoaderConfig) -> Result<RawImageData, ImageError> {
        log::debug!("📝 开始处理 base64 图片");

        let bytes = Self::parse_base64_with_limit(data, config.max_file_size)?;

        if bytes.len() as u64 > config.max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "Base64 解码后体积过大：{:.2} MB（限制：{:.2} MB）",
                bytes.len() as f64 / 1024.0 / 1024.0,
                config.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }
        Self::validate_image_signature(&bytes)?;

        Ok(RawImageData {
            bytes,
            source_hint: "base64",
        })
    }

    /// 从本地路径加载图片原始字节。
    pub(crate) fn load_from_file(path: &Path, config: &LoaderConfig) -> Result<RawImageData, ImageError> {
        log::debug!("📁 开始读取本地图片 - 路径: {}", path.display());

        if !path.exists() {
            return Err(ImageError::FileSystem(format!("文件不存在：{}", path.display())));
        }

        let metadata = std::fs::metadata(path)
            .map_err(|e| ImageError::FileSystem(format!("无法读取文件信息：{}", e)))?;

        if metadata.len() > config.max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "文件过大：{:.2} MB（限制：{:.2} MB）",
                metadata.len() as f64 / 1024.0 / 1024.0,
                config.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        let bytes = std::fs::read(path)
            .map_err(|e| ImageError::FileSystem(format!("无法读取图片文件：{}", e)))?;
        Self::validate_image_signature(&bytes)?;

        Ok(RawImageData {
            bytes,
            source_hint: "file",
        })
    }

    /// 下载 URL 指向的图片并返回校验过的字节。
    pub fn download(url: &str, config: &LoaderConfig) -> Result<Vec<u8>, ImageError> {
        log::info!("🌐 开始下载图片 - URL: {}", Self::redact_url_for_log(url));

        Self::validate_url_safety(url, config)?;
        let bytes = Self::download_with_validation(url, config)?;
        Self::validate_image_signature(&bytes)?;

        Ok(bytes)
    }

    fn download_with_validation(url: &str, config: &LoaderConfig) -> Result<Vec<u8>, ImageError> {
        let mut current_url = reqwest::Url::parse(url)
            .map_err(|e| ImageError::InvalidFormat(format!("URL 格式错误：{}", e)))?;

        for redirect_count in 0..=config.max_redirects {
            let request_clients = Self::build_request_clients_for_url(&current_url, config)?;
            let response = Self::send_with_retry(&request_clients, &current_url, config)?;

            if response.status().is_redirection() {
                if redirect_count >= config.max_redirects {
                    return Err(ImageError::Network(format!(
                        "重定向次数超过限制（{}）",
                        config.max_redirects
                    )));
                }

                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .ok_or_else(|| ImageError::Network("重定向响应缺少 Location 头".to_string()))?;

                let location_str = location
                    .to_str()
                    .map_err(|e| ImageError::InvalidFormat(format!("重定向地址无效：{}", e)))?;

                let next_url = current_url
                    .join(location_str)
                    .map_err(|e| ImageError::InvalidFormat(format!("重定向 URL 解析失败：{}", e)))?;

                Self::validate_url_safety(next_url.as_str(), config)?;

                log::debug!("↪️ 跳转到: {}", Self::redact_url_for_log(next_url.as_str()));
                current_url = next_url;
                continue;
            }

            if !response.status().is_success() {
                return Err(ImageError::Network(format!(
                    "HTTP {}: {}",
                    response.status().as_u16(),
                    Self::status_message(response.status().as_u16())
                )));
            }

            if let Some(ct) = response.headers().get(reqwest::header::CONTENT_TYPE) {
                if let Ok(ct_str) = ct.to_str() {
                    if !Self::is_image_content_type(ct_str) {
                        return Err(ImageError::InvalidFormat(format!("不是图片类型：{}", ct_str)));
                    }
                }
            }

            if let Some(size) = response.content_length() {
                if size > config.max_file_size {
                    return Err(ImageError::ResourceLimit(format!(
                        "文件过大：{:.2} MB（限制：{:.2} MB）",
                        size as f64 / 1024.0 / 1024.0,
                        config.max_file_size as f64 / 1024.0 / 1024.0
                    )));
                }
            }

            return Self::read_body_with_limit(response, current_url.as_str(), config);
        }

        Err(ImageError::Network("下载流程异常结束".to_string()))
    }

    fn send_with_retry(
        clients: &[reqwest::blocking::Client],
        url: &reqwest::Url,
        config: &LoaderConfig,
    ) -> Result<reqwest::blocking::Response, ImageError> {
        let referer = format!("{}://{}/", url.scheme(), url.host_str().unwrap_or(""));
        let mut attempt: u8 = 1;

        loop {
            let client_idx = (attempt.saturating_sub(1) as usize) % clients.len();
            let send_result = clients[client_idx]
                .get(url.clone())
                .header(reqwest::header::ACCEPT, "image/avif,image/webp,image/apng,image/*,*/*;q=0.8")
                .header(reqwest::header::REFERER, referer.as_str())
                .send();

            match send_result {
                Ok(resp) => {
                    if attempt < NETWORK_RETRY_MAX_ATTEMPTS && Self::is_retryable_http_status(resp.status()) {
                        let delay_ms = Self::compute_retry_delay_with_jitter(
                            attempt,
                            Self::retry_after_hint_ms(resp.headers()),
                        );

                        log::warn!(
                            "⚠️ HTTP {}（第 {}/{} 次，可重试）；{}ms 后重试",
                            resp.status().as_u16(),
                            attempt,
                            NETWORK_RETRY_MAX_ATTEMPTS,
                            delay_ms
                        );

                        std::thread::sleep(Duration::from_millis(delay_ms));
                        attempt = attempt.saturating_add(1);
                        continue;
                    }

                    return Ok(resp);
                }
                Err(err) => {
                    if attempt >= NETWORK_RETRY_MAX_ATTEMPTS || !Self::is_retryable_network_error(&err) {
                        return Err(Self::map_reqwest_error(err, url.as_str(), config));
                    }

                    let delay_ms = Self::compute_retry_delay_with_jitter(attempt, None);
                    let err_msg = Self::sanitize_error_message_with_redacted_url(&err.to_string(), url.as_str());
                    log::warn!(
                        "⚠️ 网络请求失败（第 {}/{} 次，可重试）：{}；{}ms 后重试",
                        attempt,
                        NETWORK_RETRY_MAX_ATTEMPTS,
                        err_msg,
                        delay_ms
                    );
                    std::thread::sleep(Duration::from_millis(delay_ms));
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// 分块读取响应体：超出体积上限立即失败，并尽早做签名探测。
    fn read_body_with_limit(
        mut response: reqwest::blocking::Response,
        url: &str,
        config: &LoaderConfig,
    ) -> Result<Vec<u8>, ImageError> {
        let initial_capacity = response
            .content_length()
            .map(|len| len.min(config.max_file_size) as usize)
            .filter(|len| *len > 0)
            .unwrap_or(READ_CHUNK_BYTES);
        let mut buffer = Vec::with_capacity(initial_capacity);
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        let mut signature_validated = false;

        loop {
            let read = response.read(&mut chunk).map_err(|e| {
                let msg = Self::sanitize_error_message_with_redacted_url(&e.to_string(), url);
                if e.kind() == std::io::ErrorKind::TimedOut {
                    ImageError::Timeout(format!("下载数据流读取超时：{}", msg))
                } else {
                    ImageError::Network(format!("下载失败：{}", msg))
                }
            })?;
            if read == 0 {
                break;
            }

            if (buffer.len() + read) as u64 > config.max_file_size {
                return Err(ImageError::ResourceLimit("下载后文件超过大小限制".to_string()));
            }
            buffer.extend_from_slice(&chunk[..read]);

            if !signature_validated {
                signature_validated =
                    Self::validate_stream_signature_probe(&buffer, STREAM_SIGNATURE_PROBE_BYTES)?;
            }
        }

        if !signature_validated {
            Self::validate_image_signature(&buffer)?;
        }

        log::debug!("✅ 下载完成 - {} bytes", buffer.len());
        Ok(buffer)
    }

    fn build_request_clients_for_url(
        url: &reqwest::Url,
        config: &LoaderConfig,
    ) -> Result<Vec<reqwest::blocking::Client>, ImageError> {
        if config.allow_private_network || !config.resolve_dns_for_url_safety {
            return Ok(vec![Self::build_base_http_client(config)?]);
        }

        let host = match url.host_str() {
            Some(host) => host,
            None => return Ok(vec![Self::build_base_http_client(config)?]),
        };

        if host.parse::<IpAddr>().is_ok() {
            return Ok(vec![Self::build_base_http_client(config)?]);
        }

        let port = url
            .port_or_known_default()
            .ok_or_else(|| ImageError::InvalidFormat("URL 缺少端口信息".to_string()))?;

        let pinned = Self::resolve_public_socket_addrs(host, port)?;
        if pinned.is_empty() {
            return Err(ImageError::InvalidFormat("URL 未解析到有效公网地址".to_string()));
        }

        let mut clients = Vec::with_capacity(pinned.len());
        for addr in pinned {
            let client = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(config.download_timeout))
                .connect_timeout(Duration::from_secs(config.connect_timeout))
                .redirect(reqwest::redirect::Policy::none())
                .resolve(host, addr)
                .build()
                .map_err(|e| ImageError::Network(format!("无法创建 DNS 绑定客户端：{}", e)))?;
            clients.push(client);
        }

        Ok(clients)
    }

    fn build_base_http_client(config: &LoaderConfig) -> Result<reqwest::blocking::Client, ImageError> {
        reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ImageError::Network(format!("无法创建 HTTP 客户端：{}", e)))
    }

    fn resolve_public_socket_addrs(host: &str, port: u16) -> Result<Vec<SocketAddr>, ImageError> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| ImageError::InvalidFormat(format!("URL 主机解析失败：{}", e)))?;

        let mut result = Vec::new();
        for addr in addrs {
            if Self::is_private_or_local_ip(addr.ip()) {
                return Err(ImageError::InvalidFormat(format!(
                    "URL 解析结果命中内网地址：{}",
                    addr.ip()
                )));
            }

            result.push(addr);
        }

        Ok(result)
    }

    fn retry_after_hint_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
        let value = headers.get(reqwest::header::RETRY_AFTER)?;
        let text = value.to_str().ok()?.trim();
        let secs = text.parse::<u64>().ok()?;
        Some(secs.saturating_mul(1000))
    }

    fn compute_retry_delay_with_jitter(attempt: u8, server_hint_ms: Option<u64>) -> u64 {
        let exp = NETWORK_RETRY_BASE_DELAY_MS.saturating_mul(1_u64 << (attempt.saturating_sub(1) as u32));
        let base = server_hint_ms.unwrap_or(exp);
        let jitter_bound = (base / 2).max(1);
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let jitter = seed % (jitter_bound + 1);
        base.saturating_add(jitter)
    }

    fn is_retryable_http_status(status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
    }

    fn is_image_content_type(content_type: &str) -> bool {
        content_type
            .split(';')
            .next()
            .map(|base| base.trim().to_ascii_lowercase().starts_with("image/"))
            .unwrap_or(false)
    }

    /// 是否为 `http://` / `https://` 开头的地址（大小写不敏感）。
    pub fn is_http_url_like(value: &str) -> bool {
        let lower = value.trim_start().to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    pub(crate) fn redact_url_for_log(url: &str) -> String {
        let Ok(parsed) = reqwest::Url::parse(url) else {
            return "<invalid-url>".to_string();
        };

        let host = parsed.host_str().unwrap_or("<unknown-host>");
        let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = parsed.path();

        format!("{}://{}{}{}", parsed.scheme(), host, port, path)
    }

    /// 校验 URL 安全性。
    ///
    /// 默认阻止本地/内网目标，防止 SSRF 风险。
    fn validate_url_safety(url: &str, config: &LoaderConfig) -> Result<(), ImageError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ImageError::InvalidFormat(format!("URL 格式错误：{}", e)))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ImageError::InvalidFormat("仅支持 HTTP/HTTPS".to_string()));
        }

        if config.allow_private_network {
            return Ok(());
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ImageError::InvalidFormat("URL 缺少主机地址".to_string()))?;

        if Self::is_local_hostname(host) {
            return Err(ImageError::InvalidFormat(format!("禁止访问本地网络地址：{}", host)));
        }

        let bare_host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare_host.parse::<IpAddr>() {
            if Self::is_private_or_local_ip(ip) {
                return Err(ImageError::InvalidFormat(format!("禁止访问内网 IP：{}", ip)));
            }

            return Ok(());
        }

        if config.resolve_dns_for_url_safety {
            let port = parsed
                .port_or_known_default()
                .ok_or_else(|| ImageError::InvalidFormat("URL 缺少端口信息".to_string()))?;

            if Self::resolve_public_socket_addrs(host, port)?.is_empty() {
                return Err(ImageError::InvalidFormat("URL 未解析到有效地址".to_string()));
            }
        }

        Ok(())
    }

    /// 判断主机名是否指向本地地址。
    fn is_local_hostname(host: &str) -> bool {
        host.eq_ignore_ascii_case("localhost") || host.eq_ignore_ascii_case("localhost.") || host.ends_with(".local")
    }

    /// 判断 IP 是否属于本地/内网/链路本地等受限范围。
    fn is_private_or_local_ip(ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                if v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_documentation()
                    || v4.is_unspecified()
                    || v4.is_multicast()
                {
                    return true;
                }

                let octets = v4.octets();
                octets[0] == 0 || (octets[0] == 100 && (octets[1] & 0b1100_0000) == 0b0100_0000)
            }
            IpAddr::V6(v6) => {
                v6.is_loopback()
                    || v6.is_unspecified()
                    || v6.is_unique_local()
                    || v6.is_unicast_link_local()
                    || v6.is_multicast()
            }
        }
    }

    fn estimate_base64_decoded_upper_bound_len(base64_data: &str) -> Result<u64, ImageError> {
        let len = base64_data.trim().len() as u64;
        let groups = len
            .checked_add(3)
            .ok_or_else(|| ImageError::ResourceLimit("Base64 输入长度溢出".to_string()))?
            / 4;

        groups
            .checked_mul(3)
            .ok_or_else(|| ImageError::ResourceLimit("Base64 解码体积估算溢出".to_string()))
    }

    /// 解析 Base64 输入（支持 Data URL / 纯 Base64），解码前按长度估算体积。
    pub(crate) fn parse_base64_with_limit(data: &str, max_file_size: u64) -> Result<Vec<u8>, ImageError> {
        let normalized = data.trim();

        let base64_data = if normalized.starts_with("data:") {
            let base64_start = normalized
                .find(";base64,")
                .ok_or_else(|| ImageError::InvalidFormat("缺少 base64 标记".to_string()))?;
            &normalized[base64_start + 8..]
        } else {
            normalized
        };

        let estimated_len = Self::estimate_base64_decoded_upper_bound_len(base64_data)?;
        if estimated_len > max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "Base64 预计解码体积过大：{:.2} MB（限制：{:.2} MB）",
                estimated_len as f64 / 1024.0 / 1024.0,
                max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        general_purpose::STANDARD
            .decode(base64_data)
            .map_err(|e| ImageError::Decode(format!("Base64 解码失败：{}", e)))
    }

    /// 统一映射 reqwest 错误到业务错误。
    fn map_reqwest_error(e: reqwest::Error, url: &str, config: &LoaderConfig) -> ImageError {
        let err_msg = Self::sanitize_error_message_with_redacted_url(&e.to_string(), url);

        if e.is_timeout() {
            ImageError::Timeout(format!("下载超时（{}秒）", config.download_timeout))
        } else if e.is_connect() {
            ImageError::Network(format!("无法连接：{}", err_msg))
        } else {
            ImageError::Network(format!("请求失败：{}", err_msg))
        }
    }

    fn sanitize_error_message_with_redacted_url(error_msg: &str, url: &str) -> String {
        let redacted = Self::redact_url_for_log(url);
        error_msg.replace(url, &redacted)
    }

    fn is_retryable_network_error(error: &reqwest::Error) -> bool {
        if error.is_timeout() || error.is_connect() {
            return true;
        }

        let msg = error.to_string().to_lowercase();
        msg.contains("connection reset")
            || msg.contains("connection closed before message completed")
            || msg.contains("peer closed connection")
    }

    /// 常见 HTTP 状态码本地化文案。
    fn status_message(code: u16) -> &'static str {
        match code {
            404 => "未找到",
            403 => "访问被拒绝",
            500..=599 => "服务器错误",
            _ => "请求失败",
        }
    }

    /// 通过文件签名（magic bytes）校验输入是否为图片。
    fn validate_image_signature(bytes: &[u8]) -> Result<(), ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::InvalidFormat("图片内容为空".to_string()));
        }

        let kind = infer::get(bytes).ok_or_else(|| ImageError::InvalidFormat("无法识别图片类型".to_string()))?;

        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(ImageError::InvalidFormat(format!(
                "文件签名不是图片类型：{}",
                kind.mime_type()
            )));
        }

        Ok(())
    }

    /// 下载阶段的签名探测：尽早识别并拒绝非图片内容。
    ///
    /// 返回值：
    /// - `Ok(true)`：已识别为图片，可视为完成签名校验
    /// - `Ok(false)`：当前字节不足以判断，继续下载
    /// - `Err(...)`：已识别为非图片，或达到探测上限仍无法识别
    fn validate_stream_signature_probe(bytes: &[u8], probe_limit: usize) -> Result<bool, ImageError> {
        if bytes.is_empty() {
            return Ok(false);
        }

        if let Some(kind) = infer::get(bytes) {
            if kind.matcher_type() != infer::MatcherType::Image {
                return Err(ImageError::InvalidFormat(format!(
                    "下载内容不是图片类型：{}",
                    kind.mime_type()
                )));
            }
            return Ok(true);
        }

        if bytes.len() >= probe_limit {
            return Err(ImageError::InvalidFormat(format!(
                "下载前 {} 字节内无法识别图片类型",
                probe_limit
            )));
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::io::{Cursor, Write};
    use std::net::TcpListener;
    use std::thread;

    fn tiny_png() -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(3, 2, Rgb([0, 128, 255])))
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("encode png");
        cursor.into_inner()
    }

    fn local_loader() -> LoaderConfig {
        LoaderConfig {
            allow_private_network: true,
            ..LoaderConfig::default()
        }
    }

    fn http_response(status: &str, headers: &str, body: &[u8]) -> Vec<u8> {
        let mut response = format!(
            "HTTP/1.1 {}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            headers,
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(body);
        response
    }

    /// 本地 HTTP 服务：第 i 个连接回放 `respond(port, i)` 的内容。
    fn scripted_server<F>(connections: usize, respond: F) -> (u16, thread::JoinHandle<()>)
    where
        F: Fn(u16, usize) -> Vec<u8> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();

        let server = thread::spawn(move || {
            for index in 0..connections {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut request = [0u8; 2048];
                let _ = stream.read(&mut request);
                // 客户端提前断开时写入会失败，忽略即可
                let _ = stream.write_all(&respond(port, index));
                let _ = stream.flush();
            }
        });

        (port, server)
    }

    #[test]
    fn relative_and_absolute_redirects_reach_the_image() {
        let png = tiny_png();
        let body = png.clone();
        let (port, server) = scripted_server(3, move |port, index| match index {
            0 => http_response("302 Found", "Location: /step/two\r\n", b""),
            1 => http_response(
                "301 Moved Permanently",
                &format!("Location: http://127.0.0.1:{}/final.png\r\n", port),
                b"",
            ),
            _ => http_response("200 OK", "Content-Type: image/png\r\n", &body),
        });

        let url = format!("http://127.0.0.1:{}/start?token=secret", port);
        let bytes = ImageSlider::download(&url, &local_loader()).expect("download");
        server.join().expect("server thread");

        assert_eq!(bytes, png);
    }

    #[test]
    fn redirect_budget_is_enforced() {
        let (port, server) = scripted_server(2, |_, _| http_response("302 Found", "Location: /again\r\n", b""));
        let config = LoaderConfig {
            max_redirects: 1,
            ..local_loader()
        };

        let result = ImageSlider::download(&format!("http://127.0.0.1:{}/loop", port), &config);
        server.join().expect("server thread");

        assert!(matches!(result, Err(ImageError::Network(_))));
    }

    #[test]
    fn service_unavailable_is_retried() {
        let png = tiny_png();
        let body = png.clone();
        let (port, server) = scripted_server(2, move |_, index| match index {
            0 => http_response("503 Service Unavailable", "Retry-After: 0\r\n", b""),
            _ => http_response("200 OK", "Content-Type: image/png\r\n", &body),
        });

        let bytes = ImageSlider::download(&format!("http://127.0.0.1:{}/busy.png", port), &local_loader())
            .expect("download after retry");
        server.join().expect("server thread");

        assert_eq!(bytes, png);
    }

    #[test]
    fn not_found_is_a_network_error() {
        let (port, server) = scripted_server(1, |_, _| http_response("404 Not Found", "", b""));

        let result = ImageSlider::download(&format!("http://127.0.0.1:{}/gone.png", port), &local_loader());
        server.join().expect("server thread");

        match result {
            Err(ImageError::Network(message)) => assert!(message.contains("404")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn html_pages_are_not_images() {
        let (port, server) = scripted_server(2, |_, index| match index {
            0 => http_response("200 OK", "Content-Type: text/html\r\n", b"<html></html>"),
            _ => http_response("200 OK", "Content-Type: image/png\r\n", b"<html>fake</html>"),
        });

        let by_header = ImageSlider::download(&format!("http://127.0.0.1:{}/page", port), &local_loader());
        let by_signature = ImageSlider::download(&format!("http://127.0.0.1:{}/fake.png", port), &local_loader());
        server.join().expect("server thread");

        assert!(matches!(by_header, Err(ImageError::InvalidFormat(_))));
        assert!(matches!(by_signature, Err(ImageError::InvalidFormat(_))));
    }

    #[test]
    fn body_over_limit_is_cut_off_while_streaming() {
        let mut body = tiny_png();
        body.extend(std::iter::repeat_n(0u8, 64 * 1024));
        let (port, server) = scripted_server(1, move |_, _| {
            // 不带 Content-Length，只能边读边判断
            let mut response = b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nConnection: close\r\n\r\n".to_vec();
            response.extend_from_slice(&body);
            response
        });
        let config = LoaderConfig {
            max_file_size: 1024,
            ..local_loader()
        };

        let result = ImageSlider::download(&format!("http://127.0.0.1:{}/big.png", port), &config);
        server.join().expect("server thread");

        assert!(matches!(result, Err(ImageError::ResourceLimit(_))));
    }

    #[test]
    fn redirect_into_loopback_is_checked_per_hop() {
        let (port, server) = scripted_server(1, |port, _| {
            http_response("302 Found", &format!("Location: http://localhost:{}/inner.png\r\n", port), b"")
        });
        let config = LoaderConfig {
            resolve_dns_for_url_safety: false,
            ..LoaderConfig::default()
        };

        // 首跳直接走下载流程，只校验跳转目标
        let result = ImageSlider::download_with_validation(&format!("http://127.0.0.1:{}/start.png", port), &config);
        server.join().expect("server thread");

        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[test]
    fn private_and_special_hosts_are_rejected() {
        let config = LoaderConfig {
            resolve_dns_for_url_safety: false,
            ..LoaderConfig::default()
        };

        for url in [
            "http://10.1.2.3/a.png",
            "http://169.254.169.254/latest/meta-data",
            "http://100.64.0.1/a.png",
            "http://0.0.0.0/a.png",
            "http://[::1]/a.png",
            "http://[fd00::1]/a.png",
            "http://printer.local/a.png",
            "https://LOCALHOST./a.png",
            "file:///etc/passwd",
        ] {
            assert!(
                matches!(ImageSlider::validate_url_safety(url, &config), Err(ImageError::InvalidFormat(_))),
                "{} should be rejected",
                url
            );
        }

        assert!(ImageSlider::validate_url_safety("http://93.184.216.34/a.png", &config).is_ok());
        assert!(ImageSlider::validate_url_safety("http://10.1.2.3/a.png", &local_loader()).is_ok());
    }

    #[test]
    fn base64_payloads_are_sniffed_and_bounded() {
        let png = tiny_png();
        let data_url = format!("data:image/png;base64,{}", general_purpose::STANDARD.encode(&png));

        let raw = ImageSlider::load_from_base64(&data_url, &LoaderConfig::default()).expect("png data url");
        assert_eq!(raw.bytes, png);
        assert_eq!(raw.source_hint, "base64");

        assert!(matches!(
            ImageSlider::load_from_base64("SGVsbG8=", &LoaderConfig::default()),
            Err(ImageError::InvalidFormat(_))
        ));
        assert!(matches!(
            ImageSlider::parse_base64_with_limit(&"A".repeat(4096), 100),
            Err(ImageError::ResourceLimit(_))
        ));
        assert!(matches!(
            ImageSlider::parse_base64_with_limit("data:image/png,not-base64", 100),
            Err(ImageError::InvalidFormat(_))
        ));
    }

    #[test]
    fn local_files_are_bounded_and_sniffed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let png_path = dir.path().join("ok.png");
        std::fs::write(&png_path, tiny_png()).expect("write png");
        let text_path = dir.path().join("notes.png");
        std::fs::write(&text_path, b"just text").expect("write text");

        assert_eq!(
            ImageSlider::load_from_file(&png_path, &LoaderConfig::default())
                .expect("load png")
                .source_hint,
            "file"
        );
        assert!(matches!(
            ImageSlider::load_from_file(&text_path, &LoaderConfig::default()),
            Err(ImageError::InvalidFormat(_))
        ));
        assert!(matches!(
            ImageSlider::load_from_file(&png_path, &LoaderConfig { max_file_size: 8, ..LoaderConfig::default() }),
            Err(ImageError::ResourceLimit(_))
        ));
        assert!(matches!(
            ImageSlider::load_from_file(&dir.path().join("missing.png"), &LoaderConfig::default()),
            Err(ImageError::FileSystem(_))
        ));
    }

    #[test]
    fn logged_urls_drop_credentials_and_query() {
        let url = "https://user:pw@example.com:8443/p/img.png?sig=abc#frag";

        assert_eq!(ImageSlider::redact_url_for_log(url), "https://example.com:8443/p/img.png");
        let message = ImageSlider::sanitize_error_message_with_redacted_url(&format!("error sending request for url ({})", url), url);
        assert!(!message.contains("sig=abc"));
        assert!(!message.contains("pw@"));
    }

    #[test]
    fn retry_delay_stays_within_jitter_bounds() {
        for (attempt, hint, low, high) in [(1, None, 180, 270), (2, None, 360, 540), (1, Some(1000), 1000, 1500)] {
            let delay = ImageSlider::compute_retry_delay_with_jitter(attempt, hint);
            assert!((low..=high).contains(&delay), "attempt {} delay {}", attempt, delay);
        }
        assert!(ImageSlider::is_retryable_http_status(reqwest::StatusCode::REQUEST_TIMEOUT));
        assert!(!ImageSlider::is_retryable_http_status(reqwest::StatusCode::NOT_FOUND));
    }
}
