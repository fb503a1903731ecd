//! Open tracking pixel.

/// A transparent 1x1 GIF.
pub const PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

pub fn pixel_url(base_url: &str, tracking_id: &str) -> String {
    format!("{}/api/track/{}", base_url.trim_end_matches('/'), tracking_id)
}

/// Add the open pixel for `tracking_id` just before `</body>`, or at the end when the
/// body is a fragment.
pub fn inject_open_pixel(html: &str, base_url: &str, tracking_id: &str) -> String {
    let pixel = format!(
        r#"<img src="{}" width="1" height="1" alt="" style="display:none" />"#,
        pixel_url(base_url, tracking_id)
    );

    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + pixel.len());
            out.push_str(&html[..at]);
            out.push_str(&pixel);
            out.push_str(&html[at..]);
            out
        }
        None => format!("{html}{pixel}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_goes_before_body_close() {
        let html = "<html><BODY><p>Hi</p></BODY></html>";
        let out = inject_open_pixel(html, "https://mail.example.com/", "tok123");
        assert!(out.starts_with("<html><BODY><p>Hi</p><img src=\"https://mail.example.com/api/track/tok123\""));
        assert!(out.ends_with("</BODY></html>"));
    }

    #[test]
    fn fragment_gets_pixel_appended() {
        let out = inject_open_pixel("<p>Hi</p>", "http://localhost:3030", "abc");
        assert!(out.starts_with("<p>Hi</p><img"));
        assert!(out.contains("http://localhost:3030/api/track/abc"));
    }

    #[test]
    fn gif_header() {
        assert_eq!(&PIXEL_GIF[..6], b"GIF89a");
    }
}
