use std::fmt::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use qrcode::{QrCode, types::Color};

use crate::state::PairingChallenge;

const SCALE: usize = 8;
const MARGIN: usize = 4;

pub(crate) fn render_challenge(raw: &str) -> Option<PairingChallenge> {
    let svg = render_svg(raw)?;
    Some(PairingChallenge {
        raw: raw.to_string(),
        data_url: format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg)),
    })
}

fn render_svg(data: &str) -> Option<String> {
    let code = QrCode::new(data).ok()?;
    let width = code.width();
    let size = (width + MARGIN * 2) * SCALE;

    if size == 0 {
        return None;
    }

    let mut svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{size}" height="{size}" viewBox="0 0 {size} {size}" shape-rendering="crispEdges"><rect width="{size}" height="{size}" fill="#fff"/><path fill="#000" d=""##
    );

    for y in 0..width {
        for x in 0..width {
            if code[(x, y)] != Color::Dark {
                continue;
            }
            let px = (x + MARGIN) * SCALE;
            let py = (y + MARGIN) * SCALE;
            let _ = write!(svg, "M{px} {py}h{SCALE}v{SCALE}h-{SCALE}z");
        }
    }

    svg.push_str(r#""/></svg>"#);
    Some(svg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_is_svg_data_url() {
        let challenge = render_challenge("2@Xyz123,abc,def==").unwrap();
        assert_eq!(challenge.raw, "2@Xyz123,abc,def==");

        let encoded = challenge
            .data_url
            .strip_prefix("data:image/svg+xml;base64,")
            .unwrap();
        let svg = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("M32 32h8v8h-8z"));
    }
}
