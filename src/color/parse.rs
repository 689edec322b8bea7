//! Parsing of `!COLOUR` definitions and direct color values.

use super::{ColorDefinition, Finish, GrainMaterial};
use crate::types::ColorCode;

/// Hex digits of a direct color value, if it has a hex prefix.
///
/// `#RRGGBB[AA]` is the usual form, `0x2RRGGBB` is the legacy direct color
/// form and a bare `0x` comes from packed integers.
pub fn hex_digits(value: &str) -> Option<&str> {
    if let Some(rest) = value.strip_prefix('#') {
        return Some(rest);
    }
    let lower = value.get(..3).map(str::to_ascii_lowercase);
    if lower.as_deref() == Some("0x2") {
        return value.get(3..);
    }
    if value.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("0x")) {
        return value.get(2..);
    }
    None
}

/// RGB plus optional alpha from six or eight hex digits.
pub fn parse_hex_digits(digits: &str) -> Option<([u8; 3], Option<u8>)> {
    if !(digits.len() == 6 || digits.len() == 8) || !digits.is_ascii() {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    let rgb = [byte(0)?, byte(2)?, byte(4)?];
    let alpha = if digits.len() == 8 { Some(byte(6)?) } else { None };
    Some((rgb, alpha))
}

/// Parse a direct color value such as `#1B2A34` or `0x21B2A34`.
pub fn parse_color_value(value: &str) -> Option<([u8; 3], Option<u8>)> {
    parse_hex_digits(hex_digits(value)?)
}

pub fn format_hex(rgb: [u8; 3]) -> String {
    format!("#{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2])
}

fn find_tag(lower: &[String], tag: &str) -> Option<usize> {
    lower.iter().position(|t| t == tag)
}

fn tag_value<'a>(tokens: &[&'a str], lower: &[String], tag: &str) -> Option<&'a str> {
    find_tag(lower, tag).and_then(|i| tokens.get(i + 1).copied())
}

fn parse_number<T: std::str::FromStr>(raw: Option<&str>, tag: &str) -> Result<Option<T>, String> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| format!("invalid {} value '{}'", tag, raw)),
    }
}

/// Parse the arguments of a `0 !COLOUR` line (everything after the keyword).
///
/// Tags are case-insensitive. `CODE`, `VALUE` and `EDGE` are required.
pub fn parse_colour(args: &[&str]) -> Result<ColorDefinition, String> {
    let name = args.first().ok_or("missing colour name")?;
    let tokens = &args[1..];
    let lower: Vec<String> = tokens.iter().map(|t| t.to_ascii_lowercase()).collect();

    // material parameters must not shadow the main VALUE/ALPHA
    let material_at = find_tag(&lower, "material").unwrap_or(lower.len());
    let (main_tokens, main_lower) = (&tokens[..material_at], &lower[..material_at]);

    let code = tag_value(main_tokens, main_lower, "code").ok_or("missing CODE")?;
    let value = tag_value(main_tokens, main_lower, "value").ok_or("missing VALUE")?;
    let edge = tag_value(main_tokens, main_lower, "edge").ok_or("missing EDGE")?;

    let (rgb, hex_alpha) =
        parse_color_value(value).ok_or_else(|| format!("invalid VALUE '{}'", value))?;
    // EDGE may name another color code instead of a value
    let edge_rgb = parse_color_value(edge).map(|(rgb, _)| rgb);

    let alpha = parse_number::<u8>(tag_value(main_tokens, main_lower, "alpha"), "ALPHA")?
        .or(hex_alpha)
        .unwrap_or(255);
    let luminance =
        parse_number::<f32>(tag_value(main_tokens, main_lower, "luminance"), "LUMINANCE")?
            .unwrap_or(0.0);

    let mut finish = [
        ("chrome", Finish::Chrome),
        ("pearlescent", Finish::Pearlescent),
        ("rubber", Finish::Rubber),
        ("matte_metallic", Finish::MatteMetallic),
        ("metal", Finish::Metal),
    ]
    .into_iter()
    .find(|(tag, _)| main_lower.iter().any(|t| t == tag))
    .map(|(_, finish)| finish);

    if material_at < tokens.len() {
        finish = Some(parse_material(&tokens[material_at + 1..], &lower[material_at + 1..])?);
    }

    Ok(ColorDefinition {
        code: ColorCode::new(code),
        name: Some(name.to_string()),
        rgb,
        alpha,
        edge: edge_rgb.unwrap_or([0x33, 0x33, 0x33]),
        edge_code: if edge_rgb.is_none() {
            Some(ColorCode::new(edge))
        } else {
            None
        },
        luminance,
        finish,
        blend_source: None,
        is_fallback: false,
    })
}

fn parse_material(tokens: &[&str], lower: &[String]) -> Result<Finish, String> {
    let kind = lower.first().ok_or("missing MATERIAL kind")?;
    if kind == "fabric" {
        let fabric = tokens.get(1).map(|s| s.to_ascii_lowercase()).unwrap_or_default();
        return Ok(Finish::Fabric { kind: fabric });
    }

    let value = tag_value(tokens, lower, "value").unwrap_or("#000000");
    let (rgb, hex_alpha) =
        parse_color_value(value).ok_or_else(|| format!("invalid material VALUE '{}'", value))?;
    let size = parse_number::<f32>(tag_value(tokens, lower, "size"), "SIZE")?;
    let grain = GrainMaterial {
        rgb,
        alpha: parse_number::<u8>(tag_value(tokens, lower, "alpha"), "ALPHA")?
            .or(hex_alpha)
            .unwrap_or(255),
        luminance: parse_number::<f32>(tag_value(tokens, lower, "luminance"), "LUMINANCE")?
            .unwrap_or(0.0),
        fraction: parse_number::<f32>(tag_value(tokens, lower, "fraction"), "FRACTION")?
            .unwrap_or(0.0),
        vfraction: parse_number::<f32>(tag_value(tokens, lower, "vfraction"), "VFRACTION")?
            .unwrap_or(0.0),
        min_size: parse_number::<f32>(tag_value(tokens, lower, "minsize"), "MINSIZE")?
            .or(size)
            .unwrap_or(0.0),
        max_size: parse_number::<f32>(tag_value(tokens, lower, "maxsize"), "MAXSIZE")?
            .or(size)
            .unwrap_or(0.0),
    };

    match kind.as_str() {
        "glitter" => Ok(Finish::Glitter(grain)),
        "speckle" => Ok(Finish::Speckle(grain)),
        other => Err(format!("unknown MATERIAL '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(line: &str) -> Vec<&str> {
        line.split_whitespace().collect()
    }

    #[test]
    fn test_hex_prefixes() {
        assert_eq!(hex_digits("#efefef"), Some("efefef"));
        assert_eq!(hex_digits("0x2062E92"), Some("062E92"));
        assert_eq!(hex_digits("0XFFFFFFFF"), Some("FFFFFFFF"));
        assert_eq!(hex_digits("4"), None);
    }

    #[test]
    fn test_parse_hex_digits() {
        assert_eq!(parse_hex_digits("062E92"), Some(([0x06, 0x2E, 0x92], None)));
        assert_eq!(parse_hex_digits("efefef55"), Some(([0xEF, 0xEF, 0xEF], Some(0x55))));
        assert_eq!(parse_hex_digits("f657e"), None);
        assert_eq!(parse_hex_digits("zzzzzz"), None);
    }

    #[test]
    fn test_parse_basic_colour() {
        let def = parse_colour(&args("Black CODE 0 VALUE #1B2A34 EDGE #2B4354")).unwrap();
        assert_eq!(def.code, ColorCode::from(0));
        assert_eq!(def.name.as_deref(), Some("Black"));
        assert_eq!(def.rgb, [0x1B, 0x2A, 0x34]);
        assert_eq!(def.edge, [0x2B, 0x43, 0x54]);
        assert_eq!(def.alpha, 255);
        assert_eq!(def.finish, None);
    }

    #[test]
    fn test_parse_finishes() {
        let def = parse_colour(&args(
            "Trans_Clear code 47 value #FCFCFC edge #C3C3C3 alpha 128 luminance 5 CHROME",
        ))
        .unwrap();
        assert_eq!(def.alpha, 128);
        assert_eq!(def.luminance, 5.0);
        assert_eq!(def.finish, Some(Finish::Chrome));

        let def = parse_colour(&args(
            "Glitter_Trans_Clear CODE 117 VALUE #FFFFFF EDGE #C3C3C3 ALPHA 128 MATERIAL GLITTER VALUE #FFFFFF FRACTION 0.08 VFRACTION 0.1 SIZE 1",
        ))
        .unwrap();
        assert_eq!(def.alpha, 128);
        match def.finish {
            Some(Finish::Glitter(grain)) => {
                assert_eq!(grain.rgb, [255, 255, 255]);
                assert_eq!(grain.alpha, 255);
                assert_eq!(grain.fraction, 0.08);
                assert_eq!(grain.min_size, 1.0);
                assert_eq!(grain.max_size, 1.0);
            }
            other => panic!("expected glitter, got {:?}", other),
        }

        let def = parse_colour(&args(
            "Fabric CODE 999 VALUE #101010 EDGE #595959 MATERIAL FABRIC CANVAS",
        ))
        .unwrap();
        assert_eq!(
            def.finish,
            Some(Finish::Fabric {
                kind: "canvas".into()
            })
        );
    }

    #[test]
    fn test_edge_may_be_code() {
        let def = parse_colour(&args("Main_Colour CODE 16 VALUE #FFFF80 EDGE 24")).unwrap();
        assert_eq!(def.edge_code, Some(ColorCode::from(24)));
    }

    #[test]
    fn test_missing_required_tags() {
        assert!(parse_colour(&args("Black CODE 0 VALUE #1B2A34")).is_err());
        assert!(parse_colour(&args("Black CODE 0 VALUE nothex EDGE #000000")).is_err());
        assert!(parse_colour(&[]).is_err());
    }
}
