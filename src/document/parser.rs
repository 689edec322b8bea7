//! Line parser for LDR, DAT and MPD text.

use super::{
    Classification, CommandNode, Document, DocumentHeader, EmbeddedData, MalformedLine, MetaCommand,
    TexmapCommand,
};
use crate::bfc::BfcDirective;
use crate::color::parse_colour;
use crate::error::{ResolveError, Result};
use crate::texture::{image::decode_base64, PeTexBox, TexmapDescriptor};
use crate::types::{normalize_name, parse_matrix, ColorCode};
use glam::{Vec2, Vec3};

/// Everything found in one file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    /// The document the file was requested as.
    pub main: Document,
    /// Every `0 FILE` block, including the first one under its own name.
    pub documents: Vec<Document>,
    pub data: Vec<EmbeddedData>,
}

enum Block<'a> {
    Document {
        name: String,
        lines: Vec<(usize, &'a str)>,
    },
    Data {
        name: String,
        line: usize,
        payload: String,
    },
}

/// Parse a file. Lines that cannot be tokenized are recorded on the
/// document they belong to and skipped.
pub fn parse(name: &str, text: &str) -> ParsedFile {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let name = normalize_name(name);

    let mut implicit: Vec<(usize, &str)> = Vec::new();
    let mut blocks: Vec<Block> = Vec::new();
    // lines after NOFILE or a finished data block belong nowhere
    let mut open = true;
    let mut seen_file = false;

    for (index, raw) in text.lines().enumerate() {
        let number = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(target) = meta_argument(line, "FILE") {
            seen_file = true;
            open = true;
            blocks.push(Block::Document {
                name: normalize_name(target),
                lines: Vec::new(),
            });
            continue;
        }
        if meta_keyword(line) == Some("NOFILE") {
            open = false;
            continue;
        }
        if let Some(target) = meta_argument(line, "!DATA") {
            seen_file = true;
            open = true;
            blocks.push(Block::Data {
                name: normalize_name(target),
                line: number,
                payload: String::new(),
            });
            continue;
        }

        match blocks.last_mut() {
            Some(Block::Data { payload, .. }) if open => match meta_argument(line, "!:") {
                Some(chunk) => payload.push_str(chunk),
                None => open = false,
            },
            Some(Block::Document { lines, .. }) if open => lines.push((number, line)),
            Some(_) => {}
            None => implicit.push((number, line)),
        }
    }

    let mut documents = Vec::new();
    let mut data = Vec::new();
    let mut data_errors = Vec::new();
    for block in blocks {
        match block {
            Block::Document { name, lines } => documents.push(build_document(name, &lines)),
            Block::Data { name, line, payload } => match decode_base64(&payload) {
                Ok(bytes) => data.push(EmbeddedData { name, bytes }),
                Err(e) => data_errors.push(MalformedLine {
                    line,
                    reason: format!("!DATA {}: {}", name, e),
                }),
            },
        }
    }

    let mut main = if !seen_file || !implicit.is_empty() || documents.is_empty() {
        build_document(name, &implicit)
    } else {
        Document {
            name,
            ..documents[0].clone()
        }
    };
    main.malformed.extend(data_errors);

    ParsedFile {
        main,
        documents,
        data,
    }
}

fn build_document(name: String, lines: &[(usize, &str)]) -> Document {
    let mut header = DocumentHeader::default();
    let mut commands = Vec::new();
    let mut malformed = Vec::new();

    for &(number, line) in lines {
        if commands.is_empty() && read_header(&mut header, line) {
            continue;
        }
        match parse_line(number, line) {
            Ok(Some(CommandNode::Meta(MetaCommand::Opaque(text))))
                if commands.is_empty() && header.description.is_none() =>
            {
                header.description = Some(text);
            }
            Ok(Some(command)) => commands.push(command),
            Ok(None) => {}
            Err(ResolveError::MalformedLine { line, reason }) => {
                malformed.push(MalformedLine { line, reason })
            }
            Err(e) => malformed.push(MalformedLine {
                line: number,
                reason: e.to_string(),
            }),
        }
    }

    if !malformed.is_empty() {
        tracing::debug!("{}: skipped {} malformed lines", name, malformed.len());
    }

    let classification = Classification::from_header(&header);
    let has_geometry = commands.iter().any(CommandNode::is_geometry);
    Document {
        name,
        header,
        classification,
        commands,
        has_geometry,
        malformed,
    }
}

/// Consume a header line. Returns false if the line is not header text.
fn read_header(header: &mut DocumentHeader, line: &str) -> bool {
    let Some((keyword, rest)) = meta_split(line) else {
        return false;
    };
    let lower = keyword.to_ascii_lowercase();
    match lower.as_str() {
        "name:" => header.name = Some(rest.to_string()),
        "author:" => header.author = Some(rest.to_string()),
        "!ldraw_org" | "ldraw_org" => {
            let mut words = rest.split_whitespace();
            header.part_type = words.next().map(String::from);
            header.qualifiers = words.map(String::from).collect();
        }
        k if k.starts_with("unofficial_") || k.starts_with("un-official_") => {
            header.part_type = Some(keyword.to_string());
        }
        "official" if rest.starts_with("LCAD ") => {
            header.part_type = rest["LCAD ".len()..].split_whitespace().next().map(String::from);
        }
        "!license" => header.license = Some(rest.to_string()),
        "!category" => header.category = Some(rest.to_string()),
        "!keywords" => header.keywords.extend(
            rest.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from),
        ),
        "!help" => header.help.push(rest.to_string()),
        "!history" => header.history.push(rest.to_string()),
        "!cmdline" => {}
        _ => return false,
    }
    true
}

/// Split `0 KEYWORD rest` into the keyword and the trimmed rest.
fn meta_split(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('0')?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();
    match rest.find(char::is_whitespace) {
        Some(end) => Some((&rest[..end], rest[end..].trim())),
        None if !rest.is_empty() => Some((rest, "")),
        None => None,
    }
}

fn meta_keyword(line: &str) -> Option<&str> {
    meta_split(line).map(|(keyword, _)| keyword)
}

/// The text after `0 KEYWORD`, if the line is that meta and has any.
fn meta_argument<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    match meta_split(line) {
        Some((k, rest)) if k.eq_ignore_ascii_case(keyword) && !rest.is_empty() => Some(rest),
        _ => None,
    }
}

/// Take `count` whitespace-separated fields and return them with the
/// remainder of the line, which may itself contain spaces.
fn split_fields(text: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = text.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    Some((fields, rest.trim_end()))
}

fn numbers<const N: usize>(tokens: &[&str], line: usize) -> Result<[f32; N]> {
    if tokens.len() < N {
        return Err(ResolveError::malformed(
            line,
            format!("expected {} numbers, found {}", N, tokens.len()),
        ));
    }
    let mut out = [0f32; N];
    for (slot, token) in out.iter_mut().zip(tokens) {
        *slot = token
            .parse()
            .map_err(|_| ResolveError::malformed(line, format!("invalid number '{}'", token)))?;
    }
    Ok(out)
}

fn points<const N: usize>(values: &[f32]) -> [Vec3; N] {
    std::array::from_fn(|i| Vec3::new(values[i * 3], values[i * 3 + 1], values[i * 3 + 2]))
}

fn uvs<const N: usize>(values: &[f32]) -> [Vec2; N] {
    std::array::from_fn(|i| Vec2::new(values[i * 2], values[i * 2 + 1]))
}

/// Parse one line. Blank lines yield `None`.
pub fn parse_line(number: usize, line: &str) -> Result<Option<CommandNode>> {
    let line = line.trim();
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&line_type) = tokens.first() else {
        return Ok(None);
    };

    let command = match line_type {
        "0" => match meta_split(line) {
            Some(("!:", rest)) => {
                let inner = parse_line(number, rest)?
                    .filter(|c| !matches!(c, CommandNode::Meta(_)))
                    .ok_or_else(|| ResolveError::malformed(number, "'!:' must wrap a geometry line"))?;
                CommandNode::TexmapGeometry(Box::new(inner))
            }
            _ => CommandNode::Meta(parse_meta(number, line)?),
        },
        "1" => {
            let (fields, target) = split_fields(line, 14)
                .filter(|(_, target)| !target.is_empty())
                .ok_or_else(|| ResolveError::malformed(number, "subfile reference needs 14 fields and a name"))?;
            let values: [f32; 12] = numbers(&fields[2..], number)?;
            CommandNode::SubfileRef {
                target: normalize_name(target),
                color: ColorCode::new(fields[1]),
                matrix: parse_matrix(&values),
            }
        }
        "2" => {
            let values: [f32; 6] = numbers(&tokens[2.min(tokens.len())..], number)?;
            CommandNode::Edge {
                color: ColorCode::new(tokens[1]),
                vertices: points(&values),
            }
        }
        "3" => {
            let values: [f32; 9] = numbers(&tokens[2.min(tokens.len())..], number)?;
            let uv = match &tokens[11.min(tokens.len())..] {
                [] => None,
                extra if extra.len() == 6 => Some(uvs(&numbers::<6>(extra, number)?)),
                extra => {
                    return Err(ResolveError::malformed(
                        number,
                        format!("triangle has {} trailing fields, expected 0 or 6", extra.len()),
                    ))
                }
            };
            CommandNode::Triangle {
                color: ColorCode::new(tokens[1]),
                vertices: points(&values),
                uvs: uv,
            }
        }
        "4" => {
            let values: [f32; 12] = numbers(&tokens[2.min(tokens.len())..], number)?;
            let uv = match &tokens[14.min(tokens.len())..] {
                [] => None,
                extra if extra.len() == 8 => Some(uvs(&numbers::<8>(extra, number)?)),
                extra => {
                    return Err(ResolveError::malformed(
                        number,
                        format!("quad has {} trailing fields, expected 0 or 8", extra.len()),
                    ))
                }
            };
            CommandNode::Quad {
                color: ColorCode::new(tokens[1]),
                vertices: points(&values),
                uvs: uv,
            }
        }
        "5" => {
            let values: [f32; 12] = numbers(&tokens[2.min(tokens.len())..], number)?;
            let all: [Vec3; 4] = points(&values);
            CommandNode::Line {
                color: ColorCode::new(tokens[1]),
                vertices: [all[0], all[1]],
                controls: [all[2], all[3]],
            }
        }
        other => {
            return Err(ResolveError::malformed(
                number,
                format!("unknown line type '{}'", other),
            ))
        }
    };
    Ok(Some(command))
}

fn parse_meta(number: usize, line: &str) -> Result<MetaCommand> {
    let Some((keyword, rest)) = meta_split(line) else {
        return Ok(MetaCommand::Opaque(String::new()));
    };
    let args: Vec<&str> = rest.split_whitespace().collect();
    let malformed = |reason: String| ResolveError::malformed(number, reason);

    let meta = match keyword {
        "//" => MetaCommand::Comment(rest.to_string()),
        "BFC" => BfcDirective::parse(&args)
            .map(MetaCommand::Bfc)
            .ok_or_else(|| malformed(format!("unknown BFC option in '{}'", rest)))?,
        "!TEXMAP" => {
            let action = args.first().map(|a| a.to_ascii_uppercase());
            let texmap = match action.as_deref() {
                Some("START") => TexmapCommand::Start(TexmapDescriptor::parse(&args[1..]).map_err(malformed)?),
                Some("NEXT") => TexmapCommand::Next(TexmapDescriptor::parse(&args[1..]).map_err(malformed)?),
                Some("FALLBACK") => TexmapCommand::Fallback,
                Some("END") => TexmapCommand::End,
                _ => return Err(malformed(format!("unknown TEXMAP action in '{}'", rest))),
            };
            MetaCommand::Texmap(texmap)
        }
        "PE_TEX_PATH" => {
            let parse = |raw: &str| {
                raw.parse::<i32>()
                    .map_err(|_| malformed(format!("invalid PE_TEX_PATH index '{}'", raw)))
            };
            match args.as_slice() {
                [path] => MetaCommand::PeTexPath {
                    path: parse(*path)?,
                    subpath: None,
                },
                [path, subpath, ..] => MetaCommand::PeTexPath {
                    path: parse(*path)?,
                    subpath: Some(parse(*subpath)?),
                },
                [] => return Err(malformed("PE_TEX_PATH needs an index".to_string())),
            }
        }
        "PE_TEX_INFO" => match args.as_slice() {
            [payload] => MetaCommand::PeTexInfo {
                bounds: None,
                payload: payload.to_string(),
            },
            [values @ .., payload] if values.len() == 16 => MetaCommand::PeTexInfo {
                bounds: Some(PeTexBox::parse(&numbers::<16>(values, number)?)),
                payload: payload.to_string(),
            },
            _ => return Err(malformed(format!("PE_TEX_INFO expects 1 or 17 fields, found {}", args.len()))),
        },
        "PE_TEX_NEXT_SHEAR" => MetaCommand::PeTexNextShear,
        "!COLOUR" => MetaCommand::Colour(parse_colour(&args).map_err(malformed)?),
        "STEP" => MetaCommand::Step,
        "SAVE" => MetaCommand::Save,
        "CLEAR" => MetaCommand::Clear,
        "PRINT" | "WRITE" => MetaCommand::Print(rest.to_string()),
        "!LDCAD" => match args.first().copied() {
            Some("GROUP_DEF") => MetaCommand::GroupDef {
                id: bracket_param(rest, "LID"),
                name: bracket_param(rest, "name"),
            },
            Some("GROUP_NXT") => MetaCommand::GroupNext {
                id: bracket_param(rest, "ids"),
            },
            _ => MetaCommand::Opaque(line[1..].trim().to_string()),
        },
        "!LEOCAD" => match args.as_slice() {
            ["GROUP", "BEGIN", ..] => {
                let name = split_fields(rest, 2).map(|(_, name)| name).unwrap_or_default();
                MetaCommand::GroupBegin(name.to_string())
            }
            ["GROUP", "END", ..] => MetaCommand::GroupEnd,
            ["CAMERA", ..] => MetaCommand::Camera(rest["CAMERA".len()..].trim().to_string()),
            ["LIGHT", ..] => MetaCommand::Light(rest["LIGHT".len()..].trim().to_string()),
            _ => MetaCommand::Opaque(line[1..].trim().to_string()),
        },
        _ => MetaCommand::Opaque(line[1..].trim().to_string()),
    };
    Ok(meta)
}

/// Read `[key=value]` out of an LDCad meta line.
fn bracket_param(text: &str, key: &str) -> Option<String> {
    let open = format!("[{}=", key);
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(']')? + start;
    Some(text[start..end].to_string())
}
