use std::ops::Range;

/// Longest symbol name the dump prints; longer or empty names show as `*`.
const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Con,
    ConFloat,
    Pub,
    Pri,
    PubParam,
    Dat,
}

/// One symbol of the current object, pointing back into its source.
///
/// `value` and `extra` depend on `kind`:
///
/// | kind       | value                 | extra            |
/// |------------|-----------------------|------------------|
/// | `Con`      | integer value         | 0                |
/// | `ConFloat` | IEEE-754 bits         | 0                |
/// | `Pub/Pri`  | method number (1-based) | parameter count |
/// | `PubParam` | method number         | parameter number |
/// | `Dat`      | offset in DAT section | 0                |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub kind: SymbolKind,
    pub name: Range<usize>,
    pub owner: Option<Range<usize>>,
    pub value: i32,
    pub extra: i32,
}

impl SymbolInfo {
    pub fn new(kind: SymbolKind, name: Range<usize>, value: i32) -> Self {
        Self {
            kind,
            name,
            owner: None,
            value,
            extra: 0,
        }
    }

    pub fn with_extra(mut self, extra: i32) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_owner(mut self, owner: Range<usize>) -> Self {
        self.owner = Some(owner);
        self
    }
}

fn name_text<'a>(source: &'a str, range: &Range<usize>) -> &'a str {
    match source.get(range.clone()) {
        Some(text) if !text.is_empty() && text.len() <= MAX_NAME_LEN => text,
        _ => "*",
    }
}

/// Renders the constant, public method and parameter records of `symbols`.
pub fn dump(source: &str, symbols: &[SymbolInfo]) -> Vec<String> {
    symbols
        .iter()
        .filter_map(|sym| {
            let name = name_text(source, &sym.name);
            match sym.kind {
                SymbolKind::Con => Some(format!("CON, {}, {}", name, sym.value)),
                SymbolKind::ConFloat => Some(format!(
                    "CONF, {}, {:.6}",
                    name,
                    f32::from_bits(sym.value as u32)
                )),
                SymbolKind::PubParam => {
                    let owner = sym
                        .owner
                        .as_ref()
                        .map_or("*", |owner| name_text(source, owner));
                    Some(format!(
                        "PARAM, {}, {}, {}, {}",
                        owner, name, sym.value, sym.extra
                    ))
                }
                SymbolKind::Pub => Some(format!("PUB, {}, {}, {}", name, sym.value, sym.extra)),
                SymbolKind::Pri | SymbolKind::Dat => None,
            }
        })
        .collect()
}
