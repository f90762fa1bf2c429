//! A front end for the block structure of Spin objects.
//!
//! Constants, variables, object declarations, method signatures and DAT
//! data are compiled in full. Method bodies are only scanned for references
//! to other methods; each one compiles to a lone RETURN.

use std::collections::BTreeMap;
use std::ops::Range;

use itertools::Itertools;
use log::debug;
use pest::{error::InputLocation, iterators::Pair, Parser};
use pest_derive::Parser;

use super::{
    constant::{clock_mode, Constants, Value},
    FrontEnd, PositionedError,
};
use crate::{
    context::{Clock, CompileContext, FirstPublic},
    symbols::{SymbolInfo, SymbolKind},
    unused::{MethodInfo, MethodRef, UnusedMethods},
};

#[derive(Parser)]
#[grammar = "frontend/outline.pest"]
pub struct OutlineParser;

/// Bytecode for `RETURN`.
const RETURN: u8 = 0x32;
const MAX_PARAMS: usize = 15;
const MAX_INSTANCES: usize = 255;

#[derive(Debug)]
struct ObjDecl {
    name: String,
    count: usize,
    file: String,
}

#[derive(Debug)]
struct Method {
    name: String,
    signature: String,
    span: Range<usize>,
    public: bool,
    params: Vec<Range<usize>>,
    local_bytes: usize,
    refs: Vec<MethodRef>,
}

#[derive(Debug)]
enum DatItem {
    Data { align: usize, bytes: Vec<u8> },
    /// Index into the object's data files.
    File(usize),
}

/// What discovery learned about the current object.
#[derive(Debug, Default)]
struct Outline {
    var_size: usize,
    objects: Vec<ObjDecl>,
    /// PUB methods first, each group in source order.
    methods: Vec<Method>,
    dat: Vec<DatItem>,
    /// DAT labels as (symbol index, DAT item index). Their offsets are only
    /// known once data files are loaded.
    labels: Vec<(usize, usize)>,
}

impl Outline {
    fn instance_count(&self) -> usize {
        self.objects.iter().map(|o| o.count).sum()
    }

    fn estimated_size(&self) -> usize {
        let tables = 4 + 4 * (self.methods.len() + self.instance_count());
        let dat: usize = self
            .dat
            .iter()
            .map(|item| match item {
                DatItem::Data { bytes, .. } => bytes.len(),
                DatItem::File(_) => 0,
            })
            .sum();
        (tables + dat).next_multiple_of(4) + self.methods.len().next_multiple_of(4)
    }
}

#[derive(Debug, Default)]
pub struct OutlineCompiler {
    current: Option<Outline>,
}

impl OutlineCompiler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrontEnd for OutlineCompiler {
    fn discover(
        &mut self,
        ctx: &mut CompileContext,
        methods: &mut UnusedMethods,
    ) -> Result<(), PositionedError> {
        let file = OutlineParser::parse(Rule::file, &ctx.source)
            .map_err(syntax_error)?
            .next()
            .unwrap();
        let mut builder = Builder::new(ctx.limits.object);
        builder.file(file)?;

        ctx.clock = builder.clock()?;
        ctx.stack_requirement = builder.stack()?;
        let Builder {
            symbols,
            data_files,
            outline,
            ..
        } = builder;

        ctx.child_files = outline.objects.iter().map(|o| o.file.clone()).collect();
        ctx.data_files = data_files;
        ctx.symbols = symbols;
        ctx.var_size = outline.var_size;
        ctx.code_size = outline.estimated_size();
        debug!(
            "{}: {} methods, {} objects, {} data files",
            ctx.filename,
            outline.methods.len(),
            ctx.child_files.len(),
            ctx.data_files.len()
        );

        if !ctx.final_pass {
            methods.record_object(
                ctx.compile_index,
                outline
                    .methods
                    .iter()
                    .map(|m| MethodInfo {
                        name: m.name.clone(),
                        public: m.public,
                        refs: m.refs.clone(),
                    })
                    .collect(),
                outline
                    .objects
                    .iter()
                    .enumerate()
                    .map(|(slot, o)| (o.name.clone(), slot)),
            );
        }

        self.current = Some(outline);
        Ok(())
    }

    fn finish(
        &mut self,
        ctx: &mut CompileContext,
        methods: &UnusedMethods,
    ) -> Result<(), PositionedError> {
        let end = ctx.source.len();
        let fail = |message: &str| PositionedError::new(message, end..end);

        let outline = self
            .current
            .take()
            .ok_or_else(|| fail("Object was not discovered"))?;
        if !outline.methods.first().is_some_and(|m| m.public) {
            return Err(fail("No PUB routines found"));
        }
        if ctx.children.len() != outline.objects.len() {
            return Err(fail("Child objects are missing"));
        }
        let method_count =
            u8::try_from(outline.methods.len() + 1).map_err(|_| fail("Limit of 255 methods exceeded"))?;
        let instance_count = u8::try_from(outline.instance_count())
            .map_err(|_| fail("Limit of 255 object instances exceeded"))?;

        let tables = 4 + 4 * outline.methods.len();
        let mut code = vec![0; tables + 4 * usize::from(instance_count)];

        let dat_base = code.len();
        let mut item_offsets = vec![];
        for item in &outline.dat {
            match item {
                DatItem::Data { align, bytes } => {
                    pad(&mut code, *align);
                    item_offsets.push(code.len() - dat_base);
                    code.extend_from_slice(bytes);
                }
                DatItem::File(k) => {
                    let entry = ctx
                        .data
                        .entries
                        .get(*k)
                        .ok_or_else(|| fail("Data file is missing"))?;
                    item_offsets.push(code.len() - dat_base);
                    code.extend_from_slice(ctx.data.slice(entry));
                }
            }
        }
        pad(&mut code, 4);
        for &(symbol, item) in &outline.labels {
            if let Some(symbol) = ctx.symbols.get_mut(symbol) {
                symbol.value = item_offsets[item] as i32;
            }
        }

        // Unreachable methods share a single stub.
        let mut shared_stub = None;
        let mut entries = vec![];
        for (id, method) in outline.methods.iter().enumerate() {
            let reachable = !ctx.final_pass || methods.is_reachable(ctx.compile_index, id);
            let offset = if reachable {
                code.push(RETURN);
                code.len() - 1
            } else {
                *shared_stub.get_or_insert_with(|| {
                    code.push(RETURN);
                    code.len() - 1
                })
            };
            entries.push((offset, method.local_bytes));
        }
        pad(&mut code, 4);
        let own_size = code.len();

        let mut child_offsets = vec![];
        for child in &ctx.children {
            child_offsets.push(code.len());
            code.extend_from_slice(&child.code);
            pad(&mut code, 4);
        }
        if code.len() > ctx.limits.object {
            return Err(fail("Object exceeds the code limit"));
        }

        let mut var_offset = outline.var_size;
        let mut instances = vec![];
        for ((decl, child), &offset) in outline.objects.iter().zip(&ctx.children).zip(&child_offsets) {
            for _ in 0..decl.count {
                instances.push((offset, var_offset));
                var_offset += child.var_size;
            }
        }

        put_word(&mut code, 0, own_size, end)?;
        code[2] = method_count;
        code[3] = instance_count;
        for (i, &(offset, locals)) in entries.iter().enumerate() {
            put_word(&mut code, 4 + 4 * i, offset, end)?;
            put_word(&mut code, 6 + 4 * i, locals, end)?;
        }
        for (i, &(offset, vars)) in instances.iter().enumerate() {
            put_word(&mut code, tables + 4 * i, offset, end)?;
            put_word(&mut code, tables + 2 + 4 * i, vars, end)?;
        }

        let first = &outline.methods[0];
        ctx.first_public = FirstPublic {
            address: u16::try_from(entries[0].0).map_err(|_| fail("Object exceeds 64k"))?,
            locals: u16::try_from(first.local_bytes)
                .map_err(|_| fail("Local variables exceed 64k"))?,
            params: first.params.len() as u16,
        };
        ctx.var_size = var_offset;
        ctx.code_size = code.len();
        ctx.code = code;

        let listing = format!(
            "{}: {} bytes code, {} bytes variables, {} methods, {} objects\n",
            ctx.filename,
            ctx.code_size,
            ctx.var_size,
            outline.methods.len(),
            instance_count
        );
        ctx.append_list(&listing)
            .map_err(|e| fail(&e.to_string()))?;
        if ctx.doc.is_some() {
            let doc = interface_doc(ctx, &outline);
            ctx.append_doc(&doc).map_err(|e| fail(&e.to_string()))?;
        }
        Ok(())
    }
}

fn pad(code: &mut Vec<u8>, align: usize) {
    code.resize(code.len().next_multiple_of(align), 0);
}

fn put_word(code: &mut [u8], at: usize, value: usize, end: usize) -> Result<(), PositionedError> {
    let word =
        u16::try_from(value).map_err(|_| PositionedError::new("Object exceeds 64k", end..end))?;
    code[at..at + 2].copy_from_slice(&word.to_le_bytes());
    Ok(())
}

fn syntax_error(e: pest::error::Error<Rule>) -> PositionedError {
    let span = match e.location {
        InputLocation::Pos(at) => at..at,
        InputLocation::Span((start, end)) => start..end,
    };
    PositionedError::new(format!("Syntax error, {}", e.variant.message()), span)
}

fn interface_doc(ctx: &CompileContext, outline: &Outline) -> String {
    let mut doc = format!("Object \"{}\" Interface:\n\n", ctx.filename);
    for method in outline.methods.iter().filter(|m| m.public) {
        doc.push_str("PUB  ");
        doc.push_str(&method.signature);
        doc.push('\n');
    }
    doc.push_str(&format!(
        "\nProgram:  {} Longs\nVariable: {} Longs\n",
        ctx.code_size / 4,
        ctx.var_size / 4
    ));
    for line in doc_comments(&ctx.source) {
        doc.push_str(line);
        doc.push('\n');
    }
    doc.push('\n');
    doc
}

/// Lines of `''` comments and `{{ }}` blocks.
fn doc_comments(source: &str) -> Vec<&str> {
    let mut docs = vec![];
    let mut lines = source.lines();
    while let Some(line) = lines.next() {
        let trimmed = line.trim_start();
        if let Some(doc) = trimmed.strip_prefix("''") {
            docs.push(doc.trim_start());
        } else if let Some(mut text) = trimmed.strip_prefix("{{") {
            loop {
                if let Some(close) = text.find("}}") {
                    docs.push(&text[..close]);
                    break;
                }
                docs.push(text);
                match lines.next() {
                    Some(next) => text = next,
                    None => break,
                }
            }
        }
    }
    docs
}

fn span(p: &Pair<Rule>) -> Range<usize> {
    p.as_span().start()..p.as_span().end()
}

fn width(size: &Pair<Rule>) -> usize {
    assert_eq!(size.as_rule(), Rule::size);
    match size.as_str().to_ascii_uppercase().as_str() {
        "LONG" => 4,
        "WORD" => 2,
        _ => 1,
    }
}

fn string_text<'i>(p: &Pair<'i, Rule>) -> &'i str {
    assert_eq!(p.as_rule(), Rule::string);
    p.clone().into_inner().exactly_one().unwrap().as_str()
}

struct Builder {
    constants: Constants,
    /// Every name declared by the object, upper-cased.
    names: BTreeMap<String, Range<usize>>,
    symbols: Vec<SymbolInfo>,
    data_files: Vec<String>,
    outline: Outline,
    /// DAT bytes declared so far, not counting data files.
    dat_offset: usize,
    limit: usize,
}

impl Builder {
    fn new(limit: usize) -> Self {
        Self {
            constants: Constants::new(),
            names: BTreeMap::new(),
            symbols: vec![],
            data_files: vec![],
            outline: Outline::default(),
            dat_offset: 0,
            limit,
        }
    }

    fn file(&mut self, p: Pair<Rule>) -> Result<(), PositionedError> {
        assert_eq!(p.as_rule(), Rule::file);
        let items = p.into_inner().collect_vec();

        // Constants are visible from every other block.
        let mut next_enum = 0;
        for item in &items {
            match item.as_rule() {
                Rule::con_line => self.con_line(item.clone(), &mut next_enum)?,
                Rule::con_block => {
                    next_enum = 0;
                    for line in item.clone().into_inner().skip(1) {
                        self.con_line(line, &mut next_enum)?;
                    }
                }
                _ => {}
            }
        }

        let mut var_bytes = 0;
        let (mut pubs, mut pris) = (vec![], vec![]);
        for item in items {
            match item.as_rule() {
                Rule::var_block => {
                    for line in item.into_inner().skip(1) {
                        var_bytes += self.var_line(line)?;
                    }
                }
                Rule::obj_block => {
                    for line in item.into_inner().skip(1) {
                        self.obj_line(line)?;
                    }
                }
                Rule::method_block => {
                    let method = self.method_block(item)?;
                    if method.public {
                        pubs.push(method);
                    } else {
                        pris.push(method);
                    }
                }
                Rule::dat_block => self.dat_block(item)?,
                Rule::con_line | Rule::con_block | Rule::EOI => {}
                rule => panic!("invalid file item: {:?}", rule),
            }
        }
        self.outline.var_size = var_bytes.next_multiple_of(4);

        self.outline.methods = pubs.into_iter().chain(pris).collect();
        for (i, method) in self.outline.methods.iter().enumerate() {
            let number = i as i32 + 1;
            let kind = if method.public {
                SymbolKind::Pub
            } else {
                SymbolKind::Pri
            };
            self.symbols.push(
                SymbolInfo::new(kind, method.span.clone(), number)
                    .with_extra(method.params.len() as i32),
            );
            if method.public {
                for (k, param) in method.params.iter().enumerate() {
                    self.symbols.push(
                        SymbolInfo::new(SymbolKind::PubParam, param.clone(), number)
                            .with_extra(k as i32 + 1)
                            .with_owner(method.span.clone()),
                    );
                }
            }
        }
        Ok(())
    }

    fn declare(&mut self, name: &Pair<Rule>) -> Result<String, PositionedError> {
        assert_eq!(name.as_rule(), Rule::ident);
        let key = name.as_str().to_ascii_uppercase();
        if self.names.contains_key(&key) || self.constants.get(&key).is_some() {
            return Err(PositionedError::new("Expected a unique name", span(name)));
        }
        self.names.insert(key.clone(), span(name));
        Ok(key)
    }

    fn define(&mut self, name: &Pair<Rule>, value: Value) -> Result<(), PositionedError> {
        let key = self.declare(name)?;
        self.constants.define(&key, value);
        let kind = match value {
            Value::Int(_) => SymbolKind::Con,
            Value::Float(_) => SymbolKind::ConFloat,
        };
        self.symbols
            .push(SymbolInfo::new(kind, span(name), value.bits()));
        Ok(())
    }

    fn con_line(&mut self, p: Pair<Rule>, next_enum: &mut i32) -> Result<(), PositionedError> {
        assert_eq!(p.as_rule(), Rule::con_line);
        for item in p.into_inner() {
            match item.as_rule() {
                Rule::con_assign => {
                    let (name, expr) = item.into_inner().collect_tuple().unwrap();
                    let value = self.constants.eval(expr)?;
                    self.define(&name, value)?;
                }
                Rule::con_enum => {
                    let expr = item.into_inner().exactly_one().unwrap();
                    *next_enum = self.constants.eval_int(expr)?;
                }
                Rule::con_member => {
                    let mut inner = item.into_inner();
                    let name = inner.next().unwrap();
                    let step = match inner.next() {
                        Some(expr) => self.constants.eval_int(expr)?,
                        None => 1,
                    };
                    self.define(&name, Value::Int(*next_enum))?;
                    *next_enum = next_enum.wrapping_add(step);
                }
                rule => panic!("invalid constant: {:?}", rule),
            }
        }
        Ok(())
    }

    /// Returns the bytes declared by the line.
    fn var_line(&mut self, p: Pair<Rule>) -> Result<usize, PositionedError> {
        assert_eq!(p.as_rule(), Rule::var_line);
        let mut inner = p.into_inner();
        let width = width(&inner.next().unwrap());
        let mut bytes = 0;
        for decl in inner {
            let mut parts = decl.into_inner();
            let name = parts.next().unwrap();
            self.declare(&name)?;
            let count = match parts.next() {
                Some(expr) => self.constants.eval_count(expr)?,
                None => 1,
            };
            bytes += count * width;
            if bytes > self.limit {
                return Err(PositionedError::new("Variables exceed the object limit", span(&name)));
            }
        }
        Ok(bytes)
    }

    fn obj_line(&mut self, p: Pair<Rule>) -> Result<(), PositionedError> {
        assert_eq!(p.as_rule(), Rule::obj_line);
        let mut inner = p.into_inner();
        let name = inner.next().unwrap();
        let file = inner.next_back().unwrap();
        let key = self.declare(&name)?;
        let count = match inner.next() {
            Some(expr) => {
                let at = span(&expr);
                let count = self.constants.eval_count(expr)?;
                if !(1..=MAX_INSTANCES).contains(&count) {
                    return Err(PositionedError::new(
                        "Object count must be from 1 to 255",
                        at,
                    ));
                }
                count
            }
            None => 1,
        };
        let text = string_text(&file);
        if text.trim().is_empty() {
            return Err(PositionedError::new("Expected a filename", span(&file)));
        }
        self.outline.objects.push(ObjDecl {
            name: key,
            count,
            file: text.to_owned(),
        });
        Ok(())
    }

    fn method_block(&mut self, p: Pair<Rule>) -> Result<Method, PositionedError> {
        assert_eq!(p.as_rule(), Rule::method_block);
        let mut inner = p.into_inner();
        let public = inner.next().unwrap().as_str().eq_ignore_ascii_case("pub");
        let name = inner.next().unwrap();
        let key = self.declare(&name)?;

        let mut method = Method {
            name: key,
            signature: name.as_str().to_owned(),
            span: span(&name),
            public,
            params: vec![],
            local_bytes: 0,
            refs: vec![],
        };
        for part in inner {
            match part.as_rule() {
                Rule::params => {
                    let at = span(&part);
                    let params = part.into_inner().collect_vec();
                    if params.len() > MAX_PARAMS {
                        return Err(PositionedError::new(
                            "Limit of 15 parameters exceeded",
                            at,
                        ));
                    }
                    method.signature = format!(
                        "{}({})",
                        name.as_str(),
                        params.iter().map(|p| p.as_str()).join(", ")
                    );
                    method.params = params.iter().map(span).collect();
                }
                Rule::result => {}
                Rule::locals => {
                    for local in part.into_inner() {
                        let mut parts = local.into_inner();
                        parts.next();
                        let count = match parts.next() {
                            Some(expr) => self.constants.eval_count(expr)?,
                            None => 1,
                        };
                        method.local_bytes += 4 * count;
                    }
                }
                Rule::body_line => body_refs(part, &mut method.refs),
                rule => panic!("invalid method part: {:?}", rule),
            }
        }
        Ok(method)
    }

    fn dat_block(&mut self, p: Pair<Rule>) -> Result<(), PositionedError> {
        assert_eq!(p.as_rule(), Rule::dat_block);
        for line in p.into_inner().skip(1) {
            match line.as_rule() {
                Rule::dat_file => {
                    let mut inner = line.into_inner();
                    let file = inner.next_back().unwrap();
                    if let Some(label) = inner.next() {
                        self.dat_label(&label)?;
                    }
                    let text = string_text(&file);
                    if text.trim().is_empty() {
                        return Err(PositionedError::new("Expected a filename", span(&file)));
                    }
                    self.outline.dat.push(DatItem::File(self.data_files.len()));
                    self.data_files.push(text.to_owned());
                }
                Rule::dat_data => {
                    let mut inner = line.into_inner().peekable();
                    let label = inner.next_if(|p| p.as_rule() == Rule::ident);
                    let align = width(&inner.next().unwrap());
                    self.dat_offset = self.dat_offset.next_multiple_of(align);
                    if let Some(label) = label {
                        self.dat_label(&label)?;
                    }
                    let mut bytes = vec![];
                    for item in inner {
                        self.data_item(item, align, &mut bytes)?;
                    }
                    self.dat_offset += bytes.len();
                    self.outline.dat.push(DatItem::Data { align, bytes });
                }
                Rule::dat_other => {}
                rule => panic!("invalid dat line: {:?}", rule),
            }
        }
        Ok(())
    }

    /// Declares a label for the next DAT item; `finish` fills in its offset.
    fn dat_label(&mut self, label: &Pair<Rule>) -> Result<(), PositionedError> {
        self.declare(label)?;
        self.outline
            .labels
            .push((self.symbols.len(), self.outline.dat.len()));
        self.symbols
            .push(SymbolInfo::new(SymbolKind::Dat, span(label), 0));
        Ok(())
    }

    fn data_item(
        &self,
        p: Pair<Rule>,
        width: usize,
        out: &mut Vec<u8>,
    ) -> Result<(), PositionedError> {
        assert_eq!(p.as_rule(), Rule::data_item);
        let at = span(&p);
        let mut inner = p.into_inner();
        let value = inner.next().unwrap();
        let count = match inner.next() {
            Some(expr) => self.constants.eval_count(expr)?,
            None => 1,
        };

        let mut unit = vec![];
        match value.as_rule() {
            Rule::string => {
                for c in string_text(&value).chars() {
                    unit.extend_from_slice(&(c as u32).to_le_bytes()[..width]);
                }
            }
            Rule::expr => {
                let bits = self.constants.eval(value)?.bits();
                unit.extend_from_slice(&bits.to_le_bytes()[..width]);
            }
            rule => panic!("invalid data item: {:?}", rule),
        }
        if self.dat_offset + out.len() + unit.len().saturating_mul(count) > self.limit {
            return Err(PositionedError::new("DAT data exceeds the object limit", at));
        }
        for _ in 0..count {
            out.extend_from_slice(&unit);
        }
        Ok(())
    }

    /// An integer setting from the object's constants, with its definition.
    fn setting(&self, name: &str) -> Result<Option<(i32, Range<usize>)>, PositionedError> {
        let Some(at) = self.names.get(name) else {
            return Ok(None);
        };
        match self.constants.get(name) {
            Some(Value::Int(v)) => Ok(Some((v, at.clone()))),
            _ => Err(PositionedError::new(
                format!("{} must be an integer constant", name),
                at.clone(),
            )),
        }
    }

    fn clock(&self) -> Result<Clock, PositionedError> {
        let xin = self.setting("_XINFREQ")?;
        let clk = self.setting("_CLKFREQ")?;
        let Some((mode, at)) = self.setting("_CLKMODE")? else {
            return match xin.or(clk) {
                Some((_, at)) => Err(PositionedError::new("_CLKMODE must be specified", at)),
                None => Ok(Clock::default()),
            };
        };
        let (bits, multiplier) = clock_mode(mode)
            .ok_or_else(|| PositionedError::new("Invalid _CLKMODE specified", at.clone()))?;
        let frequency = match bits {
            0x00 => 12_000_000,
            0x01 => 20_000,
            _ => match (xin, clk) {
                (Some(_), Some((_, at))) => {
                    return Err(PositionedError::new(
                        "Either _CLKFREQ or _XINFREQ must be specified, but not both",
                        at,
                    ))
                }
                (Some((xin, at)), None) => (xin as u32).checked_mul(multiplier).ok_or_else(|| {
                    PositionedError::new("_XINFREQ times the PLL multiplier exceeds 32 bits", at)
                })?,
                (None, Some((clk, _))) => clk as u32,
                (None, None) => {
                    return Err(PositionedError::new(
                        "_CLKFREQ or _XINFREQ must be specified",
                        at,
                    ))
                }
            },
        };
        Ok(Clock {
            frequency,
            mode: bits,
        })
    }

    /// `_STACK` plus `_FREE`, in longs.
    fn stack(&self) -> Result<u32, PositionedError> {
        let mut total = 0u32;
        for name in ["_STACK", "_FREE"] {
            if let Some((longs, at)) = self.setting(name)? {
                let longs = u32::try_from(longs).map_err(|_| {
                    PositionedError::new(format!("{} must be non-negative", name), at)
                })?;
                total = total.saturating_add(longs);
            }
        }
        Ok(total)
    }
}

fn body_refs(p: Pair<Rule>, refs: &mut Vec<MethodRef>) {
    assert_eq!(p.as_rule(), Rule::body_line);
    for item in p.into_inner() {
        match item.as_rule() {
            Rule::object_call => {
                let (instance, method) = item
                    .into_inner()
                    .filter(|p| p.as_rule() == Rule::ident)
                    .collect_tuple()
                    .unwrap();
                refs.push(MethodRef::Object {
                    instance: instance.as_str().to_ascii_uppercase(),
                    method: method.as_str().to_ascii_uppercase(),
                });
            }
            Rule::ident => refs.push(MethodRef::Local(item.as_str().to_ascii_uppercase())),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::ObjectNode, diagnose::Diagnostic, source::Source};

    fn context(text: &str, final_pass: bool) -> CompileContext {
        let mut ctx = CompileContext::new(final_pass, true);
        ctx.begin_object(
            "test.spin",
            1,
            Source {
                path: "test.spin".into(),
                text: text.into(),
            },
        );
        ctx
    }

    fn word(code: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([code[at], code[at + 1]])
    }

    fn child(code_size: usize, var_size: usize) -> ObjectNode {
        ObjectNode {
            filename: "child.spin".into(),
            path: "child.spin".into(),
            code: vec![0xAA; code_size],
            var_size,
            first_public: FirstPublic::default(),
            stack_requirement: 0,
            clock: Clock::default(),
            children: vec![],
        }
    }

    const BLINK: &str = "\
CON
  _clkmode = xtal1 + pll16x
  _xinfreq = 5_000_000
  _stack = 20
  _free = 12

VAR
  long count, buf[3]
  byte flag

PUB main | a, b
  helper

PRI helper
  return

DAT
table   byte 1, 2, 3
";

    #[test]
    fn discover_collects_settings() {
        let mut ctx = context(BLINK, false);
        let mut methods = UnusedMethods::default();
        OutlineCompiler::new().discover(&mut ctx, &mut methods).unwrap();

        assert_eq!(
            ctx.clock,
            Clock {
                frequency: 80_000_000,
                mode: 0x6F
            }
        );
        assert_eq!(ctx.stack_requirement, 32);
        assert_eq!(ctx.var_size, 20);
        assert!(ctx.child_files.is_empty());
        assert_eq!(
            crate::symbols::dump(&ctx.source, &ctx.symbols),
            vec![
                "CON, _clkmode, 1032",
                "CON, _xinfreq, 5000000",
                "CON, _stack, 20",
                "CON, _free, 12",
                "PUB, main, 1, 0",
            ]
        );
    }

    #[test]
    fn finish_lays_out_tables_data_and_stubs() {
        let mut ctx = context(BLINK, false);
        let mut methods = UnusedMethods::default();
        let mut compiler = OutlineCompiler::new();
        compiler.discover(&mut ctx, &mut methods).unwrap();
        compiler.finish(&mut ctx, &methods).unwrap();

        let code = &ctx.code;
        assert_eq!(code.len(), 20);
        assert_eq!(word(code, 0), 20);
        assert_eq!(code[2], 3);
        assert_eq!(code[3], 0);
        assert_eq!((word(code, 4), word(code, 6)), (16, 8));
        assert_eq!((word(code, 8), word(code, 10)), (17, 0));
        assert_eq!(&code[12..15], &[1, 2, 3]);
        assert_eq!(&code[16..18], &[RETURN, RETURN]);
        assert_eq!(
            ctx.first_public,
            FirstPublic {
                address: 16,
                locals: 8,
                params: 0
            }
        );
        assert!(ctx.list.starts_with("test.spin: 20 bytes code"));
        assert!(ctx.doc.as_deref().unwrap().contains("PUB  main\n"));
    }

    #[test]
    fn children_are_appended_with_instance_table() {
        let source = "\
OBJ
  ser : \"serial\"
  led[2] : \"led\"

PUB main
  ser.start
  led[0].on
";
        let mut ctx = context(source, false);
        let mut methods = UnusedMethods::default();
        let mut compiler = OutlineCompiler::new();
        compiler.discover(&mut ctx, &mut methods).unwrap();
        assert_eq!(ctx.child_files, vec!["serial", "led"]);

        ctx.children = vec![child(8, 4), child(4, 8)];
        compiler.finish(&mut ctx, &methods).unwrap();

        let code = &ctx.code;
        assert_eq!(word(code, 0), 24);
        assert_eq!((code[2], code[3]), (2, 3));
        assert_eq!(word(code, 4), 20);
        assert_eq!((word(code, 8), word(code, 10)), (24, 0));
        assert_eq!((word(code, 12), word(code, 14)), (32, 4));
        assert_eq!((word(code, 16), word(code, 18)), (32, 12));
        assert_eq!(code.len(), 36);
        assert_eq!(ctx.var_size, 20);
    }

    #[test]
    fn object_calls_are_reported_for_reachability() {
        let source = "\
OBJ
  ser : \"serial\"

PUB main
  ser.start(9600)
  helper

PRI helper
PRI dead
";
        let mut ctx = context(source, false);
        let mut methods = UnusedMethods::default();
        methods.record_instance("test.spin", 1, None);
        OutlineCompiler::new().discover(&mut ctx, &mut methods).unwrap();
        methods.record_instance("serial.spin", 2, Some(1));
        methods.record_object(
            2,
            vec![
                MethodInfo {
                    name: "START".into(),
                    public: true,
                    refs: vec![],
                },
                MethodInfo {
                    name: "STOP".into(),
                    public: true,
                    refs: vec![],
                },
            ],
            [],
        );

        assert_eq!(methods.find_unused(), 2);
        assert!(methods.is_reachable(1, 1));
        assert!(!methods.is_reachable(1, 2));
        assert!(methods.is_reachable(2, 0));
        assert!(!methods.is_reachable(2, 1));
    }

    #[test]
    fn unreachable_methods_share_one_stub() {
        let source = "\
PUB main
  used
PUB spare
PRI used
PRI dead
";
        let mut methods = UnusedMethods::default();
        let mut compiler = OutlineCompiler::new();
        compiler
            .discover(&mut context(source, false), &mut methods)
            .unwrap();
        assert_eq!(methods.find_unused(), 2);

        let mut ctx = context(source, true);
        compiler.discover(&mut ctx, &mut methods).unwrap();
        compiler.finish(&mut ctx, &methods).unwrap();

        let offsets: Vec<u16> = (0..4).map(|i| word(&ctx.code, 4 + 4 * i)).collect();
        assert_eq!(offsets, vec![20, 21, 22, 21]);
        assert_eq!(ctx.code.len(), 24);
    }

    #[test]
    fn data_files_are_spliced_into_dat() {
        let source = "\
PUB main
DAT
logo    file \"logo.dat\"
after   byte 9
";
        let mut ctx = context(source, false);
        let mut methods = UnusedMethods::default();
        let mut compiler = OutlineCompiler::new();
        compiler.discover(&mut ctx, &mut methods).unwrap();
        assert_eq!(ctx.data_files, vec!["logo.dat"]);

        ctx.data.append("logo.dat", &[1, 2, 3]).unwrap();
        compiler.finish(&mut ctx, &methods).unwrap();
        assert_eq!(&ctx.code[8..12], &[1, 2, 3, 9]);
        assert_eq!(word(&ctx.code, 4), 12);

        let labels: Vec<i32> = ctx
            .symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Dat)
            .map(|s| s.value)
            .collect();
        assert_eq!(labels, vec![0, 3]);
    }

    #[test]
    fn aligned_labels_follow_their_padding() {
        let source = "\
PUB main
DAT
flag    byte 1
        long
count   long 7
";
        let mut ctx = context(source, false);
        let mut methods = UnusedMethods::default();
        let mut compiler = OutlineCompiler::new();
        compiler.discover(&mut ctx, &mut methods).unwrap();
        compiler.finish(&mut ctx, &methods).unwrap();

        let count = ctx
            .symbols
            .iter()
            .find(|s| s.kind == SymbolKind::Dat && s.value != 0);
        assert_eq!(count.map(|s| s.value), Some(4));
        assert_eq!(&ctx.code[8..16], &[1, 0, 0, 0, 7, 0, 0, 0]);
    }

    #[test]
    fn unsupported_data_expressions_are_errors() {
        let source = "\
PUB main
DAT
msg     byte \"hi\", 0
ptrs    word @msg, @msg
";
        let mut ctx = context(source, false);
        let error = OutlineCompiler::new()
            .discover(&mut ctx, &mut UnusedMethods::default())
            .unwrap_err();
        assert!(error.message.starts_with("Syntax error"));
        assert_eq!(Diagnostic::new("test.spin", source, &error).line, 4);

        let source = "PUB main\nDAT\nval     long float(3), 9\n";
        let mut ctx = context(source, false);
        let error = OutlineCompiler::new()
            .discover(&mut ctx, &mut UnusedMethods::default())
            .unwrap_err();
        assert_eq!(Diagnostic::new("test.spin", source, &error).line, 3);
    }

    #[test]
    fn instructions_stay_outside_the_data() {
        let source = "PUB main\nDAT\nentry   mov x, #1\n        jmp #entry\nx       long 5\n";
        let mut ctx = context(source, false);
        let mut methods = UnusedMethods::default();
        let mut compiler = OutlineCompiler::new();
        compiler.discover(&mut ctx, &mut methods).unwrap();
        compiler.finish(&mut ctx, &methods).unwrap();
        assert_eq!(&ctx.code[8..12], &[5, 0, 0, 0]);
    }

    #[test]
    fn enumerations_and_floats() {
        let source = "\
CON
  #1, RED, GREEN[2], BLUE
  RATE = 2.5
PUB main
";
        let mut ctx = context(source, false);
        OutlineCompiler::new()
            .discover(&mut ctx, &mut UnusedMethods::default())
            .unwrap();
        assert_eq!(
            crate::symbols::dump(&ctx.source, &ctx.symbols),
            vec![
                "CON, RED, 1",
                "CON, GREEN, 2",
                "CON, BLUE, 4",
                "CONF, RATE, 2.500000",
                "PUB, main, 1, 0",
            ]
        );
    }

    #[test]
    fn public_parameters_are_symbols() {
        let source = "PUB start(pin, baud) : ok\nPRI wait(ms)\n";
        let mut ctx = context(source, false);
        OutlineCompiler::new()
            .discover(&mut ctx, &mut UnusedMethods::default())
            .unwrap();
        assert_eq!(
            crate::symbols::dump(&ctx.source, &ctx.symbols),
            vec![
                "PUB, start, 1, 2",
                "PARAM, start, pin, 1, 1",
                "PARAM, start, baud, 1, 2",
            ]
        );
    }

    #[test]
    fn missing_pub_is_reported_at_end_of_file() {
        let source = "PRI helper\n";
        let mut ctx = context(source, false);
        let mut methods = UnusedMethods::default();
        let mut compiler = OutlineCompiler::new();
        compiler.discover(&mut ctx, &mut methods).unwrap();
        assert_eq!(
            compiler.finish(&mut ctx, &methods),
            Err(PositionedError::at_end("No PUB routines found", source))
        );
    }

    #[test]
    fn undefined_symbols_are_positioned() {
        let mut ctx = context("CON\n  x = y + 1\nPUB main\n", false);
        assert_eq!(
            OutlineCompiler::new().discover(&mut ctx, &mut UnusedMethods::default()),
            Err(PositionedError::new("Undefined symbol", 10..11))
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut ctx = context("CON\n  x = 1\nPUB x\n", false);
        assert_eq!(
            OutlineCompiler::new().discover(&mut ctx, &mut UnusedMethods::default()),
            Err(PositionedError::new("Expected a unique name", 16..17))
        );
    }

    #[test]
    fn syntax_errors_carry_a_position() {
        let source = "CON\n  x = = 1\nPUB main\n";
        let mut ctx = context(source, false);
        let error = OutlineCompiler::new()
            .discover(&mut ctx, &mut UnusedMethods::default())
            .unwrap_err();
        assert!(error.message.starts_with("Syntax error"));
        assert_eq!(Diagnostic::new("test.spin", source, &error).line, 2);
    }

    #[test]
    fn invalid_clock_mode_is_rejected() {
        let source = "CON\n  _clkmode = rcfast + pll16x\nPUB main\n";
        let mut ctx = context(source, false);
        let error = OutlineCompiler::new()
            .discover(&mut ctx, &mut UnusedMethods::default())
            .unwrap_err();
        assert_eq!(error.message, "Invalid _CLKMODE specified");
    }

    #[test]
    fn doc_comments_are_collected() {
        let source = "'' Blinks a pin.\n{{\nUsage: call main\n}}\nPUB main\n";
        assert_eq!(
            doc_comments(source),
            vec!["Blinks a pin.", "", "Usage: call main", ""]
        );
    }
}
