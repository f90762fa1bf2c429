use std::path::PathBuf;

use crate::{
    data::{DataSegment, DATA_LIMIT},
    source::Source,
    symbols::SymbolInfo,
};

/// Deepest allowed chain of objects including the root.
pub const OBJECT_NESTING_LIMIT: usize = 16;
/// Capacity of one object's code, children included.
pub const OBJECT_LIMIT: usize = 0x20000;
pub const LIST_LIMIT: usize = 2_000_000;
pub const DOC_LIMIT: usize = 2_000_000;
/// Interpreter header in front of the root's code.
pub const HEADER_SIZE: usize = 0x10;
pub const DEFAULT_EEPROM_SIZE: u32 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    pub frequency: u32,
    pub mode: u8,
}

impl Default for Clock {
    /// Internal fast oscillator.
    fn default() -> Self {
        Self {
            frequency: 12_000_000,
            mode: 0,
        }
    }
}

/// Entry point of an object: its first public method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirstPublic {
    /// Code offset from the start of the object.
    pub address: u16,
    /// Bytes of local variables.
    pub locals: u16,
    pub params: u16,
}

/// A fully compiled object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNode {
    pub filename: String,
    pub path: PathBuf,
    pub code: Vec<u8>,
    pub var_size: usize,
    pub first_public: FirstPublic,
    pub stack_requirement: u32,
    pub clock: Clock,
    pub children: Vec<String>,
}

impl ObjectNode {
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// Bytes the object occupies at runtime, header and stack included.
    pub fn footprint(&self) -> usize {
        HEADER_SIZE + self.code.len() + self.var_size + ((self.stack_requirement as usize) << 2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub object: usize,
    pub data: usize,
    pub list: usize,
    pub doc: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            object: OBJECT_LIMIT,
            data: DATA_LIMIT,
            list: LIST_LIMIT,
            doc: DOC_LIMIT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{buffer} buffer exceeds {limit} bytes")]
pub struct BufferFull {
    pub buffer: &'static str,
    pub limit: usize,
}

/// State of one build attempt, shared by the driver and the front end.
///
/// Per-object fields are reset by [`CompileContext::begin_object`]; the
/// whole context is dropped between the analysis and final passes.
#[derive(Debug, Default)]
pub struct CompileContext {
    pub filename: String,
    pub path: PathBuf,
    pub source: String,

    pub code: Vec<u8>,
    pub code_size: usize,
    pub var_size: usize,

    pub child_files: Vec<String>,
    pub data_files: Vec<String>,
    pub children: Vec<ObjectNode>,
    pub data: DataSegment,

    pub symbols: Vec<SymbolInfo>,
    pub clock: Clock,
    pub stack_requirement: u32,
    pub first_public: FirstPublic,

    pub final_pass: bool,
    pub compile_index: usize,
    pub limits: Limits,

    pub list: String,
    pub doc: Option<String>,
}

impl CompileContext {
    pub fn new(final_pass: bool, doc: bool) -> Self {
        let limits = Limits::default();
        Self {
            final_pass,
            limits,
            data: DataSegment::new(limits.data),
            doc: doc.then(String::new),
            ..Self::default()
        }
    }

    /// Makes `source` the current object and forgets everything derived
    /// from the previous one.
    pub fn begin_object(&mut self, filename: &str, compile_index: usize, source: Source) {
        self.filename = filename.to_owned();
        self.path = source.path;
        self.source = source.text;
        self.compile_index = compile_index;

        self.code.clear();
        self.code_size = 0;
        self.var_size = 0;
        self.child_files.clear();
        self.data_files.clear();
        self.children.clear();
        self.data.clear();
        self.symbols.clear();
        self.clock = Clock::default();
        self.stack_requirement = 0;
        self.first_public = FirstPublic::default();
    }

    pub fn object_node(&self) -> ObjectNode {
        ObjectNode {
            filename: self.filename.clone(),
            path: self.path.clone(),
            code: self.code.clone(),
            var_size: self.var_size,
            first_public: self.first_public,
            stack_requirement: self.stack_requirement,
            clock: self.clock,
            children: self.child_files.clone(),
        }
    }

    pub fn append_list(&mut self, text: &str) -> Result<(), BufferFull> {
        if self.list.len() + text.len() > self.limits.list {
            return Err(BufferFull {
                buffer: "listing",
                limit: self.limits.list,
            });
        }
        self.list.push_str(text);
        Ok(())
    }

    /// No-op unless documentation was requested for this build.
    pub fn append_doc(&mut self, text: &str) -> Result<(), BufferFull> {
        let limit = self.limits.doc;
        let Some(doc) = self.doc.as_mut() else {
            return Ok(());
        };
        if doc.len() + text.len() > limit {
            return Err(BufferFull {
                buffer: "documentation",
                limit,
            });
        }
        doc.push_str(text);
        Ok(())
    }
}
